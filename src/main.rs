//! Kaede CLI: run source files, build and execute binary modules, and
//! inspect each stage of the pipeline.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kaede::bytecode::disassemble_module;
use kaede::{
    compile_to_bytecode, load_bytecode, CompilerContext, CompilerOptions, ExecutorConfig,
    ExecutorContext, KaedeError, Module,
};

/// Extension of binary modules written by `kaede build`.
const BINARY_EXTENSION: &str = "kbc";

/// Kaede - a small class-based language with a bytecode VM
#[derive(Parser)]
#[command(name = "kaede")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log at debug level (KAEDE_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run a source file
    Run {
        file: PathBuf,

        /// Optimization level (0 disables the optimizer)
        #[arg(short = 'O', long = "opt-level", default_value_t = 1)]
        opt_level: u8,

        #[command(flatten)]
        exec: ExecOptions,
    },

    /// Compile a source file to a binary module
    Build {
        file: PathBuf,

        /// Output path (defaults to the input with a .kbc extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(short = 'O', long = "opt-level", default_value_t = 1)]
        opt_level: u8,
    },

    /// Run a binary module
    Exec {
        file: PathBuf,

        #[command(flatten)]
        exec: ExecOptions,
    },

    /// Print the bytecode of a source file or binary module
    Disasm {
        file: PathBuf,

        #[arg(short = 'O', long = "opt-level", default_value_t = 1)]
        opt_level: u8,
    },

    /// Print the token stream of a source file
    Tokens { file: PathBuf },

    /// Print the syntax tree of a source file
    Ast { file: PathBuf },
}

#[derive(Args)]
struct ExecOptions {
    /// JSON file with executor settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum depth of the call stack
    #[arg(long, env = "KAEDE_MAX_CALL_DEPTH")]
    max_call_depth: Option<usize>,

    /// Calls after which a function counts as hot
    #[arg(long, env = "KAEDE_JIT_THRESHOLD")]
    jit_threshold: Option<u64>,

    /// Disable the JIT hook
    #[arg(long)]
    no_jit: bool,

    /// Print compilation statistics and profiling data as JSON
    #[arg(long)]
    stats: bool,
}

impl ExecOptions {
    /// Config file first, then flags and environment on top.
    fn executor_config(&self) -> Result<ExecutorConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("failed to read config '{}'", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("invalid config '{}'", path.display()))?
            }
            None => ExecutorConfig::default(),
        };
        if let Some(depth) = self.max_call_depth {
            config.max_call_depth = depth;
        }
        if let Some(threshold) = self.jit_threshold {
            config.jit_threshold = threshold;
        }
        if self.no_jit {
            config.enable_jit = false;
        }
        Ok(config)
    }
}

/// A pipeline error flattened for reporting.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
struct Diagnostic {
    kind: String,
    message: String,
    location: Option<String>,
}

impl From<KaedeError> for Diagnostic {
    fn from(err: KaedeError) -> Self {
        let location = match (err.unit(), err.span()) {
            (Some(unit), Some(span)) if span.column > 0 => {
                Some(format!("{}:{}:{}", unit, span.line, span.column))
            }
            (Some(unit), Some(span)) if span.line > 0 => Some(format!("{}:{}", unit, span.line)),
            (Some(unit), _) => Some(unit.to_string()),
            _ => None,
        };
        let message = match &err {
            KaedeError::Lexer { source, .. } => source.to_string(),
            KaedeError::Parser { source, .. } => source.to_string(),
            KaedeError::Compile { source, .. } => source.to_string(),
            KaedeError::Runtime { source, .. } => match &source.function {
                Some(function) => format!("{} (in '{}')", source.kind, function),
                None => source.kind.to_string(),
            },
            other => other.to_string(),
        };
        Self {
            kind: err.kind(),
            message,
            location,
        }
    }
}

/// Lift a pipeline result into the CLI's error type.
fn check<T>(result: Result<T, KaedeError>) -> Result<T> {
    result.map_err(|err| Diagnostic::from(err).into())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            file,
            opt_level,
            exec,
        } => cmd_run(&file, opt_level, &exec),
        Commands::Build {
            file,
            output,
            opt_level,
        } => cmd_build(&file, output, opt_level),
        Commands::Exec { file, exec } => cmd_exec(&file, &exec),
        Commands::Disasm { file, opt_level } => cmd_disasm(&file, opt_level),
        Commands::Tokens { file } => cmd_tokens(&file),
        Commands::Ast { file } => cmd_ast(&file),
    };

    if let Err(err) = result {
        report(&err);
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_env("KAEDE_LOG").unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .init();
}

fn report(err: &anyhow::Error) {
    match err.downcast_ref::<Diagnostic>() {
        Some(diagnostic) => {
            eprintln!(
                "{}: {}",
                format!("error[{}]", diagnostic.kind).red().bold(),
                diagnostic.message
            );
            if let Some(location) = &diagnostic.location {
                eprintln!("  {} {}", "-->".blue().bold(), location);
            }
        }
        None => eprintln!("{}: {:#}", "error".red().bold(), err),
    }
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read '{}'", path.display()))
}

fn unit_name(path: &Path) -> String {
    path.display().to_string()
}

fn compile_file(path: &Path, opt_level: u8) -> Result<(CompilerContext, Module)> {
    let source = read_source(path)?;
    let mut compiler = CompilerContext::new(CompilerOptions {
        optimization_level: opt_level,
        ..CompilerOptions::default()
    });
    let module = check(compiler.compile(&source, &unit_name(path)))?;
    Ok((compiler, module))
}

fn load_binary(path: &Path) -> Result<Module> {
    let data = fs::read(path).with_context(|| format!("failed to read '{}'", path.display()))?;
    check(load_bytecode(&data).map_err(KaedeError::from))
}

fn execute(module: &Module, exec: &ExecOptions, compiler: Option<&CompilerContext>) -> Result<()> {
    let mut executor = ExecutorContext::new(exec.executor_config()?);
    let result = executor
        .execute_module(module)
        .map_err(|err| KaedeError::runtime(&module.name, err));
    if exec.stats {
        let stats = serde_json::json!({
            "compilation": compiler.map(kaede::get_compilation_stats),
            "profiling": kaede::get_profiling_data(&executor),
        });
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    check(result).map(|_| ())
}

fn cmd_run(file: &Path, opt_level: u8, exec: &ExecOptions) -> Result<()> {
    let (compiler, module) = compile_file(file, opt_level)?;
    execute(&module, exec, Some(&compiler))
}

fn cmd_build(file: &Path, output: Option<PathBuf>, opt_level: u8) -> Result<()> {
    let (_, module) = compile_file(file, opt_level)?;
    let bytes = check(compile_to_bytecode(&module).map_err(KaedeError::from))?;
    let output = output.unwrap_or_else(|| file.with_extension(BINARY_EXTENSION));
    fs::write(&output, &bytes)
        .with_context(|| format!("failed to write '{}'", output.display()))?;
    info!(path = %output.display(), bytes = bytes.len(), "wrote binary module");
    println!(
        "{} {} ({} bytes)",
        "Built".green().bold(),
        output.display(),
        bytes.len()
    );
    Ok(())
}

fn cmd_exec(file: &Path, exec: &ExecOptions) -> Result<()> {
    let module = load_binary(file)?;
    execute(&module, exec, None)
}

fn cmd_disasm(file: &Path, opt_level: u8) -> Result<()> {
    let module = if file.extension().is_some_and(|ext| ext == BINARY_EXTENSION) {
        load_binary(file)?
    } else {
        compile_file(file, opt_level)?.1
    };
    print!("{}", disassemble_module(&module));
    Ok(())
}

fn cmd_tokens(file: &Path) -> Result<()> {
    let source = read_source(file)?;
    let tokens = check(
        kaede::lexer::tokenize(&source).map_err(|err| KaedeError::lexer(unit_name(file), err)),
    )?;
    for token in tokens {
        println!(
            "{:>4}:{:<3} {:<14} {}",
            token.span.line,
            token.span.column,
            format!("{:?}", token.kind),
            token.lexeme
        );
    }
    Ok(())
}

fn cmd_ast(file: &Path) -> Result<()> {
    let source = read_source(file)?;
    let unit = unit_name(file);
    let tokens = check(
        kaede::lexer::tokenize(&source).map_err(|err| KaedeError::lexer(unit.clone(), err)),
    )?;
    let program = check(kaede::parser::parse(tokens).map_err(|err| KaedeError::parser(unit, err)))?;
    println!("{:#?}", program);
    Ok(())
}
