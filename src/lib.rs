//! Kaede: a small class-based language with a bytecode toolchain.
//!
//! This is the library root that exports all modules.
//!
//! # Pipeline
//!
//! - **Lexer**: source text to tokens, including `INDENT`/`DEDENT`
//! - **Parser**: tokens to an AST, recovering to report every syntax error
//! - **Compiler**: AST to a [`Module`] of bytecode functions, optionally
//!   optimized, and to the portable binary form
//! - **VM**: executes a module with explicit call frames and exception
//!   handling; a JIT hook profiles hot functions

// Allow some clippy lints that are stylistic and not critical
#![allow(clippy::module_inception)]
#![allow(clippy::result_large_err)]
#![allow(clippy::new_without_default)]
#![allow(clippy::too_many_arguments)]

pub mod ast;
pub mod bytecode;
pub mod error;
pub mod jit;
pub mod lexer;
pub mod parser;
pub mod span;
pub mod vm;

pub use bytecode::{
    compile_to_bytecode, load_bytecode, CompilationStats, CompilerContext, CompilerOptions, Module,
};
pub use error::KaedeError;
pub use vm::{ExecutorConfig, ExecutorContext, ProfilingData, Value};

/// Unit name used when source text does not come from a file.
pub const DEFAULT_UNIT: &str = "<input>";

/// Tokenize source code.
pub fn tokenize(source: &str) -> Result<Vec<lexer::Token>, KaedeError> {
    lexer::tokenize(source).map_err(|err| KaedeError::lexer(DEFAULT_UNIT, err))
}

/// Parse source code into an AST without compiling it.
pub fn parse(source: &str) -> Result<ast::Program, KaedeError> {
    let tokens = tokenize(source)?;
    parser::parse(tokens).map_err(|err| KaedeError::parser(DEFAULT_UNIT, err))
}

/// Compile source code with the default options (optimization level 1).
pub fn compile_source(source: &str, module_name: &str) -> Result<Module, KaedeError> {
    CompilerContext::default().compile(source, module_name)
}

/// Execute a compiled module in a fresh executor context.
pub fn execute_module(module: &Module) -> Result<Value, KaedeError> {
    ExecutorContext::default()
        .execute_module(module)
        .map_err(|err| KaedeError::runtime(&module.name, err))
}

/// Compile and execute source code, returning the program's result.
pub fn run(source: &str) -> Result<Value, KaedeError> {
    let module = compile_source(source, DEFAULT_UNIT)?;
    execute_module(&module)
}

/// Compile and execute source code, collecting everything it prints.
pub fn run_captured(source: &str) -> Result<(Value, Vec<String>), KaedeError> {
    let module = compile_source(source, DEFAULT_UNIT)?;
    let mut executor = ExecutorContext::default().with_output(vm::Output::capture());
    let value = executor
        .execute_module(&module)
        .map_err(|err| KaedeError::runtime(&module.name, err))?;
    Ok((value, executor.take_output()))
}

/// Compilation statistics as a JSON diagnostics map.
pub fn get_compilation_stats(compiler: &CompilerContext) -> serde_json::Value {
    serde_json::to_value(compiler.stats()).unwrap_or_default()
}

/// Profiling data as a JSON diagnostics map.
pub fn get_profiling_data(executor: &ExecutorContext) -> serde_json::Value {
    serde_json::to_value(executor.profiling_data()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_arithmetic() {
        assert_eq!(run("1 + 2 * 3").unwrap(), Value::Int(7));
    }

    #[test]
    fn test_errors_carry_the_unit() {
        let err = compile_source("let = 1\n", "broken.kd").unwrap_err();
        assert_eq!(err.unit(), Some("broken.kd"));
        assert_eq!(err.kind(), "syntax");
    }

    #[test]
    fn test_diagnostics_maps() {
        let mut compiler = CompilerContext::default();
        compiler.compile("print(1)", "m").unwrap();
        let stats = get_compilation_stats(&compiler);
        assert!(stats.is_object());

        let executor = ExecutorContext::default();
        let profile = get_profiling_data(&executor);
        assert_eq!(profile["executions"], 0);
    }
}
