//! Compilation options, statistics and the per-caller compilation cache.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bytecode::compiler::generate;
use crate::bytecode::function::Module;
use crate::bytecode::optimizer::{OptimizationStats, Optimizer, DEFAULT_MAX_PASSES};
use crate::error::KaedeError;
use crate::lexer::tokenize;
use crate::parser::parse;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// 0 disables the optimizer.
    pub optimization_level: u8,
    pub max_passes: usize,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            optimization_level: 1,
            max_passes: DEFAULT_MAX_PASSES,
        }
    }
}

/// Running totals over every compilation done through one context.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompilationStats {
    pub modules_compiled: usize,
    pub functions_compiled: usize,
    pub bytecode_bytes: usize,
    pub cache_hits: usize,
    pub optimizer_iterations: usize,
    pub instructions_removed: usize,
    pub pass_changes: BTreeMap<String, usize>,
}

impl CompilationStats {
    fn record(&mut self, module: &Module, optimization: Option<&OptimizationStats>) {
        self.modules_compiled += 1;
        self.functions_compiled += module.functions.len();
        self.bytecode_bytes += module.functions.values().map(|f| f.code.len()).sum::<usize>();
        if let Some(stats) = optimization {
            self.optimizer_iterations += stats.iterations;
            self.instructions_removed += stats
                .instructions_before
                .saturating_sub(stats.instructions_after);
            for (pass, count) in &stats.pass_changes {
                *self.pass_changes.entry(pass.clone()).or_insert(0) += count;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    module: String,
    source: String,
    level: u8,
}

/// Compiles source text, caching modules by name, source and optimization level.
#[derive(Debug, Default)]
pub struct CompilerContext {
    pub options: CompilerOptions,
    stats: CompilationStats,
    cache: HashMap<CacheKey, Module>,
}

impl CompilerContext {
    pub fn new(options: CompilerOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Tokenize, parse, generate and (at level 1 or above) optimize.
    pub fn compile(&mut self, source: &str, module_name: &str) -> Result<Module, KaedeError> {
        let key = CacheKey {
            module: module_name.to_string(),
            source: source.to_string(),
            level: self.options.optimization_level,
        };
        if let Some(module) = self.cache.get(&key) {
            self.stats.cache_hits += 1;
            debug!(module = module_name, "compilation cache hit");
            return Ok(module.clone());
        }

        let tokens = tokenize(source).map_err(|err| KaedeError::lexer(module_name, err))?;
        let program = parse(tokens).map_err(|err| KaedeError::parser(module_name, err))?;
        let mut module =
            generate(&program, module_name).map_err(|err| KaedeError::compile(module_name, err))?;
        let optimization = if self.options.optimization_level >= 1 {
            let optimizer = Optimizer::new(self.options.max_passes);
            Some(optimizer.optimize_module(&mut module)?)
        } else {
            None
        };

        self.stats.record(&module, optimization.as_ref());
        self.cache.insert(key, module.clone());
        Ok(module)
    }

    pub fn stats(&self) -> &CompilationStats {
        &self.stats
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hits_are_counted() {
        let mut context = CompilerContext::default();
        context.compile("let x = 1 + 2\n", "a").unwrap();
        context.compile("let x = 1 + 2\n", "a").unwrap();
        context.compile("let x = 1 + 2\n", "b").unwrap();
        let stats = context.stats();
        assert_eq!(stats.modules_compiled, 2);
        assert_eq!(stats.cache_hits, 1);
        assert!(stats.bytecode_bytes > 0);
    }

    #[test]
    fn test_level_zero_skips_the_optimizer() {
        let mut context = CompilerContext::new(CompilerOptions {
            optimization_level: 0,
            ..CompilerOptions::default()
        });
        context.compile("1 + 2\n", "m").unwrap();
        assert_eq!(context.stats().optimizer_iterations, 0);
    }

    #[test]
    fn test_errors_carry_the_unit_name() {
        let mut context = CompilerContext::default();
        let err = context.compile("let = 1\n", "broken.kd").unwrap_err();
        assert_eq!(err.unit(), Some("broken.kd"));
        assert_eq!(err.kind(), "syntax");
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: CompilerOptions = serde_json::from_str(r#"{"optimization_level": 0}"#).unwrap();
        assert_eq!(options.max_passes, 10);
        assert_eq!(options.optimization_level, 0);
    }
}
