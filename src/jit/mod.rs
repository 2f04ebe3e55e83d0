//! JIT hook for Kaede.
//!
//! # Architecture
//!
//! 1. Functions always start on the bytecode VM
//! 2. Every call is recorded in a shared [`Profiler`]
//! 3. When a function crosses the threshold it is analyzed
//! 4. If it qualifies, it is handed to a pluggable [`NativeCompiler`]
//!
//! The default compiler, [`InterpreterFallback`], produces nothing, so hot
//! functions keep running on the interpreter. The profiler table is shared
//! behind one lock: counting a call, deciding the function is hot and caching
//! its native body happen under the same guard.

mod analyzer;
mod profiler;

pub use analyzer::{AnalysisResult, Analyzer};
pub use profiler::{FunctionKey, Profiler, JIT_THRESHOLD};

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::bytecode::Function;

/// A native body produced for a hot function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeCode {
    pub function: FunctionKey,
    pub code: Vec<u8>,
}

/// The "compile to native" step. Returning `None` keeps the function on the
/// interpreter.
pub trait NativeCompiler: Send + Sync {
    fn name(&self) -> &'static str;

    fn compile(
        &self,
        key: &FunctionKey,
        function: &Function,
        analysis: &AnalysisResult,
    ) -> Option<NativeCode>;
}

/// Compiles nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct InterpreterFallback;

impl NativeCompiler for InterpreterFallback {
    fn name(&self) -> &'static str {
        "interpreter"
    }

    fn compile(
        &self,
        _key: &FunctionKey,
        _function: &Function,
        _analysis: &AnalysisResult,
    ) -> Option<NativeCode> {
        None
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JitStats {
    pub threshold: u64,
    pub calls_recorded: u64,
    pub hot_functions: Vec<String>,
    pub functions_compiled: usize,
}

/// Cloning a hook shares its profiler table.
#[derive(Clone)]
pub struct JitHook {
    profiler: Arc<Mutex<Profiler>>,
    analyzer: Analyzer,
    compiler: Arc<dyn NativeCompiler>,
}

impl Default for JitHook {
    fn default() -> Self {
        Self::new(JIT_THRESHOLD)
    }
}

impl JitHook {
    pub fn new(threshold: u64) -> Self {
        Self::with_compiler(threshold, Arc::new(InterpreterFallback))
    }

    pub fn with_compiler(threshold: u64, compiler: Arc<dyn NativeCompiler>) -> Self {
        Self {
            profiler: Arc::new(Mutex::new(Profiler::new(threshold))),
            analyzer: Analyzer::new(),
            compiler,
        }
    }

    /// Count a call to `function` of `module`. Returns the cached native
    /// body, if one exists.
    pub fn record_call(&self, module: &str, function: &Function) -> Option<Arc<NativeCode>> {
        let key = FunctionKey::new(module, function.name.as_str());
        let mut profiler = self.profiler.lock();
        if !profiler.record_call(&key) {
            return profiler.compiled(&key);
        }

        info!(
            function = %key,
            threshold = profiler.threshold(),
            "function became hot"
        );
        let analysis = self.analyzer.analyze(function);
        if !analysis.can_jit {
            debug!(
                function = %key,
                reason = analysis.reason.as_deref().unwrap_or(""),
                "staying on the interpreter"
            );
            return None;
        }
        let native = self.compiler.compile(&key, function, &analysis)?;
        debug!(function = %key, compiler = self.compiler.name(), "compiled native body");
        Some(profiler.insert_compiled(native))
    }

    pub fn is_hot(&self, module: &str, function_name: &str) -> bool {
        self.profiler
            .lock()
            .is_hot(&FunctionKey::new(module, function_name))
    }

    pub fn stats(&self) -> JitStats {
        let profiler = self.profiler.lock();
        JitStats {
            threshold: profiler.threshold(),
            calls_recorded: profiler.total_calls(),
            hot_functions: profiler.hot_functions().map(ToString::to_string).collect(),
            functions_compiled: profiler.compiled_count(),
        }
    }

    pub fn reset(&self) {
        self.profiler.lock().reset();
    }
}

impl std::fmt::Debug for JitHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitHook")
            .field("compiler", &self.compiler.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Chunk, Constant, OpCode};

    /// Hands back the bytecode itself as the "native" body.
    struct Echo;

    impl NativeCompiler for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn compile(
            &self,
            key: &FunctionKey,
            function: &Function,
            _analysis: &AnalysisResult,
        ) -> Option<NativeCode> {
            Some(NativeCode {
                function: key.clone(),
                code: function.code.clone(),
            })
        }
    }

    fn constant_function(name: &str, value: i64) -> Function {
        let mut chunk = Chunk::new();
        let index = chunk.add_constant(Constant::Int(value));
        chunk.write_op_operand(OpCode::PushConst, index, 1);
        chunk.write_op(OpCode::Ret, 1);
        let mut function = Function::new(name);
        function.constants = chunk.constants;
        function.set_code(chunk.code, chunk.lines);
        function
    }

    fn numeric_function() -> Function {
        constant_function("five", 5)
    }

    #[test]
    fn test_fallback_never_compiles() {
        let hook = JitHook::new(3);
        let function = numeric_function();
        for _ in 0..5 {
            assert!(hook.record_call("m", &function).is_none());
        }
        assert!(hook.is_hot("m", "five"));
        let stats = hook.stats();
        assert_eq!(stats.calls_recorded, 5);
        assert_eq!(stats.functions_compiled, 0);
        assert_eq!(stats.hot_functions, vec!["m::five".to_string()]);
    }

    #[test]
    fn test_pluggable_compiler_caches_native_code() {
        let hook = JitHook::with_compiler(2, Arc::new(Echo));
        let function = numeric_function();
        assert!(hook.record_call("m", &function).is_none());
        let native = hook.record_call("m", &function).unwrap();
        assert_eq!(native.code, function.code);
        assert_eq!(native.function, FunctionKey::new("m", "five"));
        assert!(hook.record_call("m", &function).is_some());
        assert_eq!(hook.stats().functions_compiled, 1);
    }

    #[test]
    fn test_same_name_in_two_modules_stays_separate() {
        let hook = JitHook::with_compiler(1, Arc::new(Echo));
        let first = constant_function("f", 1);
        let second = constant_function("f", 2);
        assert_ne!(first.constants, second.constants);

        let from_first = hook.record_call("first", &first).unwrap();
        assert!(hook.record_call("first", &first).is_some());
        let from_second = hook.record_call("second", &second).unwrap();

        assert_eq!(from_first.function, FunctionKey::new("first", "f"));
        assert_eq!(from_second.function, FunctionKey::new("second", "f"));
        assert_eq!(hook.stats().functions_compiled, 2);
        assert!(hook.is_hot("second", "f"));
        assert!(!hook.is_hot("third", "f"));
    }

    #[test]
    fn test_clones_share_the_table() {
        let hook = JitHook::new(2);
        let other = hook.clone();
        let function = numeric_function();
        hook.record_call("m", &function);
        other.record_call("m", &function);
        assert!(hook.is_hot("m", "five"));
    }

    #[test]
    fn test_table_is_shared_across_threads() {
        let hook = JitHook::new(1000);
        let function = Arc::new(numeric_function());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let hook = hook.clone();
                let function = function.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        hook.record_call("m", &function);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let stats = hook.stats();
        assert_eq!(stats.calls_recorded, 1000);
        assert_eq!(stats.hot_functions, vec!["m::five".to_string()]);
    }
}
