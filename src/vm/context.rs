//! Executor context: configuration and the services a VM borrows, kept
//! across executions so profiles accumulate.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bytecode::{Function, Module};
use crate::error::RuntimeError;
use crate::jit::{FunctionKey, JitHook, JitStats, JIT_THRESHOLD};
use crate::vm::builtins::{Output, Stdlib};
use crate::vm::memory::{MemoryManager, MemoryStats, TrackingAllocator};
use crate::vm::value::Value;
use crate::vm::vm::{Runtime, Vm};

pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_call_depth: usize,
    pub jit_threshold: u64,
    pub enable_jit: bool,
    /// Cap on live bytes handed out by `ALLOC`.
    pub memory_limit: Option<usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            jit_threshold: JIT_THRESHOLD,
            enable_jit: true,
            memory_limit: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FunctionProfile {
    pub calls: u64,
    pub total_time_us: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfilingData {
    pub executions: u64,
    pub uncaught_errors: u64,
    /// Keyed by `module::function`.
    pub functions: BTreeMap<String, FunctionProfile>,
    pub jit: JitStats,
    pub memory: MemoryStats,
}

pub struct ExecutorContext {
    config: ExecutorConfig,
    memory: Arc<dyn MemoryManager>,
    stdlib: Stdlib,
    jit: JitHook,
    output: Output,
    executions: u64,
    uncaught_errors: u64,
    functions: BTreeMap<String, FunctionProfile>,
}

impl Default for ExecutorContext {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl ExecutorContext {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            memory: Arc::new(TrackingAllocator::new(config.memory_limit)),
            jit: JitHook::new(config.jit_threshold),
            config,
            stdlib: Stdlib::new(),
            output: Output::default(),
            executions: 0,
            uncaught_errors: 0,
            functions: BTreeMap::new(),
        }
    }

    /// Replace the allocator behind `ALLOC`/`FREE`.
    pub fn with_memory_manager(mut self, memory: Arc<dyn MemoryManager>) -> Self {
        self.memory = memory;
        self
    }

    /// Share a JIT hook, and with it the hot-function table, with other
    /// contexts.
    pub fn with_jit(mut self, jit: JitHook) -> Self {
        self.jit = jit;
        self
    }

    pub fn with_output(mut self, output: Output) -> Self {
        self.output = output;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn stdlib_mut(&mut self) -> &mut Stdlib {
        &mut self.stdlib
    }

    pub fn jit(&self) -> &JitHook {
        &self.jit
    }

    /// Lines printed since the last call, when output is captured.
    pub fn take_output(&mut self) -> Vec<String> {
        self.output.take()
    }

    pub fn execute_module(&mut self, module: &Module) -> Result<Value, RuntimeError> {
        debug!(module = %module.name, "executing module");
        let result = self.vm(module).execute_module();
        self.finish(module, &result);
        result
    }

    /// Call one function of `module` with positional arguments.
    pub fn execute_function(
        &mut self,
        module: &Module,
        function: Arc<Function>,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        debug!(function = %function.name, args = args.len(), "executing function");
        let result = self.vm(module).execute_function(function, args);
        self.finish(module, &result);
        result
    }

    pub fn profiling_data(&self) -> ProfilingData {
        ProfilingData {
            executions: self.executions,
            uncaught_errors: self.uncaught_errors,
            functions: self.functions.clone(),
            jit: self.jit.stats(),
            memory: self.memory.stats(),
        }
    }

    fn vm<'a>(&'a mut self, module: &'a Module) -> Vm<'a> {
        Vm::new(
            module,
            Runtime {
                stdlib: &self.stdlib,
                memory: &*self.memory,
                jit: self.config.enable_jit.then_some(&self.jit),
                output: &mut self.output,
                max_call_depth: self.config.max_call_depth,
            },
        )
    }

    fn finish(&mut self, module: &Module, result: &Result<Value, RuntimeError>) {
        self.executions += 1;
        if let Err(err) = result {
            self.uncaught_errors += 1;
            warn!(error = %err, module = %module.name, "execution failed");
        }
        for function in module.functions.values() {
            let calls = function.call_count();
            if calls == 0 {
                continue;
            }
            self.functions.insert(
                FunctionKey::new(module.name.as_str(), function.name.as_str()).to_string(),
                FunctionProfile {
                    calls,
                    total_time_us: function.exec_time().as_micros() as u64,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let config: ExecutorConfig = serde_json::from_str(r#"{"max_call_depth": 8}"#).unwrap();
        assert_eq!(config.max_call_depth, 8);
        assert_eq!(config.jit_threshold, JIT_THRESHOLD);
        assert!(config.enable_jit);
        assert_eq!(config.memory_limit, None);
    }

    #[test]
    fn test_empty_module_returns_null() {
        let mut context = ExecutorContext::default();
        let module = Module::new("empty");
        assert_eq!(context.execute_module(&module).unwrap(), Value::Null);
        assert_eq!(context.profiling_data().executions, 1);
    }
}
