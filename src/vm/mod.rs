//! Stack-based virtual machine for compiled Kaede modules.
//!
//! [`ExecutorContext`] is the entry point: it owns configuration, the
//! builtin table, the memory manager and the JIT hook, and builds a fresh
//! [`Vm`] for each execution.

pub mod builtins;
pub mod context;
pub mod memory;
pub mod ops;
pub mod value;
#[allow(clippy::module_inception)]
pub mod vm;
mod vm_calls;
pub mod vm_exceptions;
mod vm_objects;

pub use builtins::{Output, Stdlib};
pub use context::{ExecutorConfig, ExecutorContext, FunctionProfile, ProfilingData};
pub use memory::{MemoryManager, MemoryStats, TrackingAllocator};
pub use value::Value;
pub use vm::{CallFrame, ExecutionMode, ExecutionState, Runtime, Vm};
