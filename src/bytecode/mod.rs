//! Bytecode compiler for Kaede.
//!
//! # Architecture
//!
//! - `instruction`: opcode definitions for the instruction set
//! - `chunk`: instruction emitter, constant pool, encoder and decoder
//! - `function`: compiled functions, classes and modules
//! - `compiler`: transforms the AST into bytecode
//! - `cfg`: basic-block decomposition
//! - `optimizer`: constant folding and dead-block elimination
//! - `format`: the portable binary module format
//! - `disassembler`: debug output for bytecode inspection
//! - `context`: compilation options, statistics and cache

pub mod cfg;
pub mod chunk;
pub mod compiler;
mod compiler_decls;
mod compiler_exprs;
mod compiler_stmts;
pub mod context;
pub mod disassembler;
pub mod format;
pub mod function;
pub mod instruction;
pub mod optimizer;

pub use cfg::BasicBlock;
pub use chunk::{Chunk, Constant, LineEntry};
pub use compiler::{generate, CompileResult, Compiler};
pub use context::{CompilationStats, CompilerContext, CompilerOptions};
pub use disassembler::{disassemble_function, disassemble_module};
pub use format::{compile_to_bytecode, load_bytecode};
pub use function::{ClassInfo, Function, Module, TryRegion, MODULE_INIT};
pub use instruction::{Instruction, OpCode};
pub use optimizer::{OptimizationStats, Optimizer, Pass};
