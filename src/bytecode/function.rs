//! Compiled functions, classes and modules.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use indexmap::IndexMap;

use crate::bytecode::cfg::BasicBlock;
use crate::bytecode::chunk::{decode, line_at, Constant, LineEntry};
use crate::bytecode::instruction::{Instruction, OpCode};
use crate::error::FormatError;
use crate::jit::NativeCode;

/// Name of the function holding a module's top-level code.
pub const MODULE_INIT: &str = "__init__";

/// A protected region, as byte offsets: the `SETUP_TRY` that opens it,
/// the matching `END_TRY`, and the handler entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryRegion {
    pub start: usize,
    pub end: usize,
    pub handler: usize,
}

/// A compiled function.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    /// Parameters without a default; callers must pass at least this many.
    pub required_params: usize,
    pub locals: Vec<String>,
    pub code: Vec<u8>,
    pub constants: Vec<Constant>,
    pub lines: Vec<LineEntry>,
    pub blocks: Option<Vec<BasicBlock>>,
    /// Body handed back by the JIT hook once the function ran hot.
    native: OnceLock<Arc<NativeCode>>,
    call_count: AtomicU64,
    exec_nanos: AtomicU64,
    try_regions: OnceLock<Vec<TryRegion>>,
}

impl Clone for Function {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            params: self.params.clone(),
            required_params: self.required_params,
            locals: self.locals.clone(),
            code: self.code.clone(),
            constants: self.constants.clone(),
            lines: self.lines.clone(),
            blocks: self.blocks.clone(),
            native: self.native.clone(),
            call_count: AtomicU64::new(self.call_count()),
            exec_nanos: AtomicU64::new(self.exec_nanos.load(Ordering::Relaxed)),
            try_regions: OnceLock::new(),
        }
    }
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            required_params: 0,
            locals: Vec::new(),
            code: Vec::new(),
            constants: Vec::new(),
            lines: Vec::new(),
            blocks: None,
            native: OnceLock::new(),
            call_count: AtomicU64::new(0),
            exec_nanos: AtomicU64::new(0),
            try_regions: OnceLock::new(),
        }
    }

    /// Builder-style constructor used by tests and the loader.
    pub fn with_code(
        name: impl Into<String>,
        params: Vec<String>,
        code: Vec<u8>,
        constants: Vec<Constant>,
    ) -> Self {
        let mut function = Self::new(name);
        function.required_params = params.len();
        function.params = params;
        function.code = code;
        function.constants = constants;
        function
    }

    /// Replace the instruction stream, dropping everything derived from it.
    pub fn set_code(&mut self, code: Vec<u8>, lines: Vec<LineEntry>) {
        self.code = code;
        self.lines = lines;
        self.blocks = None;
        self.native = OnceLock::new();
        self.try_regions = OnceLock::new();
    }

    pub fn instructions(&self) -> Result<Vec<(usize, Instruction)>, FormatError> {
        decode(&self.code, &self.lines)
    }

    pub fn line_at(&self, offset: usize) -> u32 {
        line_at(&self.lines, offset)
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.params.iter().any(|p| p == name) || self.locals.iter().any(|l| l == name)
    }

    /// Protected regions, matched statically from the instruction stream.
    /// Malformed streams yield no regions; the VM reports those when it
    /// reaches the offending `SETUP_TRY`.
    pub fn try_regions(&self) -> &[TryRegion] {
        self.try_regions.get_or_init(|| {
            let Ok(instructions) = self.instructions() else {
                return Vec::new();
            };
            let mut open = Vec::new();
            let mut regions = Vec::new();
            for (index, (offset, instr)) in instructions.iter().enumerate() {
                match instr.opcode {
                    OpCode::SetupTry => open.push(*offset),
                    OpCode::EndTry => {
                        let Some(start) = open.pop() else { continue };
                        // END_TRY; JMP past the handler; handler
                        let handler = instructions
                            .get(index + 2)
                            .map(|(o, _)| *o)
                            .unwrap_or(self.code.len());
                        regions.push(TryRegion {
                            start,
                            end: *offset,
                            handler,
                        });
                    }
                    _ => {}
                }
            }
            regions.sort_by_key(|r| r.start);
            regions
        })
    }

    pub fn region_for(&self, setup_offset: usize) -> Option<TryRegion> {
        let regions = self.try_regions();
        regions
            .binary_search_by_key(&setup_offset, |r| r.start)
            .ok()
            .map(|i| regions[i])
    }

    pub fn native(&self) -> Option<&Arc<NativeCode>> {
        self.native.get()
    }

    /// Attach a native body. Returns false if one was already attached.
    pub fn attach_native(&self, code: Arc<NativeCode>) -> bool {
        self.native.set(code).is_ok()
    }

    /// Bump the call counter, returning the new count.
    pub fn record_call(&self) -> u64 {
        self.call_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn add_exec_time(&self, elapsed: Duration) {
        self.exec_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn exec_time(&self) -> Duration {
        Duration::from_nanos(self.exec_nanos.load(Ordering::Relaxed))
    }
}

/// Compile-time description of a class or struct.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassInfo {
    pub name: String,
    pub base: Option<String>,
    /// Instance fields with their constant defaults, in declaration order.
    pub fields: IndexMap<String, Constant>,
    /// Method names; each is compiled as the function `Class.method`.
    pub methods: Vec<String>,
    pub is_struct: bool,
}

impl ClassInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base: None,
            fields: IndexMap::new(),
            methods: Vec::new(),
            is_struct: false,
        }
    }

    pub fn method_function(&self, method: &str) -> String {
        format!("{}.{}", self.name, method)
    }
}

/// The unit produced by one compilation.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub name: String,
    pub functions: IndexMap<String, Arc<Function>>,
    /// Module globals with a constant initial value.
    pub globals: IndexMap<String, Constant>,
    pub classes: IndexMap<String, Arc<ClassInfo>>,
    pub namespaces: Vec<String>,
    pub imports: Vec<String>,
    pub exports: Vec<String>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_function(&mut self, function: Function) {
        self.functions
            .insert(function.name.clone(), Arc::new(function));
    }

    pub fn function(&self, name: &str) -> Option<&Arc<Function>> {
        self.functions.get(name)
    }

    /// `main` if the module defines one, else the module initializer.
    pub fn entry(&self) -> Option<&Arc<Function>> {
        self.function("main").or_else(|| self.function(MODULE_INIT))
    }

    /// Walk a class and its bases, most derived first.
    pub fn class_chain(&self, class: &Arc<ClassInfo>) -> Vec<Arc<ClassInfo>> {
        let mut chain = vec![class.clone()];
        let mut current = class.base.clone();
        while let Some(base) = current {
            match self.classes.get(&base) {
                Some(info) if !chain.iter().any(|c| c.name == info.name) => {
                    chain.push(info.clone());
                    current = info.base.clone();
                }
                _ => break,
            }
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::chunk::Chunk;

    fn try_function() -> Function {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::SetupTry, 1);
        chunk.write_op(OpCode::SetupTry, 1);
        chunk.write_op(OpCode::EndTry, 1);
        let inner_jump = chunk.write_jump(OpCode::Jmp, 1);
        chunk.write_op(OpCode::Pop, 2);
        chunk.patch_jump_here(inner_jump);
        chunk.write_op(OpCode::EndTry, 3);
        let outer_jump = chunk.write_jump(OpCode::Jmp, 3);
        chunk.write_op(OpCode::Raise, 4);
        chunk.patch_jump_here(outer_jump);
        chunk.write_op(OpCode::Ret, 5);
        let mut function = Function::new("f");
        function.set_code(chunk.code, chunk.lines);
        function
    }

    #[test]
    fn test_try_regions_match_nesting() {
        let function = try_function();
        let regions = function.try_regions();
        assert_eq!(
            regions,
            &[
                TryRegion {
                    start: 0,
                    end: 9,
                    handler: 15
                },
                TryRegion {
                    start: 1,
                    end: 2,
                    handler: 8
                },
            ]
        );
        assert_eq!(function.region_for(1).map(|r| r.handler), Some(8));
        assert!(function.region_for(2).is_none());
    }

    #[test]
    fn test_call_counter() {
        let function = Function::new("f");
        assert_eq!(function.record_call(), 1);
        assert_eq!(function.record_call(), 2);
        assert_eq!(function.clone().call_count(), 2);
    }

    #[test]
    fn test_class_chain_stops_on_cycles() {
        let mut module = Module::new("m");
        let mut a = ClassInfo::new("A");
        a.base = Some("B".into());
        let mut b = ClassInfo::new("B");
        b.base = Some("A".into());
        module.classes.insert("A".into(), Arc::new(a));
        module.classes.insert("B".into(), Arc::new(b));
        let chain = module.class_chain(&module.classes["A"]);
        assert_eq!(chain.len(), 2);
    }
}
