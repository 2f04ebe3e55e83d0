//! The bytecode virtual machine: an explicit call-frame stack and a dispatch
//! loop over encoded instructions.
//!
//! Calls between user functions never recurse on the host stack. `CALL`
//! pushes a frame and the loop continues in it; `RET` pops it and hands the
//! value to the caller's operand stack. Failures travel as
//! [`RuntimeErrorKind`] values out of [`Vm::step`] and are routed to handler
//! ranges by `unwind`.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::bytecode::{Function, Module, OpCode, MODULE_INIT};
use crate::error::{RuntimeError, RuntimeErrorKind};
use crate::jit::JitHook;
use crate::vm::builtins::{Output, Stdlib};
use crate::vm::memory::MemoryManager;
use crate::vm::ops;
use crate::vm::value::Value;

pub type Locals = HashMap<String, Value, ahash::RandomState>;
pub type Globals = HashMap<String, Value, ahash::RandomState>;

/// An installed exception handler, as byte offsets into the frame's function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    pub start: usize,
    pub end: usize,
    pub handler: usize,
    /// Operand stack height to restore before entering the handler.
    pub stack_depth: usize,
}

/// A call frame on the VM call stack.
#[derive(Debug)]
pub struct CallFrame {
    pub function: Arc<Function>,
    pub locals: Locals,
    pub stack: Vec<Value>,
    /// Offset of the next instruction.
    pub pc: usize,
    /// Offset of the instruction being executed.
    pub current: usize,
    pub handlers: Vec<Handler>,
    /// The object a constructor frame builds; returned in place of
    /// `__init__`'s own result.
    pub construct: Option<Value>,
    started: Instant,
}

impl CallFrame {
    /// Bind `args` to the parameters by position; missing ones and every
    /// declared local start as null.
    pub fn new(function: Arc<Function>, args: Vec<Value>) -> Self {
        let mut locals = Locals::with_capacity_and_hasher(
            function.params.len() + function.locals.len(),
            ahash::RandomState::new(),
        );
        let mut args = args.into_iter();
        for param in &function.params {
            locals.insert(param.clone(), args.next().unwrap_or(Value::Null));
        }
        for local in &function.locals {
            locals.entry(local.clone()).or_insert(Value::Null);
        }
        Self {
            function,
            locals,
            stack: Vec::with_capacity(16),
            pc: 0,
            current: 0,
            handlers: Vec::new(),
            construct: None,
            started: Instant::now(),
        }
    }

    /// Source line of the instruction being executed.
    pub fn line(&self) -> u32 {
        self.function.line_at(self.current)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionMode {
    Ready,
    Running,
    Unwinding,
    Returned,
    Halted,
}

/// Everything one top-level execution owns.
#[derive(Debug)]
pub struct ExecutionState {
    pub mode: ExecutionMode,
    pub frames: Vec<CallFrame>,
    pub globals: Globals,
    /// The exception being propagated while frames are popped.
    pub exception: Option<Value>,
    pub running: bool,
    pub result: Option<Value>,
}

/// Services the VM borrows from its executor context.
pub struct Runtime<'a> {
    pub stdlib: &'a Stdlib,
    pub memory: &'a dyn MemoryManager,
    /// `None` when the JIT hook is disabled.
    pub jit: Option<&'a JitHook>,
    pub output: &'a mut Output,
    pub max_call_depth: usize,
}

pub(crate) enum Flow {
    Next,
    /// The frame at the base depth returned (or the program halted).
    Finished(Value),
}

pub struct Vm<'a> {
    pub(crate) module: &'a Module,
    pub(crate) state: ExecutionState,
    pub(crate) stdlib: &'a Stdlib,
    pub(crate) memory: &'a dyn MemoryManager,
    pub(crate) jit: Option<&'a JitHook>,
    pub(crate) output: &'a mut Output,
    pub(crate) max_call_depth: usize,
}

impl<'a> Vm<'a> {
    pub fn new(module: &'a Module, runtime: Runtime<'a>) -> Self {
        let mut globals = Globals::default();
        for namespace in &module.namespaces {
            globals.insert(namespace.clone(), Value::Namespace(Rc::from(namespace.as_str())));
        }
        for (name, class) in &module.classes {
            globals.insert(name.clone(), Value::Class(class.clone()));
        }
        for (name, function) in &module.functions {
            if name != MODULE_INIT {
                globals.insert(name.clone(), Value::Function(function.clone()));
            }
        }
        for (name, constant) in &module.globals {
            globals.insert(name.clone(), Value::from_constant(constant));
        }

        Self {
            module,
            state: ExecutionState {
                mode: ExecutionMode::Ready,
                frames: Vec::new(),
                globals,
                exception: None,
                running: false,
                result: None,
            },
            stdlib: runtime.stdlib,
            memory: runtime.memory,
            jit: runtime.jit,
            output: runtime.output,
            max_call_depth: runtime.max_call_depth,
        }
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.state.globals.get(name)
    }

    /// Run the module initializer, then `main` if the module defines one.
    /// The result is `main`'s return value, or the initializer's.
    pub fn execute_module(&mut self) -> Result<Value, RuntimeError> {
        let mut result = Value::Null;
        if let Some(init) = self.module.function(MODULE_INIT) {
            result = self.execute_function(init.clone(), Vec::new())?;
        }
        if let Some(main) = self.module.function("main") {
            result = self.execute_function(main.clone(), Vec::new())?;
        }
        Ok(result)
    }

    /// Call `function` with positional `args` and run it to completion.
    pub fn execute_function(
        &mut self,
        function: Arc<Function>,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let base = self.state.frames.len();
        self.state.mode = ExecutionMode::Ready;
        if let Err(kind) = self.push_frame(function.clone(), args, None) {
            return Err(RuntimeError::new(kind, crate::span::Span::default())
                .in_function(function.name.clone()));
        }
        self.run(base)
    }

    fn run(&mut self, base: usize) -> Result<Value, RuntimeError> {
        self.state.running = true;
        self.state.mode = ExecutionMode::Running;
        loop {
            match self.step(base) {
                Ok(Flow::Next) => {}
                Ok(Flow::Finished(value)) => {
                    if self.state.mode != ExecutionMode::Halted {
                        self.state.mode = ExecutionMode::Returned;
                    }
                    self.state.running = false;
                    self.state.result = Some(value.clone());
                    return Ok(value);
                }
                Err(kind) => {
                    if let Err(err) = self.unwind(kind, base) {
                        self.state.running = false;
                        self.state.mode = ExecutionMode::Halted;
                        return Err(err);
                    }
                }
            }
        }
    }

    // --- Frame and stack helpers ---

    pub(crate) fn frame(&self) -> Result<&CallFrame, RuntimeErrorKind> {
        self.state
            .frames
            .last()
            .ok_or_else(|| RuntimeErrorKind::InvalidBytecode("no active frame".into()))
    }

    pub(crate) fn frame_mut(&mut self) -> Result<&mut CallFrame, RuntimeErrorKind> {
        self.state
            .frames
            .last_mut()
            .ok_or_else(|| RuntimeErrorKind::InvalidBytecode("no active frame".into()))
    }

    pub(crate) fn push(&mut self, value: Value) -> Result<(), RuntimeErrorKind> {
        self.frame_mut()?.stack.push(value);
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> Result<Value, RuntimeErrorKind> {
        self.frame_mut()?
            .stack
            .pop()
            .ok_or_else(|| RuntimeErrorKind::InvalidBytecode("operand stack underflow".into()))
    }

    fn peek(&self) -> Result<&Value, RuntimeErrorKind> {
        self.frame()?
            .stack
            .last()
            .ok_or_else(|| RuntimeErrorKind::InvalidBytecode("operand stack underflow".into()))
    }

    /// Pop a count pushed by the compiler (argument or element count).
    pub(crate) fn pop_count(&mut self) -> Result<usize, RuntimeErrorKind> {
        match self.pop()? {
            Value::Int(n) if n >= 0 => Ok(n as usize),
            other => Err(RuntimeErrorKind::InvalidBytecode(format!(
                "expected a count, found {}",
                other.type_name()
            ))),
        }
    }

    /// Pop `count` values, returning them in push order.
    pub(crate) fn pop_n(&mut self, count: usize) -> Result<Vec<Value>, RuntimeErrorKind> {
        let stack = &mut self.frame_mut()?.stack;
        if stack.len() < count {
            return Err(RuntimeErrorKind::InvalidBytecode(
                "operand stack underflow".into(),
            ));
        }
        Ok(stack.split_off(stack.len() - count))
    }

    pub(crate) fn pop_frame(&mut self) -> Option<CallFrame> {
        let frame = self.state.frames.pop()?;
        frame.function.add_exec_time(frame.started.elapsed());
        Some(frame)
    }

    fn pop_name(&mut self) -> Result<Rc<str>, RuntimeErrorKind> {
        match self.pop()? {
            Value::Str(name) => Ok(name),
            other => Err(RuntimeErrorKind::InvalidBytecode(format!(
                "expected a name, found {}",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn lookup_global(&self, name: &str) -> Result<Value, RuntimeErrorKind> {
        if let Some(value) = self.state.globals.get(name) {
            return Ok(value.clone());
        }
        self.stdlib
            .lookup(name)
            .map(Value::Builtin)
            .ok_or_else(|| RuntimeErrorKind::UndefinedVariable(name.to_string()))
    }

    // --- Dispatch ---

    pub(crate) fn step(&mut self, base: usize) -> Result<Flow, RuntimeErrorKind> {
        let frame = self.frame_mut()?;
        let offset = frame.pc;
        let code = &frame.function.code;
        let Some(&byte) = code.get(offset) else {
            return self.return_from_frame(Value::Null, base);
        };
        let op = OpCode::from_u8(byte).ok_or_else(|| {
            RuntimeErrorKind::InvalidBytecode(format!("unknown opcode {:#04x} at {}", byte, offset))
        })?;
        let operand = if op.has_operand() {
            read_operand(code, offset)?
        } else {
            0
        };
        let code_len = code.len();
        frame.current = offset;
        frame.pc = offset + 1 + op.operand_size();
        let arg = operand as usize;

        match op {
            OpCode::PushConst => {
                let value = {
                    let function = &self.frame()?.function;
                    let constant = function.constants.get(arg).ok_or_else(|| {
                        RuntimeErrorKind::InvalidBytecode(format!("constant {} out of range", arg))
                    })?;
                    Value::from_constant(constant)
                };
                self.push(value)?;
            }
            OpCode::PushLocal => {
                let frame = self.frame()?;
                let name = name_constant(&frame.function, arg)?;
                let value = frame
                    .locals
                    .get(name)
                    .cloned()
                    .ok_or_else(|| RuntimeErrorKind::UndefinedVariable(name.to_string()))?;
                self.push(value)?;
            }
            OpCode::PushGlobal => {
                let name = name_constant(&self.frame()?.function, arg)?;
                let value = self.lookup_global(name)?;
                self.push(value)?;
            }
            OpCode::Pop => {
                self.pop()?;
            }
            OpCode::Dup => {
                let value = self.peek()?.clone();
                self.push(value)?;
            }
            OpCode::Swap => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(b)?;
                self.push(a)?;
            }

            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::Pow
            | OpCode::And
            | OpCode::Or
            | OpCode::Xor
            | OpCode::Shl
            | OpCode::Shr
            | OpCode::Eq
            | OpCode::Ne
            | OpCode::Lt
            | OpCode::Le
            | OpCode::Gt
            | OpCode::Ge
            | OpCode::Cmp => {
                let right = self.pop()?;
                let left = self.pop()?;
                self.push(ops::binary(op, &left, &right)?)?;
            }
            OpCode::Neg | OpCode::Not | OpCode::LNot => {
                let operand = self.pop()?;
                self.push(ops::unary(op, &operand)?)?;
            }

            OpCode::Jmp => self.jump(arg, code_len)?,
            OpCode::JmpIfTrue | OpCode::JmpIfFalse => {
                let condition = self.pop()?.is_truthy();
                if condition == (op == OpCode::JmpIfTrue) {
                    self.jump(arg, code_len)?;
                }
            }
            OpCode::Call => {
                let argc = self.pop_count()?;
                let args = self.pop_n(argc)?;
                let callee = self.pop()?;
                if let Some(result) = self.call_value(callee, args)? {
                    self.push(result)?;
                }
            }
            OpCode::Ret => {
                let value = self.frame_mut()?.stack.pop().unwrap_or(Value::Null);
                return self.return_from_frame(value, base);
            }

            OpCode::Load => {
                let name = self.pop_name()?;
                let local = self.frame()?.locals.get(name.as_ref()).cloned();
                let value = match local {
                    Some(value) => value,
                    None => self.lookup_global(&name)?,
                };
                self.push(value)?;
            }
            OpCode::Store => {
                let name = self.pop_name()?;
                let value = self.pop()?;
                let frame = self.frame_mut()?;
                if let Some(slot) = frame.locals.get_mut(name.as_ref()) {
                    *slot = value;
                } else {
                    self.state.globals.insert(name.to_string(), value);
                }
            }
            OpCode::Alloc => {
                let size = self.pop()?;
                let pointer = self.allocate(&size)?;
                self.push(pointer)?;
            }
            OpCode::Free => {
                let pointer = self.pop()?;
                self.free(&pointer)?;
            }

            OpCode::New => {
                let argc = self.pop_count()?;
                let args = self.pop_n(argc)?;
                let class = self.pop()?;
                if let Some(object) = self.construct(class, args)? {
                    self.push(object)?;
                }
            }
            OpCode::Delete => {
                let target = self.pop()?;
                self.delete(&target)?;
            }
            OpCode::GetAttr => {
                let name = self.pop_name()?;
                let object = self.pop()?;
                let value = self.get_attr(&object, &name)?;
                self.push(value)?;
            }
            OpCode::SetAttr => {
                let value = self.pop()?;
                let name = self.pop_name()?;
                let object = self.pop()?;
                self.set_attr(&object, &name, value.clone())?;
                self.push(value)?;
            }
            OpCode::GetItem => {
                let key = self.pop()?;
                let container = self.pop()?;
                let value = self.get_item(&container, &key)?;
                self.push(value)?;
            }
            OpCode::SetItem => {
                let value = self.pop()?;
                let key = self.pop()?;
                let container = self.pop()?;
                self.set_item(&container, &key, value.clone())?;
                self.push(value)?;
            }
            OpCode::BuildList => {
                let count = self.pop_count()?;
                let items = self.pop_n(count)?;
                self.push(Value::list(items))?;
            }
            OpCode::BuildDict => {
                let count = self.pop_count()?;
                let flat = self.pop_n(count.checked_mul(2).ok_or_else(|| {
                    RuntimeErrorKind::InvalidBytecode("dictionary too large".into())
                })?)?;
                let dict = self.build_dict(flat)?;
                self.push(dict)?;
            }
            OpCode::Len => {
                let value = self.pop()?;
                let length = self.length(&value)?;
                self.push(Value::Int(length as i64))?;
            }
            OpCode::Iter => {
                let value = self.pop()?;
                let items = self.iterate(&value)?;
                self.push(items)?;
            }

            OpCode::SetupTry => self.setup_try(offset)?,
            OpCode::EndTry | OpCode::PopTry => self.pop_try()?,
            OpCode::Raise => {
                let value = self.pop()?;
                return Err(RuntimeErrorKind::Raised(value));
            }
            OpCode::Halt => {
                let value = self.frame()?.stack.last().cloned().unwrap_or(Value::Null);
                while self.state.frames.len() > base {
                    self.pop_frame();
                }
                self.state.mode = ExecutionMode::Halted;
                return Ok(Flow::Finished(value));
            }
        }
        Ok(Flow::Next)
    }

    fn jump(&mut self, target: usize, code_len: usize) -> Result<(), RuntimeErrorKind> {
        if target > code_len {
            return Err(RuntimeErrorKind::InvalidBytecode(format!(
                "jump target {} outside of code",
                target
            )));
        }
        self.frame_mut()?.pc = target;
        Ok(())
    }
}

fn read_operand(code: &[u8], offset: usize) -> Result<u32, RuntimeErrorKind> {
    code.get(offset + 1..offset + 5)
        .and_then(|bytes| <[u8; 4]>::try_from(bytes).ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| RuntimeErrorKind::InvalidBytecode(format!("truncated operand at {}", offset)))
}

/// The variable name a `PUSH_LOCAL`/`PUSH_GLOBAL` operand refers to.
fn name_constant(function: &Function, index: usize) -> Result<&str, RuntimeErrorKind> {
    match function.constants.get(index) {
        Some(crate::bytecode::Constant::Str(name)) => Ok(name),
        _ => Err(RuntimeErrorKind::InvalidBytecode(format!(
            "constant {} is not a name",
            index
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Chunk, Constant};
    use crate::vm::memory::TrackingAllocator;

    fn run_function(function: Function) -> (Result<Value, RuntimeError>, ExecutionMode) {
        let module = Module::new("test");
        let stdlib = Stdlib::new();
        let memory = TrackingAllocator::default();
        let mut output = Output::capture();
        let mut vm = Vm::new(
            &module,
            Runtime {
                stdlib: &stdlib,
                memory: &memory,
                jit: None,
                output: &mut output,
                max_call_depth: 16,
            },
        );
        let result = vm.execute_function(Arc::new(function), Vec::new());
        let mode = vm.state().mode;
        (result, mode)
    }

    fn function(build: impl FnOnce(&mut Chunk)) -> Function {
        let mut chunk = Chunk::new();
        build(&mut chunk);
        let mut function = Function::new("f");
        function.constants = chunk.constants;
        function.set_code(chunk.code, chunk.lines);
        function
    }

    #[test]
    fn test_push_add_ret() {
        let f = function(|chunk| {
            let five = chunk.add_constant(Constant::Int(5));
            let three = chunk.add_constant(Constant::Int(3));
            chunk.write_op_operand(OpCode::PushConst, five, 1);
            chunk.write_op_operand(OpCode::PushConst, three, 1);
            chunk.write_op(OpCode::Add, 1);
            chunk.write_op(OpCode::Ret, 1);
        });
        let (result, mode) = run_function(f);
        assert_eq!(result.unwrap(), Value::Int(8));
        assert_eq!(mode, ExecutionMode::Returned);
    }

    #[test]
    fn test_running_off_the_end_returns_null() {
        let f = function(|chunk| {
            let one = chunk.add_constant(Constant::Int(1));
            chunk.write_op_operand(OpCode::PushConst, one, 1);
            chunk.write_op(OpCode::Pop, 1);
        });
        assert_eq!(run_function(f).0.unwrap(), Value::Null);
    }

    #[test]
    fn test_halt_stops_with_top_of_stack() {
        let f = function(|chunk| {
            let seven = chunk.add_constant(Constant::Int(7));
            chunk.write_op_operand(OpCode::PushConst, seven, 1);
            chunk.write_op(OpCode::Halt, 1);
            chunk.write_op(OpCode::Pop, 1);
        });
        let (result, mode) = run_function(f);
        assert_eq!(result.unwrap(), Value::Int(7));
        assert_eq!(mode, ExecutionMode::Halted);
    }

    #[test]
    fn test_division_by_zero_reports_line() {
        let f = function(|chunk| {
            let ten = chunk.add_constant(Constant::Int(10));
            let zero = chunk.add_constant(Constant::Int(0));
            chunk.write_op_operand(OpCode::PushConst, ten, 4);
            chunk.write_op_operand(OpCode::PushConst, zero, 4);
            chunk.write_op(OpCode::Div, 4);
            chunk.write_op(OpCode::Ret, 4);
        });
        let err = run_function(f).0.unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::DivisionByZero));
        assert_eq!(err.span.line, 4);
        assert_eq!(err.function.as_deref(), Some("f"));
    }

    #[test]
    fn test_handler_in_same_frame_catches() {
        // SETUP_TRY; PUSH "boom"; RAISE; END_TRY; JMP end; handler: RET
        let f = function(|chunk| {
            let boom = chunk.add_constant(Constant::Str("boom".into()));
            chunk.write_op(OpCode::SetupTry, 1);
            chunk.write_op_operand(OpCode::PushConst, boom, 1);
            chunk.write_op(OpCode::Raise, 1);
            chunk.write_op(OpCode::EndTry, 1);
            let end = chunk.write_jump(OpCode::Jmp, 1);
            chunk.write_op(OpCode::Ret, 2);
            chunk.patch_jump_here(end);
            chunk.write_op(OpCode::Ret, 3);
        });
        assert_eq!(run_function(f).0.unwrap(), Value::str("boom"));
    }

    #[test]
    fn test_bad_opcode_is_an_error() {
        let mut f = Function::new("f");
        f.set_code(vec![0x77], Vec::new());
        let err = run_function(f).0.unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::InvalidBytecode(_)));
    }
}
