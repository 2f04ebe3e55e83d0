//! JIT capability analyzer.
//!
//! Decides whether a hot function is a candidate for native compilation.
//! Only straight numeric code qualifies: stack, arithmetic, comparison and
//! jump instructions plus calls. Anything touching objects, collections,
//! memory or exceptions keeps the function on the interpreter.

use serde::Serialize;

use crate::bytecode::{Function, OpCode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisResult {
    pub can_jit: bool,
    /// Why the function cannot be compiled.
    pub reason: Option<String>,
    /// Rough benefit estimate; loops weigh the most.
    pub complexity_score: u32,
    pub instructions: usize,
    pub loops: usize,
    pub calls: usize,
    pub uses_exceptions: bool,
}

#[derive(Debug, Default, Clone)]
pub struct Analyzer;

impl Analyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, function: &Function) -> AnalysisResult {
        let mut result = AnalysisResult {
            can_jit: true,
            reason: None,
            complexity_score: 0,
            instructions: 0,
            loops: 0,
            calls: 0,
            uses_exceptions: false,
        };
        let instructions = match function.instructions() {
            Ok(instructions) => instructions,
            Err(err) => {
                result.can_jit = false;
                result.reason = Some(err.to_string());
                return result;
            }
        };

        result.instructions = instructions.len();
        for (offset, instr) in &instructions {
            match instr.opcode {
                OpCode::Jmp | OpCode::JmpIfTrue | OpCode::JmpIfFalse => {
                    if instr.operand.is_some_and(|target| (target as usize) <= *offset) {
                        result.loops += 1;
                        result.complexity_score += 10;
                    } else {
                        result.complexity_score += 1;
                    }
                }
                OpCode::Call => {
                    result.calls += 1;
                    result.complexity_score += 2;
                }
                OpCode::SetupTry | OpCode::EndTry | OpCode::PopTry | OpCode::Raise => {
                    result.uses_exceptions = true;
                    result.reject(format!("{} is not supported", instr.opcode));
                }
                OpCode::New
                | OpCode::Delete
                | OpCode::GetAttr
                | OpCode::SetAttr
                | OpCode::GetItem
                | OpCode::SetItem
                | OpCode::BuildList
                | OpCode::BuildDict
                | OpCode::Len
                | OpCode::Iter
                | OpCode::Alloc
                | OpCode::Free
                | OpCode::Load
                | OpCode::Halt => result.reject(format!("{} is not supported", instr.opcode)),
                _ => result.complexity_score += 1,
            }
        }
        if !result.can_jit {
            result.complexity_score = 0;
        }
        result
    }
}

impl AnalysisResult {
    fn reject(&mut self, reason: String) {
        if self.can_jit {
            self.can_jit = false;
            self.reason = Some(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Chunk;
    use crate::bytecode::Constant;

    fn function(build: impl FnOnce(&mut Chunk)) -> Function {
        let mut chunk = Chunk::new();
        build(&mut chunk);
        let mut function = Function::new("f");
        function.constants = chunk.constants;
        function.set_code(chunk.code, chunk.lines);
        function
    }

    #[test]
    fn test_numeric_loop_is_jitable() {
        let f = function(|chunk| {
            let one = chunk.add_constant(Constant::Int(1));
            chunk.write_op_operand(OpCode::PushConst, one, 1);
            let exit = chunk.write_jump(OpCode::JmpIfFalse, 1);
            chunk.write_op_operand(OpCode::Jmp, 0, 1);
            chunk.patch_jump_here(exit);
            chunk.write_op(OpCode::Ret, 1);
        });
        let result = Analyzer::new().analyze(&f);
        assert!(result.can_jit);
        assert_eq!(result.loops, 1);
        assert!(result.complexity_score >= 10);
    }

    #[test]
    fn test_object_code_is_rejected() {
        let f = function(|chunk| {
            chunk.write_op(OpCode::GetAttr, 1);
            chunk.write_op(OpCode::Ret, 1);
        });
        let result = Analyzer::new().analyze(&f);
        assert!(!result.can_jit);
        assert_eq!(result.reason.as_deref(), Some("GET_ATTR is not supported"));
        assert_eq!(result.complexity_score, 0);
    }
}
