//! Bytecode optimizer.
//!
//! Passes work on a decoded instruction list whose jump operands are
//! instruction indices rather than byte offsets, so removing instructions only
//! needs an index remap. The driver reruns the whole pass list until nothing
//! changes or the iteration cap is reached; the control-flow graph is rebuilt
//! from scratch every time a pass needs it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace};

use crate::bytecode::cfg::{build_blocks, function_blocks, match_try_regions, reachable};
use crate::bytecode::chunk::{encode, Constant};
use crate::bytecode::function::{Function, Module};
use crate::bytecode::instruction::{Instruction, OpCode};
use crate::error::FormatError;
use crate::vm::ops;
use crate::vm::value::Value;

/// Default cap on optimizer iterations per function.
pub const DEFAULT_MAX_PASSES: usize = 10;

/// Strings longer than this are left for the runtime to build.
const MAX_FOLDED_STRING: usize = 4096;

/// One rewrite over a function body.
pub trait Pass {
    fn name(&self) -> &'static str;

    /// Rewrite `code` in place and report whether anything changed. Jump
    /// operands in `code` are instruction indices; `code.len()` is a valid
    /// target meaning "end of function".
    fn run(&self, code: &mut Vec<Instruction>, constants: &mut Vec<Constant>) -> bool;
}

/// Instruction indices that must stay at the start of an instruction: jump
/// targets and the `END_TRY`/handler of every protected region.
fn leaders(code: &[Instruction]) -> HashSet<usize> {
    let mut leaders: HashSet<usize> = code
        .iter()
        .filter(|i| i.opcode.is_jump())
        .filter_map(|i| i.operand.map(|t| t as usize))
        .collect();
    for (_, end, handler) in match_try_regions(code) {
        leaders.insert(end);
        leaders.insert(handler);
    }
    leaders
}

/// Point every jump through `remap` (old index to new index).
fn remap_jumps(code: &mut [Instruction], remap: &[usize], old_len: usize) {
    let new_len = code.len();
    for instr in code.iter_mut().filter(|i| i.opcode.is_jump()) {
        if let Some(target) = instr.operand {
            let target = target as usize;
            let mapped = if target >= old_len {
                new_len
            } else {
                remap[target]
            };
            instr.operand = Some(mapped as u32);
        }
    }
}

fn add_constant(constants: &mut Vec<Constant>, constant: Constant) -> u32 {
    if let Some(index) = constants.iter().position(|c| c == &constant) {
        return index as u32;
    }
    constants.push(constant);
    (constants.len() - 1) as u32
}

/// Replaces `PUSH_CONST a; PUSH_CONST b; op` with `PUSH_CONST (a op b)` and
/// `PUSH_CONST a; NEG` with `PUSH_CONST -a`. Operations that would fail at
/// runtime, such as division by zero, are left alone.
#[derive(Debug, Default)]
pub struct ConstantFolding;

impl ConstantFolding {
    fn constant(constants: &[Constant], instr: &Instruction) -> Option<Value> {
        if instr.opcode != OpCode::PushConst {
            return None;
        }
        constants
            .get(instr.operand? as usize)
            .map(Value::from_constant)
    }

    fn foldable(result: Result<Value, crate::error::RuntimeErrorKind>) -> Option<Constant> {
        let constant = result.ok()?.to_constant()?;
        match &constant {
            Constant::Str(s) if s.len() > MAX_FOLDED_STRING => None,
            _ => Some(constant),
        }
    }
}

impl Pass for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn run(&self, code: &mut Vec<Instruction>, constants: &mut Vec<Constant>) -> bool {
        let leaders = leaders(code);
        let old_len = code.len();
        let mut out: Vec<Instruction> = Vec::with_capacity(old_len);
        // Whether each emitted instruction started at a leader.
        let mut out_leader: Vec<bool> = Vec::with_capacity(old_len);
        let mut remap = vec![0; old_len];
        let mut changed = false;

        for (index, instr) in code.iter().enumerate() {
            remap[index] = out.len();
            out.push(*instr);
            out_leader.push(leaders.contains(&index));

            // Fold at the tail so chains like 1 + 2 + 3 collapse in one sweep.
            loop {
                let n = out.len();
                let last = out[n - 1];
                let folded = if last.opcode.is_foldable_binary() && n >= 3 {
                    if out_leader[n - 2] || out_leader[n - 1] {
                        None
                    } else {
                        match (
                            Self::constant(constants, &out[n - 3]),
                            Self::constant(constants, &out[n - 2]),
                        ) {
                            (Some(a), Some(b)) => {
                                Self::foldable(ops::binary(last.opcode, &a, &b)).map(|c| (3, c))
                            }
                            _ => None,
                        }
                    }
                } else if last.opcode == OpCode::Neg && n >= 2 && !out_leader[n - 1] {
                    Self::constant(constants, &out[n - 2])
                        .and_then(|a| Self::foldable(ops::unary(OpCode::Neg, &a)))
                        .map(|c| (2, c))
                } else {
                    None
                };

                let Some((width, constant)) = folded else { break };
                let first = n - width;
                let line = out[first].line;
                let leader = out_leader[first];
                out.truncate(first);
                out_leader.truncate(first);
                let operand = add_constant(constants, constant);
                out.push(Instruction::new(OpCode::PushConst, Some(operand), line));
                out_leader.push(leader);
                changed = true;
            }
        }

        if changed {
            remap_jumps(&mut out, &remap, old_len);
            *code = out;
        }
        changed
    }
}

/// Drops basic blocks that cannot be reached from the entry block.
#[derive(Debug, Default)]
pub struct DeadBlockElimination;

impl Pass for DeadBlockElimination {
    fn name(&self) -> &'static str {
        "dead-block-elimination"
    }

    fn run(&self, code: &mut Vec<Instruction>, _constants: &mut Vec<Constant>) -> bool {
        let blocks = build_blocks(code, |_, instr| instr.operand.map(|t| t as usize));
        let live = reachable(&blocks);
        if live.len() == blocks.len() {
            return false;
        }

        let old_len = code.len();
        let mut out = Vec::with_capacity(old_len);
        let mut remap = vec![0; old_len];
        for block in blocks.iter().filter(|b| live.contains(&b.id)) {
            for (k, instr) in block.instructions.iter().enumerate() {
                remap[block.start + k] = out.len();
                out.push(*instr);
            }
        }
        trace!(
            removed = old_len - out.len(),
            blocks = blocks.len() - live.len(),
            "dropped unreachable blocks"
        );
        remap_jumps(&mut out, &remap, old_len);
        *code = out;
        true
    }
}

/// What an optimizer run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizationStats {
    pub functions: usize,
    pub iterations: usize,
    /// Number of iterations in which each pass changed something.
    pub pass_changes: BTreeMap<String, usize>,
    pub instructions_before: usize,
    pub instructions_after: usize,
}

impl OptimizationStats {
    pub fn merge(&mut self, other: &OptimizationStats) {
        self.functions += other.functions;
        self.iterations += other.iterations;
        for (pass, count) in &other.pass_changes {
            *self.pass_changes.entry(pass.clone()).or_insert(0) += count;
        }
        self.instructions_before += other.instructions_before;
        self.instructions_after += other.instructions_after;
    }
}

/// Runs a pass list to a fixpoint.
pub struct Optimizer {
    passes: Vec<Box<dyn Pass>>,
    max_passes: usize,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PASSES)
    }
}

impl Optimizer {
    /// The standard pipeline: constant folding, then dead-block elimination.
    pub fn new(max_passes: usize) -> Self {
        Self {
            passes: vec![Box::new(ConstantFolding), Box::new(DeadBlockElimination)],
            max_passes,
        }
    }

    pub fn with_passes(passes: Vec<Box<dyn Pass>>, max_passes: usize) -> Self {
        Self { passes, max_passes }
    }

    pub fn optimize_module(&self, module: &mut Module) -> Result<OptimizationStats, FormatError> {
        let mut stats = OptimizationStats::default();
        for function in module.functions.values_mut() {
            let function = Arc::make_mut(function);
            stats.merge(&self.optimize_function(function)?);
        }
        debug!(
            module = %module.name,
            iterations = stats.iterations,
            before = stats.instructions_before,
            after = stats.instructions_after,
            "optimized module"
        );
        Ok(stats)
    }

    pub fn optimize_function(&self, function: &mut Function) -> Result<OptimizationStats, FormatError> {
        let mut code = indexed_instructions(function)?;
        let mut constants = function.constants.clone();
        let mut stats = OptimizationStats {
            functions: 1,
            instructions_before: code.len(),
            ..OptimizationStats::default()
        };

        for iteration in 0..self.max_passes {
            let mut changed = false;
            for pass in &self.passes {
                if pass.run(&mut code, &mut constants) {
                    changed = true;
                    *stats.pass_changes.entry(pass.name().to_string()).or_insert(0) += 1;
                }
            }
            stats.iterations += 1;
            trace!(function = %function.name, iteration, changed, "optimizer iteration");
            if !changed {
                break;
            }
        }
        stats.instructions_after = code.len();

        let code = with_byte_targets(&code);
        let (bytes, lines) = encode(&code);
        function.constants = constants;
        function.set_code(bytes, lines);
        function.blocks = Some(function_blocks(function)?);
        Ok(stats)
    }
}

/// Decode a function, rewriting jump operands from byte offsets to indices.
pub fn indexed_instructions(function: &Function) -> Result<Vec<Instruction>, FormatError> {
    let decoded = function.instructions()?;
    let index_of: HashMap<usize, usize> = decoded
        .iter()
        .enumerate()
        .map(|(index, (offset, _))| (*offset, index))
        .collect();
    let end = function.code.len();
    let len = decoded.len();
    decoded
        .into_iter()
        .map(|(_, mut instr)| {
            if instr.opcode.is_jump() {
                if let Some(target) = instr.operand {
                    let target = target as usize;
                    let index = if target == end {
                        len
                    } else {
                        *index_of
                            .get(&target)
                            .ok_or(FormatError::Truncated("jump target"))?
                    };
                    instr.operand = Some(index as u32);
                }
            }
            Ok(instr)
        })
        .collect()
}

/// Inverse of [`indexed_instructions`].
fn with_byte_targets(code: &[Instruction]) -> Vec<Instruction> {
    let mut offsets = Vec::with_capacity(code.len() + 1);
    let mut offset = 0;
    for instr in code {
        offsets.push(offset);
        offset += instr.size();
    }
    offsets.push(offset);
    code.iter()
        .map(|instr| {
            let mut instr = *instr;
            if instr.opcode.is_jump() {
                if let Some(target) = instr.operand {
                    let target = (target as usize).min(code.len());
                    instr.operand = Some(offsets[target] as u32);
                }
            }
            instr
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::chunk::Chunk;

    fn op(opcode: OpCode, operand: Option<u32>) -> Instruction {
        Instruction::new(opcode, operand, 1)
    }

    fn function_from(code: &[Instruction], constants: Vec<Constant>) -> Function {
        let (bytes, lines) = encode(&with_byte_targets(code));
        let mut function = Function::new("f");
        function.constants = constants;
        function.set_code(bytes, lines);
        function
    }

    #[test]
    fn test_folds_arithmetic_chain() {
        // 1 + 2 * 3
        let mut constants = vec![Constant::Int(1), Constant::Int(2), Constant::Int(3)];
        let mut code = vec![
            op(OpCode::PushConst, Some(0)),
            op(OpCode::PushConst, Some(1)),
            op(OpCode::PushConst, Some(2)),
            op(OpCode::Mul, None),
            op(OpCode::Add, None),
            op(OpCode::Ret, None),
        ];
        assert!(ConstantFolding.run(&mut code, &mut constants));
        assert_eq!(code.len(), 2);
        let folded = &constants[code[0].operand.unwrap() as usize];
        assert_eq!(folded, &Constant::Int(7));
    }

    #[test]
    fn test_division_by_zero_is_not_folded() {
        let mut constants = vec![Constant::Int(10), Constant::Int(0)];
        let mut code = vec![
            op(OpCode::PushConst, Some(0)),
            op(OpCode::PushConst, Some(1)),
            op(OpCode::Div, None),
            op(OpCode::Ret, None),
        ];
        assert!(!ConstantFolding.run(&mut code, &mut constants));
        assert_eq!(code.len(), 4);
    }

    #[test]
    fn test_folding_respects_jump_targets() {
        // 0 PUSH 1; 1 PUSH 2; 2 ADD; 3 JMP 1
        let mut constants = vec![Constant::Int(1), Constant::Int(2)];
        let mut code = vec![
            op(OpCode::PushConst, Some(0)),
            op(OpCode::PushConst, Some(1)),
            op(OpCode::Add, None),
            op(OpCode::Jmp, Some(1)),
        ];
        assert!(!ConstantFolding.run(&mut code, &mut constants));
    }

    #[test]
    fn test_folding_remaps_later_jumps() {
        // 0 PUSH 1; 1 PUSH 2; 2 ADD; 3 JMP_IF_FALSE 5; 4 PUSH 1; 5 RET
        let mut constants = vec![Constant::Int(1), Constant::Int(2)];
        let mut code = vec![
            op(OpCode::PushConst, Some(0)),
            op(OpCode::PushConst, Some(1)),
            op(OpCode::Add, None),
            op(OpCode::JmpIfFalse, Some(5)),
            op(OpCode::PushConst, Some(0)),
            op(OpCode::Ret, None),
        ];
        assert!(ConstantFolding.run(&mut code, &mut constants));
        assert_eq!(code[1].operand, Some(3));
    }

    #[test]
    fn test_dead_blocks_after_return_are_removed() {
        let mut constants = vec![Constant::Int(1)];
        let mut code = vec![
            op(OpCode::PushConst, Some(0)),
            op(OpCode::Ret, None),
            op(OpCode::PushConst, Some(0)),
            op(OpCode::Pop, None),
            op(OpCode::PushConst, Some(0)),
            op(OpCode::Ret, None),
        ];
        assert!(DeadBlockElimination.run(&mut code, &mut constants));
        assert_eq!(code.len(), 2);
        assert!(!DeadBlockElimination.run(&mut code, &mut constants));
    }

    #[test]
    fn test_fixpoint_folds_then_prunes() {
        // return 1 + 2; followed by dead code
        let mut chunk = Chunk::new();
        let one = chunk.add_constant(Constant::Int(1));
        let two = chunk.add_constant(Constant::Int(2));
        chunk.write_op_operand(OpCode::PushConst, one, 1);
        chunk.write_op_operand(OpCode::PushConst, two, 1);
        chunk.write_op(OpCode::Add, 1);
        chunk.write_op(OpCode::Ret, 1);
        chunk.write_op_operand(OpCode::PushConst, one, 2);
        chunk.write_op(OpCode::Ret, 2);
        let mut function = Function::new("f");
        function.constants = chunk.constants;
        function.set_code(chunk.code, chunk.lines);

        let optimizer = Optimizer::default();
        let stats = optimizer.optimize_function(&mut function).unwrap();
        assert_eq!(stats.instructions_before, 6);
        assert_eq!(stats.instructions_after, 2);
        assert!(function.blocks.is_some());

        let once = function.code.clone();
        optimizer.optimize_function(&mut function).unwrap();
        assert_eq!(function.code, once);
    }

    #[test]
    fn test_index_round_trip() {
        let code = vec![
            op(OpCode::PushConst, Some(0)),
            op(OpCode::JmpIfFalse, Some(3)),
            op(OpCode::Pop, None),
            op(OpCode::Ret, None),
        ];
        let function = function_from(&code, vec![Constant::Int(0)]);
        assert_eq!(indexed_instructions(&function).unwrap(), code);
    }
}
