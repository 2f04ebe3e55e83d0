//! Basic-block decomposition of a flat instruction stream.
//!
//! Blocks are rebuilt from scratch whenever they are needed; nothing keeps
//! them in sync with an instruction stream that changes afterwards.

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::bytecode::function::Function;
use crate::bytecode::instruction::{Instruction, OpCode};
use crate::error::FormatError;

/// A maximal straight-line run of instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    pub id: usize,
    /// Index of the first instruction in the stream.
    pub start: usize,
    pub instructions: Vec<Instruction>,
    pub predecessors: BTreeSet<usize>,
    pub successors: BTreeSet<usize>,
}

impl BasicBlock {
    pub fn end(&self) -> usize {
        self.start + self.instructions.len()
    }
}

/// Split `instructions` into blocks. `target_of` resolves the jump target of
/// the instruction at an index to an instruction index.
pub fn build_blocks(
    instructions: &[Instruction],
    target_of: impl Fn(usize, &Instruction) -> Option<usize>,
) -> Vec<BasicBlock> {
    if instructions.is_empty() {
        return Vec::new();
    }

    let regions = match_try_regions(instructions);

    let mut leaders = BTreeSet::new();
    leaders.insert(0);
    for (index, instr) in instructions.iter().enumerate() {
        if instr.opcode.is_jump() {
            if let Some(target) = target_of(index, instr) {
                if target < instructions.len() {
                    leaders.insert(target);
                }
            }
        }
        if instr.opcode.is_jump() || instr.opcode.is_terminator() {
            if index + 1 < instructions.len() {
                leaders.insert(index + 1);
            }
        }
    }
    for &(_, end, handler) in &regions {
        leaders.insert(end);
        if handler < instructions.len() {
            leaders.insert(handler);
        }
    }

    let starts: Vec<usize> = leaders.into_iter().collect();
    let block_of: HashMap<usize, usize> = starts.iter().enumerate().map(|(id, &s)| (s, id)).collect();

    let mut blocks: Vec<BasicBlock> = starts
        .iter()
        .enumerate()
        .map(|(id, &start)| {
            let end = starts.get(id + 1).copied().unwrap_or(instructions.len());
            BasicBlock {
                id,
                start,
                instructions: instructions[start..end].to_vec(),
                predecessors: BTreeSet::new(),
                successors: BTreeSet::new(),
            }
        })
        .collect();

    let mut edges = Vec::new();
    for block in &blocks {
        let last_index = block.end() - 1;
        let last = &instructions[last_index];
        if last.opcode.is_jump() {
            if let Some(target) = target_of(last_index, last).and_then(|t| block_of.get(&t)) {
                edges.push((block.id, *target));
            }
        }
        if !last.opcode.is_terminator() && block.id + 1 < blocks.len() {
            edges.push((block.id, block.id + 1));
        }
        // A protected region can leave through its END_TRY or its handler.
        for &(setup, end, handler) in &regions {
            if setup >= block.start && setup < block.end() {
                if let Some(&to) = block_of.get(&end) {
                    edges.push((block.id, to));
                }
                if let Some(&to) = block_of.get(&handler) {
                    edges.push((block.id, to));
                }
            }
        }
    }
    for (from, to) in edges {
        blocks[from].successors.insert(to);
        blocks[to].predecessors.insert(from);
    }

    blocks
}

/// `(setup, end_try, handler)` instruction indices for each protected region.
pub fn match_try_regions(instructions: &[Instruction]) -> Vec<(usize, usize, usize)> {
    let mut open = Vec::new();
    let mut regions = Vec::new();
    for (index, instr) in instructions.iter().enumerate() {
        match instr.opcode {
            OpCode::SetupTry => open.push(index),
            OpCode::EndTry => {
                if let Some(setup) = open.pop() {
                    regions.push((setup, index, index + 2));
                }
            }
            _ => {}
        }
    }
    regions
}

/// Ids of blocks reachable from the entry block.
pub fn reachable(blocks: &[BasicBlock]) -> BTreeSet<usize> {
    let mut seen = BTreeSet::new();
    if blocks.is_empty() {
        return seen;
    }
    let mut queue = VecDeque::from([0]);
    while let Some(id) = queue.pop_front() {
        if seen.insert(id) {
            queue.extend(blocks[id].successors.iter().copied());
        }
    }
    seen
}

/// Blocks of an encoded function, with jump operands resolved from byte offsets.
pub fn function_blocks(function: &Function) -> Result<Vec<BasicBlock>, FormatError> {
    let decoded = function.instructions()?;
    let index_of: HashMap<usize, usize> = decoded
        .iter()
        .enumerate()
        .map(|(index, (offset, _))| (*offset, index))
        .collect();
    let instructions: Vec<Instruction> = decoded.iter().map(|(_, i)| *i).collect();
    let end = function.code.len();
    let len = instructions.len();
    Ok(build_blocks(&instructions, |_, instr| {
        let target = instr.operand? as usize;
        if target == end {
            Some(len)
        } else {
            index_of.get(&target).copied()
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(opcode: OpCode, operand: Option<u32>) -> Instruction {
        Instruction::new(opcode, operand, 1)
    }

    fn index_target(_: usize, instr: &Instruction) -> Option<usize> {
        instr.operand.map(|o| o as usize)
    }

    #[test]
    fn test_if_else_diamond() {
        // 0 PUSH_CONST; 1 JMP_IF_FALSE 4; 2 PUSH_CONST; 3 JMP 5; 4 PUSH_CONST; 5 RET
        let code = vec![
            op(OpCode::PushConst, Some(0)),
            op(OpCode::JmpIfFalse, Some(4)),
            op(OpCode::PushConst, Some(1)),
            op(OpCode::Jmp, Some(5)),
            op(OpCode::PushConst, Some(2)),
            op(OpCode::Ret, None),
        ];
        let blocks = build_blocks(&code, index_target);
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].successors, BTreeSet::from([1, 2]));
        assert_eq!(blocks[3].predecessors, BTreeSet::from([1, 2]));
        assert_eq!(reachable(&blocks).len(), 4);
    }

    #[test]
    fn test_code_after_return_is_unreachable() {
        let code = vec![
            op(OpCode::PushConst, Some(0)),
            op(OpCode::Ret, None),
            op(OpCode::PushConst, Some(1)),
            op(OpCode::Ret, None),
        ];
        let blocks = build_blocks(&code, index_target);
        assert_eq!(blocks.len(), 2);
        assert_eq!(reachable(&blocks), BTreeSet::from([0]));
    }

    #[test]
    fn test_handler_reachable_through_setup_try() {
        // SETUP_TRY; RET; END_TRY; JMP 6; <handler> POP; PUSH_CONST; RET
        let code = vec![
            op(OpCode::SetupTry, None),
            op(OpCode::Ret, None),
            op(OpCode::EndTry, None),
            op(OpCode::Jmp, Some(6)),
            op(OpCode::Pop, None),
            op(OpCode::PushConst, Some(0)),
            op(OpCode::Ret, None),
        ];
        let blocks = build_blocks(&code, index_target);
        let live = reachable(&blocks);
        assert_eq!(live.len(), blocks.len());
    }
}
