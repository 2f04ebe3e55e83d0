//! Bytecode chunk: the instruction stream of one function under construction,
//! plus the encoder and decoder for the instruction format.

use std::fmt;

use crate::bytecode::instruction::{Instruction, OpCode};
use crate::error::FormatError;

/// A constant in a function's constant pool.
#[derive(Debug, Clone)]
pub enum Constant {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Null, Constant::Null) => true,
            (Constant::Bool(a), Constant::Bool(b)) => a == b,
            (Constant::Int(a), Constant::Int(b)) => a == b,
            // Bitwise, so that -0.0 and 0.0 stay distinct in the pool.
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (Constant::Str(a), Constant::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Null => write!(f, "null"),
            Constant::Bool(b) => write!(f, "{}", b),
            Constant::Int(n) => write!(f, "{}", n),
            Constant::Float(n) if n.fract() == 0.0 && n.is_finite() => write!(f, "{:.1}", n),
            Constant::Float(n) => write!(f, "{}", n),
            Constant::Str(s) => write!(f, "{:?}", s),
        }
    }
}

/// Maps a byte offset to the source line of the instruction starting there.
/// Entries are sorted by offset; an entry covers code up to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    pub offset: u32,
    pub line: u32,
}

/// Line of the instruction at `offset` in a run-length line table.
pub fn line_at(lines: &[LineEntry], offset: usize) -> u32 {
    match lines.binary_search_by_key(&(offset as u32), |e| e.offset) {
        Ok(i) => lines[i].line,
        Err(0) => 0,
        Err(i) => lines[i - 1].line,
    }
}

/// A chunk of bytecode containing instructions and metadata.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub constants: Vec<Constant>,
    pub lines: Vec<LineEntry>,
    last_op: Option<OpCode>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    fn mark_line(&mut self, line: u32) {
        if self.lines.last().map(|e| e.line) != Some(line) {
            self.lines.push(LineEntry {
                offset: self.code.len() as u32,
                line,
            });
        }
    }

    /// Write an operand-less opcode.
    pub fn write_op(&mut self, op: OpCode, line: u32) {
        debug_assert!(!op.has_operand(), "{} needs an operand", op);
        self.mark_line(line);
        self.code.push(op as u8);
        self.last_op = Some(op);
    }

    /// Write an opcode with its 4-byte big-endian operand.
    pub fn write_op_operand(&mut self, op: OpCode, operand: u32, line: u32) {
        debug_assert!(op.has_operand(), "{} takes no operand", op);
        self.mark_line(line);
        self.code.push(op as u8);
        self.code.extend_from_slice(&operand.to_be_bytes());
        self.last_op = Some(op);
    }

    /// Emit a jump with a placeholder target; returns the patch site.
    pub fn write_jump(&mut self, op: OpCode, line: u32) -> usize {
        self.write_op_operand(op, u32::MAX, line);
        self.code.len() - 4
    }

    /// Backfill the jump operand at `site` with an absolute target.
    pub fn patch_jump(&mut self, site: usize, target: usize) {
        self.code[site..site + 4].copy_from_slice(&(target as u32).to_be_bytes());
    }

    /// Patch a jump to land at the current end of the chunk.
    pub fn patch_jump_here(&mut self, site: usize) {
        let target = self.code.len();
        self.patch_jump(site, target);
    }

    /// Add a constant to the pool, reusing an equal entry.
    pub fn add_constant(&mut self, constant: Constant) -> u32 {
        if let Some(i) = self.constants.iter().position(|c| c == &constant) {
            return i as u32;
        }
        self.constants.push(constant);
        (self.constants.len() - 1) as u32
    }

    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    /// The opcode of the last instruction written.
    pub fn last_opcode(&self) -> Option<OpCode> {
        self.last_op
    }

    pub fn get_line(&self, offset: usize) -> u32 {
        line_at(&self.lines, offset)
    }
}

/// Decode an instruction stream into `(offset, instruction)` pairs.
pub fn decode(code: &[u8], lines: &[LineEntry]) -> Result<Vec<(usize, Instruction)>, FormatError> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let byte = code[offset];
        let opcode = OpCode::from_u8(byte).ok_or(FormatError::InvalidOpcode {
            opcode: byte,
            offset,
        })?;
        let operand = if opcode.has_operand() {
            let bytes = code
                .get(offset + 1..offset + 5)
                .ok_or(FormatError::Truncated("instruction operand"))?;
            Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        } else {
            None
        };
        let instr = Instruction::new(opcode, operand, line_at(lines, offset));
        out.push((offset, instr));
        offset += instr.size();
    }
    Ok(out)
}

/// Encode instructions back into bytes and a line table.
pub fn encode(instructions: &[Instruction]) -> (Vec<u8>, Vec<LineEntry>) {
    let mut chunk = Chunk::new();
    for instr in instructions {
        match instr.operand {
            Some(operand) => chunk.write_op_operand(instr.opcode, operand, instr.line),
            None => chunk.write_op(instr.opcode, instr.line),
        }
    }
    (chunk.code, chunk.lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_are_deduplicated() {
        let mut chunk = Chunk::new();
        let a = chunk.add_constant(Constant::Int(5));
        let b = chunk.add_constant(Constant::Str("x".into()));
        let c = chunk.add_constant(Constant::Int(5));
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_ne!(
            chunk.add_constant(Constant::Float(0.0)),
            chunk.add_constant(Constant::Float(-0.0))
        );
    }

    #[test]
    fn test_operand_encoding_is_big_endian() {
        let mut chunk = Chunk::new();
        chunk.write_op_operand(OpCode::PushConst, 0x0102_0304, 1);
        assert_eq!(chunk.code, vec![0x01, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_patch_jump_writes_absolute_target() {
        let mut chunk = Chunk::new();
        let site = chunk.write_jump(OpCode::JmpIfFalse, 1);
        chunk.write_op(OpCode::Pop, 1);
        chunk.patch_jump_here(site);
        let decoded = decode(&chunk.code, &chunk.lines).unwrap();
        assert_eq!(decoded[0].1.operand, Some(6));
    }

    #[test]
    fn test_line_table() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Pop, 1);
        chunk.write_op(OpCode::Pop, 1);
        chunk.write_op(OpCode::Ret, 3);
        assert_eq!(chunk.lines.len(), 2);
        assert_eq!(chunk.get_line(1), 1);
        assert_eq!(chunk.get_line(2), 3);
    }

    #[test]
    fn test_decode_rejects_truncated_operand() {
        assert_eq!(
            decode(&[0x01, 0x00], &[]).unwrap_err(),
            FormatError::Truncated("instruction operand")
        );
        assert!(matches!(
            decode(&[0x77], &[]),
            Err(FormatError::InvalidOpcode { opcode: 0x77, .. })
        ));
    }
}
