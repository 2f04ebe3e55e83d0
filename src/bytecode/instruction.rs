//! Bytecode instruction definitions for the Kaede VM.
//!
//! The numeric values are part of the binary module format and must not change.

use std::fmt;

/// Opcodes for the bytecode virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    // ============ Stack ============
    /// Push a constant: PUSH_CONST <index:u32>
    PushConst = 0x01,
    /// Push a local by name constant: PUSH_LOCAL <name_index:u32>
    PushLocal = 0x02,
    /// Push a global by name constant: PUSH_GLOBAL <name_index:u32>
    PushGlobal = 0x03,
    Pop = 0x04,
    Dup = 0x05,
    Swap = 0x06,

    // ============ Arithmetic ============
    Add = 0x10,
    Sub = 0x11,
    Mul = 0x12,
    Div = 0x13,
    Mod = 0x14,
    Neg = 0x15,
    Pow = 0x16,

    // ============ Bitwise ============
    And = 0x20,
    Or = 0x21,
    Xor = 0x22,
    Not = 0x23,
    Shl = 0x24,
    Shr = 0x25,
    /// Logical not: pushes the negated truthiness.
    LNot = 0x26,

    // ============ Comparison ============
    Eq = 0x30,
    Ne = 0x31,
    Lt = 0x32,
    Le = 0x33,
    Gt = 0x34,
    Ge = 0x35,
    /// Three-way comparison, pushes -1, 0 or 1.
    Cmp = 0x36,

    // ============ Control ============
    /// JMP <target:u32>, an absolute byte offset.
    Jmp = 0x40,
    /// Pops the condition. JMP_IF_TRUE <target:u32>
    JmpIfTrue = 0x41,
    /// Pops the condition. JMP_IF_FALSE <target:u32>
    JmpIfFalse = 0x42,
    /// Stack: callee, args..., argc
    Call = 0x43,
    Ret = 0x44,

    // ============ Memory ============
    /// Pops a name, pushes the variable's value.
    Load = 0x50,
    /// Pops a name, then the value, and binds it.
    Store = 0x51,
    /// Pops a size, pushes a pointer.
    Alloc = 0x52,
    /// Pops a pointer and releases it.
    Free = 0x53,

    // ============ Objects ============
    /// Stack: class, args..., argc
    New = 0x60,
    Delete = 0x61,
    /// Stack: object, name
    GetAttr = 0x62,
    /// Stack: object, name, value. Pushes the value.
    SetAttr = 0x63,
    /// Stack: container, key
    GetItem = 0x64,
    /// Stack: container, key, value. Pushes the value.
    SetItem = 0x65,
    /// Stack: items..., count
    BuildList = 0x66,
    /// Stack: key, value, ..., pair_count
    BuildDict = 0x67,
    Len = 0x68,
    /// Turns a value into something GET_ITEM can index by position.
    Iter = 0x69,

    // ============ Exceptions ============
    SetupTry = 0x80,
    EndTry = 0x81,
    Raise = 0x82,
    /// Drops the innermost active handler without leaving its region normally.
    PopTry = 0x83,

    Halt = 0xFF,
}

impl OpCode {
    pub const ALL: [OpCode; 51] = [
        OpCode::PushConst,
        OpCode::PushLocal,
        OpCode::PushGlobal,
        OpCode::Pop,
        OpCode::Dup,
        OpCode::Swap,
        OpCode::Add,
        OpCode::Sub,
        OpCode::Mul,
        OpCode::Div,
        OpCode::Mod,
        OpCode::Neg,
        OpCode::Pow,
        OpCode::And,
        OpCode::Or,
        OpCode::Xor,
        OpCode::Not,
        OpCode::Shl,
        OpCode::Shr,
        OpCode::LNot,
        OpCode::Eq,
        OpCode::Ne,
        OpCode::Lt,
        OpCode::Le,
        OpCode::Gt,
        OpCode::Ge,
        OpCode::Cmp,
        OpCode::Jmp,
        OpCode::JmpIfTrue,
        OpCode::JmpIfFalse,
        OpCode::Call,
        OpCode::Ret,
        OpCode::Load,
        OpCode::Store,
        OpCode::Alloc,
        OpCode::Free,
        OpCode::New,
        OpCode::Delete,
        OpCode::GetAttr,
        OpCode::SetAttr,
        OpCode::GetItem,
        OpCode::SetItem,
        OpCode::BuildList,
        OpCode::BuildDict,
        OpCode::Len,
        OpCode::Iter,
        OpCode::SetupTry,
        OpCode::EndTry,
        OpCode::Raise,
        OpCode::PopTry,
        OpCode::Halt,
    ];

    /// Number of operand bytes following the opcode.
    pub fn operand_size(self) -> usize {
        if self.has_operand() {
            4
        } else {
            0
        }
    }

    pub fn has_operand(self) -> bool {
        matches!(
            self,
            OpCode::PushConst
                | OpCode::PushLocal
                | OpCode::PushGlobal
                | OpCode::Jmp
                | OpCode::JmpIfTrue
                | OpCode::JmpIfFalse
        )
    }

    pub fn is_jump(self) -> bool {
        matches!(self, OpCode::Jmp | OpCode::JmpIfTrue | OpCode::JmpIfFalse)
    }

    /// Control never falls through to the next instruction.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            OpCode::Jmp | OpCode::Ret | OpCode::Raise | OpCode::Halt
        )
    }

    /// Binary operators the constant folder can evaluate.
    pub fn is_foldable_binary(self) -> bool {
        matches!(
            self,
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
        )
    }

    pub fn from_u8(byte: u8) -> Option<OpCode> {
        let op = match byte {
            0x01 => OpCode::PushConst,
            0x02 => OpCode::PushLocal,
            0x03 => OpCode::PushGlobal,
            0x04 => OpCode::Pop,
            0x05 => OpCode::Dup,
            0x06 => OpCode::Swap,
            0x10 => OpCode::Add,
            0x11 => OpCode::Sub,
            0x12 => OpCode::Mul,
            0x13 => OpCode::Div,
            0x14 => OpCode::Mod,
            0x15 => OpCode::Neg,
            0x16 => OpCode::Pow,
            0x20 => OpCode::And,
            0x21 => OpCode::Or,
            0x22 => OpCode::Xor,
            0x23 => OpCode::Not,
            0x24 => OpCode::Shl,
            0x25 => OpCode::Shr,
            0x26 => OpCode::LNot,
            0x30 => OpCode::Eq,
            0x31 => OpCode::Ne,
            0x32 => OpCode::Lt,
            0x33 => OpCode::Le,
            0x34 => OpCode::Gt,
            0x35 => OpCode::Ge,
            0x36 => OpCode::Cmp,
            0x40 => OpCode::Jmp,
            0x41 => OpCode::JmpIfTrue,
            0x42 => OpCode::JmpIfFalse,
            0x43 => OpCode::Call,
            0x44 => OpCode::Ret,
            0x50 => OpCode::Load,
            0x51 => OpCode::Store,
            0x52 => OpCode::Alloc,
            0x53 => OpCode::Free,
            0x60 => OpCode::New,
            0x61 => OpCode::Delete,
            0x62 => OpCode::GetAttr,
            0x63 => OpCode::SetAttr,
            0x64 => OpCode::GetItem,
            0x65 => OpCode::SetItem,
            0x66 => OpCode::BuildList,
            0x67 => OpCode::BuildDict,
            0x68 => OpCode::Len,
            0x69 => OpCode::Iter,
            0x80 => OpCode::SetupTry,
            0x81 => OpCode::EndTry,
            0x82 => OpCode::Raise,
            0x83 => OpCode::PopTry,
            0xFF => OpCode::Halt,
            _ => return None,
        };
        Some(op)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            OpCode::PushConst => "PUSH_CONST",
            OpCode::PushLocal => "PUSH_LOCAL",
            OpCode::PushGlobal => "PUSH_GLOBAL",
            OpCode::Pop => "POP",
            OpCode::Dup => "DUP",
            OpCode::Swap => "SWAP",
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Div => "DIV",
            OpCode::Mod => "MOD",
            OpCode::Neg => "NEG",
            OpCode::Pow => "POW",
            OpCode::And => "AND",
            OpCode::Or => "OR",
            OpCode::Xor => "XOR",
            OpCode::Not => "NOT",
            OpCode::Shl => "SHL",
            OpCode::Shr => "SHR",
            OpCode::LNot => "LNOT",
            OpCode::Eq => "EQ",
            OpCode::Ne => "NE",
            OpCode::Lt => "LT",
            OpCode::Le => "LE",
            OpCode::Gt => "GT",
            OpCode::Ge => "GE",
            OpCode::Cmp => "CMP",
            OpCode::Jmp => "JMP",
            OpCode::JmpIfTrue => "JMP_IF_TRUE",
            OpCode::JmpIfFalse => "JMP_IF_FALSE",
            OpCode::Call => "CALL",
            OpCode::Ret => "RET",
            OpCode::Load => "LOAD",
            OpCode::Store => "STORE",
            OpCode::Alloc => "ALLOC",
            OpCode::Free => "FREE",
            OpCode::New => "NEW",
            OpCode::Delete => "DELETE",
            OpCode::GetAttr => "GET_ATTR",
            OpCode::SetAttr => "SET_ATTR",
            OpCode::GetItem => "GET_ITEM",
            OpCode::SetItem => "SET_ITEM",
            OpCode::BuildList => "BUILD_LIST",
            OpCode::BuildDict => "BUILD_DICT",
            OpCode::Len => "LEN",
            OpCode::Iter => "ITER",
            OpCode::SetupTry => "SETUP_TRY",
            OpCode::EndTry => "END_TRY",
            OpCode::Raise => "RAISE",
            OpCode::PopTry => "POP_TRY",
            OpCode::Halt => "HALT",
        }
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> u8 {
        op as u8
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.mnemonic())
    }
}

/// One decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: OpCode,
    pub operand: Option<u32>,
    pub line: u32,
}

impl Instruction {
    pub fn new(opcode: OpCode, operand: Option<u32>, line: u32) -> Self {
        Self {
            opcode,
            operand,
            line,
        }
    }

    pub fn size(&self) -> usize {
        1 + self.opcode.operand_size()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operand {
            Some(operand) => write!(f, "{} {}", self.opcode, operand),
            None => write!(f, "{}", self.opcode),
        }
    }
}
