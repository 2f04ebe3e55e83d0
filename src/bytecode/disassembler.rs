//! Bytecode disassembler for debugging.

use std::fmt::Write;

use crate::bytecode::function::{Function, Module};
use crate::bytecode::instruction::{Instruction, OpCode};

/// Disassemble every function of a module, `__init__` last.
pub fn disassemble_module(module: &Module) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "; module {}", module.name);
    for class in module.classes.values() {
        let _ = write!(output, "; class {}", class.name);
        if let Some(base) = &class.base {
            let _ = write!(output, " : {}", base);
        }
        let fields: Vec<&str> = class.fields.keys().map(String::as_str).collect();
        let _ = writeln!(output, " [{}]", fields.join(", "));
    }
    for (name, value) in &module.globals {
        let _ = writeln!(output, "; global {} = {}", name, value);
    }
    for function in module.functions.values() {
        output.push('\n');
        output.push_str(&disassemble_function(function));
    }
    output
}

/// Disassemble a function into human-readable output.
pub fn disassemble_function(function: &Function) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "== {} ({}) ==",
        function.name,
        function.params.join(", ")
    );
    if !function.locals.is_empty() {
        let _ = writeln!(output, "; locals: {}", function.locals.join(", "));
    }
    if let Some(native) = function.native() {
        let _ = writeln!(output, "; native body: {} bytes", native.code.len());
    }

    let instructions = match function.instructions() {
        Ok(instructions) => instructions,
        Err(err) => {
            let _ = writeln!(output, "<invalid bytecode: {}>", err);
            return output;
        }
    };

    let mut previous_line = None;
    for (offset, instr) in &instructions {
        let _ = write!(output, "{:04} ", offset);
        if previous_line == Some(instr.line) {
            output.push_str("   | ");
        } else {
            let _ = write!(output, "{:4} ", instr.line);
        }
        previous_line = Some(instr.line);
        output.push_str(&instruction_text(function, instr));
        output.push('\n');
    }
    output
}

fn instruction_text(function: &Function, instr: &Instruction) -> String {
    match (instr.opcode, instr.operand) {
        (OpCode::PushConst | OpCode::PushLocal | OpCode::PushGlobal, Some(index)) => {
            match function.constants.get(index as usize) {
                Some(constant) => format!("{:<14} {:4} ({})", instr.opcode, index, constant),
                None => format!("{:<14} {:4} <bad constant>", instr.opcode, index),
            }
        }
        (opcode, Some(target)) => format!("{:<14} -> {:04}", opcode, target),
        (opcode, None) => opcode.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::chunk::{Chunk, Constant};

    #[test]
    fn test_listing_shows_constants_and_targets() {
        let mut chunk = Chunk::new();
        let five = chunk.add_constant(Constant::Int(5));
        chunk.write_op_operand(OpCode::PushConst, five, 1);
        let site = chunk.write_jump(OpCode::JmpIfFalse, 1);
        chunk.patch_jump_here(site);
        chunk.write_op(OpCode::Ret, 2);
        let mut function = Function::new("f");
        function.constants = chunk.constants;
        function.set_code(chunk.code, chunk.lines);

        let listing = disassemble_function(&function);
        assert!(listing.contains("== f () =="));
        assert!(listing.contains("PUSH_CONST"));
        assert!(listing.contains("(5)"));
        assert!(listing.contains("-> 0010"));
        assert!(listing.contains("RET"));
    }
}
