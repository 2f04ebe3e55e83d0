//! Portable binary module format.
//!
//! ```text
//! "KAEDE" | version u16 | function_count u32
//! function_count x { name_len u16 | name | code_len u32 | code }
//! [ "META" | metadata ]
//! ```
//!
//! All integers are big-endian. The function table alone is enough to list
//! names and bytecode; the trailing `META` section carries constant pools,
//! parameters, line tables and class information so that a decoded module can
//! be executed.

use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};

use crate::bytecode::chunk::{decode, Constant, LineEntry};
use crate::bytecode::function::{ClassInfo, Function, Module};
use crate::error::FormatError;

pub const MAGIC: &[u8; 5] = b"KAEDE";
pub const FORMAT_VERSION: u16 = 1;
const META_TAG: &[u8; 4] = b"META";

/// Module name given to binaries that carry no metadata.
const ANONYMOUS_MODULE: &str = "<binary>";

const TAG_NULL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_STR: u8 = 5;

/// Serialize a module, metadata included. Fails if a name, list or table is
/// too long for its length field.
pub fn compile_to_bytecode(module: &Module) -> Result<Vec<u8>, FormatError> {
    let mut buf = BytesMut::new();
    buf.put_slice(MAGIC);
    buf.put_u16(FORMAT_VERSION);
    put_len32(&mut buf, module.functions.len(), "function count")?;
    for function in module.functions.values() {
        put_name(&mut buf, &function.name, "function name")?;
        put_len32(&mut buf, function.code.len(), "bytecode")?;
        buf.put_slice(&function.code);
    }

    buf.put_slice(META_TAG);
    put_str(&mut buf, &module.name, "module name")?;
    for function in module.functions.values() {
        put_names(&mut buf, &function.params, "parameters")?;
        put_len16(&mut buf, function.required_params, "required parameters")?;
        put_names(&mut buf, &function.locals, "locals")?;
        put_len32(&mut buf, function.constants.len(), "constant count")?;
        for constant in &function.constants {
            put_constant(&mut buf, constant)?;
        }
        put_len32(&mut buf, function.lines.len(), "line table")?;
        for entry in &function.lines {
            buf.put_u32(entry.offset);
            buf.put_u32(entry.line);
        }
    }

    put_len32(&mut buf, module.classes.len(), "class count")?;
    for class in module.classes.values() {
        put_name(&mut buf, &class.name, "class name")?;
        match &class.base {
            Some(base) => {
                buf.put_u8(1);
                put_name(&mut buf, base, "class base")?;
            }
            None => buf.put_u8(0),
        }
        buf.put_u8(class.is_struct as u8);
        put_len16(&mut buf, class.fields.len(), "class fields")?;
        for (name, default) in &class.fields {
            put_name(&mut buf, name, "field name")?;
            put_constant(&mut buf, default)?;
        }
        put_names(&mut buf, &class.methods, "class methods")?;
    }
    put_names(&mut buf, &module.namespaces, "namespaces")?;
    put_names(&mut buf, &module.imports, "imports")?;
    put_names(&mut buf, &module.exports, "exports")?;
    put_len32(&mut buf, module.globals.len(), "global count")?;
    for (name, value) in &module.globals {
        put_name(&mut buf, name, "global name")?;
        put_constant(&mut buf, value)?;
    }
    Ok(buf.to_vec())
}

fn put_len16(buf: &mut BytesMut, len: usize, what: &'static str) -> Result<(), FormatError> {
    let len = u16::try_from(len).map_err(|_| FormatError::TooLong { what, len })?;
    buf.put_u16(len);
    Ok(())
}

fn put_len32(buf: &mut BytesMut, len: usize, what: &'static str) -> Result<(), FormatError> {
    let len = u32::try_from(len).map_err(|_| FormatError::TooLong { what, len })?;
    buf.put_u32(len);
    Ok(())
}

fn put_name(buf: &mut BytesMut, name: &str, what: &'static str) -> Result<(), FormatError> {
    put_len16(buf, name.len(), what)?;
    buf.put_slice(name.as_bytes());
    Ok(())
}

fn put_str(buf: &mut BytesMut, s: &str, what: &'static str) -> Result<(), FormatError> {
    put_len32(buf, s.len(), what)?;
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn put_names(buf: &mut BytesMut, names: &[String], what: &'static str) -> Result<(), FormatError> {
    put_len16(buf, names.len(), what)?;
    for name in names {
        put_name(buf, name, what)?;
    }
    Ok(())
}

fn put_constant(buf: &mut BytesMut, constant: &Constant) -> Result<(), FormatError> {
    match constant {
        Constant::Null => buf.put_u8(TAG_NULL),
        Constant::Bool(false) => buf.put_u8(TAG_FALSE),
        Constant::Bool(true) => buf.put_u8(TAG_TRUE),
        Constant::Int(n) => {
            buf.put_u8(TAG_INT);
            buf.put_i64(*n);
        }
        Constant::Float(n) => {
            buf.put_u8(TAG_FLOAT);
            buf.put_u64(n.to_bits());
        }
        Constant::Str(s) => {
            buf.put_u8(TAG_STR);
            put_str(buf, s, "string constant")?;
        }
    }
    Ok(())
}

/// Bounds-checked reader over a byte slice.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn need(&self, n: usize, what: &'static str) -> Result<(), FormatError> {
        if self.buf.remaining() < n {
            Err(FormatError::Truncated(what))
        } else {
            Ok(())
        }
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, FormatError> {
        self.need(1, what)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, FormatError> {
        self.need(2, what)?;
        Ok(self.buf.get_u16())
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, FormatError> {
        self.need(4, what)?;
        Ok(self.buf.get_u32())
    }

    fn u64(&mut self, what: &'static str) -> Result<u64, FormatError> {
        self.need(8, what)?;
        Ok(self.buf.get_u64())
    }

    fn bytes(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], FormatError> {
        self.need(len, what)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn utf8(&mut self, len: usize, what: &'static str) -> Result<String, FormatError> {
        let bytes = self.bytes(len, what)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| FormatError::InvalidUtf8(what))
    }

    fn name(&mut self, what: &'static str) -> Result<String, FormatError> {
        let len = self.u16(what)? as usize;
        self.utf8(len, what)
    }

    fn string(&mut self, what: &'static str) -> Result<String, FormatError> {
        let len = self.u32(what)? as usize;
        self.utf8(len, what)
    }

    fn names(&mut self, what: &'static str) -> Result<Vec<String>, FormatError> {
        let count = self.u16(what)?;
        (0..count).map(|_| self.name(what)).collect()
    }

    fn constant(&mut self) -> Result<Constant, FormatError> {
        Ok(match self.u8("constant tag")? {
            TAG_NULL => Constant::Null,
            TAG_FALSE => Constant::Bool(false),
            TAG_TRUE => Constant::Bool(true),
            TAG_INT => Constant::Int(self.u64("integer constant")? as i64),
            TAG_FLOAT => Constant::Float(f64::from_bits(self.u64("float constant")?)),
            TAG_STR => Constant::Str(self.string("string constant")?),
            tag => return Err(FormatError::InvalidConstantTag(tag)),
        })
    }
}

/// Load a module produced by [`compile_to_bytecode`].
pub fn load_bytecode(data: &[u8]) -> Result<Module, FormatError> {
    let mut reader = Reader { buf: data };
    if reader.bytes(MAGIC.len(), "magic").map_err(|_| FormatError::BadMagic)? != MAGIC {
        return Err(FormatError::BadMagic);
    }
    let version = reader.u16("version")?;
    if version != FORMAT_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }

    let count = reader.u32("function count")?;
    let mut functions = Vec::new();
    for _ in 0..count {
        let name = reader.name("function name")?;
        let len = reader.u32("bytecode length")? as usize;
        let code = reader.bytes(len, "bytecode")?.to_vec();
        functions.push(Function::with_code(name, Vec::new(), code, Vec::new()));
    }

    let mut module = Module::new(ANONYMOUS_MODULE);
    if reader.buf.has_remaining() {
        if reader.bytes(META_TAG.len(), "metadata tag")? != META_TAG {
            return Err(FormatError::Truncated("metadata tag"));
        }
        read_metadata(&mut reader, &mut module, &mut functions)?;
    }

    for function in functions {
        decode(&function.code, &function.lines)?;
        module.add_function(function);
    }
    Ok(module)
}

fn read_metadata(
    reader: &mut Reader<'_>,
    module: &mut Module,
    functions: &mut [Function],
) -> Result<(), FormatError> {
    module.name = reader.string("module name")?;
    for function in functions.iter_mut() {
        function.params = reader.names("parameters")?;
        function.required_params = reader.u16("required parameters")? as usize;
        function.locals = reader.names("locals")?;
        let constants = reader.u32("constant count")?;
        function.constants = (0..constants)
            .map(|_| reader.constant())
            .collect::<Result<_, _>>()?;
        let lines = reader.u32("line table")?;
        let lines = (0..lines)
            .map(|_| {
                Ok(LineEntry {
                    offset: reader.u32("line table")?,
                    line: reader.u32("line table")?,
                })
            })
            .collect::<Result<Vec<_>, FormatError>>()?;
        let code = std::mem::take(&mut function.code);
        function.set_code(code, lines);
    }

    let classes = reader.u32("class count")?;
    for _ in 0..classes {
        let mut class = ClassInfo::new(reader.name("class name")?);
        if reader.u8("class base")? != 0 {
            class.base = Some(reader.name("class base")?);
        }
        class.is_struct = reader.u8("class kind")? != 0;
        let fields = reader.u16("class fields")?;
        for _ in 0..fields {
            let name = reader.name("field name")?;
            let default = reader.constant()?;
            class.fields.insert(name, default);
        }
        class.methods = reader.names("class methods")?;
        module.classes.insert(class.name.clone(), Arc::new(class));
    }
    module.namespaces = reader.names("namespaces")?;
    module.imports = reader.names("imports")?;
    module.exports = reader.names("exports")?;
    let globals = reader.u32("global count")?;
    for _ in 0..globals {
        let name = reader.name("global name")?;
        let value = reader.constant()?;
        module.globals.insert(name, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::generate;
    use crate::lexer::tokenize;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    fn compile(source: &str) -> Module {
        let program = parse(tokenize(source).unwrap()).unwrap();
        generate(&program, "demo").unwrap()
    }

    #[test]
    fn test_header_layout() {
        let mut module = Module::new("m");
        module.add_function(Function::with_code("f", Vec::new(), vec![0x44], Vec::new()));
        let bytes = compile_to_bytecode(&module).unwrap();
        assert_eq!(&bytes[0..5], b"KAEDE");
        assert_eq!(&bytes[5..7], &[0, 1]);
        assert_eq!(&bytes[7..11], &[0, 0, 0, 1]);
        assert_eq!(&bytes[11..13], &[0, 1]);
        assert_eq!(bytes[13], b'f');
        assert_eq!(&bytes[14..18], &[0, 0, 0, 1]);
        assert_eq!(bytes[18], 0x44);
        assert_eq!(&bytes[19..23], b"META");
    }

    #[test]
    fn test_round_trip_preserves_functions_and_metadata() {
        let module = compile(
            "class Point {\n    var x = 1\n    var y = 2.5\n}\n\
             fn add(a, b = 2) { let c = a + b; return c; }\n\
             let greeting = \"hi\";\n",
        );
        let loaded = load_bytecode(&compile_to_bytecode(&module).unwrap()).unwrap();

        assert_eq!(loaded.name, "demo");
        let names: Vec<&String> = loaded.functions.keys().collect();
        let expected: Vec<&String> = module.functions.keys().collect();
        assert_eq!(names, expected);
        for (name, function) in &module.functions {
            let other = &loaded.functions[name];
            assert_eq!(other.code, function.code);
            assert_eq!(other.constants, function.constants);
            assert_eq!(other.params, function.params);
            assert_eq!(other.required_params, function.required_params);
            assert_eq!(other.lines, function.lines);
        }
        assert_eq!(loaded.classes["Point"], module.classes["Point"]);
        assert_eq!(loaded.globals, module.globals);
    }

    #[test]
    fn test_function_table_without_metadata() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"KAEDE");
        bytes.extend_from_slice(&1u16.to_be_bytes());
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(&4u16.to_be_bytes());
        bytes.extend_from_slice(b"main");
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.push(0x44);
        let module = load_bytecode(&bytes).unwrap();
        assert_eq!(module.name, "<binary>");
        assert_eq!(module.functions["main"].code, vec![0x44]);
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert_eq!(load_bytecode(b"NOPE!").unwrap_err(), FormatError::BadMagic);
        assert_eq!(load_bytecode(b"KA").unwrap_err(), FormatError::BadMagic);
        assert_eq!(
            load_bytecode(b"KAEDE\x00\x02").unwrap_err(),
            FormatError::UnsupportedVersion(2)
        );
        assert_eq!(
            load_bytecode(b"KAEDE\x00\x01\x00\x00\x00\x01\x00\x04ma").unwrap_err(),
            FormatError::Truncated("function name")
        );
        let bad_opcode = b"KAEDE\x00\x01\x00\x00\x00\x01\x00\x01f\x00\x00\x00\x01\x77";
        assert!(matches!(
            load_bytecode(bad_opcode),
            Err(FormatError::InvalidOpcode { opcode: 0x77, .. })
        ));
    }

    #[test]
    fn test_oversized_name_is_rejected() {
        let name = "a".repeat(70_000);
        let module = compile(&format!("fn {}() {{ return 1 }}\n", name));
        assert_eq!(
            compile_to_bytecode(&module).unwrap_err(),
            FormatError::TooLong {
                what: "function name",
                len: 70_000
            }
        );

        let mut module = Module::new("m");
        let mut function = Function::with_code("f", Vec::new(), vec![0x44], Vec::new());
        function.locals = (0..70_000).map(|i| format!("v{}", i)).collect();
        module.add_function(function);
        assert!(matches!(
            compile_to_bytecode(&module),
            Err(FormatError::TooLong { what: "locals", .. })
        ));
    }
}
