//! AST-to-bytecode compiler.
//!
//! Single pass per function: each function body is walked once, emitting into
//! its own `Chunk`. Nested functions, methods and lambdas push a fresh
//! [`FunctionBuilder`]; the module's top-level code lives in `__init__`.
//!
//! Variables are resolved by name. Inside a function, a name that is not a
//! parameter, declared local, class static, implicit field, namespace member or
//! module global becomes a local on first assignment.

use std::collections::{HashMap, HashSet};

use indexmap::IndexSet;
use tracing::debug;

use crate::ast::{Expr, ExprKind, Program, Stmt, StmtKind, UnaryOp};
use crate::bytecode::chunk::{Chunk, Constant};
use crate::bytecode::function::{Function, Module, MODULE_INIT};
use crate::bytecode::instruction::OpCode;
use crate::error::CompileError;
use crate::span::Span;

/// Result type for compilation.
pub type CompileResult<T> = Result<T, CompileError>;

/// Largest constant pool a single function may use.
const MAX_CONSTANTS: usize = u32::MAX as usize;

/// Loop bookkeeping for `break` and `continue`.
#[derive(Debug, Default)]
pub(crate) struct LoopContext {
    pub break_patches: Vec<usize>,
    pub continue_patches: Vec<usize>,
    /// Depth of the try stack when the loop was entered.
    pub try_depth: usize,
}

/// An active protected region. Early exits run `finally` inline.
#[derive(Debug, Clone)]
pub(crate) struct TryContext {
    pub finally: Option<Box<Stmt>>,
}

/// Per-function compilation state.
#[derive(Debug)]
pub struct FunctionBuilder {
    pub name: String,
    pub params: Vec<String>,
    pub required_params: usize,
    locals: IndexSet<String>,
    consts: HashSet<String>,
    /// Function-level statics mapped to their hoisted global names.
    statics: HashMap<String, String>,
    pub(crate) chunk: Chunk,
    /// Offsets that some jump lands on.
    labels: HashSet<usize>,
    pub(crate) loops: Vec<LoopContext>,
    pub(crate) try_stack: Vec<TryContext>,
    /// Enclosing class, for methods.
    pub class: Option<String>,
    /// Whether `self` is bound.
    pub is_method: bool,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            required_params: 0,
            locals: IndexSet::new(),
            consts: HashSet::new(),
            statics: HashMap::new(),
            chunk: Chunk::new(),
            labels: HashSet::new(),
            loops: Vec::new(),
            try_stack: Vec::new(),
            class: None,
            is_method: false,
        }
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.params.iter().any(|p| p == name) || self.locals.contains(name)
    }

    pub fn declare_local(&mut self, name: &str) {
        if !self.params.iter().any(|p| p == name) {
            self.locals.insert(name.to_string());
        }
    }

    fn is_init(&self) -> bool {
        self.name == MODULE_INIT
    }

    /// Seal the body with an implicit `return null` when control can reach the end.
    fn finish(mut self) -> Function {
        let end = self.chunk.current_offset();
        if self.chunk.last_opcode() != Some(OpCode::Ret) || self.labels.contains(&end) {
            let line = self.chunk.lines.last().map(|e| e.line).unwrap_or(0);
            let null = self.chunk.add_constant(Constant::Null);
            self.chunk.write_op_operand(OpCode::PushConst, null, line);
            self.chunk.write_op(OpCode::Ret, line);
        }
        let mut function = Function::new(self.name);
        function.params = self.params;
        function.required_params = self.required_params;
        function.locals = self.locals.into_iter().collect();
        function.constants = self.chunk.constants;
        function.set_code(self.chunk.code, self.chunk.lines);
        function
    }
}

/// Where an identifier lives at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolved {
    Local(String),
    Global(String),
    /// Implicit `self.name` inside a method.
    Field(String),
}

/// The compiler: transforms a program into a [`Module`].
pub struct Compiler {
    pub(crate) module: Module,
    pub(crate) current: FunctionBuilder,
    enclosing: Vec<FunctionBuilder>,
    pub(crate) globals: HashSet<String>,
    pub(crate) const_globals: HashSet<String>,
    /// Path of the namespace being compiled.
    pub(crate) namespace: Vec<String>,
    pub(crate) using: Vec<String>,
    pub(crate) class_statics: HashMap<String, HashSet<String>>,
    /// Static initializers waiting to be emitted into `__init__`.
    pub(crate) pending_inits: Vec<(String, Expr)>,
    lambda_count: usize,
    hidden_count: usize,
}

/// Compile a parsed program into a module.
pub fn generate(program: &Program, module_name: &str) -> CompileResult<Module> {
    Compiler::new(module_name).compile(program)
}

impl Compiler {
    pub fn new(module_name: &str) -> Self {
        Self {
            module: Module::new(module_name),
            current: FunctionBuilder::new(MODULE_INIT),
            enclosing: Vec::new(),
            globals: HashSet::new(),
            const_globals: HashSet::new(),
            namespace: Vec::new(),
            using: Vec::new(),
            class_statics: HashMap::new(),
            pending_inits: Vec::new(),
            lambda_count: 0,
            hidden_count: 0,
        }
    }

    /// Compile a full program.
    pub fn compile(mut self, program: &Program) -> CompileResult<Module> {
        self.declare_globals(&program.statements, "");

        let count = program.statements.len();
        for (index, stmt) in program.statements.iter().enumerate() {
            match &stmt.kind {
                // The last top-level expression is the module's result.
                StmtKind::Expression(expr) if index + 1 == count => {
                    self.compile_expr(expr)?;
                    self.emit(OpCode::Ret, stmt.span);
                }
                _ => self.compile_stmt(stmt)?,
            }
            self.flush_pending_inits()?;
        }

        let init = std::mem::replace(&mut self.current, FunctionBuilder::new(MODULE_INIT));
        let function = init.finish();
        debug!(
            module = %self.module.name,
            functions = self.module.functions.len() + 1,
            "compiled module"
        );
        self.module.add_function(function);
        Ok(self.module)
    }

    /// Record every module-level name before any body is compiled, so that a
    /// function may assign a global declared further down.
    fn declare_globals(&mut self, stmts: &[Stmt], prefix: &str) {
        let qualify = |name: &str| {
            if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{}.{}", prefix, name)
            }
        };
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::VarDecl(decl) => {
                    let name = qualify(&decl.name);
                    if decl.kind == crate::ast::VarKind::Const {
                        self.const_globals.insert(name.clone());
                    }
                    self.globals.insert(name);
                }
                StmtKind::Function(decl) => {
                    self.globals.insert(qualify(&decl.name));
                }
                StmtKind::Class(decl) => {
                    self.globals.insert(qualify(&decl.name));
                }
                StmtKind::Enum(decl) => {
                    let name = qualify(&decl.name);
                    for variant in &decl.variants {
                        self.globals.insert(format!("{}.{}", name, variant.name));
                    }
                    self.globals.insert(name);
                }
                StmtKind::Namespace { name, body } => {
                    let name = qualify(name);
                    self.declare_globals(body, &name);
                    self.globals.insert(name);
                }
                StmtKind::Export(inner) => {
                    self.declare_globals(std::slice::from_ref(inner), prefix)
                }
                StmtKind::Template { declaration, .. } => {
                    self.declare_globals(std::slice::from_ref(declaration), prefix)
                }
                StmtKind::Expression(Expr {
                    kind: ExprKind::Assign { target, .. },
                    ..
                }) if prefix.is_empty() => {
                    if let ExprKind::Identifier(name) = &target.kind {
                        self.globals.insert(name.clone());
                    }
                }
                _ => {}
            }
        }
    }

    // --- Function builders ---

    pub(crate) fn begin_function(&mut self, builder: FunctionBuilder) {
        let outer = std::mem::replace(&mut self.current, builder);
        self.enclosing.push(outer);
    }

    pub(crate) fn end_function(&mut self, span: Span) -> CompileResult<()> {
        let outer = self
            .enclosing
            .pop()
            .ok_or_else(|| CompileError::new("function stack underflow", span))?;
        let builder = std::mem::replace(&mut self.current, outer);
        if self.module.functions.contains_key(&builder.name) {
            return Err(CompileError::duplicate(builder.name, span));
        }
        let function = builder.finish();
        debug!(
            function = %function.name,
            bytes = function.code.len(),
            constants = function.constants.len(),
            "compiled function"
        );
        self.module.add_function(function);
        Ok(())
    }

    pub(crate) fn in_init(&self) -> bool {
        self.current.is_init()
    }

    /// Emit static initializers once control is back in `__init__`.
    pub(crate) fn flush_pending_inits(&mut self) -> CompileResult<()> {
        if !self.in_init() {
            return Ok(());
        }
        for (name, expr) in std::mem::take(&mut self.pending_inits) {
            self.compile_expr(&expr)?;
            self.emit_store(&name, expr.span)?;
        }
        Ok(())
    }

    pub(crate) fn next_lambda_name(&mut self) -> String {
        self.lambda_count += 1;
        format!("lambda#{}", self.lambda_count)
    }

    /// A fresh compiler-private local such as `$iter3`.
    pub(crate) fn hidden_local(&mut self, stem: &str) -> String {
        self.hidden_count += 1;
        let name = format!("${}{}", stem, self.hidden_count);
        self.current.declare_local(&name);
        name
    }

    pub(crate) fn qualify(&self, name: &str) -> String {
        if self.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.namespace.join("."), name)
        }
    }

    // --- Name resolution ---

    fn namespace_member(&self, name: &str) -> Option<String> {
        for depth in (1..=self.namespace.len()).rev() {
            let candidate = format!("{}.{}", self.namespace[..depth].join("."), name);
            if self.globals.contains(&candidate) {
                return Some(candidate);
            }
        }
        self.using
            .iter()
            .map(|ns| format!("{}.{}", ns, name))
            .find(|candidate| self.globals.contains(candidate))
    }

    fn has_instance_field(&self, class: &str, name: &str) -> bool {
        let Some(info) = self.module.classes.get(class) else {
            return false;
        };
        self.module
            .class_chain(info)
            .iter()
            .any(|c| c.fields.contains_key(name))
    }

    /// Resolve an identifier for reading.
    pub(crate) fn resolve(&self, name: &str) -> Resolved {
        let builder = &self.current;
        let name = if name == "this" && builder.is_method {
            "self"
        } else {
            name
        };
        if name.contains('.') {
            return Resolved::Global(name.to_string());
        }
        if let Some(global) = builder.statics.get(name) {
            return Resolved::Global(global.clone());
        }
        if builder.is_local(name) {
            return Resolved::Local(name.to_string());
        }
        if let Some(class) = &builder.class {
            if self
                .class_statics
                .get(class)
                .is_some_and(|statics| statics.contains(name))
            {
                return Resolved::Global(format!("{}.{}", class, name));
            }
            if builder.is_method && self.has_instance_field(class, name) {
                return Resolved::Field(name.to_string());
            }
        }
        if let Some(member) = self.namespace_member(name) {
            return Resolved::Global(member);
        }
        Resolved::Global(name.to_string())
    }

    /// Resolve an identifier as an assignment target, declaring a local when
    /// a function assigns a name it has not seen.
    pub(crate) fn resolve_store(&mut self, name: &str, span: Span) -> CompileResult<Resolved> {
        let resolved = match self.resolve(name) {
            Resolved::Global(global) if !self.globals.contains(&global) => {
                if self.in_init() {
                    self.globals.insert(global.clone());
                    Resolved::Global(global)
                } else {
                    self.current.declare_local(&global);
                    Resolved::Local(global)
                }
            }
            other => other,
        };
        let is_const = match &resolved {
            Resolved::Local(local) => self.current.consts.contains(local),
            Resolved::Global(global) => self.const_globals.contains(global),
            Resolved::Field(_) => false,
        };
        if is_const {
            return Err(CompileError::const_assignment(name, span));
        }
        Ok(resolved)
    }

    /// Declare a variable introduced by `let`/`var`/`const` and return the
    /// name its value is stored under.
    pub(crate) fn declare_variable(&mut self, name: &str, is_const: bool) -> String {
        if self.in_init() {
            let global = self.qualify(name);
            self.globals.insert(global.clone());
            if is_const {
                self.const_globals.insert(global.clone());
            }
            global
        } else {
            self.current.declare_local(name);
            if is_const {
                self.current.consts.insert(name.to_string());
            } else {
                self.current.consts.remove(name);
            }
            name.to_string()
        }
    }

    /// Hoist a function-level `static` into a module global.
    pub(crate) fn declare_static(&mut self, name: &str) -> String {
        let global = format!("{}.{}", self.current.name, name);
        self.current.statics.insert(name.to_string(), global.clone());
        self.globals.insert(global.clone());
        global
    }

    // --- Emission helpers ---

    pub(crate) fn emit(&mut self, op: OpCode, span: Span) {
        self.current.chunk.write_op(op, span.line as u32);
    }

    pub(crate) fn add_constant(&mut self, constant: Constant, span: Span) -> CompileResult<u32> {
        let chunk = &mut self.current.chunk;
        if chunk.constants.len() >= MAX_CONSTANTS && !chunk.constants.contains(&constant) {
            return Err(CompileError::TooManyConstants {
                function: self.current.name.clone(),
                span,
            });
        }
        Ok(chunk.add_constant(constant))
    }

    pub(crate) fn emit_constant(&mut self, constant: Constant, span: Span) -> CompileResult<()> {
        let index = self.add_constant(constant, span)?;
        self.current
            .chunk
            .write_op_operand(OpCode::PushConst, index, span.line as u32);
        Ok(())
    }

    pub(crate) fn emit_str(&mut self, s: &str, span: Span) -> CompileResult<()> {
        self.emit_constant(Constant::Str(s.to_string()), span)
    }

    pub(crate) fn emit_int(&mut self, n: i64, span: Span) -> CompileResult<()> {
        self.emit_constant(Constant::Int(n), span)
    }

    pub(crate) fn emit_null(&mut self, span: Span) -> CompileResult<()> {
        self.emit_constant(Constant::Null, span)
    }

    pub(crate) fn emit_load_local(&mut self, name: &str, span: Span) -> CompileResult<()> {
        let index = self.add_constant(Constant::Str(name.to_string()), span)?;
        self.current
            .chunk
            .write_op_operand(OpCode::PushLocal, index, span.line as u32);
        Ok(())
    }

    pub(crate) fn emit_load_global(&mut self, name: &str, span: Span) -> CompileResult<()> {
        let index = self.add_constant(Constant::Str(name.to_string()), span)?;
        self.current
            .chunk
            .write_op_operand(OpCode::PushGlobal, index, span.line as u32);
        Ok(())
    }

    /// `name; STORE`: pops the value beneath.
    pub(crate) fn emit_store(&mut self, name: &str, span: Span) -> CompileResult<()> {
        self.emit_str(name, span)?;
        self.emit(OpCode::Store, span);
        Ok(())
    }

    pub(crate) fn emit_load(&mut self, resolved: &Resolved, span: Span) -> CompileResult<()> {
        match resolved {
            Resolved::Local(name) => self.emit_load_local(name, span),
            Resolved::Global(name) => self.emit_load_global(name, span),
            Resolved::Field(name) => {
                self.emit_load_local("self", span)?;
                self.emit_str(name, span)?;
                self.emit(OpCode::GetAttr, span);
                Ok(())
            }
        }
    }

    /// Emit `argc; CALL` for a callee and arguments already on the stack.
    pub(crate) fn emit_call(&mut self, argc: usize, span: Span) -> CompileResult<()> {
        self.emit_int(argc as i64, span)?;
        self.emit(OpCode::Call, span);
        Ok(())
    }

    pub(crate) fn emit_jump(&mut self, op: OpCode, span: Span) -> usize {
        self.current.chunk.write_jump(op, span.line as u32)
    }

    /// Point the jump at `site` to the current end of code.
    pub(crate) fn patch_jump(&mut self, site: usize) {
        let here = self.current.chunk.current_offset();
        self.current.labels.insert(here);
        self.current.chunk.patch_jump(site, here);
    }

    /// Emit an unconditional jump back to `target`.
    pub(crate) fn emit_loop(&mut self, target: usize, span: Span) {
        let site = self.emit_jump(OpCode::Jmp, span);
        self.current.labels.insert(target);
        self.current.chunk.patch_jump(site, target);
    }

    pub(crate) fn current_offset(&self) -> usize {
        self.current.chunk.current_offset()
    }

    /// Leave every protected region above `floor`, innermost first, running
    /// each region's `finally` inline.
    pub(crate) fn emit_try_exits(&mut self, floor: usize, span: Span) -> CompileResult<()> {
        let saved = self.current.try_stack.clone();
        for depth in (floor..saved.len()).rev() {
            self.emit(OpCode::PopTry, span);
            if let Some(finally) = &saved[depth].finally {
                self.current.try_stack.truncate(depth);
                let result = self.compile_stmt(finally);
                self.current.try_stack = saved.clone();
                result?;
            }
        }
        Ok(())
    }

    // --- Constant evaluation ---

    /// The constant a literal expression denotes, if it is one.
    pub(crate) fn constant_of(expr: &Expr) -> Option<Constant> {
        match &expr.kind {
            ExprKind::IntLiteral(n) => Some(Constant::Int(*n)),
            ExprKind::FloatLiteral(n) => Some(Constant::Float(*n)),
            ExprKind::StringLiteral(s) => Some(Constant::Str(s.clone())),
            ExprKind::BoolLiteral(b) => Some(Constant::Bool(*b)),
            ExprKind::Null => Some(Constant::Null),
            ExprKind::Unary {
                operator: UnaryOp::Negate,
                operand,
            } => match &operand.kind {
                ExprKind::IntLiteral(n) => n.checked_neg().map(Constant::Int),
                ExprKind::FloatLiteral(n) => Some(Constant::Float(-n)),
                _ => None,
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::disassembler::disassemble_function;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn compile(source: &str) -> Module {
        let tokens = tokenize(source).unwrap();
        let program = parse(tokens).unwrap();
        generate(&program, "test").unwrap()
    }

    fn compile_err(source: &str) -> CompileError {
        let tokens = tokenize(source).unwrap();
        let program = parse(tokens).unwrap();
        generate(&program, "test").unwrap_err()
    }

    fn opcodes(function: &Function) -> Vec<OpCode> {
        function
            .instructions()
            .unwrap()
            .into_iter()
            .map(|(_, i)| i.opcode)
            .collect()
    }

    #[test]
    fn test_expression_module_returns_last_value() {
        let module = compile("1 + 2 * 3");
        let init = module.function(MODULE_INIT).unwrap();
        assert_eq!(
            opcodes(init),
            vec![
                OpCode::PushConst,
                OpCode::PushConst,
                OpCode::PushConst,
                OpCode::Mul,
                OpCode::Add,
                OpCode::Ret
            ]
        );
    }

    #[test]
    fn test_every_function_ends_in_return() {
        let module = compile("fn f(x) {\n    if x { return 1 }\n}\nlet y = 2\n");
        for function in module.functions.values() {
            assert_eq!(opcodes(function).last(), Some(&OpCode::Ret), "{}", function.name);
        }
    }

    #[test]
    fn test_top_level_names_are_globals_and_function_names_locals() {
        let module = compile("let g = 1\nfn f(a) {\n    let b = a\n    c = b\n    g = c\n}\n");
        let f = module.function("f").unwrap();
        assert_eq!(f.params, vec!["a".to_string()]);
        assert_eq!(f.locals, vec!["b".to_string(), "c".to_string()]);
        let listing = disassemble_function(f);
        assert!(listing.contains("\"g\""), "{}", listing);
    }

    #[test]
    fn test_function_may_assign_a_later_global() {
        let module = compile("fn bump() { counter = counter + 1 }\nlet counter = 0\n");
        assert!(module.function("bump").unwrap().locals.is_empty());
    }

    #[test]
    fn test_const_assignment_is_rejected() {
        assert!(matches!(
            compile_err("const N = 1\nN = 2\n"),
            CompileError::ConstAssignment { .. }
        ));
        assert!(matches!(
            compile_err("fn f() {\n    const k = 1\n    k += 1\n}\n"),
            CompileError::ConstAssignment { .. }
        ));
    }

    #[test]
    fn test_break_outside_loop_is_rejected() {
        assert!(matches!(
            compile_err("fn f() { break }"),
            CompileError::OutsideLoop { .. }
        ));
    }

    #[test]
    fn test_duplicate_function_is_rejected() {
        assert!(matches!(
            compile_err("fn f() {}\nfn f() {}\n"),
            CompileError::DuplicateDefinition { .. }
        ));
    }

    #[test]
    fn test_static_is_hoisted_into_a_global() {
        let module = compile("fn counter() {\n    static int n = 0\n    n += 1\n    return n\n}\n");
        assert_eq!(module.globals.get("counter.n"), Some(&Constant::Int(0)));
        assert!(module.function("counter").unwrap().locals.is_empty());
    }

    #[test]
    fn test_class_methods_and_fields() {
        let module = compile(
            "class Point {\n    int x = 0\n    int y = 0\n    fn norm() { return x * x + y * y }\n}\n",
        );
        let info = &module.classes["Point"];
        assert_eq!(info.fields.len(), 2);
        assert!(module.function("Point.norm").is_some());
        assert!(module.function("Point.__init__").is_some());
        assert_eq!(module.function("Point.norm").unwrap().params, vec!["self"]);
    }

    #[test]
    fn test_enum_variants_become_constant_globals() {
        let module = compile("enum Color { Red, Green = 5, Blue }\n");
        assert_eq!(module.globals.get("Color.Red"), Some(&Constant::Int(0)));
        assert_eq!(module.globals.get("Color.Blue"), Some(&Constant::Int(6)));
        assert!(module.namespaces.contains(&"Color".to_string()));
    }

    #[test]
    fn test_template_must_wrap_function_or_class() {
        let module = compile("template<typename T>\nT first(T a, T b) { return a }\n");
        assert!(module.function("first").is_some());
    }

    #[test]
    fn test_try_regions_are_recoverable_from_code() {
        let module = compile("try {\n    x = 1\n} catch (ValueError e) {\n    x = 2\n} finally {\n    x = 3\n}\n");
        let init = module.function(MODULE_INIT).unwrap();
        assert_eq!(init.try_regions().len(), 2);
        for region in init.try_regions() {
            let ops = init.instructions().unwrap();
            let handler_op = ops
                .iter()
                .find(|(offset, _)| *offset == region.handler)
                .map(|(_, i)| i.opcode);
            assert_eq!(handler_op, Some(OpCode::PushConst));
        }
    }
}
