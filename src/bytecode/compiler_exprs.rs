//! Expression compilation: AST expressions to bytecode.
//!
//! Every expression leaves exactly one value on the operand stack.

use crate::ast::{BinaryOp, Expr, ExprKind, LambdaBody, LogicalOp, Parameter, UnaryOp};
use crate::bytecode::chunk::Constant;
use crate::bytecode::instruction::OpCode;
use crate::error::CompileError;
use crate::span::Span;

use super::compiler::{CompileResult, Compiler, FunctionBuilder, Resolved};

pub(crate) fn binary_opcode(op: BinaryOp) -> OpCode {
    match op {
        BinaryOp::Add => OpCode::Add,
        BinaryOp::Subtract => OpCode::Sub,
        BinaryOp::Multiply => OpCode::Mul,
        BinaryOp::Divide => OpCode::Div,
        BinaryOp::Modulo => OpCode::Mod,
        BinaryOp::Power => OpCode::Pow,
        BinaryOp::Equal => OpCode::Eq,
        BinaryOp::NotEqual => OpCode::Ne,
        BinaryOp::Less => OpCode::Lt,
        BinaryOp::LessEqual => OpCode::Le,
        BinaryOp::Greater => OpCode::Gt,
        BinaryOp::GreaterEqual => OpCode::Ge,
        BinaryOp::Compare => OpCode::Cmp,
        BinaryOp::BitAnd => OpCode::And,
        BinaryOp::BitOr => OpCode::Or,
        BinaryOp::BitXor => OpCode::Xor,
        BinaryOp::ShiftLeft => OpCode::Shl,
        BinaryOp::ShiftRight => OpCode::Shr,
    }
}

/// Builtin conversion called by a cast to `type_name`, if any.
fn cast_builtin(type_name: &str) -> Option<&'static str> {
    match type_name {
        "int" | "long" | "short" | "char" | "byte" | "i8" | "i16" | "i32" | "i64" | "u8"
        | "u16" | "u32" | "u64" => Some("int"),
        "float" | "double" | "f32" | "f64" => Some("float"),
        "str" | "string" | "String" => Some("str"),
        "bool" => Some("bool"),
        _ => None,
    }
}

impl Compiler {
    /// Compile an expression.
    pub fn compile_expr(&mut self, expr: &Expr) -> CompileResult<()> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::IntLiteral(n) => self.emit_constant(Constant::Int(*n), span),
            ExprKind::FloatLiteral(n) => self.emit_constant(Constant::Float(*n), span),
            ExprKind::StringLiteral(s) => self.emit_constant(Constant::Str(s.clone()), span),
            ExprKind::BoolLiteral(b) => self.emit_constant(Constant::Bool(*b), span),
            ExprKind::Null => self.emit_null(span),

            ExprKind::Identifier(name) => {
                let resolved = self.resolve(name);
                self.emit_load(&resolved, span)
            }

            ExprKind::Unary { operator, operand } => {
                self.compile_expr(operand)?;
                match operator {
                    UnaryOp::Negate => self.emit(OpCode::Neg, span),
                    UnaryOp::Not => self.emit(OpCode::LNot, span),
                    UnaryOp::BitNot => self.emit(OpCode::Not, span),
                    UnaryOp::Plus => {}
                }
                Ok(())
            }

            ExprKind::Binary {
                left,
                operator,
                right,
            } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.emit(binary_opcode(*operator), span);
                Ok(())
            }

            ExprKind::Logical {
                left,
                operator,
                right,
            } => {
                // The deciding operand is the result: `a && b` is `a` when `a` is falsy.
                self.compile_expr(left)?;
                self.emit(OpCode::Dup, span);
                let jump = match operator {
                    LogicalOp::And => OpCode::JmpIfFalse,
                    LogicalOp::Or => OpCode::JmpIfTrue,
                };
                let end = self.emit_jump(jump, span);
                self.emit(OpCode::Pop, span);
                self.compile_expr(right)?;
                self.patch_jump(end);
                Ok(())
            }

            ExprKind::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                self.compile_expr(condition)?;
                let else_jump = self.emit_jump(OpCode::JmpIfFalse, span);
                self.compile_expr(then_branch)?;
                let end = self.emit_jump(OpCode::Jmp, span);
                self.patch_jump(else_jump);
                self.compile_expr(else_branch)?;
                self.patch_jump(end);
                Ok(())
            }

            ExprKind::Assign {
                target,
                operator,
                value,
            } => self.compile_assign(target, *operator, value, span),

            ExprKind::Update {
                target,
                increment,
                prefix,
            } => {
                let one = Expr::new(expr.id, ExprKind::IntLiteral(1), span);
                let (op, inverse) = if *increment {
                    (BinaryOp::Add, OpCode::Sub)
                } else {
                    (BinaryOp::Subtract, OpCode::Add)
                };
                self.compile_assign(target, Some(op), &one, span)?;
                if !*prefix {
                    // Postfix yields the old value.
                    self.emit_int(1, span)?;
                    self.emit(inverse, span);
                }
                Ok(())
            }

            ExprKind::Call { callee, arguments } => self.compile_call(callee, arguments, span),

            ExprKind::Member { object, name, .. } => {
                if let Some(function) = self.super_method(object, name, span)? {
                    return self.emit_load_global(&function, span);
                }
                self.compile_expr(object)?;
                self.emit_str(name, span)?;
                self.emit(OpCode::GetAttr, span);
                Ok(())
            }

            ExprKind::Index { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.emit(OpCode::GetItem, span);
                Ok(())
            }

            ExprKind::Cast { expr: inner, target } => match cast_builtin(target.base_name()) {
                Some(builtin) if !matches!(target.kind, crate::ast::TypeKind::Pointer(_)) => {
                    self.emit_load_global(builtin, span)?;
                    self.compile_expr(inner)?;
                    self.emit_call(1, span)
                }
                _ => self.compile_expr(inner),
            },

            ExprKind::Lambda { params, body } => {
                let name = self.next_lambda_name();
                let body = match body {
                    LambdaBody::Expr(value) => vec![crate::ast::Stmt::new(
                        value.id,
                        crate::ast::StmtKind::Return(Some((**value).clone())),
                        value.span,
                    )],
                    LambdaBody::Block(stmts) => stmts.clone(),
                };
                let builder = FunctionBuilder::new(name.clone());
                self.compile_function_body(builder, params, &body, span)?;
                self.emit_load_global(&name, span)
            }

            ExprKind::List(items) => {
                for item in items {
                    self.compile_expr(item)?;
                }
                self.emit_int(items.len() as i64, span)?;
                self.emit(OpCode::BuildList, span);
                Ok(())
            }

            ExprKind::Dict(entries) => {
                for (key, value) in entries {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                self.emit_int(entries.len() as i64, span)?;
                self.emit(OpCode::BuildDict, span);
                Ok(())
            }

            ExprKind::New {
                class_name,
                arguments,
            } => {
                let resolved = self.resolve(class_name);
                self.emit_load(&resolved, span)?;
                for argument in arguments {
                    self.compile_expr(argument)?;
                }
                self.emit_int(arguments.len() as i64, span)?;
                self.emit(OpCode::New, span);
                Ok(())
            }

            ExprKind::NewArray { element, size } => {
                self.compile_expr(size)?;
                self.emit_int(element.element_size(), span)?;
                self.emit(OpCode::Mul, span);
                self.emit(OpCode::Alloc, span);
                Ok(())
            }

            ExprKind::Move(inner) => {
                self.compile_expr(inner)?;
                // Moving out of a variable leaves it null.
                if let ExprKind::Identifier(name) = &inner.kind {
                    self.emit_null(span)?;
                    let target = self.resolve_store(name, span)?;
                    self.emit_store_resolved(&target, span)?;
                    self.emit(OpCode::Pop, span);
                }
                Ok(())
            }
        }
    }

    /// Store the value on top of the stack, leaving it there.
    pub(crate) fn emit_store_resolved(
        &mut self,
        target: &Resolved,
        span: Span,
    ) -> CompileResult<()> {
        match target {
            Resolved::Local(name) | Resolved::Global(name) => {
                self.emit(OpCode::Dup, span);
                self.emit_store(name, span)
            }
            Resolved::Field(name) => {
                // value -> self, name, value
                self.emit_load_local("self", span)?;
                self.emit(OpCode::Swap, span);
                self.emit_str(name, span)?;
                self.emit(OpCode::Swap, span);
                self.emit(OpCode::SetAttr, span);
                Ok(())
            }
        }
    }

    fn compile_assign(
        &mut self,
        target: &Expr,
        operator: Option<BinaryOp>,
        value: &Expr,
        span: Span,
    ) -> CompileResult<()> {
        match &target.kind {
            ExprKind::Identifier(name) => {
                let resolved = self.resolve_store(name, target.span)?;
                if let Some(op) = operator {
                    self.emit_load(&resolved, span)?;
                    self.compile_expr(value)?;
                    self.emit(binary_opcode(op), span);
                } else {
                    self.compile_expr(value)?;
                }
                self.emit_store_resolved(&resolved, span)
            }

            ExprKind::Member { object, name, .. } => {
                self.compile_expr(object)?;
                match operator {
                    None => {
                        self.emit_str(name, span)?;
                        self.compile_expr(value)?;
                    }
                    Some(op) => {
                        // obj -> obj, old -> obj, new -> obj, name, new
                        self.emit(OpCode::Dup, span);
                        self.emit_str(name, span)?;
                        self.emit(OpCode::GetAttr, span);
                        self.compile_expr(value)?;
                        self.emit(binary_opcode(op), span);
                        self.emit_str(name, span)?;
                        self.emit(OpCode::Swap, span);
                    }
                }
                self.emit(OpCode::SetAttr, span);
                Ok(())
            }

            ExprKind::Index { object, index } => {
                match operator {
                    None => {
                        self.compile_expr(object)?;
                        self.compile_expr(index)?;
                        self.compile_expr(value)?;
                    }
                    Some(op) => {
                        let container = self.hidden_local("obj");
                        let key = self.hidden_local("key");
                        self.compile_expr(object)?;
                        self.emit_store(&container, span)?;
                        self.compile_expr(index)?;
                        self.emit_store(&key, span)?;
                        self.emit_load_local(&container, span)?;
                        self.emit_load_local(&key, span)?;
                        self.emit_load_local(&container, span)?;
                        self.emit_load_local(&key, span)?;
                        self.emit(OpCode::GetItem, span);
                        self.compile_expr(value)?;
                        self.emit(binary_opcode(op), span);
                    }
                }
                self.emit(OpCode::SetItem, span);
                Ok(())
            }

            _ => Err(CompileError::invalid_target("assignment", target.span)),
        }
    }

    fn compile_call(&mut self, callee: &Expr, arguments: &[Expr], span: Span) -> CompileResult<()> {
        // `super.method(args)` calls the base implementation on `self`.
        if let ExprKind::Member { object, name, .. } = &callee.kind {
            if let Some(function) = self.super_method(object, name, span)? {
                self.emit_load_global(&function, span)?;
                self.emit_load_local("self", span)?;
                for argument in arguments {
                    self.compile_expr(argument)?;
                }
                return self.emit_call(arguments.len() + 1, span);
            }
        }
        // `super(args)` runs the base constructor.
        if matches!(&callee.kind, ExprKind::Identifier(name) if name == "super") {
            let function = self.base_method("__init__", span)?;
            self.emit_load_global(&function, span)?;
            self.emit_load_local("self", span)?;
            for argument in arguments {
                self.compile_expr(argument)?;
            }
            return self.emit_call(arguments.len() + 1, span);
        }

        self.compile_expr(callee)?;
        for argument in arguments {
            self.compile_expr(argument)?;
        }
        self.emit_call(arguments.len(), span)
    }

    /// For `super.name`, the function implementing `name` in the base chain.
    fn super_method(&self, object: &Expr, name: &str, span: Span) -> CompileResult<Option<String>> {
        match &object.kind {
            ExprKind::Identifier(id) if id == "super" && self.current.is_method => {
                self.base_method(name, span).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn base_method(&self, name: &str, span: Span) -> CompileResult<String> {
        let base = self
            .current
            .class
            .as_ref()
            .and_then(|class| self.module.classes.get(class))
            .and_then(|info| info.base.as_ref())
            .and_then(|base| self.module.classes.get(base))
            .ok_or_else(|| CompileError::new("'super' used outside a derived class", span))?;
        self.module
            .class_chain(base)
            .iter()
            .find(|class| class.methods.iter().any(|m| m == name))
            .map(|class| class.method_function(name))
            .ok_or_else(|| {
                CompileError::new(
                    format!("base class '{}' has no method '{}'", base.name, name),
                    span,
                )
            })
    }

    /// Compile a function body into `builder` and register the result.
    pub(crate) fn compile_function_body(
        &mut self,
        mut builder: FunctionBuilder,
        params: &[Parameter],
        body: &[crate::ast::Stmt],
        span: Span,
    ) -> CompileResult<()> {
        for param in params {
            if builder.params.contains(&param.name) {
                return Err(CompileError::duplicate(&param.name, param.span));
            }
            builder.params.push(param.name.clone());
        }
        let implicit = builder.params.len() - params.len();
        builder.required_params = implicit
            + params
                .iter()
                .position(|p| p.default_value.is_some())
                .unwrap_or(params.len());

        self.begin_function(builder);
        let result = self.compile_body_with_defaults(params, body);
        // Restore the enclosing builder even when the body failed.
        let finished = self.end_function(span);
        result?;
        finished?;
        self.flush_pending_inits()
    }

    fn compile_body_with_defaults(
        &mut self,
        params: &[Parameter],
        body: &[crate::ast::Stmt],
    ) -> CompileResult<()> {
        for param in params {
            let Some(default) = &param.default_value else {
                continue;
            };
            // A missing argument arrives as null.
            let span = param.span;
            self.emit_load_local(&param.name, span)?;
            self.emit_null(span)?;
            self.emit(OpCode::Eq, span);
            let skip = self.emit_jump(OpCode::JmpIfFalse, span);
            self.compile_expr(default)?;
            self.emit_store(&param.name, span)?;
            self.patch_jump(skip);
        }
        for stmt in body {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }
}
