//! Statement compilation: control flow, loops, exceptions and pattern matching.
//!
//! Statements leave the operand stack as they found it.

use crate::ast::{CatchClause, Expr, MatchArm, Pattern, Stmt, StmtKind, VarDecl, VarKind};
use crate::bytecode::instruction::OpCode;
use crate::error::CompileError;
use crate::span::Span;

use super::compiler::{CompileResult, Compiler, LoopContext, TryContext};

impl Compiler {
    /// Compile a statement.
    pub fn compile_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        let span = stmt.span;
        match &stmt.kind {
            StmtKind::Expression(expr) => {
                self.compile_expr(expr)?;
                self.emit(OpCode::Pop, span);
                Ok(())
            }
            StmtKind::VarDecl(decl) => self.compile_var_decl(decl, span),
            StmtKind::Block(stmts) => {
                for stmt in stmts {
                    self.compile_stmt(stmt)?;
                }
                Ok(())
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.compile_expr(condition)?;
                let else_jump = self.emit_jump(OpCode::JmpIfFalse, span);
                self.compile_stmt(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let end = self.emit_jump(OpCode::Jmp, span);
                        self.patch_jump(else_jump);
                        self.compile_stmt(else_branch)?;
                        self.patch_jump(end);
                    }
                    None => self.patch_jump(else_jump),
                }
                Ok(())
            }
            StmtKind::While { condition, body } => self.compile_while(condition, body, span),
            StmtKind::For {
                init,
                condition,
                update,
                body,
            } => self.compile_for(
                init.as_deref(),
                condition.as_ref(),
                update.as_ref(),
                body,
                span,
            ),
            StmtKind::ForIn {
                variable,
                iterable,
                body,
            } => self.compile_for_in(variable, iterable, body, span),
            StmtKind::Break => {
                let floor = self.innermost_loop("break", span)?.try_depth;
                self.emit_try_exits(floor, span)?;
                let site = self.emit_jump(OpCode::Jmp, span);
                self.innermost_loop("break", span)?.break_patches.push(site);
                Ok(())
            }
            StmtKind::Continue => {
                let floor = self.innermost_loop("continue", span)?.try_depth;
                self.emit_try_exits(floor, span)?;
                let site = self.emit_jump(OpCode::Jmp, span);
                self.innermost_loop("continue", span)?
                    .continue_patches
                    .push(site);
                Ok(())
            }
            StmtKind::Pass => Ok(()),
            StmtKind::Return(value) => {
                match value {
                    Some(value) => self.compile_expr(value)?,
                    None => self.emit_null(span)?,
                }
                self.emit_try_exits(0, span)?;
                self.emit(OpCode::Ret, span);
                Ok(())
            }
            StmtKind::Throw(value) => {
                self.compile_expr(value)?;
                self.emit(OpCode::Raise, span);
                Ok(())
            }
            StmtKind::Try {
                body,
                catches,
                finally,
            } => self.compile_try(body, catches, finally.as_deref(), span),
            StmtKind::Match { subject, arms } => self.compile_match(subject, arms, span),
            StmtKind::Delete { target, array } => {
                self.compile_expr(target)?;
                self.emit(if *array { OpCode::Free } else { OpCode::Delete }, span);
                Ok(())
            }
            StmtKind::Function(_)
            | StmtKind::Class(_)
            | StmtKind::Enum(_)
            | StmtKind::Namespace { .. }
            | StmtKind::Template { .. }
            | StmtKind::Import(_)
            | StmtKind::Using(_)
            | StmtKind::Export(_) => self.compile_declaration(stmt),
        }
    }

    fn innermost_loop(&mut self, keyword: &str, span: Span) -> CompileResult<&mut LoopContext> {
        self.current
            .loops
            .last_mut()
            .ok_or_else(|| CompileError::outside_loop(keyword, span))
    }

    fn compile_var_decl(&mut self, decl: &VarDecl, span: Span) -> CompileResult<()> {
        if decl.kind == VarKind::Static && !self.in_init() {
            let global = self.declare_static(&decl.name);
            let constant = match &decl.initializer {
                None => Some(crate::bytecode::chunk::Constant::Null),
                Some(init) => Self::constant_of(init),
            };
            match (constant, &decl.initializer) {
                (Some(constant), _) => {
                    self.module.globals.insert(global, constant);
                }
                (None, Some(init)) => self.pending_inits.push((global, init.clone())),
                (None, None) => {}
            }
            return Ok(());
        }

        match &decl.initializer {
            Some(init) => self.compile_expr(init)?,
            None => self.emit_null(span)?,
        }
        let name = self.declare_variable(&decl.name, decl.kind == VarKind::Const);
        self.emit_store(&name, span)
    }

    fn begin_loop(&mut self) {
        let try_depth = self.current.try_stack.len();
        self.current.loops.push(LoopContext {
            try_depth,
            ..LoopContext::default()
        });
    }

    /// Close the innermost loop: `continue` lands on `continue_target`,
    /// `break` on the current end of code.
    fn end_loop(&mut self, continue_target: usize, span: Span) -> CompileResult<()> {
        let context = self
            .current
            .loops
            .pop()
            .ok_or_else(|| CompileError::outside_loop("loop", span))?;
        for site in context.continue_patches {
            self.current.chunk.patch_jump(site, continue_target);
        }
        for site in context.break_patches {
            self.patch_jump(site);
        }
        Ok(())
    }

    fn compile_while(&mut self, condition: &Expr, body: &Stmt, span: Span) -> CompileResult<()> {
        let start = self.current_offset();
        self.compile_expr(condition)?;
        let exit = self.emit_jump(OpCode::JmpIfFalse, span);
        self.begin_loop();
        self.compile_stmt(body)?;
        self.emit_loop(start, span);
        self.patch_jump(exit);
        self.end_loop(start, span)
    }

    fn compile_for(
        &mut self,
        init: Option<&Stmt>,
        condition: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
        span: Span,
    ) -> CompileResult<()> {
        if let Some(init) = init {
            self.compile_stmt(init)?;
        }
        let start = self.current_offset();
        let exit = match condition {
            Some(condition) => {
                self.compile_expr(condition)?;
                Some(self.emit_jump(OpCode::JmpIfFalse, span))
            }
            None => None,
        };
        self.begin_loop();
        self.compile_stmt(body)?;
        let step = self.current_offset();
        if let Some(update) = update {
            self.compile_expr(update)?;
            self.emit(OpCode::Pop, span);
        }
        self.emit_loop(start, span);
        if let Some(exit) = exit {
            self.patch_jump(exit);
        }
        self.end_loop(step, span)
    }

    /// `for x in xs` walks a snapshot taken by `ITER` with a hidden index.
    fn compile_for_in(
        &mut self,
        variable: &str,
        iterable: &Expr,
        body: &Stmt,
        span: Span,
    ) -> CompileResult<()> {
        let items = self.hidden_local("iter");
        let index = self.hidden_local("idx");

        self.compile_expr(iterable)?;
        self.emit(OpCode::Iter, span);
        self.emit_store(&items, span)?;
        self.emit_int(0, span)?;
        self.emit_store(&index, span)?;

        let start = self.current_offset();
        self.emit_load_local(&index, span)?;
        self.emit_load_local(&items, span)?;
        self.emit(OpCode::Len, span);
        self.emit(OpCode::Lt, span);
        let exit = self.emit_jump(OpCode::JmpIfFalse, span);

        self.emit_load_local(&items, span)?;
        self.emit_load_local(&index, span)?;
        self.emit(OpCode::GetItem, span);
        let target = self.resolve_store(variable, span)?;
        self.emit_store_resolved(&target, span)?;
        self.emit(OpCode::Pop, span);

        self.begin_loop();
        self.compile_stmt(body)?;
        let step = self.current_offset();
        self.emit_load_local(&index, span)?;
        self.emit_int(1, span)?;
        self.emit(OpCode::Add, span);
        self.emit_store(&index, span)?;
        self.emit_loop(start, span);
        self.patch_jump(exit);
        self.end_loop(step, span)
    }

    /// ```text
    /// SETUP_TRY            ; outer region, only with `finally`
    ///   SETUP_TRY          ; inner region, only with `catch`
    ///     body
    ///   END_TRY
    ///   JMP done
    ///   <catch clauses>    ; exception on the stack
    /// done:
    /// END_TRY
    /// JMP normal
    /// <finally; re-raise>  ; exception on the stack
    /// normal:
    /// finally
    /// ```
    fn compile_try(
        &mut self,
        body: &Stmt,
        catches: &[CatchClause],
        finally: Option<&Stmt>,
        span: Span,
    ) -> CompileResult<()> {
        let Some(finally) = finally else {
            return self.compile_try_catch(body, catches, span);
        };

        self.current.try_stack.push(TryContext {
            finally: Some(Box::new(finally.clone())),
        });
        self.emit(OpCode::SetupTry, span);
        let result = self.compile_try_catch(body, catches, span);
        self.current.try_stack.pop();
        result?;
        self.emit(OpCode::EndTry, span);
        let normal = self.emit_jump(OpCode::Jmp, span);

        let exception = self.hidden_local("exc");
        self.emit_store(&exception, span)?;
        self.compile_stmt(finally)?;
        self.emit_load_local(&exception, span)?;
        self.emit(OpCode::Raise, span);

        self.patch_jump(normal);
        self.compile_stmt(finally)
    }

    fn compile_try_catch(
        &mut self,
        body: &Stmt,
        catches: &[CatchClause],
        span: Span,
    ) -> CompileResult<()> {
        if catches.is_empty() {
            return self.compile_stmt(body);
        }

        self.current.try_stack.push(TryContext { finally: None });
        self.emit(OpCode::SetupTry, span);
        let result = self.compile_stmt(body);
        self.current.try_stack.pop();
        result?;
        self.emit(OpCode::EndTry, span);
        let done = self.emit_jump(OpCode::Jmp, span);

        let exception = self.hidden_local("exc");
        self.emit_store(&exception, span)?;

        let mut exits = Vec::new();
        for clause in catches {
            let span = clause.span;
            let next = match &clause.exception_type {
                Some(type_name) => {
                    self.emit_load_global("__matches__", span)?;
                    self.emit_load_local(&exception, span)?;
                    self.emit_str(type_name, span)?;
                    self.emit_call(2, span)?;
                    Some(self.emit_jump(OpCode::JmpIfFalse, span))
                }
                None => None,
            };
            if let Some(variable) = &clause.variable {
                self.emit_load_local(&exception, span)?;
                let target = self.resolve_store(variable, span)?;
                self.emit_store_resolved(&target, span)?;
                self.emit(OpCode::Pop, span);
            }
            self.compile_stmt(&clause.body)?;
            exits.push(self.emit_jump(OpCode::Jmp, span));
            match next {
                Some(next) => self.patch_jump(next),
                // A catch-all makes later clauses unreachable.
                None => break,
            }
        }

        // Nothing matched: propagate.
        if catches.iter().all(|c| c.exception_type.is_some()) {
            self.emit_load_local(&exception, span)?;
            self.emit(OpCode::Raise, span);
        }

        self.patch_jump(done);
        for site in exits {
            self.patch_jump(site);
        }
        Ok(())
    }

    fn compile_match(&mut self, subject: &Expr, arms: &[MatchArm], span: Span) -> CompileResult<()> {
        let value = self.hidden_local("match");
        self.compile_expr(subject)?;
        self.emit_store(&value, span)?;

        let mut exits = Vec::new();
        for arm in arms {
            let span = arm.span;
            let mut skips = Vec::new();
            match &arm.pattern {
                Pattern::Wildcard => {}
                Pattern::Binding(name) => {
                    self.emit_load_local(&value, span)?;
                    let target = self.resolve_store(name, span)?;
                    self.emit_store_resolved(&target, span)?;
                    self.emit(OpCode::Pop, span);
                }
                Pattern::Value(expected) => {
                    self.emit_load_local(&value, span)?;
                    self.compile_expr(expected)?;
                    self.emit(OpCode::Eq, span);
                    skips.push(self.emit_jump(OpCode::JmpIfFalse, span));
                }
            }
            if let Some(guard) = &arm.guard {
                self.compile_expr(guard)?;
                skips.push(self.emit_jump(OpCode::JmpIfFalse, span));
            }
            self.compile_stmt(&arm.body)?;
            exits.push(self.emit_jump(OpCode::Jmp, span));
            for site in skips {
                self.patch_jump(site);
            }
        }
        for site in exits {
            self.patch_jump(site);
        }
        Ok(())
    }
}
