//! Generic traversal over the closed set of node kinds.

use std::collections::HashMap;

use crate::ast::expr::{Expr, ExprKind, LambdaBody};
use crate::ast::stmt::{FunctionDecl, Pattern, Stmt, StmtKind};
use crate::ast::{NodeId, Program};
use crate::span::Span;

/// A borrowed reference to any AST node.
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    Expr(&'a Expr),
    Stmt(&'a Stmt),
}

impl<'a> Node<'a> {
    pub fn id(&self) -> NodeId {
        match self {
            Node::Expr(e) => e.id,
            Node::Stmt(s) => s.id,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Node::Expr(e) => e.span,
            Node::Stmt(s) => s.span,
        }
    }

    /// Direct children in source order.
    pub fn children(&self) -> Vec<Node<'a>> {
        let mut out = Vec::new();
        match self {
            Node::Expr(expr) => expr_children(expr, &mut out),
            Node::Stmt(stmt) => stmt_children(stmt, &mut out),
        }
        out
    }

    /// Pre-order walk over this node and all of its descendants.
    pub fn walk(&self, f: &mut impl FnMut(Node<'a>)) {
        f(*self);
        for child in self.children() {
            child.walk(f);
        }
    }
}

fn expr_children<'a>(expr: &'a Expr, out: &mut Vec<Node<'a>>) {
    match &expr.kind {
        ExprKind::IntLiteral(_)
        | ExprKind::FloatLiteral(_)
        | ExprKind::StringLiteral(_)
        | ExprKind::BoolLiteral(_)
        | ExprKind::Null
        | ExprKind::Identifier(_) => {}
        ExprKind::Unary { operand, .. } => out.push(Node::Expr(operand)),
        ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
            out.push(Node::Expr(left));
            out.push(Node::Expr(right));
        }
        ExprKind::Ternary {
            condition,
            then_branch,
            else_branch,
        } => {
            out.push(Node::Expr(condition));
            out.push(Node::Expr(then_branch));
            out.push(Node::Expr(else_branch));
        }
        ExprKind::Assign { target, value, .. } => {
            out.push(Node::Expr(target));
            out.push(Node::Expr(value));
        }
        ExprKind::Update { target, .. } => out.push(Node::Expr(target)),
        ExprKind::Call { callee, arguments } => {
            out.push(Node::Expr(callee));
            out.extend(arguments.iter().map(Node::Expr));
        }
        ExprKind::Member { object, .. } => out.push(Node::Expr(object)),
        ExprKind::Index { object, index } => {
            out.push(Node::Expr(object));
            out.push(Node::Expr(index));
        }
        ExprKind::Cast { expr, .. } => out.push(Node::Expr(expr)),
        ExprKind::Lambda { params, body } => {
            out.extend(
                params
                    .iter()
                    .filter_map(|p| p.default_value.as_ref())
                    .map(Node::Expr),
            );
            match body {
                LambdaBody::Expr(e) => out.push(Node::Expr(e)),
                LambdaBody::Block(stmts) => out.extend(stmts.iter().map(Node::Stmt)),
            }
        }
        ExprKind::List(items) => out.extend(items.iter().map(Node::Expr)),
        ExprKind::Dict(entries) => {
            for (k, v) in entries {
                out.push(Node::Expr(k));
                out.push(Node::Expr(v));
            }
        }
        ExprKind::New { arguments, .. } => out.extend(arguments.iter().map(Node::Expr)),
        ExprKind::NewArray { size, .. } => out.push(Node::Expr(size)),
        ExprKind::Move(inner) => out.push(Node::Expr(inner)),
    }
}

fn function_children<'a>(decl: &'a FunctionDecl, out: &mut Vec<Node<'a>>) {
    out.extend(
        decl.params
            .iter()
            .filter_map(|p| p.default_value.as_ref())
            .map(Node::Expr),
    );
    out.extend(decl.body.iter().map(Node::Stmt));
}

fn stmt_children<'a>(stmt: &'a Stmt, out: &mut Vec<Node<'a>>) {
    match &stmt.kind {
        StmtKind::Expression(e) | StmtKind::Throw(e) => out.push(Node::Expr(e)),
        StmtKind::VarDecl(decl) => out.extend(decl.initializer.iter().map(Node::Expr)),
        StmtKind::Block(stmts) | StmtKind::Namespace { body: stmts, .. } => {
            out.extend(stmts.iter().map(Node::Stmt))
        }
        StmtKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            out.push(Node::Expr(condition));
            out.push(Node::Stmt(then_branch));
            if let Some(e) = else_branch {
                out.push(Node::Stmt(e));
            }
        }
        StmtKind::While { condition, body } => {
            out.push(Node::Expr(condition));
            out.push(Node::Stmt(body));
        }
        StmtKind::ForIn { iterable, body, .. } => {
            out.push(Node::Expr(iterable));
            out.push(Node::Stmt(body));
        }
        StmtKind::For {
            init,
            condition,
            update,
            body,
        } => {
            if let Some(init) = init {
                out.push(Node::Stmt(init));
            }
            out.extend(condition.iter().map(Node::Expr));
            out.extend(update.iter().map(Node::Expr));
            out.push(Node::Stmt(body));
        }
        StmtKind::Break | StmtKind::Continue | StmtKind::Pass => {}
        StmtKind::Return(value) => out.extend(value.iter().map(Node::Expr)),
        StmtKind::Try {
            body,
            catches,
            finally,
        } => {
            out.push(Node::Stmt(body));
            out.extend(catches.iter().map(|c| Node::Stmt(&c.body)));
            if let Some(f) = finally {
                out.push(Node::Stmt(f));
            }
        }
        StmtKind::Match { subject, arms } => {
            out.push(Node::Expr(subject));
            for arm in arms {
                if let Pattern::Value(e) = &arm.pattern {
                    out.push(Node::Expr(e));
                }
                out.extend(arm.guard.iter().map(Node::Expr));
                out.push(Node::Stmt(&arm.body));
            }
        }
        StmtKind::Delete { target, .. } => out.push(Node::Expr(target)),
        StmtKind::Function(decl) => function_children(decl, out),
        StmtKind::Class(class) => {
            out.extend(
                class
                    .fields
                    .iter()
                    .filter_map(|f| f.initializer.as_ref())
                    .map(Node::Expr),
            );
            for method in &class.methods {
                function_children(method, out);
            }
        }
        StmtKind::Enum(decl) => out.extend(
            decl.variants
                .iter()
                .filter_map(|v| v.value.as_ref())
                .map(Node::Expr),
        ),
        StmtKind::Template { declaration, .. } | StmtKind::Export(declaration) => {
            out.push(Node::Stmt(declaration))
        }
        StmtKind::Import(_) | StmtKind::Using(_) => {}
    }
}

impl Program {
    /// Non-owning child → parent links, keyed by node id.
    pub fn parent_map(&self) -> HashMap<NodeId, NodeId> {
        let mut parents = HashMap::new();
        for stmt in &self.statements {
            Node::Stmt(stmt).walk(&mut |node| {
                for child in node.children() {
                    parents.insert(child.id(), node.id());
                }
            });
        }
        parents
    }

    /// Every node in the program, pre-order.
    pub fn nodes(&self) -> Vec<Node<'_>> {
        let mut nodes = Vec::new();
        for stmt in &self.statements {
            Node::Stmt(stmt).walk(&mut |node| nodes.push(node));
        }
        nodes
    }

    pub fn find(&self, id: NodeId) -> Option<Node<'_>> {
        self.nodes().into_iter().find(|n| n.id() == id)
    }
}
