//! Abstract Syntax Tree for Kaede.
//!
//! Nodes own their children. Parent links are not stored in the tree; they are
//! derived on demand from node ids with [`Program::parent_map`].

pub mod expr;
pub mod node;
pub mod stmt;
pub mod types;

pub use expr::{BinaryOp, Expr, ExprKind, LambdaBody, LogicalOp, UnaryOp};
pub use node::Node;
pub use stmt::{
    CatchClause, ClassDecl, EnumDecl, EnumVariant, FieldDecl, FunctionDecl, ImportDecl, MatchArm,
    Parameter, Pattern, Stmt, StmtKind, VarDecl, VarKind,
};
pub use types::{TypeAnnotation, TypeKind};

/// Identity of a node within one parsed program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeId(pub u32);

/// A complete program.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl Program {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self { statements }
    }
}
