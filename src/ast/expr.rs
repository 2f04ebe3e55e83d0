//! Expression AST nodes.

use crate::ast::stmt::{Parameter, Stmt};
use crate::ast::types::TypeAnnotation;
use crate::ast::NodeId;
use crate::span::Span;

/// An expression in the AST.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub id: NodeId,
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(id: NodeId, kind: ExprKind, span: Span) -> Self {
        Self { id, kind, span }
    }
}

/// All expression variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Integer literal: 42
    IntLiteral(i64),
    /// Float literal: 3.14
    FloatLiteral(f64),
    /// String literal: "hello"
    StringLiteral(String),
    /// Boolean literal: true, False
    BoolLiteral(bool),
    /// null / None / nil
    Null,

    /// Variable reference: foo
    Identifier(String),

    /// Prefix operator: -x, !x, ~x, +x
    Unary {
        operator: UnaryOp,
        operand: Box<Expr>,
    },

    /// Arithmetic, bitwise and comparison operators: a + b
    Binary {
        left: Box<Expr>,
        operator: BinaryOp,
        right: Box<Expr>,
    },

    /// Short-circuit operators: a && b, a or b
    Logical {
        left: Box<Expr>,
        operator: LogicalOp,
        right: Box<Expr>,
    },

    /// cond ? a : b
    Ternary {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },

    /// Assignment, plain (`operator: None`) or compound (`x += 1`).
    Assign {
        target: Box<Expr>,
        operator: Option<BinaryOp>,
        value: Box<Expr>,
    },

    /// ++x, x--
    Update {
        target: Box<Expr>,
        increment: bool,
        prefix: bool,
    },

    /// Function call: foo(a, b)
    Call {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
    },

    /// Member access: obj.field, or pointer access ptr->field.
    Member {
        object: Box<Expr>,
        name: String,
        arrow: bool,
    },

    /// Index access: arr[i]
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },

    /// (int)x, x as float
    Cast {
        expr: Box<Expr>,
        target: TypeAnnotation,
    },

    /// lambda x: x + 1, fn(x) { return x }
    Lambda {
        params: Vec<Parameter>,
        body: LambdaBody,
    },

    /// [1, 2, 3]
    List(Vec<Expr>),

    /// {"a": 1}
    Dict(Vec<(Expr, Expr)>),

    /// new Point(1, 2)
    New {
        class_name: String,
        arguments: Vec<Expr>,
    },

    /// new int[n]
    NewArray {
        element: TypeAnnotation,
        size: Box<Expr>,
    },

    /// move x
    Move(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LambdaBody {
    Expr(Box<Expr>),
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Compare,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Power => "**",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Compare => "<=>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Plus,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}
