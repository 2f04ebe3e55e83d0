//! Statement and declaration AST nodes.

use crate::ast::expr::Expr;
use crate::ast::types::TypeAnnotation;
use crate::ast::NodeId;
use crate::span::Span;

/// A statement in the AST.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub id: NodeId,
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(id: NodeId, kind: StmtKind, span: Span) -> Self {
        Self { id, kind, span }
    }
}

/// Statement variants.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Expression statement: expr;
    Expression(Expr),

    /// let / var / const / static, or a C-style `int x = 1`.
    VarDecl(VarDecl),

    /// A braced or indented block.
    Block(Vec<Stmt>),

    /// if cond: ... elif ...: ... else: ...
    /// `elif` chains nest in `else_branch`.
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },

    While {
        condition: Expr,
        body: Box<Stmt>,
    },

    /// for x in iterable
    ForIn {
        variable: String,
        iterable: Expr,
        body: Box<Stmt>,
    },

    /// for (init; condition; update)
    For {
        init: Option<Box<Stmt>>,
        condition: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },

    Break,
    Continue,
    Pass,

    Return(Option<Expr>),

    /// throw expr / raise expr
    Throw(Expr),

    Try {
        body: Box<Stmt>,
        catches: Vec<CatchClause>,
        finally: Option<Box<Stmt>>,
    },

    Match {
        subject: Expr,
        arms: Vec<MatchArm>,
    },

    /// delete x / delete[] x
    Delete {
        target: Expr,
        array: bool,
    },

    Function(FunctionDecl),
    Class(ClassDecl),
    Enum(EnumDecl),

    Namespace {
        name: String,
        body: Vec<Stmt>,
    },

    /// template<T, U> wrapped around another declaration.
    Template {
        params: Vec<String>,
        declaration: Box<Stmt>,
    },

    Import(ImportDecl),

    /// using namespace foo
    Using(String),

    Export(Box<Stmt>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Let,
    Var,
    Const,
    Static,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    pub kind: VarKind,
    pub type_annotation: Option<TypeAnnotation>,
    pub initializer: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    /// `catch (ValueError e)` / `except KeyError as e`; `None` catches everything.
    pub exception_type: Option<String>,
    pub variable: Option<String>,
    pub body: Stmt,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// `_` or `default`
    Wildcard,
    /// A bare name binds the subject.
    Binding(String),
    /// Any other expression is compared with `==`.
    Value(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Stmt,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub type_annotation: Option<TypeAnnotation>,
    pub default_value: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub type_params: Vec<String>,
    pub params: Vec<Parameter>,
    pub return_type: Option<TypeAnnotation>,
    pub body: Vec<Stmt>,
    pub is_static: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub type_annotation: Option<TypeAnnotation>,
    pub initializer: Option<Expr>,
    pub is_static: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub type_params: Vec<String>,
    pub base: Option<String>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<FunctionDecl>,
    pub is_struct: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumVariant {
    pub name: String,
    pub value: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDecl {
    pub name: String,
    pub variants: Vec<EnumVariant>,
}

/// `import a.b`, `import a as b`, `from a import x, y`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportDecl {
    pub module: String,
    pub items: Vec<String>,
    pub alias: Option<String>,
}
