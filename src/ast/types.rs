//! Type annotation AST nodes.
//!
//! Annotations are recorded for diagnostics and casts; nothing checks them.

use crate::span::Span;

/// A type annotation in the source code.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeAnnotation {
    pub kind: TypeKind,
    pub span: Span,
}

impl TypeAnnotation {
    pub fn new(kind: TypeKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn named(name: impl Into<String>, span: Span) -> Self {
        Self::new(TypeKind::Named(name.into()), span)
    }

    /// The innermost named type, e.g. `int` for `int*[]`.
    pub fn base_name(&self) -> &str {
        match &self.kind {
            TypeKind::Named(name) => name,
            TypeKind::Generic { name, .. } => name,
            TypeKind::Pointer(inner) | TypeKind::Array(inner) | TypeKind::Nullable(inner) => {
                inner.base_name()
            }
        }
    }

    /// Size in bytes of one element, used when allocating `new T[n]`.
    pub fn element_size(&self) -> i64 {
        match &self.kind {
            TypeKind::Named(name) => match name.as_str() {
                "char" | "bool" | "byte" | "u8" | "i8" => 1,
                "short" | "i16" | "u16" => 2,
                "int" | "i32" | "u32" | "float" | "f32" => 4,
                _ => 8,
            },
            _ => 8,
        }
    }
}

/// The kinds of types that can be expressed in source.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    /// A plain or dotted name: `int`, `Point`, `geo.Point`.
    Named(String),
    /// Type arguments: `List<int>`, `Map<str, T>`.
    Generic {
        name: String,
        args: Vec<TypeAnnotation>,
    },
    /// `T*`
    Pointer(Box<TypeAnnotation>),
    /// `T[]`
    Array(Box<TypeAnnotation>),
    /// `T?`
    Nullable(Box<TypeAnnotation>),
}

/// Builtin type names that may open a C-style declaration or a cast.
pub const BUILTIN_TYPE_NAMES: &[&str] = &[
    "int", "long", "short", "char", "byte", "float", "double", "bool", "str", "string", "auto",
];

pub fn is_builtin_type_name(name: &str) -> bool {
    BUILTIN_TYPE_NAMES.contains(&name)
}

impl std::fmt::Display for TypeAnnotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            TypeKind::Named(name) => write!(f, "{}", name),
            TypeKind::Generic { name, args } => {
                write!(f, "{}<", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ">")
            }
            TypeKind::Pointer(inner) => write!(f, "{}*", inner),
            TypeKind::Array(inner) => write!(f, "{}[]", inner),
            TypeKind::Nullable(inner) => write!(f, "{}?", inner),
        }
    }
}
