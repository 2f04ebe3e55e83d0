//! Runtime values for the Kaede VM.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::bytecode::{ClassInfo, Constant, Function};
use crate::error::RuntimeErrorKind;
use crate::vm::builtins::BuiltinContext;

pub type DictMap = IndexMap<HashKey, Value, ahash::RandomState>;
pub type FieldMap = IndexMap<String, Value, ahash::RandomState>;

/// Signature shared by every native function. Bound methods receive their
/// receiver as the first argument.
pub type BuiltinFn = fn(&mut BuiltinContext, Vec<Value>) -> Result<Value, RuntimeErrorKind>;

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Dict(Rc<RefCell<DictMap>>),
    Object(Rc<Object>),
    Class(Arc<ClassInfo>),
    Function(Arc<Function>),
    BoundMethod(Rc<BoundMethod>),
    Builtin(Builtin),
    BoundBuiltin(Rc<BoundBuiltin>),
    /// A namespace or enum name; members resolve as `ns.member` globals.
    Namespace(Rc<str>),
    /// Address handed out by the memory manager.
    Pointer { addr: usize, size: usize },
    Exception(Rc<ExceptionValue>),
}

/// An instance of a class.
#[derive(Debug)]
pub struct Object {
    pub class: Arc<ClassInfo>,
    pub fields: RefCell<FieldMap>,
    /// Cleared by `delete`; any later use is an error.
    pub alive: Cell<bool>,
}

impl Object {
    pub fn new(class: Arc<ClassInfo>) -> Self {
        Self {
            class,
            fields: RefCell::new(FieldMap::default()),
            alive: Cell::new(true),
        }
    }
}

#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub function: Arc<Function>,
}

#[derive(Debug, Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

#[derive(Debug)]
pub struct BoundBuiltin {
    pub receiver: Value,
    pub builtin: Builtin,
}

/// A raised built-in exception such as `ValueError("bad input")`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionValue {
    pub kind: String,
    pub message: String,
}

/// Dictionary keys. Floats are not hashable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashKey {
    Null,
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
}

impl Hash for HashKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            HashKey::Null => {}
            HashKey::Bool(b) => b.hash(state),
            HashKey::Int(n) => n.hash(state),
            HashKey::Str(s) => s.hash(state),
        }
    }
}

impl HashKey {
    pub fn from_value(value: &Value) -> Result<HashKey, RuntimeErrorKind> {
        match value {
            Value::Null => Ok(HashKey::Null),
            Value::Bool(b) => Ok(HashKey::Bool(*b)),
            Value::Int(n) => Ok(HashKey::Int(*n)),
            Value::Str(s) => Ok(HashKey::Str(s.clone())),
            other => Err(RuntimeErrorKind::type_error(format!(
                "unhashable type '{}'",
                other.type_name()
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            HashKey::Null => Value::Null,
            HashKey::Bool(b) => Value::Bool(*b),
            HashKey::Int(n) => Value::Int(*n),
            HashKey::Str(s) => Value::Str(s.clone()),
        }
    }
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Value {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn dict(map: DictMap) -> Value {
        Value::Dict(Rc::new(RefCell::new(map)))
    }

    pub fn exception(kind: impl Into<String>, message: impl Into<String>) -> Value {
        Value::Exception(Rc::new(ExceptionValue {
            kind: kind.into(),
            message: message.into(),
        }))
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "null".into(),
            Value::Bool(_) => "bool".into(),
            Value::Int(_) => "int".into(),
            Value::Float(_) => "float".into(),
            Value::Str(_) => "str".into(),
            Value::List(_) => "list".into(),
            Value::Dict(_) => "dict".into(),
            Value::Object(obj) => obj.class.name.clone(),
            Value::Class(_) => "class".into(),
            Value::Function(_) | Value::BoundMethod(_) => "function".into(),
            Value::Builtin(_) | Value::BoundBuiltin(_) => "builtin".into(),
            Value::Namespace(_) => "namespace".into(),
            Value::Pointer { .. } => "pointer".into(),
            Value::Exception(exc) => exc.kind.clone(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Dict(map) => !map.borrow().is_empty(),
            Value::Pointer { addr, .. } => *addr != 0,
            _ => true,
        }
    }

    pub fn from_constant(constant: &Constant) -> Value {
        match constant {
            Constant::Null => Value::Null,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(n) => Value::Int(*n),
            Constant::Float(n) => Value::Float(*n),
            Constant::Str(s) => Value::str(s),
        }
    }

    /// The constant-pool form of a value, for the scalar kinds that have one.
    pub fn to_constant(&self) -> Option<Constant> {
        match self {
            Value::Null => Some(Constant::Null),
            Value::Bool(b) => Some(Constant::Bool(*b)),
            Value::Int(n) => Some(Constant::Int(*n)),
            Value::Float(n) => Some(Constant::Float(*n)),
            Value::Str(s) => Some(Constant::Str(s.to_string())),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Quoted form used inside collections.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("{:?}", s.as_ref()),
            other => other.to_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Arc::ptr_eq(a, b) || a.name == b.name,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::BoundMethod(a), Value::BoundMethod(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a.name == b.name,
            (Value::BoundBuiltin(a), Value::BoundBuiltin(b)) => Rc::ptr_eq(a, b),
            (Value::Namespace(a), Value::Namespace(b)) => a == b,
            (Value::Pointer { addr: a, .. }, Value::Pointer { addr: b, .. }) => a == b,
            (Value::Exception(a), Value::Exception(b)) => a == b,
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

pub fn format_float(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{:.1}", n)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", format_float(*n)),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item.repr())?;
                }
                write!(f, "]")
            }
            Value::Dict(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key.to_value().repr(), value.repr())?;
                }
                write!(f, "}}")
            }
            Value::Object(obj) => write!(f, "<{} object>", obj.class.name),
            Value::Class(class) => write!(f, "<class {}>", class.name),
            Value::Function(func) => write!(f, "<fn {}>", func.name),
            Value::BoundMethod(method) => write!(f, "<method {}>", method.function.name),
            Value::Builtin(builtin) => write!(f, "<builtin {}>", builtin.name),
            Value::BoundBuiltin(bound) => write!(
                f,
                "<method {}.{}>",
                bound.receiver.type_name(),
                bound.builtin.name
            ),
            Value::Namespace(name) => write!(f, "<namespace {}>", name),
            Value::Pointer { addr, .. } => write!(f, "<ptr {:#x}>", addr),
            Value::Exception(exc) if exc.message.is_empty() => write!(f, "{}", exc.kind),
            Value::Exception(exc) => write!(f, "{}: {}", exc.kind, exc.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        let list = Value::list(vec![Value::Int(1), Value::str("a")]);
        assert_eq!(list.to_string(), "[1, \"a\"]");
        assert_eq!(
            Value::exception("ValueError", "bad").to_string(),
            "ValueError: bad"
        );
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::str("").is_truthy());
        assert!(!Value::list(vec![]).is_truthy());
        assert!(Value::Float(0.1).is_truthy());
    }

    #[test]
    fn test_numeric_equality_crosses_types() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_ne!(Value::Int(2), Value::str("2"));
    }

    #[test]
    fn test_floats_are_not_hashable() {
        assert!(HashKey::from_value(&Value::Float(1.0)).is_err());
        assert_eq!(
            HashKey::from_value(&Value::str("k")).unwrap().to_value(),
            Value::str("k")
        );
    }
}
