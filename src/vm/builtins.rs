//! Built-in functions and the methods of lists, strings and dictionaries.
//!
//! Methods share the function table: `xs.append(1)` calls `append(xs, 1)`.

use std::collections::HashMap;

use crate::bytecode::Module;
use crate::error::RuntimeErrorKind;
use crate::vm::value::{Builtin, BuiltinFn, DictMap, HashKey, Value};
use crate::vm::vm_exceptions::exception_matches;

type BuiltinResult = Result<Value, RuntimeErrorKind>;

/// Longest list `range` will build.
const MAX_RANGE_LEN: usize = 1 << 24;

/// Exception classes that can be constructed and raised by name.
pub const EXCEPTION_TYPES: &[&str] = &[
    "Exception",
    "Error",
    "RuntimeError",
    "ValueError",
    "TypeError",
    "NameError",
    "AttributeError",
    "IndexError",
    "KeyError",
    "ZeroDivisionError",
    "OverflowError",
    "RecursionError",
    "MemoryError",
];

/// Where `print` writes.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Output {
    #[default]
    Stdout,
    /// Collect printed lines instead of writing them.
    Capture(Vec<String>),
}

impl Output {
    pub fn capture() -> Self {
        Output::Capture(Vec::new())
    }

    pub fn write_line(&mut self, line: String) {
        match self {
            Output::Stdout => println!("{}", line),
            Output::Capture(lines) => lines.push(line),
        }
    }

    /// Drain captured lines; always empty for stdout.
    pub fn take(&mut self) -> Vec<String> {
        match self {
            Output::Stdout => Vec::new(),
            Output::Capture(lines) => std::mem::take(lines),
        }
    }
}

/// What a native function can see of the running program.
pub struct BuiltinContext<'a> {
    /// Name the builtin was called under.
    pub name: &'static str,
    pub output: &'a mut Output,
    pub module: &'a Module,
}

/// Name-to-callable registry consulted for identifiers that are neither
/// local nor global.
#[derive(Debug, Clone)]
pub struct Stdlib {
    functions: HashMap<&'static str, Builtin>,
}

impl Default for Stdlib {
    fn default() -> Self {
        Self::new()
    }
}

const FUNCTIONS: &[(&str, BuiltinFn)] = &[
    ("print", print),
    ("len", len),
    ("str", to_str),
    ("int", to_int),
    ("float", to_float),
    ("bool", to_bool),
    ("type", type_of),
    ("range", range),
    ("abs", abs),
    ("min", min),
    ("max", max),
    ("append", append),
    ("push", append),
    ("pop", pop),
    ("keys", keys),
    ("values", values),
    ("contains", contains),
    ("join", join),
    ("split", split),
    ("upper", upper),
    ("lower", lower),
    ("sqrt", sqrt),
    ("__matches__", matches),
];

const LIST_METHODS: &[&str] = &["append", "push", "pop", "len", "contains", "join"];
const STR_METHODS: &[&str] = &["upper", "lower", "split", "len", "contains", "join"];
const DICT_METHODS: &[&str] = &["keys", "values", "len", "contains", "pop"];

impl Stdlib {
    pub fn new() -> Self {
        let mut functions: HashMap<&'static str, Builtin> = FUNCTIONS
            .iter()
            .map(|&(name, func)| (name, Builtin { name, func }))
            .collect();
        for &name in EXCEPTION_TYPES {
            functions.insert(
                name,
                Builtin {
                    name,
                    func: make_exception,
                },
            );
        }
        Self { functions }
    }

    /// Add or replace a builtin.
    pub fn register(&mut self, name: &'static str, func: BuiltinFn) {
        self.functions.insert(name, Builtin { name, func });
    }

    pub fn lookup(&self, name: &str) -> Option<Builtin> {
        self.functions.get(name).copied()
    }

    /// A method of a built-in collection type.
    pub fn method(&self, receiver: &Value, name: &str) -> Option<Builtin> {
        let methods = match receiver {
            Value::List(_) => LIST_METHODS,
            Value::Str(_) => STR_METHODS,
            Value::Dict(_) => DICT_METHODS,
            _ => return None,
        };
        if methods.contains(&name) {
            self.lookup(name)
        } else {
            None
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &&'static str> {
        self.functions.keys()
    }
}

fn arity(ctx: &BuiltinContext, args: &[Value], min: usize, max: usize) -> Result<(), RuntimeErrorKind> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else if max == usize::MAX {
            format!("at least {}", min)
        } else {
            format!("{}-{}", min, max)
        };
        return Err(RuntimeErrorKind::WrongArity {
            name: ctx.name.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn value_error(message: impl Into<String>) -> RuntimeErrorKind {
    RuntimeErrorKind::Raised(Value::exception("ValueError", message))
}

fn bad_argument(ctx: &BuiltinContext, value: &Value) -> RuntimeErrorKind {
    RuntimeErrorKind::type_error(format!(
        "{}() does not accept '{}'",
        ctx.name,
        value.type_name()
    ))
}

fn print(ctx: &mut BuiltinContext, args: Vec<Value>) -> BuiltinResult {
    let line = args
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    ctx.output.write_line(line);
    Ok(Value::Null)
}

fn len(ctx: &mut BuiltinContext, args: Vec<Value>) -> BuiltinResult {
    arity(ctx, &args, 1, 1)?;
    let n = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.borrow().len(),
        Value::Dict(map) => map.borrow().len(),
        other => return Err(bad_argument(ctx, other)),
    };
    Ok(Value::Int(n as i64))
}

fn to_str(ctx: &mut BuiltinContext, args: Vec<Value>) -> BuiltinResult {
    arity(ctx, &args, 1, 1)?;
    Ok(Value::str(args[0].to_string()))
}

fn to_int(ctx: &mut BuiltinContext, args: Vec<Value>) -> BuiltinResult {
    arity(ctx, &args, 1, 1)?;
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Float(n) => {
            let truncated = n.trunc();
            if truncated.is_finite() && truncated >= i64::MIN as f64 && truncated < i64::MAX as f64 {
                Ok(Value::Int(truncated as i64))
            } else {
                Err(RuntimeErrorKind::Overflow("int()".into()))
            }
        }
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| value_error(format!("invalid literal for int(): {:?}", s.as_ref()))),
        other => Err(bad_argument(ctx, other)),
    }
}

fn to_float(ctx: &mut BuiltinContext, args: Vec<Value>) -> BuiltinResult {
    arity(ctx, &args, 1, 1)?;
    match &args[0] {
        Value::Int(n) => Ok(Value::Float(*n as f64)),
        Value::Float(n) => Ok(Value::Float(*n)),
        Value::Bool(b) => Ok(Value::Float(*b as i64 as f64)),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| value_error(format!("invalid literal for float(): {:?}", s.as_ref()))),
        other => Err(bad_argument(ctx, other)),
    }
}

fn to_bool(ctx: &mut BuiltinContext, args: Vec<Value>) -> BuiltinResult {
    arity(ctx, &args, 1, 1)?;
    Ok(Value::Bool(args[0].is_truthy()))
}

fn type_of(ctx: &mut BuiltinContext, args: Vec<Value>) -> BuiltinResult {
    arity(ctx, &args, 1, 1)?;
    Ok(Value::str(args[0].type_name()))
}

fn int_arg(ctx: &BuiltinContext, value: &Value) -> Result<i64, RuntimeErrorKind> {
    match value {
        Value::Int(n) => Ok(*n),
        other => Err(bad_argument(ctx, other)),
    }
}

fn range(ctx: &mut BuiltinContext, args: Vec<Value>) -> BuiltinResult {
    arity(ctx, &args, 1, 3)?;
    let (start, end, step) = match args.len() {
        1 => (0, int_arg(ctx, &args[0])?, 1),
        2 => (int_arg(ctx, &args[0])?, int_arg(ctx, &args[1])?, 1),
        _ => (
            int_arg(ctx, &args[0])?,
            int_arg(ctx, &args[1])?,
            int_arg(ctx, &args[2])?,
        ),
    };
    if step == 0 {
        return Err(value_error("range() step must not be zero"));
    }
    let span = (end as i128 - start as i128) / step as i128;
    if span > MAX_RANGE_LEN as i128 {
        return Err(RuntimeErrorKind::OutOfMemory(span as usize));
    }
    let mut items = Vec::new();
    let mut current = start;
    while (step > 0 && current < end) || (step < 0 && current > end) {
        items.push(Value::Int(current));
        match current.checked_add(step) {
            Some(next) => current = next,
            None => break,
        }
    }
    Ok(Value::list(items))
}

fn abs(ctx: &mut BuiltinContext, args: Vec<Value>) -> BuiltinResult {
    arity(ctx, &args, 1, 1)?;
    match &args[0] {
        Value::Int(n) => n
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| RuntimeErrorKind::Overflow("abs()".into())),
        Value::Float(n) => Ok(Value::Float(n.abs())),
        other => Err(bad_argument(ctx, other)),
    }
}

fn extreme(ctx: &BuiltinContext, args: Vec<Value>, want: std::cmp::Ordering) -> BuiltinResult {
    arity(ctx, &args, 1, usize::MAX)?;
    let candidates = match (args.len(), &args[0]) {
        (1, Value::List(items)) => items.borrow().clone(),
        _ => args,
    };
    let mut best: Option<Value> = None;
    for candidate in candidates {
        best = Some(match best {
            None => candidate,
            Some(current) => {
                if crate::vm::ops::compare(&candidate, &current)? == want {
                    candidate
                } else {
                    current
                }
            }
        });
    }
    best.ok_or_else(|| value_error(format!("{}() of an empty list", ctx.name)))
}

fn min(ctx: &mut BuiltinContext, args: Vec<Value>) -> BuiltinResult {
    extreme(ctx, args, std::cmp::Ordering::Less)
}

fn max(ctx: &mut BuiltinContext, args: Vec<Value>) -> BuiltinResult {
    extreme(ctx, args, std::cmp::Ordering::Greater)
}

fn append(ctx: &mut BuiltinContext, args: Vec<Value>) -> BuiltinResult {
    arity(ctx, &args, 2, 2)?;
    match &args[0] {
        Value::List(items) => {
            items.borrow_mut().push(args[1].clone());
            Ok(Value::Null)
        }
        other => Err(bad_argument(ctx, other)),
    }
}

fn pop(ctx: &mut BuiltinContext, args: Vec<Value>) -> BuiltinResult {
    arity(ctx, &args, 1, 2)?;
    match (&args[0], args.get(1)) {
        (Value::List(items), None) => items
            .borrow_mut()
            .pop()
            .ok_or(RuntimeErrorKind::IndexOutOfBounds {
                index: -1,
                length: 0,
            }),
        (Value::Dict(map), Some(key)) => map
            .borrow_mut()
            .shift_remove(&HashKey::from_value(key)?)
            .ok_or_else(|| RuntimeErrorKind::KeyNotFound(key.repr())),
        (other, _) => Err(bad_argument(ctx, other)),
    }
}

fn keys(ctx: &mut BuiltinContext, args: Vec<Value>) -> BuiltinResult {
    arity(ctx, &args, 1, 1)?;
    match &args[0] {
        Value::Dict(map) => Ok(Value::list(map.borrow().keys().map(HashKey::to_value).collect())),
        other => Err(bad_argument(ctx, other)),
    }
}

fn values(ctx: &mut BuiltinContext, args: Vec<Value>) -> BuiltinResult {
    arity(ctx, &args, 1, 1)?;
    match &args[0] {
        Value::Dict(map) => Ok(Value::list(map.borrow().values().cloned().collect())),
        other => Err(bad_argument(ctx, other)),
    }
}

fn contains(ctx: &mut BuiltinContext, args: Vec<Value>) -> BuiltinResult {
    arity(ctx, &args, 2, 2)?;
    let found = match (&args[0], &args[1]) {
        (Value::List(items), needle) => items.borrow().iter().any(|item| item == needle),
        (Value::Str(haystack), Value::Str(needle)) => haystack.contains(needle.as_ref()),
        (Value::Dict(map), key) => match HashKey::from_value(key) {
            Ok(key) => map.borrow().contains_key(&key),
            Err(_) => false,
        },
        (other, _) => return Err(bad_argument(ctx, other)),
    };
    Ok(Value::Bool(found))
}

/// `join(list, sep)`, or `sep.join(list)` through the string method table.
fn join(ctx: &mut BuiltinContext, args: Vec<Value>) -> BuiltinResult {
    arity(ctx, &args, 1, 2)?;
    let (items, separator) = match (&args[0], args.get(1)) {
        (Value::List(items), None) => (items.clone(), String::new()),
        (Value::List(items), Some(sep)) => (items.clone(), sep.to_string()),
        (Value::Str(sep), Some(Value::List(items))) => (items.clone(), sep.to_string()),
        (other, _) => return Err(bad_argument(ctx, other)),
    };
    let joined = items
        .borrow()
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(&separator);
    Ok(Value::str(joined))
}

fn split(ctx: &mut BuiltinContext, args: Vec<Value>) -> BuiltinResult {
    arity(ctx, &args, 1, 2)?;
    let Value::Str(s) = &args[0] else {
        return Err(bad_argument(ctx, &args[0]));
    };
    let parts: Vec<Value> = match args.get(1) {
        None | Some(Value::Null) => s.split_whitespace().map(Value::str).collect(),
        Some(Value::Str(sep)) if sep.is_empty() => {
            return Err(value_error("split() separator must not be empty"))
        }
        Some(Value::Str(sep)) => s.split(sep.as_ref()).map(Value::str).collect(),
        Some(other) => return Err(bad_argument(ctx, other)),
    };
    Ok(Value::list(parts))
}

fn upper(ctx: &mut BuiltinContext, args: Vec<Value>) -> BuiltinResult {
    arity(ctx, &args, 1, 1)?;
    match &args[0] {
        Value::Str(s) => Ok(Value::str(s.to_uppercase())),
        other => Err(bad_argument(ctx, other)),
    }
}

fn lower(ctx: &mut BuiltinContext, args: Vec<Value>) -> BuiltinResult {
    arity(ctx, &args, 1, 1)?;
    match &args[0] {
        Value::Str(s) => Ok(Value::str(s.to_lowercase())),
        other => Err(bad_argument(ctx, other)),
    }
}

fn sqrt(ctx: &mut BuiltinContext, args: Vec<Value>) -> BuiltinResult {
    arity(ctx, &args, 1, 1)?;
    let n = match &args[0] {
        Value::Int(n) => *n as f64,
        Value::Float(n) => *n,
        other => return Err(bad_argument(ctx, other)),
    };
    if n < 0.0 {
        return Err(value_error("sqrt() of a negative number"));
    }
    Ok(Value::Float(n.sqrt()))
}

fn make_exception(ctx: &mut BuiltinContext, args: Vec<Value>) -> BuiltinResult {
    let message = args
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    Ok(Value::exception(ctx.name, message))
}

/// `__matches__(exception, "TypeName")`, emitted for typed catch clauses.
fn matches(ctx: &mut BuiltinContext, args: Vec<Value>) -> BuiltinResult {
    arity(ctx, &args, 2, 2)?;
    let Value::Str(type_name) = &args[1] else {
        return Err(bad_argument(ctx, &args[1]));
    };
    Ok(Value::Bool(exception_matches(&args[0], type_name, ctx.module)))
}

/// Build a dictionary value from key/value pairs.
pub fn dict_from_pairs(pairs: Vec<(Value, Value)>) -> BuiltinResult {
    let mut map = DictMap::default();
    for (key, value) in pairs {
        map.insert(HashKey::from_value(&key)?, value);
    }
    Ok(Value::dict(map))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &'static str, args: Vec<Value>) -> (BuiltinResult, Vec<String>) {
        let stdlib = Stdlib::new();
        let builtin = stdlib.lookup(name).unwrap();
        let module = Module::new("test");
        let mut output = Output::capture();
        let mut ctx = BuiltinContext {
            name: builtin.name,
            output: &mut output,
            module: &module,
        };
        let result = (builtin.func)(&mut ctx, args);
        (result, output.take())
    }

    #[test]
    fn test_print_joins_arguments() {
        let (result, lines) = call("print", vec![Value::str("x ="), Value::Int(3)]);
        assert_eq!(result.unwrap(), Value::Null);
        assert_eq!(lines, vec!["x = 3".to_string()]);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(call("int", vec![Value::str(" 42 ")]).0.unwrap(), Value::Int(42));
        assert_eq!(call("int", vec![Value::Float(-2.7)]).0.unwrap(), Value::Int(-2));
        assert_eq!(call("str", vec![Value::Float(1.0)]).0.unwrap(), Value::str("1.0"));
        assert!(matches!(
            call("int", vec![Value::str("abc")]).0,
            Err(RuntimeErrorKind::Raised(_))
        ));
    }

    #[test]
    fn test_range_and_join() {
        let (list, _) = call("range", vec![Value::Int(1), Value::Int(7), Value::Int(2)]);
        let list = list.unwrap();
        assert_eq!(list.to_string(), "[1, 3, 5]");
        let (joined, _) = call("join", vec![Value::str("-"), list]);
        assert_eq!(joined.unwrap(), Value::str("1-3-5"));
        assert!(call("range", vec![Value::Int(1), Value::Int(2), Value::Int(0)]).0.is_err());
    }

    #[test]
    fn test_min_max() {
        let args = vec![Value::Int(3), Value::Float(1.5), Value::Int(2)];
        assert_eq!(call("min", args.clone()).0.unwrap(), Value::Float(1.5));
        assert_eq!(call("max", args).0.unwrap(), Value::Int(3));
        assert!(call("max", vec![Value::list(vec![])]).0.is_err());
    }

    #[test]
    fn test_arity_is_checked() {
        match call("len", vec![]).0 {
            Err(RuntimeErrorKind::WrongArity { name, got, .. }) => {
                assert_eq!(name, "len");
                assert_eq!(got, 0);
            }
            other => panic!("expected arity error, got {:?}", other),
        }
    }

    #[test]
    fn test_methods_resolve_by_receiver_type() {
        let stdlib = Stdlib::new();
        assert!(stdlib.method(&Value::list(vec![]), "append").is_some());
        assert!(stdlib.method(&Value::str("a"), "append").is_none());
        assert!(stdlib.method(&Value::str("a"), "upper").is_some());
        assert!(stdlib.method(&Value::Int(1), "len").is_none());
    }

    #[test]
    fn test_exception_constructor_uses_its_name() {
        let (value, _) = call("ValueError", vec![Value::str("bad input")]);
        assert_eq!(value.unwrap().to_string(), "ValueError: bad input");
    }
}
