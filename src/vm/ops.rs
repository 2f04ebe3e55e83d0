//! Arithmetic, bitwise and comparison semantics, shared by the VM and the
//! constant folder so both agree on every result and every error.

use std::cmp::Ordering;
use std::rc::Rc;

use crate::bytecode::OpCode;
use crate::error::RuntimeErrorKind;
use crate::vm::value::Value;

type OpResult = Result<Value, RuntimeErrorKind>;

/// Longest string or list a `*` repetition may produce.
const MAX_REPEAT_LEN: usize = 1 << 24;

/// Apply a binary opcode. `left` was pushed first.
pub fn binary(op: OpCode, left: &Value, right: &Value) -> OpResult {
    match op {
        OpCode::Add => add(left, right),
        OpCode::Sub => arithmetic(op, left, right, i64::checked_sub, |a, b| a - b),
        OpCode::Mul => multiply(left, right),
        OpCode::Div => divide(left, right),
        OpCode::Mod => modulo(left, right),
        OpCode::Pow => power(left, right),
        OpCode::And | OpCode::Or | OpCode::Xor | OpCode::Shl | OpCode::Shr => {
            bitwise(op, left, right)
        }
        OpCode::Eq => Ok(Value::Bool(left == right)),
        OpCode::Ne => Ok(Value::Bool(left != right)),
        OpCode::Lt => Ok(Value::Bool(compare(left, right)? == Ordering::Less)),
        OpCode::Le => Ok(Value::Bool(compare(left, right)? != Ordering::Greater)),
        OpCode::Gt => Ok(Value::Bool(compare(left, right)? == Ordering::Greater)),
        OpCode::Ge => Ok(Value::Bool(compare(left, right)? != Ordering::Less)),
        OpCode::Cmp => Ok(Value::Int(match compare(left, right)? {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        })),
        other => Err(RuntimeErrorKind::InvalidBytecode(format!(
            "{} is not a binary operator",
            other
        ))),
    }
}

/// Apply a unary opcode.
pub fn unary(op: OpCode, operand: &Value) -> OpResult {
    match (op, operand) {
        (OpCode::Neg, Value::Int(n)) => n
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| RuntimeErrorKind::Overflow("negation".into())),
        (OpCode::Neg, Value::Float(n)) => Ok(Value::Float(-n)),
        (OpCode::Neg, Value::Bool(b)) => Ok(Value::Int(-(*b as i64))),
        (OpCode::Not, Value::Int(n)) => Ok(Value::Int(!n)),
        (OpCode::Not, Value::Bool(b)) => Ok(Value::Int(!(*b as i64))),
        (OpCode::LNot, value) => Ok(Value::Bool(!value.is_truthy())),
        (op, value) => Err(RuntimeErrorKind::type_error(format!(
            "bad operand type for {}: '{}'",
            op,
            value.type_name()
        ))),
    }
}

fn operand_error(op: &str, left: &Value, right: &Value) -> RuntimeErrorKind {
    RuntimeErrorKind::type_error(format!(
        "unsupported operand types for {}: '{}' and '{}'",
        op,
        left.type_name(),
        right.type_name()
    ))
}

/// Numeric view of a value; bools count as integers.
enum Num {
    Int(i64),
    Float(f64),
}

fn num(value: &Value) -> Option<Num> {
    match value {
        Value::Int(n) => Some(Num::Int(*n)),
        Value::Bool(b) => Some(Num::Int(*b as i64)),
        Value::Float(n) => Some(Num::Float(*n)),
        _ => None,
    }
}

fn arithmetic(
    op: OpCode,
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> OpResult {
    match (num(left), num(right)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => int_op(a, b)
            .map(Value::Int)
            .ok_or_else(|| RuntimeErrorKind::Overflow(op.mnemonic().to_lowercase())),
        (Some(a), Some(b)) => Ok(Value::Float(float_op(to_f64(a), to_f64(b)))),
        _ => Err(operand_error(op.mnemonic(), left, right)),
    }
}

fn to_f64(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    }
}

fn add(left: &Value, right: &Value) -> OpResult {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => {
            let mut s = String::with_capacity(a.len() + b.len());
            s.push_str(a);
            s.push_str(b);
            Ok(Value::Str(Rc::from(s)))
        }
        // Concatenating a string with anything else stringifies the other side.
        (Value::Str(a), other) => Ok(Value::str(format!("{}{}", a, other))),
        (other, Value::Str(b)) => Ok(Value::str(format!("{}{}", other, b))),
        (Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        _ => arithmetic(OpCode::Add, left, right, i64::checked_add, |a, b| a + b),
    }
}

fn multiply(left: &Value, right: &Value) -> OpResult {
    match (left, right) {
        (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
            let count = (*n).max(0) as usize;
            if s.len().saturating_mul(count) > MAX_REPEAT_LEN {
                return Err(RuntimeErrorKind::OutOfMemory(s.len().saturating_mul(count)));
            }
            Ok(Value::str(s.repeat(count)))
        }
        (Value::List(items), Value::Int(n)) | (Value::Int(n), Value::List(items)) => {
            let items = items.borrow();
            let count = (*n).max(0) as usize;
            if items.len().saturating_mul(count) > MAX_REPEAT_LEN {
                return Err(RuntimeErrorKind::OutOfMemory(items.len().saturating_mul(count)));
            }
            let mut out = Vec::with_capacity(items.len() * count);
            for _ in 0..count {
                out.extend(items.iter().cloned());
            }
            Ok(Value::list(out))
        }
        _ => arithmetic(OpCode::Mul, left, right, i64::checked_mul, |a, b| a * b),
    }
}

fn divide(left: &Value, right: &Value) -> OpResult {
    match (num(left), num(right)) {
        (Some(_), Some(Num::Int(0))) => Err(RuntimeErrorKind::DivisionByZero),
        (Some(_), Some(Num::Float(b))) if b == 0.0 => Err(RuntimeErrorKind::DivisionByZero),
        // Integer division truncates toward zero.
        (Some(Num::Int(a)), Some(Num::Int(b))) => a
            .checked_div(b)
            .map(Value::Int)
            .ok_or_else(|| RuntimeErrorKind::Overflow("div".into())),
        (Some(a), Some(b)) => Ok(Value::Float(to_f64(a) / to_f64(b))),
        _ => Err(operand_error("DIV", left, right)),
    }
}

fn modulo(left: &Value, right: &Value) -> OpResult {
    match (num(left), num(right)) {
        (Some(_), Some(Num::Int(0))) => Err(RuntimeErrorKind::DivisionByZero),
        (Some(_), Some(Num::Float(b))) if b == 0.0 => Err(RuntimeErrorKind::DivisionByZero),
        (Some(Num::Int(a)), Some(Num::Int(b))) => a
            .checked_rem(b)
            .map(Value::Int)
            .ok_or_else(|| RuntimeErrorKind::Overflow("mod".into())),
        (Some(a), Some(b)) => Ok(Value::Float(to_f64(a) % to_f64(b))),
        _ => Err(operand_error("MOD", left, right)),
    }
}

fn power(left: &Value, right: &Value) -> OpResult {
    match (num(left), num(right)) {
        (Some(Num::Int(base)), Some(Num::Int(exp))) if exp >= 0 => {
            let exp = u32::try_from(exp).map_err(|_| RuntimeErrorKind::Overflow("pow".into()))?;
            base.checked_pow(exp)
                .map(Value::Int)
                .ok_or_else(|| RuntimeErrorKind::Overflow("pow".into()))
        }
        (Some(a), Some(b)) => Ok(Value::Float(to_f64(a).powf(to_f64(b)))),
        _ => Err(operand_error("POW", left, right)),
    }
}

fn bitwise(op: OpCode, left: &Value, right: &Value) -> OpResult {
    let (Some(a), Some(b)) = (left.as_int(), right.as_int()) else {
        return Err(operand_error(op.mnemonic(), left, right));
    };
    let result = match op {
        OpCode::And => a & b,
        OpCode::Or => a | b,
        OpCode::Xor => a ^ b,
        OpCode::Shl | OpCode::Shr => {
            let shift = u32::try_from(b)
                .ok()
                .filter(|s| *s < 64)
                .ok_or_else(|| RuntimeErrorKind::Overflow("shift".into()))?;
            if op == OpCode::Shl {
                a << shift
            } else {
                a >> shift
            }
        }
        _ => unreachable!("bitwise called with {}", op),
    };
    Ok(Value::Int(result))
}

/// Ordering for the relational operators.
pub fn compare(left: &Value, right: &Value) -> Result<Ordering, RuntimeErrorKind> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::List(a), Value::List(b)) => {
            let (a, b) = (a.borrow(), b.borrow());
            for (x, y) in a.iter().zip(b.iter()) {
                match compare(x, y)? {
                    Ordering::Equal => continue,
                    other => return Ok(other),
                }
            }
            Ok(a.len().cmp(&b.len()))
        }
        _ => match (num(left), num(right)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => Ok(a.cmp(&b)),
            (Some(a), Some(b)) => to_f64(a)
                .partial_cmp(&to_f64(b))
                .ok_or_else(|| RuntimeErrorKind::type_error("cannot order NaN")),
            _ => Err(RuntimeErrorKind::type_error(format!(
                "cannot compare '{}' with '{}'",
                left.type_name(),
                right.type_name()
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(n: i64) -> Value {
        Value::Int(n)
    }

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(binary(OpCode::Add, &int(5), &int(3)).unwrap(), int(8));
        assert_eq!(binary(OpCode::Div, &int(7), &int(2)).unwrap(), int(3));
        assert_eq!(binary(OpCode::Div, &int(-7), &int(2)).unwrap(), int(-3));
        assert_eq!(binary(OpCode::Mod, &int(7), &int(3)).unwrap(), int(1));
        assert_eq!(binary(OpCode::Pow, &int(2), &int(10)).unwrap(), int(1024));
    }

    #[test]
    fn test_mixed_numeric_promotes_to_float() {
        assert_eq!(
            binary(OpCode::Mul, &int(2), &Value::Float(1.5)).unwrap(),
            Value::Float(3.0)
        );
    }

    #[test]
    fn test_division_by_zero_is_an_error() {
        for op in [OpCode::Div, OpCode::Mod] {
            assert!(matches!(
                binary(op, &int(10), &int(0)),
                Err(RuntimeErrorKind::DivisionByZero)
            ));
            assert!(matches!(
                binary(op, &Value::Float(1.0), &Value::Float(0.0)),
                Err(RuntimeErrorKind::DivisionByZero)
            ));
        }
    }

    #[test]
    fn test_overflow_is_checked() {
        assert!(matches!(
            binary(OpCode::Add, &int(i64::MAX), &int(1)),
            Err(RuntimeErrorKind::Overflow(_))
        ));
        assert!(matches!(
            unary(OpCode::Neg, &int(i64::MIN)),
            Err(RuntimeErrorKind::Overflow(_))
        ));
    }

    #[test]
    fn test_strings_and_lists() {
        assert_eq!(
            binary(OpCode::Add, &Value::str("ab"), &Value::str("cd")).unwrap(),
            Value::str("abcd")
        );
        assert_eq!(
            binary(OpCode::Add, &Value::str("n="), &int(3)).unwrap(),
            Value::str("n=3")
        );
        assert_eq!(
            binary(OpCode::Mul, &Value::str("ab"), &int(3)).unwrap(),
            Value::str("ababab")
        );
        let joined = binary(
            OpCode::Add,
            &Value::list(vec![int(1)]),
            &Value::list(vec![int(2)]),
        )
        .unwrap();
        assert_eq!(joined, Value::list(vec![int(1), int(2)]));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(binary(OpCode::Lt, &int(1), &int(2)).unwrap(), Value::Bool(true));
        assert_eq!(
            binary(OpCode::Cmp, &Value::str("b"), &Value::str("a")).unwrap(),
            int(1)
        );
        assert!(binary(OpCode::Lt, &int(1), &Value::str("a")).is_err());
        assert_eq!(
            binary(OpCode::Eq, &int(1), &Value::str("1")).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_bitwise() {
        assert_eq!(binary(OpCode::And, &int(6), &int(3)).unwrap(), int(2));
        assert_eq!(binary(OpCode::Shl, &int(1), &int(4)).unwrap(), int(16));
        assert!(binary(OpCode::Shl, &int(1), &int(64)).is_err());
        assert_eq!(unary(OpCode::Not, &int(0)).unwrap(), int(-1));
        assert_eq!(unary(OpCode::LNot, &int(0)).unwrap(), Value::Bool(true));
    }
}
