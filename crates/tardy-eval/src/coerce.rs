//! Coercions used by the operator combinators.

use std::cmp::Ordering;

use crate::error::Error;
use crate::value::Value;

/// Convert a value to a number for arithmetic.
///
/// Strings that do not parse become NaN. Containers, functions and deferred
/// values are a type error rather than NaN.
pub fn to_number(value: &Value) -> crate::Result<f64> {
    match value {
        Value::Null => Ok(0.0),
        Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => Ok(*n),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Ok(0.0)
            } else {
                Ok(trimmed.parse::<f64>().unwrap_or(f64::NAN))
            }
        }
        other => Err(Error::type_error(format!(
            "cannot convert {} to a number",
            other.type_name()
        ))),
    }
}

/// `a + b`: concatenation when either side is a string or a container,
/// numeric addition otherwise.
pub fn add(a: &Value, b: &Value) -> crate::Result<Value> {
    let concatenates =
        |v: &Value| matches!(v, Value::String(_) | Value::Array(_) | Value::Object(_));
    if concatenates(a) || concatenates(b) {
        let mut s = a.to_string_value();
        s.push_str(&b.to_string_value());
        return Ok(Value::String(s));
    }
    Ok(Value::Number(to_number(a)? + to_number(b)?))
}

pub fn subtract(a: &Value, b: &Value) -> crate::Result<Value> {
    Ok(Value::Number(to_number(a)? - to_number(b)?))
}

pub fn multiply(a: &Value, b: &Value) -> crate::Result<Value> {
    Ok(Value::Number(to_number(a)? * to_number(b)?))
}

/// Division follows IEEE rules: dividing by zero yields an infinity or NaN.
pub fn divide(a: &Value, b: &Value) -> crate::Result<Value> {
    Ok(Value::Number(to_number(a)? / to_number(b)?))
}

/// Ordering used by `gt`, `lt`, `ge` and `le`.
///
/// Two strings compare lexicographically; anything else compares numerically.
/// `None` means the operands are unordered (a NaN was involved).
pub fn compare(a: &Value, b: &Value) -> crate::Result<Option<Ordering>> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Ok(Some(x.cmp(y))),
        _ => Ok(to_number(a)?.partial_cmp(&to_number(b)?)),
    }
}

/// Strict equality: same kind and same value, with containers, functions and
/// deferred values compared by identity.
pub fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Boolean(x), Value::Boolean(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => x.ptr_eq(y),
        (Value::Object(x), Value::Object(y)) => x.ptr_eq(y),
        (Value::Function(x), Value::Function(y)) => x.ptr_eq(y),
        (Value::Deferred(x), Value::Deferred(y)) => x.ptr_eq(y),
        _ => false,
    }
}

/// Interpret a value as an array index.
pub fn to_index(value: &Value) -> Option<usize> {
    let n = match value {
        Value::Number(n) => *n,
        Value::String(s) => s.parse::<f64>().ok()?,
        _ => return None,
    };
    (n >= 0.0 && n.fract() == 0.0 && n.is_finite()).then_some(n as usize)
}
