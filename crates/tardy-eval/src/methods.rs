//! Builtin methods reachable through `call("name", ...)`.

use crate::coerce::{strict_eq, to_number};
use crate::error::Error;
use crate::value::{Array, Function, Value};

/// Call the method `name` on `receiver`.
///
/// An object property holding a function takes precedence over builtins and
/// is called with the object as its receiver.
pub fn invoke(receiver: &Value, name: &str, args: &[Value]) -> crate::Result<Value> {
    if let Value::Object(object) = receiver {
        if let Some(Value::Function(func)) = object.get(name) {
            return func.apply(receiver, args);
        }
    }
    match receiver {
        Value::Array(array) => array_method(receiver, array, name, args),
        Value::String(s) => string_method(s, name, args),
        Value::Number(n) => number_method(*n, name, args),
        _ => Err(no_method(receiver, name)),
    }
}

fn no_method(receiver: &Value, name: &str) -> Error {
    Error::type_error(format!("{} has no method '{}'", receiver.type_name(), name))
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn callback<'a>(args: &'a [Value], method: &str) -> crate::Result<&'a Function> {
    match args.first() {
        Some(Value::Function(func)) => Ok(func),
        other => Err(Error::type_error(format!(
            "{} expects a function, got {}",
            method,
            other.map(Value::type_name).unwrap_or("nothing")
        ))),
    }
}

/// Resolve a possibly negative position against `len`, clamped to `0..=len`.
fn position(value: &Value, len: usize, default: usize) -> crate::Result<usize> {
    if value.is_null() {
        return Ok(default);
    }
    let n = to_number(value)?;
    if n.is_nan() {
        return Ok(0);
    }
    let n = n.trunc();
    let resolved = if n < 0.0 { len as f64 + n } else { n };
    Ok(resolved.clamp(0.0, len as f64) as usize)
}

fn array_method(
    receiver: &Value,
    array: &Array,
    name: &str,
    args: &[Value],
) -> crate::Result<Value> {
    match name {
        "map" => {
            let f = callback(args, name)?;
            let mapped = array
                .to_vec()
                .into_iter()
                .enumerate()
                .map(|(i, item)| f.apply(&Value::Null, &[item, Value::from(i), receiver.clone()]))
                .collect::<crate::Result<Vec<_>>>()?;
            Ok(Value::from(mapped))
        }
        "filter" => {
            let f = callback(args, name)?;
            let mut kept = Vec::new();
            for (i, item) in array.to_vec().into_iter().enumerate() {
                let keep =
                    f.apply(&Value::Null, &[item.clone(), Value::from(i), receiver.clone()])?;
                if keep.to_bool() {
                    kept.push(item);
                }
            }
            Ok(Value::from(kept))
        }
        "join" => {
            let separator = match args.first() {
                None | Some(Value::Null) => ",".to_string(),
                Some(sep) => sep.to_string_value(),
            };
            let parts: Vec<String> = array
                .to_vec()
                .iter()
                .map(|item| match item {
                    Value::Null => String::new(),
                    other => other.to_string_value(),
                })
                .collect();
            Ok(Value::from(parts.join(&separator)))
        }
        "push" => {
            for item in args {
                array.push(item.clone());
            }
            Ok(Value::from(array.len()))
        }
        "slice" => {
            let items = array.to_vec();
            let start = position(&arg(args, 0), items.len(), 0)?;
            let end = position(&arg(args, 1), items.len(), items.len())?;
            let sliced = if start < end { items[start..end].to_vec() } else { Vec::new() };
            Ok(Value::from(sliced))
        }
        "reverse" => {
            array.reverse();
            Ok(receiver.clone())
        }
        "includes" => {
            let needle = arg(args, 0);
            Ok(Value::from(array.to_vec().iter().any(|item| strict_eq(item, &needle))))
        }
        "index_of" => {
            let needle = arg(args, 0);
            let found = array.to_vec().iter().position(|item| strict_eq(item, &needle));
            Ok(found.map(Value::from).unwrap_or(Value::from(-1)))
        }
        "len" | "length" => Ok(Value::from(array.len())),
        _ => Err(no_method(receiver, name)),
    }
}

fn string_method(s: &str, name: &str, args: &[Value]) -> crate::Result<Value> {
    let text = |index: usize| arg(args, index).to_string_value();
    match name {
        "replace" => {
            let pattern = text(0);
            let replacement = match args.get(1) {
                Some(Value::Function(f)) => {
                    if !s.contains(pattern.as_str()) {
                        return Ok(Value::from(s));
                    }
                    f.apply(&Value::Null, &[Value::from(pattern.as_str())])?.to_string_value()
                }
                _ => text(1),
            };
            Ok(Value::from(s.replacen(pattern.as_str(), &replacement, 1)))
        }
        "to_upper_case" => Ok(Value::from(s.to_uppercase())),
        "to_lower_case" => Ok(Value::from(s.to_lowercase())),
        "trim" => Ok(Value::from(s.trim())),
        "split" => {
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::Null) => vec![Value::from(s)],
                Some(sep) => {
                    let sep = sep.to_string_value();
                    if sep.is_empty() {
                        s.chars().map(|c| Value::from(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(Value::from).collect()
                    }
                }
            };
            Ok(Value::from(parts))
        }
        "concat" => {
            let mut out = s.to_string();
            for item in args {
                out.push_str(&item.to_string_value());
            }
            Ok(Value::from(out))
        }
        "includes" => Ok(Value::from(s.contains(text(0).as_str()))),
        "starts_with" => Ok(Value::from(s.starts_with(text(0).as_str()))),
        "ends_with" => Ok(Value::from(s.ends_with(text(0).as_str()))),
        "len" | "length" => Ok(Value::from(s.chars().count())),
        _ => Err(no_method(&Value::from(s), name)),
    }
}

fn number_method(n: f64, name: &str, args: &[Value]) -> crate::Result<Value> {
    match name {
        "to_fixed" => {
            let digits = match args.first() {
                None | Some(Value::Null) => 0,
                Some(d) => to_number(d)?.clamp(0.0, 100.0) as usize,
            };
            Ok(Value::from(format!("{:.*}", digits, n)))
        }
        _ => Err(no_method(&Value::from(n), name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(receiver: &Value, name: &str, args: &[Value]) -> Value {
        invoke(receiver, name, args).unwrap()
    }

    #[test]
    fn test_map_passes_item_and_index() {
        let names = Value::from(json!(["a", "b"]));
        let tag = Function::new(|_, args| Ok(Value::from(format!("{}{}", args[0], args[1]))));
        assert_eq!(call(&names, "map", &[tag.into()]), Value::from(json!(["a0", "b1"])));
    }

    #[test]
    fn test_filter() {
        let numbers = Value::from(json!([1, 2, 3, 4]));
        let even = Function::new(|_, args| Ok(Value::from(to_number(&args[0])? % 2.0 == 0.0)));
        assert_eq!(call(&numbers, "filter", &[even.into()]), Value::from(json!([2, 4])));
    }

    #[test]
    fn test_join() {
        let items = Value::from(json!(["x", null, 3]));
        assert_eq!(call(&items, "join", &[]), Value::from("x,,3"));
        assert_eq!(call(&items, "join", &[Value::from("\n")]), Value::from("x\n\n3"));
    }

    #[test]
    fn test_push_and_reverse_mutate_receiver() {
        let items = Value::from(json!([1]));
        assert_eq!(call(&items, "push", &[Value::from(2), Value::from(3)]), Value::from(3));
        let reversed = call(&items, "reverse", &[]);
        assert!(reversed.as_array().unwrap().ptr_eq(items.as_array().unwrap()));
        assert_eq!(items, Value::from(json!([3, 2, 1])));
    }

    #[test]
    fn test_slice() {
        let items = Value::from(json!([1, 2, 3, 4]));
        assert_eq!(
            call(&items, "slice", &[Value::from(1), Value::from(3)]),
            Value::from(json!([2, 3]))
        );
        assert_eq!(call(&items, "slice", &[Value::from(-2)]), Value::from(json!([3, 4])));
        assert_eq!(
            call(&items, "slice", &[Value::from(3), Value::from(1)]),
            Value::from(json!([]))
        );
    }

    #[test]
    fn test_index_of_and_includes() {
        let items = Value::from(json!(["a", "b"]));
        assert_eq!(call(&items, "index_of", &[Value::from("b")]), Value::from(1));
        assert_eq!(call(&items, "index_of", &[Value::from("z")]), Value::from(-1));
        assert_eq!(call(&items, "includes", &[Value::from("a")]), Value::from(true));
    }

    #[test]
    fn test_string_methods() {
        let s = Value::from("a %% b %%");
        assert_eq!(
            call(&s, "replace", &[Value::from("%%"), Value::from("x")]),
            Value::from("a x b %%")
        );
        assert_eq!(call(&Value::from("Hi"), "to_upper_case", &[]), Value::from("HI"));
        assert_eq!(call(&Value::from(" t "), "trim", &[]), Value::from("t"));
        assert_eq!(
            call(&Value::from("a,b"), "split", &[Value::from(",")]),
            Value::from(json!(["a", "b"]))
        );
        assert_eq!(call(&Value::from("héllo"), "length", &[]), Value::from(5));
        assert_eq!(
            call(&Value::from("ab"), "concat", &[Value::from(1), Value::from("c")]),
            Value::from("ab1c")
        );
    }

    #[test]
    fn test_replace_with_function() {
        let s = Value::from("total: %%");
        let fill = Function::new(|_, args| Ok(Value::from(format!("<{}>", args[0]))));
        assert_eq!(
            call(&s, "replace", &[Value::from("%%"), fill.into()]),
            Value::from("total: <%%>")
        );
    }

    #[test]
    fn test_number_methods() {
        let pi = Value::from(3.14159);
        assert_eq!(call(&pi, "to_fixed", &[Value::from(2)]), Value::from("3.14"));
        assert_eq!(call(&pi, "to_fixed", &[]), Value::from("3"));
        assert!(matches!(invoke(&pi, "to_string", &[]), Err(Error::Type(_))));
    }

    #[test]
    fn test_object_function_property() {
        let counter = Value::object([("n", Value::from(2))]);
        counter.as_object().unwrap().insert(
            "double",
            Value::from(Function::new(|this, _| {
                let n = this.as_object().and_then(|o| o.get("n")).unwrap_or_default();
                Ok(Value::from(to_number(&n)? * 2.0))
            })),
        );
        assert_eq!(call(&counter, "double", &[]), Value::from(4));
    }

    #[test]
    fn test_unknown_method() {
        assert!(matches!(invoke(&Value::Null, "map", &[]), Err(Error::Type(_))));
        assert!(matches!(invoke(&Value::from(json!([])), "frobnicate", &[]), Err(Error::Type(_))));
        assert!(matches!(invoke(&Value::from(json!([])), "map", &[]), Err(Error::Type(_))));
    }
}
