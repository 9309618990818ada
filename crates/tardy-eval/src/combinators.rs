//! Chainable operators on deferred values.
//!
//! Every operator returns a new [`Deferred`] and evaluates nothing until that
//! value is resolved. Most operators are `lazy` functions bound to the deferred
//! value they are called on, so the receiver and the operands are resolved
//! together before the operator runs. `then`, `and` and `or` instead evaluate
//! their operands one at a time, left to right, and stop as soon as the
//! outcome is decided.

use std::cmp::Ordering;

use crate::adapters::lazy;
use crate::coerce;
use crate::deferred::Deferred;
use crate::error::Error;
use crate::evaluator::evaluate;
use crate::methods;
use crate::value::Value;

type Operator = fn(&Value, &[Value]) -> crate::Result<Value>;

#[allow(clippy::should_implement_trait)]
impl Deferred {
    fn apply<I, V>(&self, name: &'static str, op: Operator, args: I) -> Deferred
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        lazy(op, None).named(name).call_on(self, args)
    }

    /// Resolve to `when_truthy` if this value is truthy, `when_falsy`
    /// otherwise. Only the chosen branch is evaluated.
    pub fn then(&self, when_truthy: impl Into<Value>, when_falsy: impl Into<Value>) -> Deferred {
        let condition = self.clone();
        let (when_truthy, when_falsy) = (when_truthy.into(), when_falsy.into());
        Deferred::from_future(move || {
            let condition = condition.clone();
            let (when_truthy, when_falsy) = (when_truthy.clone(), when_falsy.clone());
            async move {
                if condition.evaluate().await?.to_bool() {
                    evaluate(when_truthy).await
                } else {
                    evaluate(when_falsy).await
                }
            }
        })
    }

    /// `self && rest[0] && rest[1] ...`, resolving operands one at a time.
    pub fn and<I, V>(&self, rest: I) -> Deferred
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.short_circuit("and", rest, |current| !current.to_bool())
    }

    /// `self || rest[0] || rest[1] ...`, resolving operands one at a time.
    pub fn or<I, V>(&self, rest: I) -> Deferred
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.short_circuit("or", rest, Value::to_bool)
    }

    fn short_circuit<I, V>(
        &self,
        name: &'static str,
        rest: I,
        decided: fn(&Value) -> bool,
    ) -> Deferred
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let head = self.clone();
        let rest: Vec<Value> = rest.into_iter().map(Into::into).collect();
        Deferred::from_future(move || {
            let head = head.clone();
            let rest = rest.clone();
            async move {
                let mut current = head.evaluate().await?;
                for (index, operand) in rest.into_iter().enumerate() {
                    if decided(&current) {
                        tracing::trace!(op = name, operand = index, "short-circuited");
                        break;
                    }
                    current = evaluate(operand).await?;
                }
                Ok(current)
            }
        })
    }

    /// Left fold with `+` (numeric addition or string concatenation).
    pub fn plus<I, V>(&self, args: I) -> Deferred
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.apply("plus", |this, args| fold(this, args, coerce::add), args)
    }

    pub fn minus<I, V>(&self, args: I) -> Deferred
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.apply("minus", |this, args| fold(this, args, coerce::subtract), args)
    }

    pub fn times<I, V>(&self, args: I) -> Deferred
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.apply("times", |this, args| fold(this, args, coerce::multiply), args)
    }

    pub fn over<I, V>(&self, args: I) -> Deferred
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.apply("over", |this, args| fold(this, args, coerce::divide), args)
    }

    /// Strict equality.
    pub fn eq(&self, that: impl Into<Value>) -> Deferred {
        self.apply(
            "eq",
            |this, args| Ok(Value::from(coerce::strict_eq(this, &operand(args)))),
            [that.into()],
        )
    }

    pub fn not_eq(&self, that: impl Into<Value>) -> Deferred {
        self.apply(
            "not_eq",
            |this, args| Ok(Value::from(!coerce::strict_eq(this, &operand(args)))),
            [that.into()],
        )
    }

    pub fn gt(&self, that: impl Into<Value>) -> Deferred {
        self.apply(
            "gt",
            |this, args| ordered(this, args, |o| o == Ordering::Greater),
            [that.into()],
        )
    }

    pub fn lt(&self, that: impl Into<Value>) -> Deferred {
        self.apply(
            "lt",
            |this, args| ordered(this, args, |o| o == Ordering::Less),
            [that.into()],
        )
    }

    pub fn ge(&self, that: impl Into<Value>) -> Deferred {
        self.apply(
            "ge",
            |this, args| ordered(this, args, |o| o != Ordering::Less),
            [that.into()],
        )
    }

    pub fn le(&self, that: impl Into<Value>) -> Deferred {
        self.apply(
            "le",
            |this, args| ordered(this, args, |o| o != Ordering::Greater),
            [that.into()],
        )
    }

    /// Read a property. Missing properties read as null.
    pub fn get(&self, property: impl Into<Value>) -> Deferred {
        self.apply("get", |this, args| get_property(this, &operand(args)), [property.into()])
    }

    /// Write a property and resolve to the receiver, so calls can be chained.
    pub fn set(&self, property: impl Into<Value>, value: impl Into<Value>) -> Deferred {
        self.apply("set", set_property, [property.into(), value.into()])
    }

    /// Call a function value, or a method by name, with this value as the
    /// receiver.
    pub fn call<I, V>(&self, function: impl Into<Value>, args: I) -> Deferred
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let args = std::iter::once(function.into()).chain(args.into_iter().map(Into::into));
        self.apply("call", call_method, args)
    }

    pub fn not(&self) -> Deferred {
        self.apply("not", |this, _| Ok(Value::from(!this.to_bool())), Vec::<Value>::new())
    }
}

fn operand(args: &[Value]) -> Value {
    args.first().cloned().unwrap_or_default()
}

fn fold(
    this: &Value,
    args: &[Value],
    step: fn(&Value, &Value) -> crate::Result<Value>,
) -> crate::Result<Value> {
    args.iter()
        .try_fold(this.clone(), |acc, arg| step(&acc, arg))
}

fn ordered(this: &Value, args: &[Value], accept: fn(Ordering) -> bool) -> crate::Result<Value> {
    let ordering = coerce::compare(this, &operand(args))?;
    Ok(Value::from(ordering.is_some_and(accept)))
}

fn get_property(this: &Value, property: &Value) -> crate::Result<Value> {
    let key = property.to_string_value();
    match this {
        Value::Object(object) => Ok(object.get(&key).unwrap_or_default()),
        Value::Array(array) => Ok(match coerce::to_index(property) {
            Some(index) => array.get(index).unwrap_or_default(),
            None if key == "length" => Value::from(array.len()),
            None => Value::Null,
        }),
        Value::String(s) => Ok(match coerce::to_index(property) {
            Some(index) => s.chars().nth(index).map(|c| Value::from(c.to_string())).into(),
            None if key == "length" => Value::from(s.chars().count()),
            None => Value::Null,
        }),
        Value::Null => Err(Error::type_error(format!(
            "cannot read property '{}' of null",
            key
        ))),
        _ => Ok(Value::Null),
    }
}

fn set_property(this: &Value, args: &[Value]) -> crate::Result<Value> {
    let property = operand(args);
    let value = args.get(1).cloned().unwrap_or_default();
    match this {
        Value::Object(object) => object.insert(property.to_string_value(), value),
        Value::Array(array) => match coerce::to_index(&property) {
            Some(index) => array.set(index, value),
            None => {
                return Err(Error::type_error(format!(
                    "cannot set property '{}' on an array",
                    property
                )))
            }
        },
        other => {
            return Err(Error::type_error(format!(
                "cannot set property '{}' on {}",
                property,
                other.type_name()
            )))
        }
    }
    Ok(this.clone())
}

fn call_method(this: &Value, args: &[Value]) -> crate::Result<Value> {
    let (function, rest) = args
        .split_first()
        .ok_or_else(|| Error::type_error("call needs a function or method name"))?;
    match function {
        Value::Function(f) => f.apply(this, rest),
        Value::String(name) => methods::invoke(this, name, rest),
        other => Err(Error::type_error(format!("{} is not a function", other.type_name()))),
    }
}

/// Sum or concatenate the arguments, left to right.
pub fn add<I, V>(args: I) -> Deferred
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    lazy(
        |_, args| match args.split_first() {
            Some((first, rest)) => fold(first, rest, coerce::add),
            None => Ok(Value::Null),
        },
        None,
    )
    .named("add")
    .call(args)
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use serde_json::json;

    use super::*;
    use crate::value::Function;

    fn run(deferred: Deferred) -> crate::Result<Value> {
        block_on(deferred.evaluate())
    }

    #[test]
    fn test_plus_folds_left() {
        assert_eq!(run(Deferred::ready(5).plus([2, 3])), Ok(Value::from(10)));
        assert_eq!(run(Deferred::ready("a").plus([1, 2])), Ok(Value::from("a12")));
        assert_eq!(
            run(Deferred::ready(1).plus([Value::from(2), Value::from("x")])),
            Ok(Value::from("3x"))
        );
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(run(Deferred::ready(10).minus([3, 2])), Ok(Value::from(5)));
        assert_eq!(run(Deferred::ready(2).times([3, 4])), Ok(Value::from(24)));
        assert_eq!(run(Deferred::ready(12).over([2, 3])), Ok(Value::from(2)));
        assert!(matches!(
            run(Deferred::ready(Value::from(json!({}))).minus([1])),
            Err(Error::Type(_))
        ));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(run(Deferred::ready(3).gt(2)), Ok(Value::from(true)));
        assert_eq!(run(Deferred::ready(3).lt(2)), Ok(Value::from(false)));
        assert_eq!(run(Deferred::ready(2).ge(2)), Ok(Value::from(true)));
        assert_eq!(run(Deferred::ready(2).le(1)), Ok(Value::from(false)));
        assert_eq!(run(Deferred::ready("b").gt("a")), Ok(Value::from(true)));
        assert_eq!(run(Deferred::ready(f64::NAN).ge(0)), Ok(Value::from(false)));
        assert_eq!(run(Deferred::ready(1).eq(1)), Ok(Value::from(true)));
        assert_eq!(run(Deferred::ready(1).eq("1")), Ok(Value::from(false)));
        assert_eq!(run(Deferred::ready(1).not_eq("1")), Ok(Value::from(true)));
    }

    #[test]
    fn test_containers_compare_by_identity() {
        let record = Value::from(json!({"id": 7}));
        assert_eq!(run(Deferred::ready(record.clone()).eq(record.clone())), Ok(Value::from(true)));
        assert_eq!(
            run(Deferred::ready(record.clone()).eq(json!({"id": 7}))),
            Ok(Value::from(false))
        );
        assert_eq!(
            run(Deferred::ready(record.clone()).not_eq(Deferred::ready(record.clone()))),
            Ok(Value::from(false))
        );

        let list = Value::array([record.clone()]);
        assert_eq!(
            run(Deferred::ready(list.clone()).call("includes", [record.clone()])),
            Ok(Value::from(true))
        );
        assert_eq!(run(Deferred::ready(list).call("index_of", [record])), Ok(Value::from(0)));
    }

    #[test]
    fn test_get() {
        let record = Deferred::ready(Value::from(json!({"name": "Eve", "tags": ["a", "b"]})));
        assert_eq!(run(record.get("name")), Ok(Value::from("Eve")));
        assert_eq!(run(record.get("missing")), Ok(Value::Null));
        assert_eq!(run(record.get("tags").get(1)), Ok(Value::from("b")));
        assert_eq!(run(record.get("tags").get("length")), Ok(Value::from(2)));
        assert_eq!(run(Deferred::ready("abc").get("length")), Ok(Value::from(3)));
        assert!(matches!(run(Deferred::ready(Value::Null).get("x")), Err(Error::Type(_))));
    }

    #[test]
    fn test_set_returns_receiver() {
        let target = Value::object([("a", 1)]);
        let chained = Deferred::ready(target.clone()).set("b", Deferred::ready(2)).set("c", 3);
        let result = run(chained).unwrap();
        assert!(result.as_object().unwrap().ptr_eq(target.as_object().unwrap()));
        assert_eq!(target, Value::from(json!({"a": 1, "b": 2, "c": 3})));
    }

    #[test]
    fn test_set_on_scalar_fails() {
        assert!(matches!(run(Deferred::ready(1).set("x", 2)), Err(Error::Type(_))));
    }

    #[test]
    fn test_call_by_name_and_by_function() {
        let names = Deferred::ready(Value::from(json!(["x", "y"])));
        assert_eq!(run(names.call("join", ["-"])), Ok(Value::from("x-y")));

        let count = Function::new(|this, args| {
            Ok(Value::from(this.as_array().map_or(0, |a| a.len()) + args.len()))
        });
        assert_eq!(run(names.call(count, [0, 0])), Ok(Value::from(4)));
        assert!(matches!(run(names.call(5, Vec::<Value>::new())), Err(Error::Type(_))));
    }

    #[test]
    fn test_call_result_is_evaluated() {
        let names = Deferred::ready(Value::from(json!(["a", "b"])));
        let shout =
            Function::new(|_, args| Ok(Value::from(Deferred::ready(args[0].clone()).plus(["!"]))));
        assert_eq!(
            run(names.call("map", [shout]).call("join", [" "])),
            Ok(Value::from("a! b!"))
        );
    }

    #[test]
    fn test_not() {
        assert_eq!(run(Deferred::ready(0).not()), Ok(Value::from(true)));
        assert_eq!(run(Deferred::ready("x").not()), Ok(Value::from(false)));
    }

    #[test]
    fn test_then_picks_branch() {
        assert_eq!(run(Deferred::ready(false).then("yes", "no")), Ok(Value::from("no")));
        assert_eq!(run(Deferred::ready(1).then("yes", "no")), Ok(Value::from("yes")));
    }

    #[test]
    fn test_and_or_yield_deciding_operand() {
        assert_eq!(run(Deferred::ready(1).and([2, 3])), Ok(Value::from(3)));
        assert_eq!(run(Deferred::ready(1).and([0, 3])), Ok(Value::from(0)));
        assert_eq!(run(Deferred::ready(0).or(["", "x", "y"])), Ok(Value::from("x")));
        assert_eq!(run(Deferred::ready(0).or([Value::Null])), Ok(Value::Null));
        assert_eq!(run(Deferred::ready("only").and(Vec::<Value>::new())), Ok(Value::from("only")));
    }

    #[test]
    fn test_add() {
        assert_eq!(
            run(add([Value::from("<li>"), Deferred::ready(1).into(), Value::from("</li>")])),
            Ok(Value::from("<li>1</li>"))
        );
        assert_eq!(run(add(Vec::<Value>::new())), Ok(Value::Null));
    }
}
