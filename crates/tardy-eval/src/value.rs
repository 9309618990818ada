//! Runtime values for the deferred evaluator.
//!
//! Arrays and objects are shared, interior-mutable nodes so that a value graph
//! can alias the same node from several places and even refer back to one of
//! its own ancestors. Cloning a [`Value`] never copies a container; it copies a
//! handle to it.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::deferred::Deferred;
use crate::error::Error;

/// Entries of an object node, kept in insertion order.
pub type Map = IndexMap<String, Value>;

/// Identity of a container node, used to detect aliasing and cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(usize);

/// A shared array node.
#[derive(Clone, Default)]
pub struct Array(Rc<RefCell<Vec<Value>>>);

impl Array {
    pub fn new(items: Vec<Value>) -> Self {
        Self(Rc::new(RefCell::new(items)))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.borrow().get(index).cloned()
    }

    /// Store `value` at `index`, padding with nulls if the array is too short.
    pub fn set(&self, index: usize, value: Value) {
        let mut items = self.0.borrow_mut();
        if index >= items.len() {
            items.resize(index + 1, Value::Null);
        }
        items[index] = value;
    }

    pub fn push(&self, value: Value) {
        self.0.borrow_mut().push(value);
    }

    pub fn reverse(&self) {
        self.0.borrow_mut().reverse();
    }

    /// Snapshot of the items. Handles are cloned, nested nodes are shared.
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.borrow().clone()
    }

    pub fn ptr_eq(&self, other: &Array) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn id(&self) -> NodeId {
        NodeId(Rc::as_ptr(&self.0) as *const () as usize)
    }
}

/// A shared object node with string keys.
#[derive(Clone, Default)]
pub struct Object(Rc<RefCell<Map>>);

impl Object {
    pub fn new(entries: Map) -> Self {
        Self(Rc::new(RefCell::new(entries)))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.borrow().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.0.borrow_mut().insert(key.into(), value);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.borrow().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().keys().cloned().collect()
    }

    /// Snapshot of the entries in insertion order.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn id(&self) -> NodeId {
        NodeId(Rc::as_ptr(&self.0) as *const () as usize)
    }
}

type NativeFn = dyn Fn(&Value, &[Value]) -> crate::Result<Value>;

/// A native function callable from `Deferred::call` and the builtin methods.
///
/// The first argument is the receiver (`null` when there is none).
#[derive(Clone)]
pub struct Function {
    name: Rc<str>,
    body: Rc<NativeFn>,
}

impl Function {
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> crate::Result<Value> + 'static,
    {
        Self::named("anonymous", body)
    }

    pub fn named<F>(name: &str, body: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> crate::Result<Value> + 'static,
    {
        Self {
            name: Rc::from(name),
            body: Rc::new(body),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, receiver: &Value, args: &[Value]) -> crate::Result<Value> {
        (self.body)(receiver, args)
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.body, &other.body)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({})", self.name)
    }
}

/// A runtime value.
#[derive(Clone, Default)]
pub enum Value {
    /// The null value. Also stands in for "undefined".
    #[default]
    Null,
    /// A boolean value.
    Boolean(bool),
    /// A numeric value (always f64, like JavaScript).
    Number(f64),
    /// A string value.
    String(String),
    /// A shared array node.
    Array(Array),
    /// A shared object node.
    Object(Object),
    /// A native function.
    Function(Function),
    /// A value that is not known yet.
    Deferred(Deferred),
}

impl Value {
    /// Build an array value from anything convertible into values.
    pub fn array<I, V>(items: I) -> Value
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::Array(Array::new(items.into_iter().map(Into::into).collect()))
    }

    /// Build an object value from key/value pairs.
    pub fn object<I, K, V>(entries: I) -> Value
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Object(Object::new(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    /// Name of the variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Deferred(_) => "deferred",
        }
    }

    /// Coerce this value to a string.
    pub fn to_string_value(&self) -> String {
        let mut path = Vec::new();
        self.render(&mut path)
    }

    fn render(&self, path: &mut Vec<NodeId>) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::String(s) => s.clone(),
            Value::Number(n) => format_number(*n),
            Value::Boolean(b) => if *b { "true" } else { "false" }.to_string(),
            Value::Array(arr) => {
                // A circular array renders as empty, as `Array.prototype.join` does.
                if path.contains(&arr.id()) {
                    return String::new();
                }
                path.push(arr.id());
                let items: Vec<String> = arr
                    .to_vec()
                    .iter()
                    .map(|v| match v {
                        Value::Null => String::new(),
                        other => other.render(path),
                    })
                    .collect();
                path.pop();
                items.join(",")
            }
            Value::Object(_) => "[object Object]".to_string(),
            Value::Function(func) => format!("[function {}]", func.name()),
            Value::Deferred(_) => "[deferred]".to_string(),
        }
    }

    /// Coerce this value to a boolean.
    pub fn to_bool(&self) -> bool {
        match self {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Boolean(b) => *b,
            Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Deferred(_) => true,
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_deferred(&self) -> Option<&Deferred> {
        match self {
            Value::Deferred(d) => Some(d),
            _ => None,
        }
    }

    /// Export to JSON. Functions, deferred values and cycles have no JSON form.
    pub fn to_json(&self) -> crate::Result<serde_json::Value> {
        let mut path = Vec::new();
        self.export(&mut path)
    }

    fn export(&self, path: &mut Vec<NodeId>) -> crate::Result<serde_json::Value> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(arr) => {
                if path.contains(&arr.id()) {
                    return Err(Error::Export("cyclic array".to_string()));
                }
                path.push(arr.id());
                let items = arr
                    .to_vec()
                    .iter()
                    .map(|v| v.export(path))
                    .collect::<crate::Result<Vec<_>>>()?;
                path.pop();
                serde_json::Value::Array(items)
            }
            Value::Object(obj) => {
                if path.contains(&obj.id()) {
                    return Err(Error::Export("cyclic object".to_string()));
                }
                path.push(obj.id());
                let mut map = serde_json::Map::new();
                for (key, value) in obj.entries() {
                    map.insert(key, value.export(path)?);
                }
                path.pop();
                serde_json::Value::Object(map)
            }
            Value::Function(func) => {
                return Err(Error::Export(format!("function {}", func.name())));
            }
            Value::Deferred(_) => {
                return Err(Error::Export("unresolved deferred value".to_string()));
            }
        })
    }

    fn debug_with(&self, f: &mut fmt::Formatter<'_>, path: &RefCell<Vec<NodeId>>) -> fmt::Result {
        match self {
            Value::Array(arr) => {
                if path.borrow().contains(&arr.id()) {
                    return f.write_str("[Circular]");
                }
                path.borrow_mut().push(arr.id());
                let items = arr.to_vec();
                let result = f
                    .debug_list()
                    .entries(items.iter().map(|value| Guarded { value, path }))
                    .finish();
                path.borrow_mut().pop();
                result
            }
            Value::Object(obj) => {
                if path.borrow().contains(&obj.id()) {
                    return f.write_str("[Circular]");
                }
                path.borrow_mut().push(obj.id());
                let entries = obj.entries();
                let result = f
                    .debug_map()
                    .entries(entries.iter().map(|(k, value)| (k, Guarded { value, path })))
                    .finish();
                path.borrow_mut().pop();
                result
            }
            Value::Null => f.write_str("Null"),
            Value::Boolean(b) => write!(f, "Boolean({})", b),
            Value::Number(n) => write!(f, "Number({})", n),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::Function(func) => fmt::Debug::fmt(func, f),
            Value::Deferred(d) => fmt::Debug::fmt(d, f),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == n.trunc() && n.abs() < 1e15 {
        // Integer-like numbers without decimal point
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

struct Guarded<'a> {
    value: &'a Value,
    path: &'a RefCell<Vec<NodeId>>,
}

impl fmt::Debug for Guarded<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.debug_with(f, self.path)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = RefCell::new(Vec::new());
        self.debug_with(f, &path)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_value())
    }
}

/// Structural equality. Nodes that are the same allocation are equal without
/// being compared; functions and deferred values compare by identity. A pair of
/// nodes already under comparison counts as equal, so cyclic graphs terminate.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.eq_with(other, &mut Vec::new())
    }
}

impl Value {
    fn eq_with(&self, other: &Value, seen: &mut Vec<(NodeId, NodeId)>) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                if a.ptr_eq(b) || seen.contains(&(a.id(), b.id())) {
                    return true;
                }
                let (xs, ys) = (a.to_vec(), b.to_vec());
                if xs.len() != ys.len() {
                    return false;
                }
                seen.push((a.id(), b.id()));
                let equal = xs.iter().zip(&ys).all(|(x, y)| x.eq_with(y, seen));
                seen.pop();
                equal
            }
            (Value::Object(a), Value::Object(b)) => {
                if a.ptr_eq(b) || seen.contains(&(a.id(), b.id())) {
                    return true;
                }
                if a.len() != b.len() {
                    return false;
                }
                seen.push((a.id(), b.id()));
                let equal = a.entries().iter().all(|(key, x)| match b.get(key) {
                    Some(y) => x.eq_with(&y, seen),
                    None => false,
                });
                seen.pop();
                equal
            }
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Deferred(a), Value::Deferred(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

macro_rules! from_integer {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(n: $t) -> Self {
                    Value::Number(n as f64)
                }
            }
        )*
    };
}

from_integer!(i32, i64, u32, u64, usize);

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(Array::new(items))
    }
}

impl From<Array> for Value {
    fn from(arr: Array) -> Self {
        Value::Array(arr)
    }
}

impl From<Object> for Value {
    fn from(obj: Object) -> Self {
        Value::Object(obj)
    }
}

impl From<Function> for Value {
    fn from(func: Function) -> Self {
        Value::Function(func)
    }
}

impl From<Deferred> for Value {
    fn from(deferred: Deferred) -> Self {
        Value::Deferred(deferred)
    }
}

impl From<&Deferred> for Value {
    fn from(deferred: &Deferred) -> Self {
        Value::Deferred(deferred.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::array(items),
            serde_json::Value::Object(map) => Value::object(map),
        }
    }
}
