//! Structural evaluation of values that may hold deferred values at any depth.
//!
//! Evaluation classifies a value into one of three cases:
//!
//! - a deferred value is resolved, and its outcome evaluated in turn;
//! - a plain value is returned as is, without suspending;
//! - a container is walked depth first. Every slot holding a deferred value is
//!   recorded, all of them are resolved concurrently, and the evaluation
//!   completes once every one of them has finished.
//!
//! Inputs are never mutated. Only the nodes from which a deferred value can be
//! reached are copied, with the same keys, the same sharing and the same
//! cycles, and resolved values are written into the copies. Every other node is
//! shared with the input as is, so plain containers keep their identity. A walk
//! that finds nothing to resolve hands back the input itself.

use std::collections::{HashMap, HashSet};

use futures::future::{self, LocalBoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;

use crate::deferred::Deferred;
use crate::error::Error;
use crate::value::{Array, NodeId, Object, Value};

/// The `(error, value)` pair an evaluation completes with.
///
/// On failure `value` is the partially resolved graph: slots whose deferred
/// value failed still hold it, every other slot holds its result.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub error: Option<Error>,
    pub value: Value,
}

impl Settlement {
    pub fn ok(value: Value) -> Self {
        Self { error: None, value }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> crate::Result<Value> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.value),
        }
    }
}

/// Evaluate `value`, resolving every deferred value reachable from it.
pub fn evaluate(value: Value) -> LocalBoxFuture<'static, crate::Result<Value>> {
    settle(value).map(Settlement::into_result).boxed_local()
}

/// Evaluate `value` and keep the partially resolved graph on failure.
///
/// The returned future is ready on its first poll when nothing needs resolving.
pub fn settle(value: Value) -> LocalBoxFuture<'static, Settlement> {
    match value {
        Value::Deferred(deferred) => resolve_slot(deferred).boxed_local(),
        Value::Array(_) | Value::Object(_) => {
            let mut scan = Scan::default();
            scan.visit(&value);
            let pending = scan.pending();
            if pending.is_empty() {
                tracing::trace!(nodes = scan.children.len(), "no deferred slots");
                return future::ready(Settlement::ok(value)).boxed_local();
            }
            let mut walk = Walk::new(pending);
            let root = walk.copy(&value);
            tracing::debug!(
                slots = walk.slots.len(),
                nodes = scan.children.len(),
                copied = walk.copies.len(),
                "resolving deferred slots"
            );
            join(root, walk.slots).boxed_local()
        }
        plain => future::ready(Settlement::ok(plain)).boxed_local(),
    }
}

/// Resolve one deferred value and evaluate whatever it produced.
async fn resolve_slot(deferred: Deferred) -> Settlement {
    match deferred.resolve().await {
        Ok(value) => settle(value).await,
        Err(error) => Settlement {
            error: Some(error),
            value: Value::Deferred(deferred),
        },
    }
}

/// Location of a deferred value inside the copied graph.
enum Slot {
    Index(Array, usize),
    Key(Object, String),
}

impl Slot {
    fn fill(&self, value: Value) {
        match self {
            Slot::Index(array, index) => array.set(*index, value),
            Slot::Key(object, key) => object.insert(key.as_str(), value),
        }
    }
}

/// Depth-first scan of a container graph.
#[derive(Default)]
struct Scan {
    /// Nodes on the current path.
    active: Vec<NodeId>,
    /// Container children of every node reached.
    children: HashMap<NodeId, Vec<NodeId>>,
    /// Nodes holding a deferred value directly.
    holders: Vec<NodeId>,
}

impl Scan {
    fn visit(&mut self, value: &Value) {
        let (id, items) = match value {
            Value::Array(array) => (array.id(), array.to_vec()),
            Value::Object(object) => (
                object.id(),
                object.entries().into_iter().map(|(_, item)| item).collect(),
            ),
            _ => return,
        };
        if self.children.contains_key(&id) {
            if self.active.contains(&id) {
                tracing::trace!(
                    depth = self.active.len(),
                    "back-edge to an ancestor, not descending"
                );
            }
            return;
        }
        self.children.insert(id, Vec::new());
        self.active.push(id);
        let mut holds_deferred = false;
        for item in &items {
            match item {
                Value::Deferred(_) => holds_deferred = true,
                Value::Array(array) => self.edge(id, array.id()),
                Value::Object(object) => self.edge(id, object.id()),
                _ => continue,
            }
            self.visit(item);
        }
        if holds_deferred {
            self.holders.push(id);
        }
        self.active.pop();
    }

    fn edge(&mut self, parent: NodeId, child: NodeId) {
        if let Some(children) = self.children.get_mut(&parent) {
            children.push(child);
        }
    }

    /// Every node from which a deferred value can be reached.
    fn pending(&self) -> HashSet<NodeId> {
        let mut parents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for (&parent, children) in &self.children {
            for &child in children {
                parents.entry(child).or_default().push(parent);
            }
        }
        let mut pending: HashSet<NodeId> = self.holders.iter().copied().collect();
        let mut queue = self.holders.clone();
        while let Some(id) = queue.pop() {
            for &parent in parents.get(&id).into_iter().flatten() {
                if pending.insert(parent) {
                    queue.push(parent);
                }
            }
        }
        pending
    }
}

/// Copy of the pending part of a container graph, recording deferred slots.
struct Walk {
    pending: HashSet<NodeId>,
    /// Copies of the pending nodes seen so far, keyed by the input node.
    copies: HashMap<NodeId, Value>,
    slots: Vec<(Slot, Deferred)>,
}

impl Walk {
    fn new(pending: HashSet<NodeId>) -> Self {
        Self {
            pending,
            copies: HashMap::new(),
            slots: Vec::new(),
        }
    }

    fn copy(&mut self, value: &Value) -> Value {
        match value {
            Value::Array(array) => {
                let id = array.id();
                if let Some(existing) = self.existing(id, value) {
                    return existing;
                }
                let copy = Array::new(Vec::with_capacity(array.len()));
                self.copies.insert(id, Value::Array(copy.clone()));
                for (index, item) in array.to_vec().into_iter().enumerate() {
                    let item = self.visit(item, || Slot::Index(copy.clone(), index));
                    copy.push(item);
                }
                Value::Array(copy)
            }
            Value::Object(object) => {
                let id = object.id();
                if let Some(existing) = self.existing(id, value) {
                    return existing;
                }
                let copy = Object::default();
                self.copies.insert(id, Value::Object(copy.clone()));
                for (key, item) in object.entries() {
                    let item = self.visit(item, || Slot::Key(copy.clone(), key.clone()));
                    copy.insert(key, item);
                }
                Value::Object(copy)
            }
            other => other.clone(),
        }
    }

    fn visit(&mut self, item: Value, slot: impl FnOnce() -> Slot) -> Value {
        match item {
            Value::Deferred(deferred) => {
                self.slots.push((slot(), deferred.clone()));
                Value::Deferred(deferred)
            }
            other => self.copy(&other),
        }
    }

    /// The input node itself when nothing below it is deferred, or its copy
    /// when it was copied already.
    fn existing(&self, id: NodeId, value: &Value) -> Option<Value> {
        if !self.pending.contains(&id) {
            return Some(value.clone());
        }
        self.copies.get(&id).cloned()
    }
}

/// Bookkeeping for one fan-out/fan-in.
struct Frame {
    total: usize,
    done: usize,
    error: Option<Error>,
}

impl Frame {
    fn new(total: usize) -> Self {
        Self {
            total,
            done: 0,
            error: None,
        }
    }

    fn record(&mut self, error: Option<Error>) {
        self.done += 1;
        match (&self.error, error) {
            (_, None) => {}
            (None, Some(error)) => {
                tracing::debug!(
                    %error,
                    done = self.done,
                    total = self.total,
                    "first failure latched"
                );
                self.error = Some(error);
            }
            (Some(_), Some(error)) => {
                tracing::debug!(%error, "later failure dropped");
            }
        }
    }

    fn finished(&self) -> bool {
        self.done == self.total
    }
}

async fn join(root: Value, slots: Vec<(Slot, Deferred)>) -> Settlement {
    let mut frame = Frame::new(slots.len());
    let mut pending: FuturesUnordered<_> = slots
        .into_iter()
        .map(|(slot, deferred)| async move { (slot, resolve_slot(deferred).await) })
        .collect();

    while let Some((slot, settled)) = pending.next().await {
        slot.fill(settled.value);
        frame.record(settled.error);
    }
    debug_assert!(frame.finished());
    tracing::debug!(slots = frame.total, failed = frame.error.is_some(), "join complete");

    Settlement {
        error: frame.error,
        value: root,
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use futures::executor::block_on;
    use serde_json::json;

    use super::*;
    use crate::deferred::promise;

    #[test]
    fn test_plain_values_complete_synchronously() {
        for value in [Value::Null, Value::from(true), Value::from(4.5), Value::from("s")] {
            let settled = settle(value.clone()).now_or_never();
            assert_eq!(settled.unwrap().into_result(), Ok(value));
        }
    }

    #[test]
    fn test_container_without_deferred_is_returned_as_is() {
        let value = Value::from(json!({"a": [1, {"b": 2}]}));
        let result = evaluate(value.clone()).now_or_never().unwrap().unwrap();
        assert!(result.as_object().unwrap().ptr_eq(value.as_object().unwrap()));
    }

    #[test]
    fn test_empty_containers() {
        assert_eq!(
            block_on(evaluate(Value::array(Vec::<Value>::new()))),
            Ok(Value::array(Vec::<Value>::new()))
        );
        assert_eq!(
            block_on(evaluate(Value::object(Vec::<(String, Value)>::new()))),
            Ok(Value::object(Vec::<(String, Value)>::new()))
        );
    }

    #[test]
    fn test_input_is_not_mutated() {
        let input = Value::object([("a", Value::from(Deferred::ready(1)))]);
        let output = block_on(evaluate(input.clone())).unwrap();
        assert_eq!(output, Value::from(json!({"a": 1})));
        assert!(input.as_object().unwrap().get("a").unwrap().as_deferred().is_some());
    }

    #[test]
    fn test_shared_node_resolved_once() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let shared = Value::object([(
            "x",
            promise(move |done| {
                counter.set(counter.get() + 1);
                done.resolve("x");
            }),
        )]);
        let root = Value::array([shared.clone(), shared]);

        let result = block_on(evaluate(root)).unwrap();
        assert_eq!(calls.get(), 1);

        let items = result.as_array().unwrap().to_vec();
        assert!(items[0].as_object().unwrap().ptr_eq(items[1].as_object().unwrap()));
        assert_eq!(items[0], Value::from(json!({"x": "x"})));
    }

    #[test]
    fn test_self_referencing_container() {
        let obj = Object::default();
        obj.insert("me", Value::Object(obj.clone()));
        let value = Value::Object(obj.clone());
        let result = block_on(evaluate(value)).unwrap();
        assert!(result.as_object().unwrap().ptr_eq(&obj));
    }

    #[test]
    fn test_plain_nodes_keep_their_identity() {
        let plain = Value::from(json!({"k": [1, 2]}));
        let list = Value::array([Value::from(Deferred::ready(0)), plain.clone()]);
        let root = Value::object([
            ("d", Value::from(Deferred::ready(2))),
            ("p", plain.clone()),
            ("list", list.clone()),
        ]);

        let result = block_on(evaluate(root.clone())).unwrap();
        let copy = result.as_object().unwrap();
        assert!(!copy.ptr_eq(root.as_object().unwrap()));
        assert_eq!(copy.get("d"), Some(Value::from(2)));

        let p = copy.get("p").unwrap();
        assert!(p.as_object().unwrap().ptr_eq(plain.as_object().unwrap()));

        let items = copy.get("list").unwrap().as_array().unwrap().to_vec();
        assert!(!copy.get("list").unwrap().as_array().unwrap().ptr_eq(list.as_array().unwrap()));
        assert_eq!(items[0], Value::from(0));
        assert!(items[1].as_object().unwrap().ptr_eq(plain.as_object().unwrap()));
    }

    #[test]
    fn test_cycle_through_deferred_holder_is_copied() {
        // root = { inner: { back: root, d: <deferred> } }
        let root = Object::default();
        let inner = Object::default();
        root.insert("inner", Value::Object(inner.clone()));
        inner.insert("back", Value::Object(root.clone()));
        inner.insert("d", Value::from(Deferred::ready("x")));

        let result = block_on(evaluate(Value::Object(root.clone()))).unwrap();
        let root2 = result.as_object().unwrap();
        assert!(!root2.ptr_eq(&root));
        let inner2 = root2.get("inner").unwrap();
        let inner2 = inner2.as_object().unwrap();
        assert_eq!(inner2.get("d"), Some(Value::from("x")));
        assert!(inner2.get("back").unwrap().as_object().unwrap().ptr_eq(root2));
    }

    #[test]
    fn test_frame_keeps_first_error() {
        let mut frame = Frame::new(3);
        frame.record(None);
        frame.record(Some(Error::Rejected(Value::from("first"))));
        frame.record(Some(Error::Rejected(Value::from("second"))));
        assert!(frame.finished());
        assert_eq!(frame.error, Some(Error::Rejected(Value::from("first"))));
    }
}
