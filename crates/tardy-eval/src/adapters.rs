//! Decorators turning plain functions into deferred-value producers.
//!
//! [`curried`] adapts callback-style functions and [`lazy`] adapts functions
//! that return a result directly. Both produce an [`Adapted`] function whose
//! calls return a [`Deferred`]. When that deferred value is resolved, the
//! receiver and arguments are evaluated first, together, and the wrapped
//! function only runs once all of them have resolved.

use std::rc::Rc;

use futures::future;
use futures::FutureExt;

use crate::deferred::{Completion, Deferred, Resolution};
use crate::error::Error;
use crate::evaluator::evaluate;
use crate::value::Value;

type Body = dyn Fn(Value, Vec<Value>) -> Resolution;

/// A function adapted to take and return deferred values.
#[derive(Clone)]
pub struct Adapted {
    name: &'static str,
    body: Rc<Body>,
    bound: Option<Value>,
}

impl Adapted {
    fn new(body: Rc<Body>, bound: Option<Value>) -> Self {
        Self {
            name: "anonymous",
            body,
            bound,
        }
    }

    /// Label used in traces.
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Fix the receiver, overriding any call-time receiver.
    pub fn bind(&self, receiver: impl Into<Value>) -> Self {
        Self {
            bound: Some(receiver.into()),
            ..self.clone()
        }
    }

    /// Call without a receiver (the bound one is used if present).
    pub fn call<I, V>(&self, args: I) -> Deferred
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.call_on(Value::Null, args)
    }

    /// Call with `receiver` unless a receiver was bound.
    pub fn call_on<I, V>(&self, receiver: impl Into<Value>, args: I) -> Deferred
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let receiver = self.bound.clone().unwrap_or_else(|| receiver.into());
        let params: Vec<Value> = std::iter::once(receiver)
            .chain(args.into_iter().map(Into::into))
            .collect();
        let body = Rc::clone(&self.body);
        let name = self.name;

        Deferred::from_future(move || {
            let params = Value::array(params.iter().cloned());
            let body = Rc::clone(&body);
            async move {
                let params = evaluate(params).await?;
                let (receiver, args) = split_params(params)?;
                tracing::trace!(adapter = name, args = args.len(), "invoking adapted function");
                body(receiver, args).await
            }
        })
    }
}

impl std::fmt::Debug for Adapted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapted")
            .field("name", &self.name)
            .field("bound", &self.bound.is_some())
            .finish()
    }
}

fn split_params(params: Value) -> crate::Result<(Value, Vec<Value>)> {
    let params = match params {
        Value::Array(params) => params,
        other => {
            return Err(Error::type_error(format!(
                "adapter parameters evaluated to {}",
                other.type_name()
            )))
        }
    };
    let mut params = params.to_vec().into_iter();
    let receiver = params.next().unwrap_or_default();
    Ok((receiver, params.collect()))
}

/// Adapt a callback-style function.
///
/// `f(receiver, args, completion)` runs with resolved arguments and must call
/// the completion exactly once. If argument evaluation fails, `f` is not
/// called and the failure is forwarded.
pub fn curried<F>(f: F, bound_self: Option<Value>) -> Adapted
where
    F: Fn(Value, Vec<Value>, Completion) + 'static,
{
    Adapted::new(
        Rc::new(move |receiver, args| {
            let (completion, pending) = Completion::channel();
            f(receiver, args, completion);
            pending
        }),
        bound_self,
    )
}

/// Adapt a function that returns its result directly.
///
/// An `Err` from `f` becomes the deferred value's error unchanged. An `Ok`
/// value is evaluated before completing, so returning a deferred value or a
/// container holding some resolves them too.
pub fn lazy<F>(f: F, bound_self: Option<Value>) -> Adapted
where
    F: Fn(&Value, &[Value]) -> crate::Result<Value> + 'static,
{
    Adapted::new(
        Rc::new(move |receiver, args| match f(&receiver, &args) {
            Ok(out) => evaluate(out),
            Err(error) => future::ready(Err(error)).boxed_local(),
        }),
        bound_self,
    )
}
