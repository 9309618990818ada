//! The deferred value primitive.
//!
//! A [`Deferred`] wraps a resolution function. Each call to
//! [`Deferred::resolve`] runs that function once and yields its single
//! `(error, value)` outcome as a `Result`. Nothing runs at construction time.

use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::future::{self, LocalBoxFuture};
use futures::FutureExt;
use tokio::sync::oneshot;

use crate::error::Error;
use crate::evaluator;
use crate::value::Value;

/// The pending outcome of one resolution.
pub type Resolution = LocalBoxFuture<'static, crate::Result<Value>>;

type Resolver = dyn Fn() -> Resolution;

/// A handle to a value that will be produced later.
///
/// Cloning shares the resolution function; it does not resolve anything.
#[derive(Clone)]
pub struct Deferred {
    resolver: Rc<Resolver>,
}

impl Deferred {
    /// Create a deferred value from a callback-style resolver.
    ///
    /// The resolver receives a [`Completion`] and must eventually call one of
    /// its methods. It may do so synchronously or hand the completion to a
    /// host task; dropping it unused fails the resolution with
    /// [`Error::Abandoned`].
    pub fn new<F>(resolver: F) -> Self
    where
        F: Fn(Completion) + 'static,
    {
        Self::from_future(move || {
            let (completion, pending) = Completion::channel();
            resolver(completion);
            pending
        })
    }

    /// Create a deferred value from an async resolver.
    pub fn from_future<F, Fut>(resolver: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = crate::Result<Value>> + 'static,
    {
        Self {
            resolver: Rc::new(move || resolver().boxed_local()),
        }
    }

    /// A deferred value that succeeds with `value`.
    pub fn ready(value: impl Into<Value>) -> Self {
        let value = value.into();
        Self::from_future(move || future::ready(Ok(value.clone())))
    }

    /// A deferred value that fails with `error`.
    pub fn rejected(error: Error) -> Self {
        Self::from_future(move || future::ready(Err(error.clone())))
    }

    /// Run the resolution function once and wait for its outcome.
    ///
    /// The outcome is returned as produced; deferred values nested inside it
    /// are left alone. Use [`Deferred::evaluate`] to resolve those too.
    pub fn resolve(&self) -> Resolution {
        (self.resolver)()
    }

    /// Resolve this value and everything deferred inside its outcome.
    pub fn evaluate(&self) -> LocalBoxFuture<'static, crate::Result<Value>> {
        evaluator::evaluate(Value::Deferred(self.clone()))
    }

    pub fn ptr_eq(&self, other: &Deferred) -> bool {
        Rc::ptr_eq(&self.resolver, &other.resolver)
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Deferred(..)")
    }
}

/// The one-shot callback handed to a resolver.
///
/// Every method consumes the completion, so a resolver cannot complete twice.
pub struct Completion {
    sender: oneshot::Sender<crate::Result<Value>>,
}

impl Completion {
    pub(crate) fn channel() -> (Self, Resolution) {
        let (sender, receiver) = oneshot::channel();
        let pending = async move { receiver.await.unwrap_or(Err(Error::Abandoned)) };
        (Self { sender }, pending.boxed_local())
    }

    /// Deliver an outcome.
    pub fn complete(self, outcome: crate::Result<Value>) {
        if self.sender.send(outcome).is_err() {
            tracing::trace!("completion delivered after its resolution was dropped");
        }
    }

    /// Succeed with `value`.
    pub fn resolve(self, value: impl Into<Value>) {
        self.complete(Ok(value.into()))
    }

    /// Fail with an arbitrary reason.
    pub fn reject(self, reason: impl Into<Value>) {
        self.complete(Err(Error::Rejected(reason.into())))
    }

    /// Fail with an engine error.
    pub fn fail(self, error: Error) {
        self.complete(Err(error))
    }
}

/// Construct a deferred value from a callback-style resolver.
pub fn promise<F>(resolver: F) -> Deferred
where
    F: Fn(Completion) + 'static,
{
    Deferred::new(resolver)
}

/// Check whether a value is deferred.
pub fn is_promise(value: &Value) -> bool {
    matches!(value, Value::Deferred(_))
}
