//! Deferred values with structural evaluation and lazy combinators.
//!
//! A [`Deferred`] stands for a value that a resolver will produce later. Deferred
//! values can be stored anywhere inside arrays and objects; [`evaluate`] finds
//! them at any depth, resolves them concurrently and hands back the resolved
//! graph. [`curried`] and [`lazy`] turn ordinary functions into functions over
//! deferred values, and the operator methods on [`Deferred`] (`plus`, `then`,
//! `and`, `get`, `call`, ...) compose them without waiting on anything.
//!
//! Everything runs on the current task: futures are `!Send`, and concurrency
//! comes from the host primitives the resolvers await.

mod adapters;
mod coerce;
mod combinators;
mod deferred;
mod error;
mod evaluator;
mod methods;
mod value;

pub use adapters::{curried, lazy, Adapted};
pub use combinators::add;
pub use deferred::{is_promise, promise, Completion, Deferred, Resolution};
pub use error::Error;
pub use evaluator::{evaluate, settle, Settlement};
pub use value::{Array, Function, Map, Object, Value};

/// Result type for deferred evaluation.
pub type Result<T> = std::result::Result<T, Error>;
