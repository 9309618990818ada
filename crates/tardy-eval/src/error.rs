//! Error types for deferred evaluation.

use crate::value::Value;

/// Errors delivered through a deferred value's completion.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// A resolver completed with a failure reason.
    #[error("rejected: {}", .0.to_string_value())]
    Rejected(Value),
    /// A function wrapped with `lazy` raised a value instead of returning.
    #[error("exception: {}", .0.to_string_value())]
    Exception(Value),
    /// An operator or builtin method was applied to values it cannot handle.
    #[error("type error: {0}")]
    Type(String),
    /// A resolver dropped its completion without calling it.
    #[error("completion dropped before it was called")]
    Abandoned,
    /// A value has no JSON representation.
    #[error("cannot export to JSON: {0}")]
    Export(String),
}

impl Error {
    /// The value carried by a rejection or exception, or the message otherwise.
    pub fn reason(&self) -> Value {
        match self {
            Error::Rejected(value) | Error::Exception(value) => value.clone(),
            other => Value::String(other.to_string()),
        }
    }

    pub(crate) fn type_error(msg: impl Into<String>) -> Self {
        Error::Type(msg.into())
    }
}
