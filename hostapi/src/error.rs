//! Host-side error type for the value protocol.
//!
//! `HostError::Thrown` is a JS-style exception carrying a host value; hooks
//! that have an `ok` flag report it to the guest. The remaining variants are
//! host failures that end the guest.

use crate::value::{Object, Value};

#[derive(Debug, Clone, thiserror::Error)]
pub enum HostError {
    /// An exception value thrown by host code or by the guest's own callbacks.
    #[error("uncaught exception: {}", .0.to_js_string())]
    Thrown(Value),

    /// The guest referenced a value id that is not in the table.
    #[error("unknown value id {0}")]
    UnknownValueId(u32),

    /// A host failure unrelated to JS semantics (for example, a fault raised
    /// while the guest was re-entered).
    #[error("internal host error: {0}")]
    Internal(String),
}

impl HostError {
    /// Throws a new `Error` object with `message`.
    pub fn error(message: impl AsRef<str>) -> Self {
        Self::Thrown(Value::from(Object::error("Error", message.as_ref())))
    }

    /// Throws a new `TypeError`.
    pub fn type_error(message: impl AsRef<str>) -> Self {
        Self::Thrown(Value::from(Object::error("TypeError", message.as_ref())))
    }

    /// Throws a new `RangeError`.
    pub fn range_error(message: impl AsRef<str>) -> Self {
        Self::Thrown(Value::from(Object::error("RangeError", message.as_ref())))
    }

    /// The exception value, if this is a thrown exception.
    pub fn thrown(&self) -> Option<&Value> {
        match self {
            Self::Thrown(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_thrown(&self) -> bool {
        matches!(self, Self::Thrown(_))
    }
}

/// The error object handed to callbacks of unimplemented system calls.
pub fn enosys() -> Value {
    let err = Object::error("Error", "not implemented");
    err.set("code", Value::from("ENOSYS"));
    Value::from(err)
}
