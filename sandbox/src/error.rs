//! Bridge error types.

use crate::memory::MemoryError;

/// A breach of the host/guest protocol. Always fatal to the instance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    /// `run` was called on an instance that already ran.
    #[error("Go program has already been run")]
    AlreadyRun,

    /// An export was called before `run`.
    #[error("Go program has not been run")]
    NotStarted,

    /// The guest was resumed after it exited.
    #[error("Go program has already exited")]
    ResumeAfterExit,

    /// The guest referenced a value id the table does not know.
    #[error("unknown value id {0}")]
    UnknownValueId(u32),
}

/// Top-level error type for the sandbox crate.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Wasmtime engine, compilation, or instantiation error.
    #[error("wasmtime error: {0}")]
    Wasmtime(#[from] anyhow::Error),

    /// Module validation failed (missing exports, bad imports, etc.).
    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// Guest memory access out of bounds.
    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    /// Fuel exhausted during execution.
    #[error("fuel exhausted (instruction limit)")]
    FuelExhausted,

    /// WASM guest trapped.
    #[error("guest trapped: {0}")]
    GuestTrapped(String),

    /// The guest never published an export under this name.
    #[error("export not found: {0}")]
    ExportNotFound(String),

    /// The export exists but is not a function.
    #[error("export is not callable: {0}")]
    NotCallable(String),

    /// The export threw an exception.
    #[error("export {name} threw: {message}")]
    ExportThrew { name: String, message: String },

    /// The export returned a value of the wrong type.
    #[error("export {name} returned {found}, expected string")]
    UnexpectedResult { name: String, found: &'static str },

    /// The guest exited with a non-zero code; its exports are unusable.
    #[error("Go program exited with code {0}")]
    GuestExited(i32),

    /// The guest parked with no timer that could wake it.
    #[error("Go program is parked with nothing scheduled")]
    Parked,

    /// argv/envp did not fit below the guest's data section.
    #[error("total length of command line and environment variables exceeds limit")]
    ArgvTooLong,
}
