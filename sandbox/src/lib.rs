//! `gobridge-sandbox`: Wasmtime host for Go `js/wasm` modules.
//!
//! This crate loads a module built with `GOOS=js GOARCH=wasm`, supplies the
//! `go`/`gojs` import surface the Go runtime expects, and drives the guest
//! through its run/park/resume lifecycle. It provides:
//!
//! - **ABI validation:** Required exports and import signatures checked before instantiation
//! - **Value bridging:** NaN-boxed references into a host value table
//! - **Callbacks:** Guest functions exposed to the host through the event protocol
//! - **Timers:** Guest timeouts driven on the tokio clock
//! - **Limits:** Bounded linear memory, optional fuel metering
//!
//! The primary entry points are [`instantiate`] and [`ExecutionHandle::run`].

pub mod error;
pub mod config;
pub mod memory;
pub mod exports;
pub mod timers;
pub mod host_impl;
pub mod validation;
pub mod linker;
pub mod runtime;

pub use error::{BridgeError, ProtocolViolation};
pub use config::BridgeConfig;
pub use exports::ExportSurface;
pub use runtime::{instantiate, Bridge, ExecutionHandle, RunState};

pub use gobridge_hostapi::{Function, HostError, Object, Value};
