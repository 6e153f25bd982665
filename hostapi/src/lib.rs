//! `gobridge-hostapi`: the host side of the Go `js/wasm` value protocol.
//!
//! This crate models the JS-shaped world a Go `js/wasm` guest talks to,
//! independent of any wasm engine:
//!
//! - `Value`, `Object`, `Function`: host values with JS identity rules
//! - `ops`: property access, calls, construction and `instanceof`
//! - `Environment`: the global object (stubbed `fs`/`process`), the bridge
//!   object (callback protocol) and the ambient constructors
//! - `Slot`: the 8-byte NaN-boxed encoding used at the memory boundary
//! - `ValueTable`: id ↔ value registry with reference counting
//! - `Realm`: the seam through which host code re-enters the guest
//! - `HostError`: thrown exceptions vs. host failures

pub mod builtins;
pub mod env;
pub mod error;
pub mod ops;
pub mod slot;
pub mod table;
pub mod traits;
pub mod value;

// Re-export commonly used types at the crate root.
pub use builtins::Methods;
pub use env::Environment;
pub use error::{enosys, HostError};
pub use slot::{Slot, TypeFlag, NAN_HEAD};
pub use table::{RefCount, ValueTable};
pub use traits::{DetachedRealm, Realm};
pub use value::{Class, ClassKind, Function, NativeFn, Object, Value};
