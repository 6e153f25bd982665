//! The seam between host code and the running guest.
//!
//! Host functions run while the guest is blocked inside an import. Some of
//! them (the callback wrappers) need to re-enter the guest; they do so
//! through a [`Realm`], which the sandbox implements over its wasmtime store.

use crate::builtins::Methods;
use crate::error::HostError;
use crate::value::Object;

pub trait Realm {
    /// The bridge object (`_pendingEvent`, `_makeFuncWrapper`, exports).
    fn bridge(&self) -> Object;

    /// The method objects property lookups hand out in this realm.
    fn methods(&self) -> &Methods;

    /// Invokes the guest's `resume` export and returns once it yields back.
    ///
    /// Fails with `HostError::Internal` if the guest has exited or faulted.
    fn resume(&mut self) -> Result<(), HostError>;
}

/// A realm with no guest attached. Resuming always fails.
///
/// Useful for evaluating host code outside of a running guest.
#[derive(Debug, Default)]
pub struct DetachedRealm {
    bridge: Object,
    methods: Methods,
}

impl DetachedRealm {
    pub fn new(bridge: Object, methods: Methods) -> Self {
        Self { bridge, methods }
    }
}

impl Realm for DetachedRealm {
    fn bridge(&self) -> Object {
        self.bridge.clone()
    }

    fn methods(&self) -> &Methods {
        &self.methods
    }

    fn resume(&mut self) -> Result<(), HostError> {
        Err(HostError::Internal("no guest attached".into()))
    }
}
