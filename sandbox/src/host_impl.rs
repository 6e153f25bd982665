//! Per-instance mutable state held in the Wasmtime Store.
//!
//! `BridgeState` combines the value table, host environment, export surface,
//! timers and exit bookkeeping into a single struct that lives inside
//! `Store<BridgeState>` for the lifetime of one guest instance.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::anyhow;
use wasmtime::{
    AsContextMut, Instance, Memory, StoreContextMut, StoreLimits, StoreLimitsBuilder, TypedFunc,
};

use gobridge_hostapi::{ops, Environment, HostError, Methods, Object, Realm, Value, ValueTable};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, ProtocolViolation};
use crate::exports::ExportSurface;
use crate::timers::TimerRegistry;

/// Handles to the guest's required exports.
#[derive(Clone)]
pub struct GuestExports {
    pub memory: Memory,
    pub getsp: TypedFunc<(), i32>,
    pub run: TypedFunc<(i32, i32), ()>,
    pub resume: TypedFunc<(), ()>,
}

impl GuestExports {
    pub fn resolve(
        instance: &Instance,
        mut store: impl AsContextMut<Data = BridgeState>,
    ) -> Result<Self, BridgeError> {
        let memory = instance
            .get_memory(&mut store, "mem")
            .ok_or_else(|| BridgeError::ValidationError("missing memory export: mem".into()))?;
        Ok(Self {
            memory,
            getsp: instance.get_typed_func(&mut store, "getsp")?,
            run: instance.get_typed_func(&mut store, "run")?,
            resume: instance.get_typed_func(&mut store, "resume")?,
        })
    }
}

/// Monotonic nanoseconds anchored at the wall clock of instantiation.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    basis_nanos: i64,
    origin: tokio::time::Instant,
}

impl Clock {
    pub fn new() -> Self {
        let basis_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        Self {
            basis_nanos,
            origin: tokio::time::Instant::now(),
        }
    }

    pub fn nanotime(&self) -> i64 {
        self.basis_nanos + self.origin.elapsed().as_nanos() as i64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-instance mutable state held in the Wasmtime `Store`.
pub struct BridgeState {
    pub values: ValueTable,
    pub env: Environment,
    pub exports: ExportSurface,
    pub timers: TimerRegistry,
    /// Set exactly once, by the guest's exit hook.
    pub exit_code: Option<i32>,
    /// Filled in right after instantiation.
    pub guest: Option<GuestExports>,
    /// Bumped each time the guest reports a memory grow.
    pub memory_generation: u64,
    pub limits: StoreLimits,
    pub clock: Clock,
    pub log_guest_output: bool,
    pub timer_skew: Duration,
    /// A fault raised while the guest was re-entered from host code. Hooks
    /// re-raise it so the original error reaches the caller.
    pub pending_fault: Option<anyhow::Error>,
}

impl BridgeState {
    pub fn new(config: &BridgeConfig) -> Self {
        let env = Environment::new();
        let values = ValueTable::new(env.global.clone(), env.bridge.clone());
        let limits = StoreLimitsBuilder::new()
            .memory_size(config.max_memory_pages as usize * 65536)
            .instances(1)
            .build();
        Self {
            values,
            env,
            exports: ExportSurface::new(),
            timers: TimerRegistry::new(),
            exit_code: None,
            guest: None,
            memory_generation: 0,
            limits,
            clock: Clock::new(),
            log_guest_output: config.log_guest_output,
            timer_skew: config.timer_skew,
            pending_fault: None,
        }
    }

    pub fn guest(&self) -> Result<&GuestExports, ProtocolViolation> {
        self.guest.as_ref().ok_or(ProtocolViolation::NotStarted)
    }

    pub fn is_global(&self, value: &Value) -> bool {
        matches!(value, Value::Object(obj) if obj.ptr_eq(&self.env.global))
    }

    /// Global lookup: own properties, then the export surface, then the
    /// ambient constructors.
    pub fn global_get(&self, key: &str) -> Value {
        self.env
            .global
            .get(key)
            .or_else(|| self.exports.get(key).cloned())
            .or_else(|| self.env.ambient.get(key))
            .unwrap_or(Value::Undefined)
    }

    /// Global write: keys the global owns are updated in place, anything
    /// else is published to the export surface.
    pub fn global_set(&mut self, key: &str, value: Value) {
        if self.env.global.has_own(key) {
            self.env.global.set(key, value);
        } else {
            tracing::debug!(key, "guest published export");
            self.exports.insert(key, value);
        }
    }

    pub fn get_property(&self, target: &Value, key: &str) -> Result<Value, HostError> {
        if self.is_global(target) {
            return Ok(self.global_get(key));
        }
        ops::get(&self.env.methods, target, key)
    }

    pub fn set_property(&mut self, target: &Value, key: &str, value: Value) -> Result<(), HostError> {
        if self.is_global(target) {
            self.global_set(key, value);
            return Ok(());
        }
        ops::set(target, key, value)
    }

    pub fn delete_property(&mut self, target: &Value, key: &str) -> Result<(), HostError> {
        if self.is_global(target) && !self.env.global.has_own(key) {
            self.exports.remove(key);
            return Ok(());
        }
        ops::delete(target, key)
    }

    /// Records the guest's exit code. Only the first exit counts.
    ///
    /// Releases every non-pinned value and drops pending timers.
    pub fn record_exit(&mut self, code: i32) {
        if let Some(previous) = self.exit_code {
            tracing::warn!(code, previous, "guest exited twice, ignoring");
            return;
        }
        tracing::debug!(code, "guest exited");
        self.exit_code = Some(code);
        self.values.teardown();
        self.timers.clear_all();
    }

    /// Converts a non-exception host error (or a fault raised by a nested
    /// guest re-entry) into the error that traps the guest.
    pub fn host_fault(&mut self, err: HostError) -> anyhow::Error {
        if let Some(fault) = self.pending_fault.take() {
            return fault;
        }
        match err {
            HostError::UnknownValueId(id) => ProtocolViolation::UnknownValueId(id).into(),
            HostError::Thrown(value) => anyhow!("uncaught exception: {}", value.to_js_string()),
            HostError::Internal(message) => anyhow!(message),
        }
    }
}

/// Invokes the guest's `resume` export.
pub fn resume_guest(cx: &mut StoreContextMut<'_, BridgeState>) -> anyhow::Result<()> {
    if cx.data().exit_code.is_some() {
        return Err(ProtocolViolation::ResumeAfterExit.into());
    }
    let resume = cx.data().guest()?.resume.clone();
    resume.call(cx.as_context_mut(), ())?;
    Ok(())
}

/// A [`Realm`] over a live store: host functions reach the guest through it.
pub struct GuestRealm<'a> {
    cx: StoreContextMut<'a, BridgeState>,
}

impl<'a> GuestRealm<'a> {
    pub fn new(cx: StoreContextMut<'a, BridgeState>) -> Self {
        Self { cx }
    }

    pub fn state_mut(&mut self) -> &mut BridgeState {
        self.cx.data_mut()
    }
}

impl Realm for GuestRealm<'_> {
    fn bridge(&self) -> Object {
        self.cx.data().env.bridge.clone()
    }

    fn methods(&self) -> &Methods {
        &self.cx.data().env.methods
    }

    fn resume(&mut self) -> Result<(), HostError> {
        resume_guest(&mut self.cx).map_err(|fault| {
            let message = format!("{:#}", fault);
            let state = self.cx.data_mut();
            if state.pending_fault.is_none() {
                state.pending_fault = Some(fault);
            }
            HostError::Internal(message)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> BridgeState {
        BridgeState::new(&BridgeConfig::default())
    }

    #[test]
    fn test_global_get_falls_back_to_exports_then_ambient() {
        let mut state = state();
        assert!(state.global_get("fs").as_object().is_some());
        assert_eq!(state.global_get("answer"), Value::Undefined);

        state.exports.insert("answer", Value::from("ok"));
        assert_eq!(state.global_get("answer"), Value::from("ok"));

        assert!(state.global_get("Uint8Array").as_function().is_some());
    }

    #[test]
    fn test_global_set_publishes_unknown_keys() {
        let mut state = state();
        let global = Value::from(state.env.global.clone());
        state.set_property(&global, "parse", Value::Number(1.0)).unwrap();
        assert!(state.exports.contains("parse"));
        assert!(!state.env.global.has_own("parse"));

        state.set_property(&global, "fs", Value::Null).unwrap();
        assert_eq!(state.env.global.get("fs"), Some(Value::Null));
        assert!(!state.exports.contains("fs"));

        state.delete_property(&global, "parse").unwrap();
        assert!(!state.exports.contains("parse"));
    }

    #[test]
    fn test_record_exit_once() {
        let mut state = state();
        state.values.store_value(&Value::from("transient"));
        state.timers.schedule(Duration::from_secs(1));

        state.record_exit(0);
        state.record_exit(3);

        assert_eq!(state.exit_code, Some(0));
        assert_eq!(state.values.len(), gobridge_hostapi::table::PINNED_IDS as usize);
        assert!(state.timers.is_empty());
    }

    #[test]
    fn test_host_fault_prefers_pending_fault() {
        let mut state = state();
        state.pending_fault = Some(ProtocolViolation::ResumeAfterExit.into());
        let err = state.host_fault(HostError::Internal("wrapped".into()));
        assert_eq!(
            err.downcast_ref::<ProtocolViolation>(),
            Some(&ProtocolViolation::ResumeAfterExit)
        );
        assert!(state.pending_fault.is_none());

        let err = state.host_fault(HostError::UnknownValueId(42));
        assert_eq!(
            err.downcast_ref::<ProtocolViolation>(),
            Some(&ProtocolViolation::UnknownValueId(42))
        );
    }

    #[test]
    fn test_clock_is_monotonic() {
        let clock = Clock::new();
        let a = clock.nanotime();
        let b = clock.nanotime();
        assert!(b >= a);
        assert!(a > 1_600_000_000_000_000_000);
    }
}
