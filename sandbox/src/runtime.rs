//! Bridge runtime: Wasmtime engine, module loading, and the execution driver.
//!
//! `Bridge` loads and validates a Go `js/wasm` module. `Bridge::instantiate`
//! yields an `ExecutionHandle`, which owns the store and drives one guest
//! through its lifecycle:
//!
//! ```text
//! instantiated --start--> running --exit--> exited
//!                            |  ^
//!                       park |  | timer / export call
//!                            v  |
//!                          parked
//! ```
//!
//! The handle is single-threaded: host values are reference-counted with
//! `Rc`, so the handle and its futures are `!Send`.

use std::collections::BTreeMap;
use std::path::Path;

use wasmtime::{AsContextMut, Config, Engine, Linker, Module, Store, Trap};

use gobridge_hostapi::{ops, HostError, Value};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, ProtocolViolation};
use crate::exports::ExportSurface;
use crate::host_impl::{resume_guest, BridgeState, GuestExports, GuestRealm};
use crate::linker::register_host_functions;
use crate::memory::{ArgvLayout, MemoryError, MemoryView};
use crate::validation::validate_module;

/// A loaded, validated Go `js/wasm` module.
///
/// Compiles once; every call to [`Bridge::instantiate`] creates a fresh,
/// isolated instance.
pub struct Bridge {
    engine: Engine,
    module: Module,
    config: BridgeConfig,
}

impl Bridge {
    /// Create a new bridge from WASM bytecode.
    ///
    /// Validates the module's exports and imports before accepting.
    pub fn new(wasm_bytes: &[u8], config: BridgeConfig) -> Result<Self, BridgeError> {
        let engine = create_engine(&config)?;
        let module = Module::new(&engine, wasm_bytes)?;
        validate_module(&module)?;
        Ok(Self {
            engine,
            module,
            config,
        })
    }

    /// Load from a `.wasm` file path.
    pub fn from_file(path: &Path, config: BridgeConfig) -> Result<Self, BridgeError> {
        let engine = create_engine(&config)?;
        let module = Module::from_file(&engine, path)?;
        validate_module(&module)?;
        Ok(Self {
            engine,
            module,
            config,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Instantiate the module with the full import surface.
    pub fn instantiate(&self) -> Result<ExecutionHandle, BridgeError> {
        let mut store = Store::new(&self.engine, BridgeState::new(&self.config));
        store.limiter(|state| &mut state.limits);
        if let Some(fuel) = self.config.fuel_limit {
            store.set_fuel(fuel)?;
        }

        let mut linker = Linker::new(&self.engine);
        register_host_functions(&mut linker)?;

        let instance = linker.instantiate(&mut store, &self.module)?;
        let guest = GuestExports::resolve(&instance, &mut store)?;
        store.data_mut().guest = Some(guest.clone());

        tracing::debug!(
            memory_bytes = guest.memory.data_size(&store),
            fuel = ?self.config.fuel_limit,
            "instantiated Go module"
        );

        Ok(ExecutionHandle {
            store,
            guest,
            started: false,
            argv: vec![self.config.program_name.clone()],
            env: self.config.env.clone(),
            poisoned: None,
        })
    }
}

/// Compile and instantiate `wasm_bytes` with the default configuration.
pub fn instantiate(wasm_bytes: &[u8]) -> Result<ExecutionHandle, BridgeError> {
    Bridge::new(wasm_bytes, BridgeConfig::default())?.instantiate()
}

/// Where a guest stands after the driver hands control back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Exited(i32),
    /// The guest yielded without exiting; it can be woken by a timer or an
    /// export call.
    Parked { pending_timers: usize },
}

/// One running guest instance.
pub struct ExecutionHandle {
    store: Store<BridgeState>,
    guest: GuestExports,
    started: bool,
    argv: Vec<String>,
    env: BTreeMap<String, String>,
    /// Set once the guest traps; the instance is unusable afterwards.
    poisoned: Option<String>,
}

impl ExecutionHandle {
    /// Lays out argv/envp and calls the guest's `run`.
    ///
    /// Returns once the guest exits or parks. Single-use.
    pub fn start(&mut self) -> Result<RunState, BridgeError> {
        if self.started {
            return Err(ProtocolViolation::AlreadyRun.into());
        }
        let layout = ArgvLayout::build(&self.argv, &self.env)?;
        self.started = true;

        let memory = self.guest.memory;
        layout.write_to(&mut MemoryView::new(memory.data_mut(&mut self.store)))?;

        tracing::debug!(argc = layout.argc, argv = layout.argv, "running Go program");
        let run = self.guest.run.clone();
        let result = run.call(&mut self.store, (layout.argc, layout.argv));
        self.absorb(result)?;
        Ok(self.state())
    }

    /// Processes timers until the guest exits or parks with nothing
    /// scheduled.
    pub async fn settle(&mut self) -> Result<RunState, BridgeError> {
        self.check_live()?;
        loop {
            let state = self.state();
            if let RunState::Exited(_) = state {
                return Ok(state);
            }
            let Some((id, due)) = self.store.data().timers.next_due() else {
                return Ok(state);
            };
            tokio::time::sleep_until(due).await;
            self.fire_timer(id)?;
        }
    }

    /// Starts the guest and drives it to exit. Returns the exit code.
    ///
    /// Fails with [`BridgeError::Parked`] if the guest parks with no timer
    /// that could wake it; use [`start`](Self::start) for guests that serve
    /// exports from a parked state.
    pub async fn run(&mut self) -> Result<i32, BridgeError> {
        self.start()?;
        match self.settle().await? {
            RunState::Exited(code) => Ok(code),
            RunState::Parked { .. } => Err(BridgeError::Parked),
        }
    }

    /// Re-enters the guest through its `resume` export.
    pub fn resume(&mut self) -> Result<RunState, BridgeError> {
        self.check_live()?;
        let result = resume_guest(&mut self.store.as_context_mut());
        self.absorb(result)?;
        Ok(self.state())
    }

    fn fire_timer(&mut self, id: i32) -> Result<(), BridgeError> {
        tracing::debug!(id, "timer fired");
        self.resume()?;
        while self.exit_code().is_none() && self.store.data().timers.contains(id) {
            tracing::warn!(id, "missed timeout event");
            self.resume()?;
        }
        Ok(())
    }

    /// Calls a published export with `args`.
    ///
    /// Allowed while the guest is parked or after it exited with code 0.
    pub fn call_export(&mut self, name: &str, args: &[Value]) -> Result<Value, BridgeError> {
        self.check_live()?;
        if let Some(code) = self.exit_code().filter(|code| *code != 0) {
            return Err(BridgeError::GuestExited(code));
        }

        let export = self
            .store
            .data()
            .exports
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::ExportNotFound(name.to_string()))?;
        if export.as_function().is_none() {
            return Err(BridgeError::NotCallable(name.to_string()));
        }

        tracing::debug!(name, args = args.len(), "calling export");
        let outcome = {
            let mut realm = GuestRealm::new(self.store.as_context_mut());
            ops::call(&mut realm, &export, &Value::Undefined, args)
        };
        match outcome {
            Ok(value) => Ok(value),
            Err(HostError::Thrown(exception)) => Err(BridgeError::ExportThrew {
                name: name.to_string(),
                message: exception.to_js_string(),
            }),
            Err(other) => {
                let fault = self.store.data_mut().host_fault(other);
                Err(self.fault(fault))
            }
        }
    }

    /// Calls an export that takes one string and returns one string.
    pub fn call_export_str(&mut self, name: &str, input: &str) -> Result<String, BridgeError> {
        match self.call_export(name, &[Value::from(input)])? {
            Value::String(s) => Ok(s.to_string()),
            other => Err(BridgeError::UnexpectedResult {
                name: name.to_string(),
                found: other.type_name(),
            }),
        }
    }

    pub fn exports(&self) -> &ExportSurface {
        &self.store.data().exports
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.store.data().exit_code
    }

    pub fn pending_timers(&self) -> usize {
        self.store.data().timers.len()
    }

    pub fn state(&self) -> RunState {
        match self.exit_code() {
            Some(code) => RunState::Exited(code),
            None => RunState::Parked {
                pending_timers: self.pending_timers(),
            },
        }
    }

    /// The guest's linear memory.
    pub fn memory(&self) -> &[u8] {
        self.guest.memory.data(&self.store)
    }

    /// Number of memory-grow notifications received from the guest.
    pub fn memory_generation(&self) -> u64 {
        self.store.data().memory_generation
    }

    /// Remaining fuel, if metering is enabled.
    pub fn fuel_remaining(&self) -> Option<u64> {
        self.store.get_fuel().ok()
    }

    fn check_live(&self) -> Result<(), BridgeError> {
        if !self.started {
            return Err(ProtocolViolation::NotStarted.into());
        }
        if let Some(reason) = &self.poisoned {
            return Err(BridgeError::GuestTrapped(reason.clone()));
        }
        Ok(())
    }

    fn absorb(&mut self, result: anyhow::Result<()>) -> Result<(), BridgeError> {
        result.map_err(|err| self.fault(err))
    }

    /// Anything but a lifecycle misuse poisons the instance.
    fn fault(&mut self, err: anyhow::Error) -> BridgeError {
        self.store.data_mut().pending_fault = None;
        let err = handle_trap(err);
        let recoverable = matches!(
            err,
            BridgeError::Protocol(
                ProtocolViolation::AlreadyRun
                    | ProtocolViolation::NotStarted
                    | ProtocolViolation::ResumeAfterExit
            )
        );
        if !recoverable {
            tracing::debug!(error = %err, "guest faulted");
            self.poisoned = Some(err.to_string());
        }
        err
    }
}

/// Create a Wasmtime engine for Go `js/wasm` guests.
fn create_engine(config: &BridgeConfig) -> Result<Engine, BridgeError> {
    let mut wasm_config = Config::new();

    // Fuel metering is opt-in
    wasm_config.consume_fuel(config.fuel_limit.is_some());

    // Single memory, single thread
    wasm_config.wasm_threads(false);
    wasm_config.wasm_multi_memory(false);

    // NaN-boxed refs must survive float loads/stores bit-for-bit
    wasm_config.cranelift_nan_canonicalization(false);

    Ok(Engine::new(&wasm_config)?)
}

/// Classifies a guest fault.
///
/// Protocol violation → `BridgeError::Protocol`
/// Memory bounds → `BridgeError::Memory`
/// Fuel exhaustion → `BridgeError::FuelExhausted`
/// Other traps → `BridgeError::GuestTrapped`
fn handle_trap(e: anyhow::Error) -> BridgeError {
    if let Some(violation) = e.downcast_ref::<ProtocolViolation>() {
        return BridgeError::Protocol(violation.clone());
    }
    if let Some(err) = e.downcast_ref::<MemoryError>() {
        return BridgeError::Memory(err.clone());
    }
    if let Some(Trap::OutOfFuel) = e.downcast_ref::<Trap>() {
        return BridgeError::FuelExhausted;
    }
    BridgeError::GuestTrapped(format!("{:#}", e))
}
