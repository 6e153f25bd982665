//! Bridge configuration.

use std::collections::BTreeMap;
use std::time::Duration;

/// Configuration for a Go `js/wasm` bridge.
///
/// Controls memory limits, optional instruction fuel and the process
/// environment the guest sees.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Maximum linear memory pages (1 page = 64 KiB).
    /// Default: 16384 pages = 1 GiB.
    pub max_memory_pages: u32,

    /// Wasmtime fuel limit (instruction metering). `None` disables metering.
    pub fuel_limit: Option<u64>,

    /// Emit guest stdout/stderr as `debug!` events instead of discarding it.
    pub log_guest_output: bool,

    /// Slack added to every timer deadline before it is considered due.
    pub timer_skew: Duration,

    /// `argv[0]`.
    pub program_name: String,

    /// Environment variables passed through `envp`. Kept sorted by key.
    pub env: BTreeMap<String, String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: 16_384, // 1 GiB
            fuel_limit: None,
            log_guest_output: false,
            timer_skew: Duration::from_millis(1),
            program_name: "js".to_string(),
            env: BTreeMap::new(),
        }
    }
}

impl BridgeConfig {
    /// Adds an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}
