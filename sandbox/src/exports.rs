//! The key → value bag the guest publishes its API into.
//!
//! The guest never writes here directly: assigning a key the global object
//! does not own lands in this surface instead.

use std::collections::BTreeMap;

use gobridge_hostapi::Value;

#[derive(Debug, Default, Clone)]
pub struct ExportSurface {
    entries: BTreeMap<String, Value>,
}

impl ExportSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(name.into(), value)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.entries.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Published names, in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
