//! Bidirectional id ↔ value registry with reference counting.
//!
//! The guest holds host values by id. Ids 0 through 6 are pinned singletons
//! and are never removed; every other id is a random 32-bit number assigned on
//! first store and released when the guest finalizes its last reference.

use std::collections::HashMap;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::HostError;
use crate::slot::{Slot, TypeFlag};
use crate::value::{Object, Value};

pub const ID_NAN: u32 = 0;
pub const ID_ZERO: u32 = 1;
pub const ID_NULL: u32 = 2;
pub const ID_TRUE: u32 = 3;
pub const ID_FALSE: u32 = 4;
pub const ID_GLOBAL: u32 = 5;
pub const ID_BRIDGE: u32 = 6;

/// Number of pinned ids at the bottom of the id space.
pub const PINNED_IDS: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefCount {
    Pinned,
    Counted(u32),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    refs: RefCount,
}

/// Lookup key for the value → id direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ValueKey {
    Null,
    Bool(bool),
    Zero,
    String(Rc<str>),
    /// Allocation address; the table holds a clone, so it stays valid.
    Object(usize),
    Function(usize),
}

impl ValueKey {
    /// `None` for values that never enter the table (undefined, inline numbers).
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Undefined => None,
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) if *n == 0.0 => Some(Self::Zero),
            Value::Number(_) => None,
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Object(o) => Some(Self::Object(o.addr())),
            Value::Function(f) => Some(Self::Function(f.addr())),
        }
    }
}

fn flag_of(value: &Value) -> TypeFlag {
    match value {
        Value::Object(_) => TypeFlag::Object,
        Value::String(_) => TypeFlag::String,
        Value::Function(_) => TypeFlag::Function,
        _ => TypeFlag::None,
    }
}

pub struct ValueTable {
    values: HashMap<u32, Entry>,
    ids: HashMap<ValueKey, u32>,
    rng: StdRng,
}

impl ValueTable {
    /// Creates a table seeded with the pinned singletons.
    pub fn new(global: Object, bridge: Object) -> Self {
        Self::with_rng(global, bridge, StdRng::from_entropy())
    }

    /// Like [`ValueTable::new`], with a deterministic id sequence.
    pub fn with_seed(global: Object, bridge: Object, seed: u64) -> Self {
        Self::with_rng(global, bridge, StdRng::seed_from_u64(seed))
    }

    fn with_rng(global: Object, bridge: Object, rng: StdRng) -> Self {
        let mut table = Self {
            values: HashMap::new(),
            ids: HashMap::new(),
            rng,
        };
        table.pin(ID_NAN, Value::Number(f64::NAN));
        table.pin(ID_ZERO, Value::Number(0.0));
        table.pin(ID_NULL, Value::Null);
        table.pin(ID_TRUE, Value::Bool(true));
        table.pin(ID_FALSE, Value::Bool(false));
        table.pin(ID_GLOBAL, Value::Object(global));
        table.pin(ID_BRIDGE, Value::Object(bridge));
        table
    }

    fn pin(&mut self, id: u32, value: Value) {
        // NaN has no key: it is never looked up by value.
        if let Some(key) = ValueKey::of(&value) {
            self.ids.insert(key, id);
        }
        self.values.insert(
            id,
            Entry {
                value,
                refs: RefCount::Pinned,
            },
        );
    }

    /// Encodes `value` into a slot, registering it if needed.
    ///
    /// Tracked values get their reference count bumped; pinned ids are left
    /// alone.
    pub fn store_value(&mut self, value: &Value) -> Slot {
        if let Value::Number(n) = value {
            if n.is_nan() {
                return Slot::NAN;
            }
        }
        let Some(key) = ValueKey::of(value) else {
            return match value {
                Value::Number(n) => Slot::Number(*n),
                _ => Slot::Undefined,
            };
        };
        let flag = flag_of(value);

        if let Some(&id) = self.ids.get(&key) {
            if let Some(entry) = self.values.get_mut(&id) {
                if let RefCount::Counted(n) = &mut entry.refs {
                    *n += 1;
                }
            }
            return Slot::Ref { id, flag };
        }

        let id = self.fresh_id();
        self.values.insert(
            id,
            Entry {
                value: value.clone(),
                refs: RefCount::Counted(1),
            },
        );
        self.ids.insert(key, id);
        tracing::trace!(id, kind = value.type_name(), "value registered");
        Slot::Ref { id, flag }
    }

    fn fresh_id(&mut self) -> u32 {
        loop {
            let id: u32 = self.rng.gen();
            if !self.values.contains_key(&id) {
                return id;
            }
        }
    }

    /// Decodes a slot. Unknown ids are a protocol violation.
    pub fn load_value(&self, slot: Slot) -> Result<Value, HostError> {
        match slot {
            Slot::Undefined => Ok(Value::Undefined),
            Slot::Number(n) => Ok(Value::Number(n)),
            Slot::Ref { id, .. } => self
                .values
                .get(&id)
                .map(|entry| entry.value.clone())
                .ok_or(HostError::UnknownValueId(id)),
        }
    }

    pub fn load_bits(&self, bits: u64) -> Result<Value, HostError> {
        self.load_value(Slot::from_bits(bits))
    }

    /// Drops one guest reference to `id`. Returns `true` if the entry was
    /// removed.
    ///
    /// Pinned ids are never removed. Unknown ids are logged and ignored.
    pub fn finalize(&mut self, id: u32) -> bool {
        let Some(entry) = self.values.get_mut(&id) else {
            tracing::warn!(id, "finalize of unknown value id");
            return false;
        };
        match &mut entry.refs {
            RefCount::Pinned => false,
            RefCount::Counted(n) => {
                *n = n.saturating_sub(1);
                if *n > 0 {
                    return false;
                }
                if let Some(entry) = self.values.remove(&id) {
                    if let Some(key) = ValueKey::of(&entry.value) {
                        self.ids.remove(&key);
                    }
                }
                tracing::trace!(id, "value released");
                true
            }
        }
    }

    pub fn ref_count(&self, id: u32) -> Option<RefCount> {
        self.values.get(&id).map(|entry| entry.refs)
    }

    /// The id currently assigned to `value`, without touching its count.
    pub fn id_of(&self, value: &Value) -> Option<u32> {
        if matches!(value, Value::Number(n) if n.is_nan()) {
            return Some(ID_NAN);
        }
        ValueKey::of(value).and_then(|key| self.ids.get(&key).copied())
    }

    pub fn contains(&self, id: u32) -> bool {
        self.values.contains_key(&id)
    }

    /// Number of live entries, pinned ones included.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Releases every non-pinned entry. Used once the guest has exited.
    pub fn teardown(&mut self) {
        self.values
            .retain(|_, entry| matches!(entry.refs, RefCount::Pinned));
        let values = &self.values;
        self.ids.retain(|_, id| values.contains_key(id));
    }
}

impl std::fmt::Debug for ValueTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueTable")
            .field("entries", &self.values.len())
            .finish()
    }
}
