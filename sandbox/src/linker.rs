//! Host function registration via Wasmtime linker.
//!
//! Registers every runtime and `syscall/js` hook under both import modules
//! (`go` for older toolchains, `gojs` for newer ones). Each hook:
//! 1. Takes the guest stack pointer as its only argument
//! 2. Reads its arguments at fixed offsets from `sp + 8`
//! 3. Performs the operation against `BridgeState`
//! 4. Writes results back at fixed offsets, re-fetching `sp` first if the
//!    operation could have re-entered the guest
//!
//! Out-of-bounds access, unknown value ids and uncaught exceptions outside of
//! call-shaped hooks trap the guest.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::anyhow;
use rand::rngs::OsRng;
use rand::RngCore;
use wasmtime::{AsContextMut, Caller, Linker, Memory};

use gobridge_hostapi::{ops, HostError, Object, Slot, Value};

use crate::error::{BridgeError, ProtocolViolation};
use crate::host_impl::{BridgeState, GuestRealm};
use crate::memory::{to_addr, MemoryView};

/// Import modules the hooks are registered under.
pub const IMPORT_MODULES: &[&str] = &["go", "gojs"];

type Hook = fn(&mut Caller<'_, BridgeState>, usize) -> anyhow::Result<()>;

/// Every hook a Go `js/wasm` guest may import, by import name.
pub const HOOKS: &[(&str, Hook)] = &[
    ("runtime.wasmExit", wasm_exit),
    ("runtime.wasmWrite", wasm_write),
    ("runtime.resetMemoryDataView", reset_memory_data_view),
    ("runtime.nanotime1", nanotime1),
    ("runtime.walltime", walltime),
    ("runtime.scheduleTimeoutEvent", schedule_timeout_event),
    ("runtime.clearTimeoutEvent", clear_timeout_event),
    ("runtime.getRandomData", get_random_data),
    ("syscall/js.finalizeRef", finalize_ref),
    ("syscall/js.stringVal", string_val),
    ("syscall/js.valueGet", value_get),
    ("syscall/js.valueSet", value_set),
    ("syscall/js.valueDelete", value_delete),
    ("syscall/js.valueIndex", value_index),
    ("syscall/js.valueSetIndex", value_set_index),
    ("syscall/js.valueCall", value_call),
    ("syscall/js.valueInvoke", value_invoke),
    ("syscall/js.valueNew", value_new),
    ("syscall/js.valueLength", value_length),
    ("syscall/js.valuePrepareString", value_prepare_string),
    ("syscall/js.valueLoadString", value_load_string),
    ("syscall/js.valueInstanceOf", value_instance_of),
    ("syscall/js.copyBytesToGo", copy_bytes_to_go),
    ("syscall/js.copyBytesToJS", copy_bytes_to_js),
];

/// Register all hooks with the linker.
pub fn register_host_functions(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    for module in IMPORT_MODULES {
        for &(name, hook) in HOOKS {
            linker.func_wrap(
                module,
                name,
                move |mut caller: Caller<'_, BridgeState>, sp: i32| -> anyhow::Result<()> {
                    let sp = sp as u32 as usize;
                    tracing::trace!(hook = name, sp, "host call");
                    hook(&mut caller, sp)
                },
            )?;
        }
    }
    Ok(())
}

/// Get the guest's exported memory from a Caller.
fn get_memory(caller: &mut Caller<'_, BridgeState>) -> anyhow::Result<Memory> {
    caller
        .get_export("mem")
        .and_then(|e| e.into_memory())
        .ok_or_else(|| anyhow!("guest does not export mem"))
}

/// Runs `f` with a fresh memory view and the store state.
fn with_memory<R>(
    caller: &mut Caller<'_, BridgeState>,
    f: impl FnOnce(&mut MemoryView<&mut [u8]>, &mut BridgeState) -> anyhow::Result<R>,
) -> anyhow::Result<R> {
    let memory = get_memory(caller)?;
    let (data, state) = memory.data_and_store_mut(&mut *caller);
    f(&mut MemoryView::new(data), state)
}

/// Re-reads the stack pointer; the guest stack may have moved while host code
/// re-entered the guest.
fn refresh_sp(caller: &mut Caller<'_, BridgeState>) -> anyhow::Result<usize> {
    let getsp = caller.data().guest()?.getsp.clone();
    Ok(getsp.call(caller.as_context_mut(), ())? as u32 as usize)
}

fn load_value<B: AsRef<[u8]>>(
    view: &MemoryView<B>,
    state: &BridgeState,
    addr: usize,
) -> anyhow::Result<Value> {
    let slot = Slot::from_bits(view.read_u64(addr)?);
    state.values.load_value(slot).map_err(|err| match err {
        HostError::UnknownValueId(id) => ProtocolViolation::UnknownValueId(id).into(),
        other => anyhow!("{}", other),
    })
}

fn store_value<B: AsRef<[u8]> + AsMut<[u8]>>(
    view: &mut MemoryView<B>,
    state: &mut BridgeState,
    addr: usize,
    value: &Value,
) -> anyhow::Result<()> {
    let slot = state.values.store_value(value);
    view.write_u64(addr, slot.to_bits())?;
    Ok(())
}

/// A `(ptr i64, len i64)` pair.
fn load_slice_header<B: AsRef<[u8]>>(
    view: &MemoryView<B>,
    addr: usize,
) -> anyhow::Result<(usize, usize)> {
    let ptr = to_addr(view.read_i64(addr)?);
    let len = to_addr(view.read_i64(addr + 8)?);
    Ok((ptr, len))
}

fn load_string<B: AsRef<[u8]>>(view: &MemoryView<B>, addr: usize) -> anyhow::Result<String> {
    let (ptr, len) = load_slice_header(view, addr)?;
    Ok(String::from_utf8_lossy(view.slice(ptr, len)?).into_owned())
}

/// A slice of consecutive 8-byte value slots.
fn load_values<B: AsRef<[u8]>>(
    view: &MemoryView<B>,
    state: &BridgeState,
    addr: usize,
) -> anyhow::Result<Vec<Value>> {
    let (array, len) = load_slice_header(view, addr)?;
    // Bounds-check the whole array up front.
    view.slice(array, len.saturating_mul(8))?;
    (0..len)
        .map(|i| load_value(view, state, array + i * 8))
        .collect()
}

/// Writes the outcome of a call-shaped hook: `(result, 1)` on success,
/// `(exception, 0)` on a thrown exception. Anything else traps.
fn finish_call(
    caller: &mut Caller<'_, BridgeState>,
    outcome: Result<Value, HostError>,
    value_offset: usize,
    ok_offset: usize,
) -> anyhow::Result<()> {
    let (value, ok) = match outcome {
        Ok(value) => (value, true),
        Err(HostError::Thrown(exception)) => {
            tracing::trace!(exception = %exception.to_js_string(), "call threw");
            (exception, false)
        }
        Err(other) => return Err(caller.data_mut().host_fault(other)),
    };
    let sp = refresh_sp(caller)?;
    with_memory(caller, |view, state| {
        store_value(view, state, sp + value_offset, &value)?;
        view.write_u8(sp + ok_offset, u8::from(ok))?;
        Ok(())
    })
}

// ── Runtime ──

fn wasm_exit(caller: &mut Caller<'_, BridgeState>, sp: usize) -> anyhow::Result<()> {
    let code = with_memory(caller, |view, _| Ok(view.read_i32(sp + 8)?))?;
    caller.data_mut().record_exit(code);
    Ok(())
}

fn wasm_write(caller: &mut Caller<'_, BridgeState>, sp: usize) -> anyhow::Result<()> {
    with_memory(caller, |view, state| {
        let fd = view.read_i64(sp + 8)?;
        let ptr = to_addr(view.read_i64(sp + 16)?);
        let len = view.read_i32(sp + 24)? as u32 as usize;
        let bytes = view.slice(ptr, len)?;
        if state.log_guest_output {
            tracing::debug!(fd, output = %String::from_utf8_lossy(bytes), "guest output");
        }
        Ok(())
    })
}

fn reset_memory_data_view(caller: &mut Caller<'_, BridgeState>, _sp: usize) -> anyhow::Result<()> {
    let memory = get_memory(caller)?;
    let size = memory.data_size(&*caller);
    let state = caller.data_mut();
    if let Some(guest) = state.guest.as_mut() {
        guest.memory = memory;
    }
    state.memory_generation += 1;
    tracing::trace!(size, generation = state.memory_generation, "guest memory grew");
    Ok(())
}

fn nanotime1(caller: &mut Caller<'_, BridgeState>, sp: usize) -> anyhow::Result<()> {
    with_memory(caller, |view, state| {
        view.write_i64(sp + 8, state.clock.nanotime())?;
        Ok(())
    })
}

fn walltime(caller: &mut Caller<'_, BridgeState>, sp: usize) -> anyhow::Result<()> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    with_memory(caller, |view, _| {
        view.write_i64(sp + 8, now.as_secs() as i64)?;
        view.write_i32(sp + 16, now.subsec_nanos() as i32)?;
        Ok(())
    })
}

fn schedule_timeout_event(caller: &mut Caller<'_, BridgeState>, sp: usize) -> anyhow::Result<()> {
    with_memory(caller, |view, state| {
        let ms = view.read_i64(sp + 8)?;
        let delay = Duration::from_millis(ms.max(0) as u64) + state.timer_skew;
        let id = state.timers.schedule(delay);
        tracing::debug!(id, ms, "timer scheduled");
        view.write_i32(sp + 16, id)?;
        Ok(())
    })
}

fn clear_timeout_event(caller: &mut Caller<'_, BridgeState>, sp: usize) -> anyhow::Result<()> {
    with_memory(caller, |view, state| {
        let id = view.read_i32(sp + 8)?;
        if state.timers.clear(id) {
            tracing::debug!(id, "timer cleared");
        }
        Ok(())
    })
}

fn get_random_data(caller: &mut Caller<'_, BridgeState>, sp: usize) -> anyhow::Result<()> {
    with_memory(caller, |view, _| {
        let (ptr, len) = load_slice_header(view, sp + 8)?;
        OsRng.fill_bytes(view.slice_mut(ptr, len)?);
        Ok(())
    })
}

// ── Values ──

fn finalize_ref(caller: &mut Caller<'_, BridgeState>, sp: usize) -> anyhow::Result<()> {
    with_memory(caller, |view, state| {
        let id = view.read_u32(sp + 8)?;
        state.values.finalize(id);
        Ok(())
    })
}

fn string_val(caller: &mut Caller<'_, BridgeState>, sp: usize) -> anyhow::Result<()> {
    with_memory(caller, |view, state| {
        let s = load_string(view, sp + 8)?;
        store_value(view, state, sp + 24, &Value::from(s))
    })
}

fn value_get(caller: &mut Caller<'_, BridgeState>, sp: usize) -> anyhow::Result<()> {
    let result = with_memory(caller, |view, state| {
        let target = load_value(view, state, sp + 8)?;
        let key = load_string(view, sp + 16)?;
        state
            .get_property(&target, &key)
            .map_err(|err| state.host_fault(err))
    })?;
    let sp = refresh_sp(caller)?;
    with_memory(caller, |view, state| store_value(view, state, sp + 32, &result))
}

fn value_set(caller: &mut Caller<'_, BridgeState>, sp: usize) -> anyhow::Result<()> {
    with_memory(caller, |view, state| {
        let target = load_value(view, state, sp + 8)?;
        let key = load_string(view, sp + 16)?;
        let value = load_value(view, state, sp + 32)?;
        state
            .set_property(&target, &key, value)
            .map_err(|err| state.host_fault(err))
    })
}

fn value_delete(caller: &mut Caller<'_, BridgeState>, sp: usize) -> anyhow::Result<()> {
    with_memory(caller, |view, state| {
        let target = load_value(view, state, sp + 8)?;
        let key = load_string(view, sp + 16)?;
        state
            .delete_property(&target, &key)
            .map_err(|err| state.host_fault(err))
    })
}

fn value_index(caller: &mut Caller<'_, BridgeState>, sp: usize) -> anyhow::Result<()> {
    with_memory(caller, |view, state| {
        let target = load_value(view, state, sp + 8)?;
        let i = view.read_i64(sp + 16)?;
        let result = ops::index(&state.env.methods, &target, i).map_err(|err| state.host_fault(err))?;
        store_value(view, state, sp + 24, &result)
    })
}

fn value_set_index(caller: &mut Caller<'_, BridgeState>, sp: usize) -> anyhow::Result<()> {
    with_memory(caller, |view, state| {
        let target = load_value(view, state, sp + 8)?;
        let i = view.read_i64(sp + 16)?;
        let value = load_value(view, state, sp + 24)?;
        ops::set_index(&target, i, value).map_err(|err| state.host_fault(err))
    })
}

fn value_call(caller: &mut Caller<'_, BridgeState>, sp: usize) -> anyhow::Result<()> {
    let (target, name, args) = with_memory(caller, |view, state| {
        Ok((
            load_value(view, state, sp + 8)?,
            load_string(view, sp + 16)?,
            load_values(view, state, sp + 32)?,
        ))
    })?;
    let outcome = match caller.data().get_property(&target, &name) {
        Ok(Value::Function(method)) => {
            let mut realm = GuestRealm::new(caller.as_context_mut());
            method.call(&mut realm, &target, &args)
        }
        Ok(_) => {
            let receiver = if caller.data().is_global(&target) {
                "global"
            } else {
                target.type_name()
            };
            Err(HostError::type_error(format!(
                "{}.{} is not a function",
                receiver, name
            )))
        }
        Err(err) => Err(err),
    };
    finish_call(caller, outcome, 56, 64)
}

fn value_invoke(caller: &mut Caller<'_, BridgeState>, sp: usize) -> anyhow::Result<()> {
    let (f, args) = with_memory(caller, |view, state| {
        Ok((
            load_value(view, state, sp + 8)?,
            load_values(view, state, sp + 16)?,
        ))
    })?;
    let outcome = {
        let mut realm = GuestRealm::new(caller.as_context_mut());
        ops::invoke(&mut realm, &f, &args)
    };
    finish_call(caller, outcome, 40, 48)
}

fn value_new(caller: &mut Caller<'_, BridgeState>, sp: usize) -> anyhow::Result<()> {
    let (ctor, args) = with_memory(caller, |view, state| {
        Ok((
            load_value(view, state, sp + 8)?,
            load_values(view, state, sp + 16)?,
        ))
    })?;
    let outcome = {
        let mut realm = GuestRealm::new(caller.as_context_mut());
        ops::construct(&mut realm, &ctor, &args)
    };
    finish_call(caller, outcome, 40, 48)
}

fn value_length(caller: &mut Caller<'_, BridgeState>, sp: usize) -> anyhow::Result<()> {
    with_memory(caller, |view, state| {
        let target = load_value(view, state, sp + 8)?;
        let len = ops::length(&state.env.methods, &target).map_err(|err| state.host_fault(err))?;
        view.write_i64(sp + 16, len)?;
        Ok(())
    })
}

fn value_prepare_string(caller: &mut Caller<'_, BridgeState>, sp: usize) -> anyhow::Result<()> {
    with_memory(caller, |view, state| {
        let value = load_value(view, state, sp + 8)?;
        let bytes = value.to_js_string().into_bytes();
        let len = bytes.len() as i64;
        store_value(view, state, sp + 16, &Value::from(Object::bytes(bytes)))?;
        view.write_i64(sp + 24, len)?;
        Ok(())
    })
}

fn value_load_string(caller: &mut Caller<'_, BridgeState>, sp: usize) -> anyhow::Result<()> {
    with_memory(caller, |view, state| {
        let source = load_value(view, state, sp + 8)?;
        let (ptr, len) = load_slice_header(view, sp + 16)?;
        let Some(bytes) = source.as_object().and_then(Object::to_bytes) else {
            return Err(state.host_fault(HostError::type_error(
                "valueLoadString: source is not a Uint8Array",
            )));
        };
        if bytes.len() > len {
            return Err(state.host_fault(HostError::range_error("offset is out of bounds")));
        }
        view.slice_mut(ptr, len)?[..bytes.len()].copy_from_slice(&bytes);
        Ok(())
    })
}

fn value_instance_of(caller: &mut Caller<'_, BridgeState>, sp: usize) -> anyhow::Result<()> {
    with_memory(caller, |view, state| {
        let value = load_value(view, state, sp + 8)?;
        let ctor = load_value(view, state, sp + 16)?;
        let result = ops::instance_of(&value, &ctor).map_err(|err| state.host_fault(err))?;
        view.write_u8(sp + 24, u8::from(result))?;
        Ok(())
    })
}

fn copy_bytes_to_go(caller: &mut Caller<'_, BridgeState>, sp: usize) -> anyhow::Result<()> {
    with_memory(caller, |view, state| {
        let (ptr, len) = load_slice_header(view, sp + 8)?;
        let source = load_value(view, state, sp + 32)?;
        let Some(bytes) = source.as_object().and_then(Object::to_bytes) else {
            view.write_u8(sp + 48, 0)?;
            return Ok(());
        };
        let n = bytes.len().min(len);
        view.slice_mut(ptr, n)?.copy_from_slice(&bytes[..n]);
        view.write_i64(sp + 40, n as i64)?;
        view.write_u8(sp + 48, 1)?;
        Ok(())
    })
}

fn copy_bytes_to_js(caller: &mut Caller<'_, BridgeState>, sp: usize) -> anyhow::Result<()> {
    with_memory(caller, |view, state| {
        let target = load_value(view, state, sp + 8)?;
        let (ptr, len) = load_slice_header(view, sp + 16)?;
        let source = view.slice(ptr, len)?;
        let copied = target.as_object().and_then(|obj| {
            obj.with_bytes_mut(|dst| {
                let n = dst.len().min(source.len());
                dst[..n].copy_from_slice(&source[..n]);
                n
            })
        });
        match copied {
            Some(n) => {
                view.write_i64(sp + 40, n as i64)?;
                view.write_u8(sp + 48, 1)?;
            }
            None => view.write_u8(sp + 48, 0)?,
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use wasmtime::{Engine, Module, Store};

    use crate::config::BridgeConfig;

    #[test]
    fn test_hook_names_are_unique() {
        let names: HashSet<_> = HOOKS.iter().map(|(name, _)| *name).collect();
        assert_eq!(names.len(), HOOKS.len());
        assert_eq!(HOOKS.len(), 24);
    }

    #[test]
    fn test_hooks_resolve_under_both_modules() {
        let wat = r#"
            (module
                (import "go" "runtime.wasmExit" (func (param i32)))
                (import "gojs" "runtime.wasmExit" (func (param i32)))
                (import "gojs" "syscall/js.valueCall" (func (param i32)))
                (memory (export "mem") 1)
            )
        "#;
        let engine = Engine::default();
        let module = Module::new(&engine, wat).unwrap();
        let mut linker = Linker::new(&engine);
        register_host_functions(&mut linker).unwrap();
        let mut store = Store::new(&engine, BridgeState::new(&BridgeConfig::default()));
        assert!(linker.instantiate(&mut store, &module).is_ok());
    }

    #[test]
    fn test_unknown_import_fails_to_link() {
        let wat = r#"
            (module
                (import "go" "runtime.notAHook" (func (param i32)))
            )
        "#;
        let engine = Engine::default();
        let module = Module::new(&engine, wat).unwrap();
        let mut linker = Linker::new(&engine);
        register_host_functions(&mut linker).unwrap();
        let mut store = Store::new(&engine, BridgeState::new(&BridgeConfig::default()));
        assert!(linker.instantiate(&mut store, &module).is_err());
    }

    #[test]
    fn test_load_values_bounds_checks_array() {
        let state = BridgeState::new(&BridgeConfig::default());
        let mut mem = vec![0u8; 64];
        {
            let mut view = MemoryView::new(&mut mem[..]);
            // Header at 0: array at 32, 100 elements (far past the end).
            view.write_i64(0, 32).unwrap();
            view.write_i64(8, 100).unwrap();
        }
        let view = MemoryView::new(&mem[..]);
        assert!(load_values(&view, &state, 0).is_err());
    }

    #[test]
    fn test_load_value_unknown_id_is_protocol_violation() {
        let state = BridgeState::new(&BridgeConfig::default());
        let mut mem = vec![0u8; 16];
        MemoryView::new(&mut mem[..])
            .write_u64(0, 0x7FF8_0001_0BAD_0BAD)
            .unwrap();
        let view = MemoryView::new(&mem[..]);
        let err = load_value(&view, &state, 0).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ProtocolViolation>(),
            Some(&ProtocolViolation::UnknownValueId(0x0BAD_0BAD))
        );
    }

    #[test]
    fn test_load_string_is_lossy() {
        let mut mem = vec![0u8; 64];
        {
            let mut view = MemoryView::new(&mut mem[..]);
            view.write_i64(0, 32).unwrap();
            view.write_i64(8, 3).unwrap();
            view.write_bytes(32, &[b'o', 0xFF, b'k']).unwrap();
        }
        let view = MemoryView::new(&mem[..]);
        assert_eq!(load_string(&view, 0).unwrap(), "o\u{FFFD}k");
    }
}
