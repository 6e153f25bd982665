//! Shared test helpers for integration tests.
//!
//! Guests are hand-written WAT modules that speak the Go `js/wasm` ABI the way
//! the Go runtime does: arguments are laid out at fixed offsets from the stack
//! pointer and every hook takes `sp` as its only parameter. `guest()` wraps a
//! test body with the imports, the exports every guest needs, and a set of
//! helper functions:
//!
//! | helper          | hook                 | returns          |
//! |-----------------|----------------------|------------------|
//! | `$str p l`      | stringVal            | ref              |
//! | `$get v p l`    | valueGet             | ref              |
//! | `$set v p l x`  | valueSet             |                  |
//! | `$call v p l a n` | valueCall          | ref, `$ok`       |
//! | `$invoke f a n` | valueInvoke          | ref, `$ok`       |
//! | `$new f a n`    | valueNew             | ref, `$ok`       |
//! | `$index v i`    | valueIndex           | ref              |
//! | `$set_index v i x` | valueSetIndex     |                  |
//! | `$length v`     | valueLength          | i64              |
//! | `$exit code`    | runtime.wasmExit     |                  |
//!
//! Memory map: the stack starts at 16384, string data lives from 20000,
//! argument arrays at 24576, scratch words at 28672 and byte buffers at
//! 30000. Guest callbacks run on a stack 1024 bytes above the caller's
//! (`$enter` / `$leave`).

#![allow(dead_code)]

use gobridge_sandbox::{Bridge, BridgeConfig, ExecutionHandle, Object, Value};

/// Slot bits of the pinned global object.
pub const GLOBAL: u64 = 0x7FF8_0001_0000_0005;
/// Slot bits of the pinned bridge object.
pub const BRIDGE: u64 = 0x7FF8_0001_0000_0006;
/// Slot bits of `null`.
pub const NULL: u64 = 0x7FF8_0000_0000_0002;

pub const ARGS: u32 = 24576;
pub const SCRATCH: u32 = 28672;
pub const BUFFER: usize = 30000;

const IMPORTS: &str = r#"
    (import "gojs" "runtime.wasmExit" (func $wasmExit (param i32)))
    (import "gojs" "runtime.wasmWrite" (func $wasmWrite (param i32)))
    (import "gojs" "runtime.resetMemoryDataView" (func $resetMemoryDataView (param i32)))
    (import "gojs" "runtime.nanotime1" (func $nanotime1 (param i32)))
    (import "gojs" "runtime.walltime" (func $walltime (param i32)))
    (import "gojs" "runtime.scheduleTimeoutEvent" (func $scheduleTimeoutEvent (param i32)))
    (import "gojs" "runtime.clearTimeoutEvent" (func $clearTimeoutEvent (param i32)))
    (import "gojs" "runtime.getRandomData" (func $getRandomData (param i32)))
    (import "gojs" "syscall/js.finalizeRef" (func $finalizeRef (param i32)))
    (import "gojs" "syscall/js.stringVal" (func $stringVal (param i32)))
    (import "gojs" "syscall/js.valueGet" (func $valueGet (param i32)))
    (import "gojs" "syscall/js.valueSet" (func $valueSet (param i32)))
    (import "gojs" "syscall/js.valueIndex" (func $valueIndex (param i32)))
    (import "gojs" "syscall/js.valueSetIndex" (func $valueSetIndex (param i32)))
    (import "gojs" "syscall/js.valueCall" (func $valueCall (param i32)))
    (import "gojs" "syscall/js.valueInvoke" (func $valueInvoke (param i32)))
    (import "gojs" "syscall/js.valueNew" (func $valueNew (param i32)))
    (import "gojs" "syscall/js.valueLength" (func $valueLength (param i32)))
    (import "gojs" "syscall/js.valuePrepareString" (func $valuePrepareString (param i32)))
    (import "gojs" "syscall/js.valueLoadString" (func $valueLoadString (param i32)))
    (import "gojs" "syscall/js.valueInstanceOf" (func $valueInstanceOf (param i32)))
    (import "gojs" "syscall/js.copyBytesToGo" (func $copyBytesToGo (param i32)))
    (import "gojs" "syscall/js.copyBytesToJS" (func $copyBytesToJS (param i32)))
"#;

const PRELUDE: &str = r#"
    (memory (export "mem") 1)
    (global $sp (mut i32) (i32.const 16384))
    (global $ok (mut i32) (i32.const 0))
    (global $len (mut i32) (i32.const 0))
    (global $GLOBAL i64 (i64.const 0x7FF8000100000005))
    (global $BRIDGE i64 (i64.const 0x7FF8000100000006))
    (global $NULL i64 (i64.const 0x7FF8000000000002))

    (func (export "getsp") (result i32) global.get $sp)

    (func $at (param $off i32) (result i32)
        (i32.add (global.get $sp) (local.get $off)))

    (func $enter (result i32)
        (global.get $sp)
        (global.set $sp (i32.add (global.get $sp) (i32.const 1024))))

    (func $leave (param $saved i32)
        (global.set $sp (local.get $saved)))

    (func $num (param $n f64) (result i64)
        (i64.reinterpret_f64 (local.get $n)))

    (func $exit (param $code i32)
        (i32.store (call $at (i32.const 8)) (local.get $code))
        (call $wasmExit (global.get $sp)))

    (func $str (param $ptr i32) (param $len i32) (result i64)
        (i64.store (call $at (i32.const 8)) (i64.extend_i32_u (local.get $ptr)))
        (i64.store (call $at (i32.const 16)) (i64.extend_i32_u (local.get $len)))
        (call $stringVal (global.get $sp))
        (i64.load (call $at (i32.const 24))))

    (func $get (param $v i64) (param $ptr i32) (param $len i32) (result i64)
        (i64.store (call $at (i32.const 8)) (local.get $v))
        (i64.store (call $at (i32.const 16)) (i64.extend_i32_u (local.get $ptr)))
        (i64.store (call $at (i32.const 24)) (i64.extend_i32_u (local.get $len)))
        (call $valueGet (global.get $sp))
        (i64.load (call $at (i32.const 32))))

    (func $set (param $v i64) (param $ptr i32) (param $len i32) (param $x i64)
        (i64.store (call $at (i32.const 8)) (local.get $v))
        (i64.store (call $at (i32.const 16)) (i64.extend_i32_u (local.get $ptr)))
        (i64.store (call $at (i32.const 24)) (i64.extend_i32_u (local.get $len)))
        (i64.store (call $at (i32.const 32)) (local.get $x))
        (call $valueSet (global.get $sp)))

    (func $index (param $v i64) (param $i i64) (result i64)
        (i64.store (call $at (i32.const 8)) (local.get $v))
        (i64.store (call $at (i32.const 16)) (local.get $i))
        (call $valueIndex (global.get $sp))
        (i64.load (call $at (i32.const 24))))

    (func $set_index (param $v i64) (param $i i64) (param $x i64)
        (i64.store (call $at (i32.const 8)) (local.get $v))
        (i64.store (call $at (i32.const 16)) (local.get $i))
        (i64.store (call $at (i32.const 24)) (local.get $x))
        (call $valueSetIndex (global.get $sp)))

    (func $call (param $v i64) (param $ptr i32) (param $len i32) (param $args i32) (param $n i32) (result i64)
        (i64.store (call $at (i32.const 8)) (local.get $v))
        (i64.store (call $at (i32.const 16)) (i64.extend_i32_u (local.get $ptr)))
        (i64.store (call $at (i32.const 24)) (i64.extend_i32_u (local.get $len)))
        (i64.store (call $at (i32.const 32)) (i64.extend_i32_u (local.get $args)))
        (i64.store (call $at (i32.const 40)) (i64.extend_i32_u (local.get $n)))
        (call $valueCall (global.get $sp))
        (global.set $ok (i32.load8_u (call $at (i32.const 64))))
        (i64.load (call $at (i32.const 56))))

    (func $invoke (param $f i64) (param $args i32) (param $n i32) (result i64)
        (i64.store (call $at (i32.const 8)) (local.get $f))
        (i64.store (call $at (i32.const 16)) (i64.extend_i32_u (local.get $args)))
        (i64.store (call $at (i32.const 24)) (i64.extend_i32_u (local.get $n)))
        (call $valueInvoke (global.get $sp))
        (global.set $ok (i32.load8_u (call $at (i32.const 48))))
        (i64.load (call $at (i32.const 40))))

    (func $new (param $f i64) (param $args i32) (param $n i32) (result i64)
        (i64.store (call $at (i32.const 8)) (local.get $f))
        (i64.store (call $at (i32.const 16)) (i64.extend_i32_u (local.get $args)))
        (i64.store (call $at (i32.const 24)) (i64.extend_i32_u (local.get $n)))
        (call $valueNew (global.get $sp))
        (global.set $ok (i32.load8_u (call $at (i32.const 48))))
        (i64.load (call $at (i32.const 40))))

    (func $length (param $v i64) (result i64)
        (i64.store (call $at (i32.const 8)) (local.get $v))
        (call $valueLength (global.get $sp))
        (i64.load (call $at (i32.const 16))))

    ;; Returns a byte buffer ref; its length goes to $len.
    (func $prepare (param $v i64) (result i64)
        (i64.store (call $at (i32.const 8)) (local.get $v))
        (call $valuePrepareString (global.get $sp))
        (global.set $len (i32.wrap_i64 (i64.load (call $at (i32.const 24)))))
        (i64.load (call $at (i32.const 16))))

    (func $load_string (param $src i64) (param $ptr i32) (param $len i32)
        (i64.store (call $at (i32.const 8)) (local.get $src))
        (i64.store (call $at (i32.const 16)) (i64.extend_i32_u (local.get $ptr)))
        (i64.store (call $at (i32.const 24)) (i64.extend_i32_u (local.get $len)))
        (call $valueLoadString (global.get $sp)))

    (func $instance_of (param $v i64) (param $ctor i64) (result i32)
        (i64.store (call $at (i32.const 8)) (local.get $v))
        (i64.store (call $at (i32.const 16)) (local.get $ctor))
        (call $valueInstanceOf (global.get $sp))
        (i32.load8_u (call $at (i32.const 24))))

    (func $copy_to_go (param $ptr i32) (param $len i32) (param $src i64) (result i32)
        (i64.store (call $at (i32.const 8)) (i64.extend_i32_u (local.get $ptr)))
        (i64.store (call $at (i32.const 16)) (i64.extend_i32_u (local.get $len)))
        (i64.store (call $at (i32.const 24)) (i64.extend_i32_u (local.get $len)))
        (i64.store (call $at (i32.const 32)) (local.get $src))
        (call $copyBytesToGo (global.get $sp))
        (global.set $ok (i32.load8_u (call $at (i32.const 48))))
        (i32.wrap_i64 (i64.load (call $at (i32.const 40)))))

    (func $copy_to_js (param $dst i64) (param $ptr i32) (param $len i32) (result i32)
        (i64.store (call $at (i32.const 8)) (local.get $dst))
        (i64.store (call $at (i32.const 16)) (i64.extend_i32_u (local.get $ptr)))
        (i64.store (call $at (i32.const 24)) (i64.extend_i32_u (local.get $len)))
        (i64.store (call $at (i32.const 32)) (i64.extend_i32_u (local.get $len)))
        (call $copyBytesToJS (global.get $sp))
        (global.set $ok (i32.load8_u (call $at (i32.const 48))))
        (i32.wrap_i64 (i64.load (call $at (i32.const 40)))))

    (func $schedule (param $ms i64) (result i32)
        (i64.store (call $at (i32.const 8)) (local.get $ms))
        (call $scheduleTimeoutEvent (global.get $sp))
        (i32.load (call $at (i32.const 16))))

    (func $clear_timeout (param $id i32)
        (i32.store (call $at (i32.const 8)) (local.get $id))
        (call $clearTimeoutEvent (global.get $sp)))

    (func $finalize (param $v i64)
        (i32.store (call $at (i32.const 8)) (i32.wrap_i64 (local.get $v)))
        (call $finalizeRef (global.get $sp)))

    (func $write (param $fd i64) (param $ptr i32) (param $len i32)
        (i64.store (call $at (i32.const 8)) (local.get $fd))
        (i64.store (call $at (i32.const 16)) (i64.extend_i32_u (local.get $ptr)))
        (i32.store (call $at (i32.const 24)) (local.get $len))
        (call $wasmWrite (global.get $sp)))
"#;

/// Wraps a test body (which must export `run` and `resume`) into a full
/// guest module.
pub fn guest(body: &str) -> String {
    format!("(module\n{}\n{}\n{}\n)", IMPORTS, PRELUDE, body)
}

pub fn load(body: &str) -> ExecutionHandle {
    load_with(body, BridgeConfig::default())
}

pub fn load_with(body: &str, config: BridgeConfig) -> ExecutionHandle {
    Bridge::new(guest(body).as_bytes(), config)
        .expect("guest module should validate")
        .instantiate()
        .expect("guest module should instantiate")
}

/// An own property of an exported object.
pub fn prop(value: &Value, key: &str) -> Value {
    value
        .as_object()
        .and_then(|obj: &Object| obj.get(key))
        .unwrap_or(Value::Undefined)
}
