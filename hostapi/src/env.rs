//! The host environment a Go `js/wasm` guest expects to find.
//!
//! `global` carries stubbed `fs` and `process` objects; the guest cannot touch
//! the real filesystem or process. `bridge` is the object behind id 6 and
//! implements the callback protocol. `ambient` holds the constructors the
//! global object falls back to.

use crate::builtins;
use crate::error::{enosys, HostError};
use crate::ops;
use crate::traits::Realm;
use crate::value::{Function, Object, Value};

/// `fs` methods that report `ENOSYS` through their trailing callback.
const FS_STUBS: &[&str] = &[
    "write", "chmod", "chown", "close", "fchmod", "fchown", "fstat", "ftruncate", "lchown",
    "link", "lstat", "mkdir", "open", "read", "readdir", "readlink", "rename", "rmdir", "stat",
    "symlink", "truncate", "unlink", "utimes",
];

/// `fs.constants` flags; all unsupported.
const FS_CONSTANTS: &[&str] = &["O_WRONLY", "O_RDWR", "O_CREAT", "O_TRUNC", "O_APPEND", "O_EXCL"];

#[derive(Debug, Clone)]
pub struct Environment {
    pub global: Object,
    pub bridge: Object,
    pub ambient: Object,
    pub methods: builtins::Methods,
}

impl Environment {
    pub fn new() -> Self {
        let global = Object::from_entries([
            ("fs", Value::from(fs_object())),
            ("process", Value::from(process_object())),
        ]);

        let bridge = Object::from_entries([
            ("_pendingEvent", Value::Null),
            ("_makeFuncWrapper", Value::from(make_func_wrapper())),
        ]);

        let ambient = Object::from_entries([
            ("Object", Value::from(builtins::object_constructor())),
            ("Array", Value::from(builtins::array_constructor())),
            ("Uint8Array", Value::from(builtins::uint8_array_constructor())),
            ("Error", Value::from(builtins::error_constructor())),
            ("Date", Value::from(builtins::date_constructor())),
            ("String", Value::from(builtins::string_function())),
        ]);

        Self {
            global,
            bridge,
            ambient,
            methods: builtins::Methods::new(),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

/// Calls the last argument (the Node-style callback) with `result`.
fn complete(realm: &mut dyn Realm, args: &[Value], result: Value) -> Result<Value, HostError> {
    match args.last() {
        Some(callback @ Value::Function(_)) => {
            ops::invoke(realm, callback, &[result])?;
            Ok(Value::Undefined)
        }
        _ => Err(HostError::type_error("callback is not a function")),
    }
}

fn fs_object() -> Object {
    let fs = Object::new();
    let constants =
        Object::from_entries(FS_CONSTANTS.iter().map(|name| (*name, Value::Number(-1.0))));
    fs.set("constants", Value::from(constants));

    for name in FS_STUBS {
        let method = Function::native(name, |realm, _, args| complete(realm, args, enosys()));
        fs.set(*name, Value::from(method));
    }
    fs.set(
        "fsync",
        Value::from(Function::native("fsync", |realm, _, args| {
            complete(realm, args, Value::Null)
        })),
    );
    fs
}

fn process_object() -> Object {
    let process = Object::new();
    for name in ["getuid", "getgid", "geteuid", "getegid"] {
        process.set(
            name,
            Value::from(Function::native(name, |_, _, _| Ok(Value::Number(-1.0)))),
        );
    }
    for name in ["getgroups", "umask", "cwd", "chdir"] {
        process.set(
            name,
            Value::from(Function::native(name, |_, _, _| {
                Err(HostError::Thrown(enosys()))
            })),
        );
    }
    process.set("pid", Value::Number(-1.0));
    process.set("ppid", Value::Number(-1.0));
    process
}

/// `_makeFuncWrapper(id)`: wraps a guest-side function id into a host
/// function.
///
/// Calling the wrapper publishes `{id, this, args}` as `_pendingEvent`,
/// resumes the guest so it can run the function, and returns whatever the
/// guest stored in `event.result`.
fn make_func_wrapper() -> Function {
    Function::native("_makeFuncWrapper", |_, _, args| {
        let id = args.first().cloned().unwrap_or(Value::Undefined);
        let wrapper = Function::native("wrapper", move |realm, this, args| {
            let event = Object::from_entries([
                ("id", id.clone()),
                ("this", this.clone()),
                ("args", Value::from(Object::array(args.to_vec()))),
            ]);
            let bridge = realm.bridge();
            bridge.set("_pendingEvent", Value::from(event.clone()));
            tracing::trace!(id = %id.to_js_string(), "dispatching guest callback");
            realm.resume()?;
            Ok(event.get("result").unwrap_or(Value::Undefined))
        });
        Ok(Value::from(wrapper))
    })
}
