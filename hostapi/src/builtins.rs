//! Built-in constructors and methods of the ambient environment.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::HostError;
use crate::ops;
use crate::traits::Realm;
use crate::value::{Class, ClassKind, Function, Object, Value};

/// Longest `Uint8Array` the host will allocate.
pub const MAX_BYTE_LENGTH: usize = 1 << 30;

/// Method objects reached through well-known properties (`arr.push`,
/// `f.call`, `date.getTime`, ...).
///
/// Each [`Environment`](crate::Environment) owns one set, so repeated lookups
/// hand the guest the same value while separate instances never see each
/// other's method objects.
#[derive(Debug, Clone)]
pub struct Methods {
    pub(crate) array_push: Function,
    pub(crate) function_call: Function,
    pub(crate) function_apply: Function,
    pub(crate) function_bind: Function,
    pub(crate) date_get_time: Function,
    pub(crate) date_get_timezone_offset: Function,
}

impl Methods {
    pub fn new() -> Self {
        Self {
            array_push: Function::native("push", push),
            function_call: Function::native("call", fn_call),
            function_apply: Function::native("apply", fn_apply),
            function_bind: Function::native("bind", fn_bind),
            date_get_time: Function::native("getTime", get_time),
            date_get_timezone_offset: Function::native("getTimezoneOffset", |_, this, _| {
                as_date(this)?;
                Ok(Value::Number(0.0))
            }),
        }
    }
}

impl Default for Methods {
    fn default() -> Self {
        Self::new()
    }
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Undefined)
}

fn push(_: &mut dyn Realm, this: &Value, args: &[Value]) -> Result<Value, HostError> {
    let obj = this
        .as_object()
        .ok_or_else(|| HostError::type_error("Array.prototype.push called on non-array"))?;
    let mut data = obj.borrow_mut();
    match &mut data.class {
        Class::Array(items) => {
            items.extend_from_slice(args);
            Ok(Value::Number(items.len() as f64))
        }
        _ => Err(HostError::type_error(
            "Array.prototype.push called on non-array",
        )),
    }
}

fn fn_call(realm: &mut dyn Realm, this: &Value, args: &[Value]) -> Result<Value, HostError> {
    let receiver = arg(args, 0);
    let rest = args.get(1..).unwrap_or(&[]);
    ops::call(realm, this, &receiver, rest)
}

fn fn_apply(realm: &mut dyn Realm, this: &Value, args: &[Value]) -> Result<Value, HostError> {
    let receiver = arg(args, 0);
    let list = match arg(args, 1) {
        Value::Undefined | Value::Null => Vec::new(),
        Value::Object(obj) => match obj.to_elements() {
            Some(items) => items,
            None => Vec::new(),
        },
        _ => {
            return Err(HostError::type_error(
                "CreateListFromArrayLike called on non-object",
            ))
        }
    };
    ops::call(realm, this, &receiver, &list)
}

fn fn_bind(_: &mut dyn Realm, this: &Value, args: &[Value]) -> Result<Value, HostError> {
    let Value::Function(target) = this else {
        return Err(HostError::type_error("Bind must be called on a function"));
    };
    let bound_this = arg(args, 0);
    let bound_args: Vec<Value> = args.get(1..).unwrap_or(&[]).to_vec();
    let name = format!("bound {}", target.name());
    let target = target.clone();
    Ok(Value::from(Function::native(&name, move |realm, _, args| {
        let mut all = bound_args.clone();
        all.extend_from_slice(args);
        target.call(realm, &bound_this, &all)
    })))
}

fn as_date(this: &Value) -> Result<f64, HostError> {
    if let Some(obj) = this.as_object() {
        if let Class::Date(millis) = &obj.borrow().class {
            return Ok(*millis);
        }
    }
    Err(HostError::type_error("this is not a Date object."))
}

fn get_time(_: &mut dyn Realm, this: &Value, _: &[Value]) -> Result<Value, HostError> {
    as_date(this).map(Value::Number)
}

fn now_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or(0.0)
}

/// `Object(v)` / `new Object(v)`.
pub fn object_constructor() -> Function {
    fn make(_: &mut dyn Realm, _: &Value, args: &[Value]) -> Result<Value, HostError> {
        Ok(match arg(args, 0) {
            v @ (Value::Object(_) | Value::Function(_)) => v,
            _ => Value::from(Object::new()),
        })
    }
    Function::constructor("Object", ClassKind::Object, make, make)
}

/// `Array(...)` / `new Array(...)`. A single numeric argument is a length.
pub fn array_constructor() -> Function {
    fn make(_: &mut dyn Realm, _: &Value, args: &[Value]) -> Result<Value, HostError> {
        if let [len @ Value::Number(_)] = args {
            let len = ops::array_length(len)?;
            return Ok(Value::from(Object::array(vec![Value::Undefined; len])));
        }
        Ok(Value::from(Object::array(args.to_vec())))
    }
    Function::constructor("Array", ClassKind::Array, make, make)
}

/// `new Uint8Array(length | array | Uint8Array)`.
pub fn uint8_array_constructor() -> Function {
    Function::constructor(
        "Uint8Array",
        ClassKind::Bytes,
        |_, _, _| Err(HostError::type_error("Constructor Uint8Array requires 'new'")),
        |_, _, args| {
            let bytes = match arg(args, 0) {
                Value::Undefined => Vec::new(),
                Value::Number(n) => {
                    if !(n >= 0.0 && n.fract() == 0.0 && n <= MAX_BYTE_LENGTH as f64) {
                        return Err(HostError::range_error(format!(
                            "Invalid typed array length: {}",
                            crate::value::format_number(n)
                        )));
                    }
                    vec![0u8; n as usize]
                }
                Value::Object(obj) => match (obj.to_bytes(), obj.to_elements()) {
                    (Some(bytes), _) => bytes,
                    (None, Some(items)) => items.iter().map(ops::to_uint8).collect(),
                    (None, None) => Vec::new(),
                },
                _ => Vec::new(),
            };
            Ok(Value::from(Object::bytes(bytes)))
        },
    )
}

/// `Error(message)` / `new Error(message)`.
pub fn error_constructor() -> Function {
    fn make(_: &mut dyn Realm, _: &Value, args: &[Value]) -> Result<Value, HostError> {
        let message = match arg(args, 0) {
            Value::Undefined => String::new(),
            v => v.to_js_string(),
        };
        Ok(Value::from(Object::error("Error", &message)))
    }
    Function::constructor("Error", ClassKind::Error, make, make)
}

/// `Date()` / `new Date(millis?)`.
pub fn date_constructor() -> Function {
    fn make(_: &mut dyn Realm, _: &Value, args: &[Value]) -> Result<Value, HostError> {
        let millis = match arg(args, 0) {
            Value::Undefined => now_millis(),
            v => ops::to_number(&v),
        };
        Ok(Value::from(Object::date(millis)))
    }
    Function::constructor("Date", ClassKind::Date, make, make)
}

/// `String(v)`. Not a constructor.
pub fn string_function() -> Function {
    Function::native("String", |_, _, args| {
        Ok(match args.first() {
            Some(v) => Value::from(v.to_js_string()),
            None => Value::from(""),
        })
    })
}
