//! Property access, calls and type checks over host values.
//!
//! Lookups are two-tier: the well-known properties of each value kind first
//! (`length` on strings and arrays, `getTime` on dates, `bind` on functions,
//! and so on), then the object's own property map.

use crate::builtins::Methods;
use crate::error::HostError;
use crate::traits::Realm;
use crate::value::{Class, ClassKind, Value};

/// Longest dense array the host will materialize. Growing past it throws a
/// `RangeError`.
pub const MAX_ARRAY_LENGTH: usize = 1 << 22;

/// Parses a canonical array index (`"0"`, `"17"`, never `"01"` or `"+1"`).
///
/// Indices stop at 2^32 - 2; larger digit strings are ordinary keys.
fn array_index(key: &str) -> Option<usize> {
    let canonical = !key.is_empty()
        && key.bytes().all(|b| b.is_ascii_digit())
        && (key.len() == 1 || !key.starts_with('0'));
    if !canonical {
        return None;
    }
    match key.parse::<u32>() {
        Ok(i) if i != u32::MAX => usize::try_from(i).ok(),
        _ => None,
    }
}

/// JS `ToNumber`.
pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Undefined => f64::NAN,
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => *n,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse().unwrap_or(f64::NAN)
            }
        }
        Value::Object(_) | Value::Function(_) => f64::NAN,
    }
}

/// JS `ToUint8`: modulo-256 wrap of the truncated number.
pub fn to_uint8(value: &Value) -> u8 {
    let n = to_number(value);
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(256.0) as u8
}

/// `target[key]`. Method properties come from `methods`.
pub fn get(methods: &Methods, target: &Value, key: &str) -> Result<Value, HostError> {
    match target {
        Value::Undefined | Value::Null => Err(HostError::type_error(format!(
            "Cannot read properties of {} (reading '{}')",
            target.type_name(),
            key
        ))),
        Value::String(s) => Ok(match key {
            "length" => Value::Number(s.encode_utf16().count() as f64),
            _ => match array_index(key).and_then(|i| s.chars().nth(i)) {
                Some(c) => Value::from(c.to_string()),
                None => Value::Undefined,
            },
        }),
        Value::Bool(_) | Value::Number(_) => Ok(Value::Undefined),
        Value::Object(obj) => {
            let data = obj.borrow();
            let well_known = match (&data.class, key) {
                (Class::Array(items), "length") => Some(Value::Number(items.len() as f64)),
                (Class::Array(_), "push") => Some(Value::from(methods.array_push.clone())),
                (Class::Array(items), _) => {
                    array_index(key).map(|i| items.get(i).cloned().unwrap_or(Value::Undefined))
                }
                (Class::Bytes(bytes), "length" | "byteLength") => {
                    Some(Value::Number(bytes.len() as f64))
                }
                (Class::Bytes(bytes), _) => array_index(key).map(|i| {
                    bytes
                        .get(i)
                        .map(|b| Value::Number(f64::from(*b)))
                        .unwrap_or(Value::Undefined)
                }),
                (Class::Date(_), "getTime") => Some(Value::from(methods.date_get_time.clone())),
                (Class::Date(_), "getTimezoneOffset") => {
                    Some(Value::from(methods.date_get_timezone_offset.clone()))
                }
                _ => None,
            };
            Ok(well_known
                .or_else(|| data.props.get(key).cloned())
                .unwrap_or(Value::Undefined))
        }
        Value::Function(f) => Ok(match key {
            "name" => Value::from(f.name()),
            "length" => f.get("length").unwrap_or(Value::Number(0.0)),
            "call" => Value::from(methods.function_call.clone()),
            "apply" => Value::from(methods.function_apply.clone()),
            "bind" => Value::from(methods.function_bind.clone()),
            _ => f.get(key).unwrap_or(Value::Undefined),
        }),
    }
}

/// `target[key] = value`.
pub fn set(target: &Value, key: &str, value: Value) -> Result<(), HostError> {
    match target {
        Value::Undefined | Value::Null => Err(HostError::type_error(format!(
            "Cannot set properties of {} (setting '{}')",
            target.type_name(),
            key
        ))),
        // Writes to primitives are silently dropped.
        Value::Bool(_) | Value::Number(_) | Value::String(_) => Ok(()),
        Value::Object(obj) => {
            let mut data = obj.borrow_mut();
            match &mut data.class {
                Class::Array(items) if key == "length" => {
                    let len = array_length(&value)?;
                    items.resize(len, Value::Undefined);
                    return Ok(());
                }
                Class::Array(items) => {
                    if let Some(i) = array_index(key) {
                        if i >= items.len() {
                            if i >= MAX_ARRAY_LENGTH {
                                return Err(HostError::range_error("Invalid array length"));
                            }
                            items.resize(i + 1, Value::Undefined);
                        }
                        items[i] = value;
                        return Ok(());
                    }
                }
                Class::Bytes(bytes) => {
                    if key == "length" || key == "byteLength" {
                        return Ok(());
                    }
                    if let Some(i) = array_index(key) {
                        // Out-of-range typed array writes are no-ops.
                        if let Some(slot) = bytes.get_mut(i) {
                            *slot = to_uint8(&value);
                        }
                        return Ok(());
                    }
                }
                _ => {}
            }
            data.props.insert(key.to_string(), value);
            Ok(())
        }
        Value::Function(f) => {
            f.set(key, value);
            Ok(())
        }
    }
}

/// `delete target[key]`.
pub fn delete(target: &Value, key: &str) -> Result<(), HostError> {
    match target {
        Value::Undefined | Value::Null => Err(HostError::type_error(format!(
            "Cannot convert {} to object",
            target.type_name()
        ))),
        Value::Object(obj) => {
            let mut data = obj.borrow_mut();
            if let (Class::Array(items), Some(i)) = (&mut data.class, array_index(key)) {
                if let Some(item) = items.get_mut(i) {
                    *item = Value::Undefined;
                }
                return Ok(());
            }
            data.props.remove(key);
            Ok(())
        }
        Value::Function(f) => {
            f.remove(key);
            Ok(())
        }
        _ => Ok(()),
    }
}

/// `target[i]`.
pub fn index(methods: &Methods, target: &Value, i: i64) -> Result<Value, HostError> {
    get(methods, target, &i.to_string())
}

/// `target[i] = value`. Negative and out-of-range indices become ordinary
/// keys.
pub fn set_index(target: &Value, i: i64, value: Value) -> Result<(), HostError> {
    set(target, &i.to_string(), value)
}

/// `target.length`, as an integer. Missing or non-numeric lengths read as 0.
pub fn length(methods: &Methods, target: &Value) -> Result<i64, HostError> {
    let len = to_number(&get(methods, target, "length")?);
    if len.is_finite() {
        Ok(len.trunc() as i64)
    } else {
        Ok(0)
    }
}

/// Validates a new array length: a whole number no larger than
/// `MAX_ARRAY_LENGTH`.
pub(crate) fn array_length(value: &Value) -> Result<usize, HostError> {
    let n = to_number(value);
    if n >= 0.0 && n.fract() == 0.0 && n <= MAX_ARRAY_LENGTH as f64 {
        Ok(n as usize)
    } else {
        Err(HostError::range_error("Invalid array length"))
    }
}

/// `f.call(this, ...args)`.
pub fn call(
    realm: &mut dyn Realm,
    f: &Value,
    this: &Value,
    args: &[Value],
) -> Result<Value, HostError> {
    match f {
        Value::Function(func) => func.call(realm, this, args),
        other => Err(HostError::type_error(format!(
            "{} is not a function",
            other.type_name()
        ))),
    }
}

/// `target[name](...args)`.
pub fn call_method(
    realm: &mut dyn Realm,
    target: &Value,
    name: &str,
    args: &[Value],
) -> Result<Value, HostError> {
    let method = get(realm.methods(), target, name)?;
    match method {
        Value::Function(func) => func.call(realm, target, args),
        _ => Err(HostError::type_error(format!(
            "{}.{} is not a function",
            target.type_name(),
            name
        ))),
    }
}

/// `f(...args)` with an undefined receiver.
pub fn invoke(realm: &mut dyn Realm, f: &Value, args: &[Value]) -> Result<Value, HostError> {
    call(realm, f, &Value::Undefined, args)
}

/// `new f(...args)`.
pub fn construct(realm: &mut dyn Realm, f: &Value, args: &[Value]) -> Result<Value, HostError> {
    match f {
        Value::Function(func) => func.construct(realm, args).unwrap_or_else(|| {
            Err(HostError::type_error(format!(
                "{} is not a constructor",
                func.name()
            )))
        }),
        other => Err(HostError::type_error(format!(
            "{} is not a constructor",
            other.type_name()
        ))),
    }
}

/// `value instanceof ctor`.
pub fn instance_of(value: &Value, ctor: &Value) -> Result<bool, HostError> {
    let Value::Function(ctor) = ctor else {
        return Err(HostError::type_error(
            "Right-hand side of 'instanceof' is not callable",
        ));
    };
    Ok(match (ctor.instance_kind(), value) {
        (None, _) => false,
        (Some(ClassKind::Object), Value::Object(_) | Value::Function(_)) => true,
        (Some(kind), Value::Object(obj)) => obj.kind() == kind,
        _ => false,
    })
}
