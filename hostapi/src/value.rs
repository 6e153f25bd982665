//! Host-side values the guest manipulates through the value protocol.
//!
//! The guest sees a JS-shaped world: primitives, objects and functions.
//! Objects and functions have identity (two handles are equal only if they
//! point at the same allocation); strings compare by content.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::HostError;
use crate::traits::Realm;

/// Signature of a host function body: `(realm, this, args) -> result`.
///
/// `Err(HostError::Thrown(_))` is a JS-style exception; any other error is
/// fatal to the guest.
pub type NativeFn = dyn Fn(&mut dyn Realm, &Value, &[Value]) -> Result<Value, HostError>;

/// A host value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(Object),
    Function(Function),
}

impl Value {
    /// Returns the string contents if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// `undefined` or `null`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// The `typeof`-style name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }

    /// JS `ToString` conversion.
    pub fn to_js_string(&self) -> String {
        self.render(&mut Vec::new())
    }

    /// `open` holds the objects currently being rendered, innermost last.
    fn render(&self, open: &mut Vec<usize>) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.to_string(),
            Value::Object(o) => o.render(open),
            Value::Function(f) => format!("function {}() {{ [native code] }}", f.name()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

/// Nesting depth past which `to_js_string` stops descending into objects.
const MAX_RENDER_DEPTH: usize = 256;

/// Formats a number the way JS `String(n)` does.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let abs = n.abs();
    if (1e-6..1e21).contains(&abs) {
        return format!("{}", n);
    }
    // Exponent form: Rust prints `1e21` / `1.5e-7`, JS wants `1e+21` / `1.5e-7`.
    let formatted = format!("{:e}", n);
    match formatted.split_once('e') {
        Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
        _ => formatted,
    }
}

/// What kind of object an [`Object`] is, with any class-specific storage.
#[derive(Debug, Clone, PartialEq)]
pub enum Class {
    Plain,
    Array(Vec<Value>),
    /// A `Uint8Array`.
    Bytes(Vec<u8>),
    Error,
    /// A `Date`, holding milliseconds since the Unix epoch.
    Date(f64),
}

/// Discriminant of [`Class`], used by constructors to answer `instanceof`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    /// Matches every object and function (`x instanceof Object`).
    Object,
    Array,
    Bytes,
    Error,
    Date,
}

#[derive(Debug)]
pub struct ObjectData {
    pub class: Class,
    pub props: HashMap<String, Value>,
}

/// A reference-counted, identity-compared host object.
#[derive(Clone)]
pub struct Object(Rc<RefCell<ObjectData>>);

impl Object {
    fn with_class(class: Class) -> Self {
        Object(Rc::new(RefCell::new(ObjectData {
            class,
            props: HashMap::new(),
        })))
    }

    /// A new plain object (`{}`).
    pub fn new() -> Self {
        Self::with_class(Class::Plain)
    }

    pub fn array(items: Vec<Value>) -> Self {
        Self::with_class(Class::Array(items))
    }

    /// A new `Uint8Array` holding `bytes`.
    pub fn bytes(bytes: Vec<u8>) -> Self {
        Self::with_class(Class::Bytes(bytes))
    }

    pub fn date(millis: f64) -> Self {
        Self::with_class(Class::Date(millis))
    }

    /// An error object with `name` and `message` properties.
    pub fn error(name: &str, message: &str) -> Self {
        let obj = Self::with_class(Class::Error);
        obj.set("name", Value::from(name));
        obj.set("message", Value::from(message));
        obj
    }

    /// Builds a plain object from `(key, value)` pairs.
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let obj = Self::new();
        for (key, value) in entries {
            obj.set(key, value);
        }
        obj
    }

    pub fn kind(&self) -> ClassKind {
        match self.0.borrow().class {
            Class::Plain => ClassKind::Object,
            Class::Array(_) => ClassKind::Array,
            Class::Bytes(_) => ClassKind::Bytes,
            Class::Error => ClassKind::Error,
            Class::Date(_) => ClassKind::Date,
        }
    }

    pub fn borrow(&self) -> Ref<'_, ObjectData> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, ObjectData> {
        self.0.borrow_mut()
    }

    /// Own property lookup; does not consult class-specific properties.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.borrow().props.get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.0.borrow_mut().props.insert(key.into(), value);
    }

    pub fn has_own(&self, key: &str) -> bool {
        self.0.borrow().props.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.borrow_mut().props.remove(key)
    }

    /// A copy of the bytes if this is a `Uint8Array`.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        match &self.0.borrow().class {
            Class::Bytes(b) => Some(b.clone()),
            _ => None,
        }
    }

    /// Runs `f` over the backing bytes if this is a `Uint8Array`.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> Option<R> {
        match &mut self.0.borrow_mut().class {
            Class::Bytes(b) => Some(f(b)),
            _ => None,
        }
    }

    /// A copy of the elements if this is an array.
    pub fn to_elements(&self) -> Option<Vec<Value>> {
        match &self.0.borrow().class {
            Class::Array(items) => Some(items.clone()),
            _ => None,
        }
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the allocation, stable for as long as any handle is alive.
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    /// An object already open further up renders as the empty string, as
    /// does anything nested deeper than `MAX_RENDER_DEPTH`.
    fn render(&self, open: &mut Vec<usize>) -> String {
        let addr = self.addr();
        if open.len() >= MAX_RENDER_DEPTH || open.contains(&addr) {
            return String::new();
        }
        open.push(addr);
        let rendered = self.render_open(open);
        open.pop();
        rendered
    }

    fn render_open(&self, open: &mut Vec<usize>) -> String {
        let data = self.0.borrow();
        match &data.class {
            Class::Plain => "[object Object]".to_string(),
            Class::Array(items) => items
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.render(open) })
                .collect::<Vec<_>>()
                .join(","),
            Class::Bytes(bytes) => bytes
                .iter()
                .map(u8::to_string)
                .collect::<Vec<_>>()
                .join(","),
            Class::Error => {
                let name = data
                    .props
                    .get("name")
                    .map(|v| v.render(open))
                    .unwrap_or_else(|| "Error".to_string());
                let message = data
                    .props
                    .get("message")
                    .map(|v| v.render(open))
                    .unwrap_or_default();
                if message.is_empty() {
                    name
                } else {
                    format!("{}: {}", name, message)
                }
            }
            Class::Date(millis) => format!("Date({})", format_number(*millis)),
        }
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Props may hold cycles back to this object, so only the shape is printed.
        match self.0.try_borrow() {
            Ok(data) => write!(
                f,
                "Object({:?}, {} props @ {:#x})",
                self.kind(),
                data.props.len(),
                self.addr()
            ),
            Err(_) => write!(f, "Object(<borrowed> @ {:#x})", self.addr()),
        }
    }
}

struct FunctionData {
    name: String,
    call: Box<NativeFn>,
    construct: Option<Box<NativeFn>>,
    instance_kind: Option<ClassKind>,
    props: RefCell<HashMap<String, Value>>,
}

/// A callable host function, compared by identity.
#[derive(Clone)]
pub struct Function(Rc<FunctionData>);

impl Function {
    /// A plain callable function.
    pub fn native<F>(name: &str, call: F) -> Self
    where
        F: Fn(&mut dyn Realm, &Value, &[Value]) -> Result<Value, HostError> + 'static,
    {
        Function(Rc::new(FunctionData {
            name: name.to_string(),
            call: Box::new(call),
            construct: None,
            instance_kind: None,
            props: RefCell::new(HashMap::new()),
        }))
    }

    /// A constructor: callable, usable with `new`, and the right-hand side of
    /// `instanceof` for objects of `kind`.
    pub fn constructor<F, C>(name: &str, kind: ClassKind, call: F, construct: C) -> Self
    where
        F: Fn(&mut dyn Realm, &Value, &[Value]) -> Result<Value, HostError> + 'static,
        C: Fn(&mut dyn Realm, &Value, &[Value]) -> Result<Value, HostError> + 'static,
    {
        Function(Rc::new(FunctionData {
            name: name.to_string(),
            call: Box::new(call),
            construct: Some(Box::new(construct)),
            instance_kind: Some(kind),
            props: RefCell::new(HashMap::new()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn call(
        &self,
        realm: &mut dyn Realm,
        this: &Value,
        args: &[Value],
    ) -> Result<Value, HostError> {
        (self.0.call)(realm, this, args)
    }

    /// `new f(...args)`; `None` when the function is not a constructor.
    pub fn construct(
        &self,
        realm: &mut dyn Realm,
        args: &[Value],
    ) -> Option<Result<Value, HostError>> {
        self.0
            .construct
            .as_ref()
            .map(|construct| construct(realm, &Value::Undefined, args))
    }

    pub fn instance_kind(&self) -> Option<ClassKind> {
        self.0.instance_kind
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.props.borrow().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.0.props.borrow_mut().insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.props.borrow_mut().remove(key)
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({:?} @ {:#x})", self.0.name, self.addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_formatting_matches_js() {
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(-42.0), "-42");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(0.1), "0.1");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_number(1e21), "1e+21");
        assert_eq!(format_number(1.5e-7), "1.5e-7");
        assert_eq!(format_number(123456789.0), "123456789");
    }

    #[test]
    fn test_to_js_string_primitives() {
        assert_eq!(Value::Undefined.to_js_string(), "undefined");
        assert_eq!(Value::Null.to_js_string(), "null");
        assert_eq!(Value::Bool(true).to_js_string(), "true");
        assert_eq!(Value::from("héllo").to_js_string(), "héllo");
    }

    #[test]
    fn test_to_js_string_objects() {
        assert_eq!(Value::from(Object::new()).to_js_string(), "[object Object]");

        let arr = Object::array(vec![
            Value::Number(1.0),
            Value::Null,
            Value::from("x"),
        ]);
        assert_eq!(Value::from(arr).to_js_string(), "1,,x");

        let err = Object::error("TypeError", "bad thing");
        assert_eq!(Value::from(err).to_js_string(), "TypeError: bad thing");

        let bytes = Object::bytes(vec![1, 2, 255]);
        assert_eq!(Value::from(bytes).to_js_string(), "1,2,255");
    }

    fn push(arr: &Object, value: Value) {
        if let Class::Array(items) = &mut arr.borrow_mut().class {
            items.push(value);
        }
    }

    #[test]
    fn test_to_js_string_cyclic_array() {
        let arr = Object::array(vec![Value::Number(1.0)]);
        push(&arr, Value::from(arr.clone()));
        assert_eq!(Value::from(arr.clone()).to_js_string(), "1,");

        let outer = Object::array(vec![Value::from(arr.clone()), Value::from("z")]);
        push(&arr, Value::from(outer.clone()));
        assert_eq!(Value::from(outer).to_js_string(), "1,,,z");
    }

    #[test]
    fn test_to_js_string_self_referencing_error() {
        let err = Object::error("Error", "");
        err.set("message", Value::from(err.clone()));
        assert_eq!(Value::from(err).to_js_string(), "Error");
    }

    #[test]
    fn test_to_js_string_deep_nesting_terminates() {
        let mut value = Value::from("leaf");
        for _ in 0..1_000 {
            value = Value::from(Object::array(vec![value]));
        }
        assert_eq!(value.to_js_string(), "");

        let shallow = Value::from(Object::array(vec![Value::from(Object::array(vec![
            Value::from("leaf"),
        ]))]));
        assert_eq!(shallow.to_js_string(), "leaf");
    }

    #[test]
    fn test_object_identity() {
        let a = Object::new();
        let b = Object::new();
        assert_eq!(Value::from(a.clone()), Value::from(a.clone()));
        assert_ne!(Value::from(a), Value::from(b));
    }

    #[test]
    fn test_strings_compare_by_content() {
        assert_eq!(Value::from("abc"), Value::from(String::from("abc")));
    }

    #[test]
    fn test_object_props() {
        let obj = Object::from_entries([("a", Value::Number(1.0))]);
        assert!(obj.has_own("a"));
        assert_eq!(obj.get("a"), Some(Value::Number(1.0)));
        assert_eq!(obj.remove("a"), Some(Value::Number(1.0)));
        assert!(!obj.has_own("a"));
    }

    #[test]
    fn test_bytes_access() {
        let obj = Object::bytes(vec![1, 2, 3]);
        assert_eq!(obj.kind(), ClassKind::Bytes);
        obj.with_bytes_mut(|b| b[0] = 9).unwrap();
        assert_eq!(obj.to_bytes(), Some(vec![9, 2, 3]));
        assert!(Object::new().to_bytes().is_none());
    }

    #[test]
    fn test_debug_does_not_recurse_into_cycles() {
        let obj = Object::new();
        obj.set("self", Value::from(obj.clone()));
        let printed = format!("{:?}", obj);
        assert!(printed.starts_with("Object(Object, 1 props"));
    }
}
