//! Runtime values
//!
//! A [`Value`] is a tagged union over every type the language can touch.
//! Vector, map, class and instance are the reference variants: their payload
//! lives behind `Rc<RefCell<..>>` and participates in reference counting.
//! Everything else copies by value; cloning a string clones an `Rc<str>`
//! handle, never the bytes.
//!
//! Maps are ordered by the canonical value ordering ([`total_compare`]):
//! type tag first, then payload. That ordering is arbitrary but stable, and
//! `for k, v in m` iterates it deterministically.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::rc::Rc;

use deva_core::{ErrorKind, RuntimeError, RuntimeResult};

use crate::module::{Module, NativeModule};
use crate::refmap;
use crate::vm::Vm;

pub type StrRef = Rc<str>;
pub type VecRef = Rc<RefCell<Vector>>;
pub type MapRef = Rc<RefCell<Map>>;
pub type ModuleRef = Rc<Module>;
pub type NativeModuleRef = Rc<dyn NativeModule>;
pub type NativeObjRef = Rc<NativeObj>;

/// Signature of a native function: reads its arguments from the frame the VM
/// pushed for it, returns the value to hand back to the caller.
pub type NativeFunction = fn(&mut Vm) -> RuntimeResult<Value>;

/// An ordered sequence plus the enumeration cursor used by `rewind`/`next`.
#[derive(Debug, Default)]
pub struct Vector {
    pub items: Vec<Value>,
    pub index: usize,
}

impl Vector {
    pub fn from_items(items: Vec<Value>) -> VecRef {
        let v = Rc::new(RefCell::new(Vector { items, index: 0 }));
        refmap::track("vector", v.as_ptr() as usize);
        v
    }
}

impl Drop for Vector {
    fn drop(&mut self) {
        refmap::forget(self as *const _ as usize);
    }
}

/// An ordered mapping plus the enumeration cursor. Class and instance values
/// share this representation; only the value tag differs.
#[derive(Debug, Default)]
pub struct Map {
    pub entries: BTreeMap<MapKey, Value>,
    pub index: usize,
    /// Set while destructors run so release cannot re-enter them.
    pub dying: bool,
}

impl Map {
    pub fn new() -> MapRef {
        let m = Rc::new(RefCell::new(Map::default()));
        refmap::track("map", m.as_ptr() as usize);
        m
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.get(&MapKey(key.clone()))
    }

    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.entries.get(&MapKey(Value::Str(Rc::from(key))))
    }
}

impl Drop for Map {
    fn drop(&mut self) {
        refmap::forget(self as *const _ as usize);
    }
}

/// Map key wrapper giving [`Value`] the total order maps sort by.
#[derive(Debug, Clone)]
pub struct MapKey(pub Value);

impl PartialEq for MapKey {
    fn eq(&self, other: &Self) -> bool {
        total_compare(&self.0, &other.0) == Ordering::Equal
    }
}
impl Eq for MapKey {}
impl PartialOrd for MapKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for MapKey {
    fn cmp(&self, other: &Self) -> Ordering {
        total_compare(&self.0, &other.0)
    }
}

/// An opaque object owned by a native module (compiled regex, file handle).
/// Teardown happens through the payload's own `Drop`, so every native type
/// registers its cleanup simply by being a normal Rust value.
pub struct NativeObj {
    pub type_name: &'static str,
    pub data: RefCell<Box<dyn std::any::Any>>,
}

impl std::fmt::Debug for NativeObj {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeObj({})", self.type_name)
    }
}

/// Reference to an entry in a module's function table.
#[derive(Debug, Clone)]
pub struct FuncRef {
    pub module: ModuleRef,
    pub index: u32,
}

impl FuncRef {
    pub fn object(&self) -> RuntimeResult<deva_core::FunctionObject> {
        self.module.code.function(self.index).cloned()
    }
}

/// A native function pointer plus the implicit-self flag. The name is the
/// qualified form used in error messages and stack traces.
#[derive(Debug, Clone, Copy)]
pub struct NativeFn {
    pub name: &'static str,
    pub func: NativeFunction,
    pub is_method: bool,
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Num(f64),
    Str(StrRef),
    Vec(VecRef),
    Map(MapRef),
    Class(MapRef),
    Instance(MapRef),
    Func(FuncRef),
    NativeFunc(NativeFn),
    NativeObj(NativeObjRef),
    /// Internal only: code addresses and counts pushed by the VM itself.
    Size(usize),
    /// Internal only: an unresolved identifier awaiting dynamic lookup.
    SymbolName(StrRef),
    Module(ModuleRef),
    NativeMod(NativeModuleRef),
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::Vec(_) => "vector",
            Value::Map(_) => "map",
            Value::Class(_) => "class",
            Value::Instance(_) => "instance",
            Value::Func(_) => "function",
            Value::NativeFunc(_) => "native function",
            Value::NativeObj(_) => "native object",
            Value::Size(_) => "size",
            Value::SymbolName(_) => "symbol name",
            Value::Module(_) => "module",
            Value::NativeMod(_) => "native module",
        }
    }

    /// True for the variants whose payload is reference counted.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Value::Vec(_) | Value::Map(_) | Value::Class(_) | Value::Instance(_)
        )
    }

    /// Truthiness for `jmpf`, `not` and conditions.
    pub fn coerce_to_bool(&self) -> RuntimeResult<bool> {
        match self {
            Value::Null => Ok(false),
            Value::Bool(b) => Ok(*b),
            Value::Num(n) => Ok(*n != 0.0),
            Value::Str(s) => Ok(!s.is_empty()),
            Value::Vec(_)
            | Value::Map(_)
            | Value::Class(_)
            | Value::Instance(_)
            | Value::Func(_)
            | Value::NativeFunc(_)
            | Value::NativeObj(_)
            | Value::Module(_)
            | Value::NativeMod(_) => Ok(true),
            Value::Size(n) => Ok(*n != 0),
            Value::SymbolName(s) => Err(RuntimeError::internal(format!(
                "unresolved symbol '{}' evaluated as a boolean",
                s
            ))),
        }
    }

    /// The number payload, checked to be integral. Used by indexing.
    pub fn integral(&self, what: &str) -> RuntimeResult<i64> {
        match self {
            Value::Num(n) if n.fract() == 0.0 => Ok(*n as i64),
            Value::Num(n) => Err(RuntimeError::new(
                ErrorKind::NumericError,
                format!("{} must be integral, got {}", what, n),
            )),
            other => Err(RuntimeError::new(
                ErrorKind::TypeMismatch,
                format!("{} must be a number, got {}", what, other.type_name()),
            )),
        }
    }
}

fn tag_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Num(_) => 2,
        Value::Str(_) => 3,
        Value::Vec(_) => 4,
        Value::Map(_) => 5,
        Value::Class(_) => 6,
        Value::Instance(_) => 7,
        Value::Func(_) => 8,
        Value::NativeFunc(_) => 9,
        Value::NativeObj(_) => 10,
        Value::Size(_) => 11,
        Value::SymbolName(_) => 12,
        Value::Module(_) => 13,
        Value::NativeMod(_) => 14,
    }
}

/// The canonical value ordering: type tag first, then payload. Numbers
/// compare numerically, strings lexicographically, booleans `false < true`,
/// heap values by handle identity, nulls equal. Total: every pair orders.
pub fn total_compare(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (tag_rank(a), tag_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Num(x), Value::Num(y)) => x.total_cmp(y),
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        (Value::Vec(x), Value::Vec(y)) => (x.as_ptr() as usize).cmp(&(y.as_ptr() as usize)),
        (Value::Map(x), Value::Map(y))
        | (Value::Class(x), Value::Class(y))
        | (Value::Instance(x), Value::Instance(y)) => {
            (x.as_ptr() as usize).cmp(&(y.as_ptr() as usize))
        }
        (Value::Func(x), Value::Func(y)) => (Rc::as_ptr(&x.module) as usize, x.index)
            .cmp(&(Rc::as_ptr(&y.module) as usize, y.index)),
        (Value::NativeFunc(x), Value::NativeFunc(y)) => {
            (x.func as usize).cmp(&(y.func as usize))
        }
        (Value::NativeObj(x), Value::NativeObj(y)) => {
            (Rc::as_ptr(x) as usize).cmp(&(Rc::as_ptr(y) as usize))
        }
        (Value::Size(x), Value::Size(y)) => x.cmp(y),
        (Value::SymbolName(x), Value::SymbolName(y)) => x.cmp(y),
        (Value::Module(x), Value::Module(y)) => {
            (Rc::as_ptr(x) as usize).cmp(&(Rc::as_ptr(y) as usize))
        }
        (Value::NativeMod(x), Value::NativeMod(y)) => {
            (Rc::as_ptr(x) as *const () as usize).cmp(&(Rc::as_ptr(y) as *const () as usize))
        }
        _ => unreachable!("tag ranks matched"),
    }
}

/// Equality for the `eq`/`neq` opcodes. Never fails: values of different
/// types are simply not equal. Heap values compare by handle identity.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        // NaN != NaN, unlike the total ordering used for map keys
        (Value::Num(x), Value::Num(y)) => x == y,
        _ if tag_rank(a) == tag_rank(b) => total_compare(a, b) == Ordering::Equal,
        _ => false,
    }
}

/// Ordering for the relational opcodes: only same-type numbers, strings and
/// booleans order; anything else is a type mismatch.
pub fn compare_ordered(a: &Value, b: &Value) -> RuntimeResult<Ordering> {
    match (a, b) {
        (Value::Num(_), Value::Num(_))
        | (Value::Str(_), Value::Str(_))
        | (Value::Bool(_), Value::Bool(_)) => Ok(total_compare(a, b)),
        _ => Err(RuntimeError::new(
            ErrorKind::TypeMismatch,
            format!(
                "cannot order {} and {}",
                a.type_name(),
                b.type_name()
            ),
        )),
    }
}

/// Render a number the way the language prints it: integral values without a
/// decimal point.
pub fn format_num(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Pretty-printing for `print` and error messages. Strings are bare at the
/// top level and quoted inside collections; collections recurse.
pub fn display(v: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, v, 0);
    out
}

fn write_value(out: &mut String, v: &Value, depth: usize) {
    match v {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => {
            let _ = write!(out, "{}", b);
        }
        Value::Num(n) => out.push_str(&format_num(*n)),
        Value::Str(s) => {
            if depth == 0 {
                out.push_str(s);
            } else {
                let _ = write!(out, "{:?}", s);
            }
        }
        Value::Vec(h) => {
            out.push('[');
            for (i, item) in h.borrow().items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, item, depth + 1);
            }
            out.push(']');
        }
        Value::Map(h) | Value::Class(h) | Value::Instance(h) => {
            out.push('{');
            for (i, (key, value)) in h.borrow().entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, &key.0, depth + 1);
                out.push_str(": ");
                write_value(out, value, depth + 1);
            }
            out.push('}');
        }
        Value::Func(f) => {
            let name = f
                .module
                .code
                .function(f.index)
                .map(|fo| fo.name.clone())
                .unwrap_or_else(|_| "?".to_string());
            let _ = write!(out, "function {}", name);
        }
        Value::NativeFunc(_) => out.push_str("native function"),
        Value::NativeObj(o) => {
            let _ = write!(out, "native object ({})", o.type_name);
        }
        Value::Size(n) => {
            let _ = write!(out, "{}", n);
        }
        Value::SymbolName(s) => out.push_str(s),
        Value::Module(m) => {
            let _ = write!(out, "module {}", m.name);
        }
        Value::NativeMod(m) => {
            let _ = write!(out, "native module {}", m.name());
        }
    }
}

/// `copy()` semantics: reference types get a fresh handle with the same
/// contents (children shared, their counts bumped); everything else is
/// already copied by value.
pub fn copy_value(v: &Value) -> Value {
    match v {
        Value::Vec(h) => {
            let items = h.borrow().items.clone();
            Value::Vec(Vector::from_items(items))
        }
        Value::Map(h) | Value::Class(h) | Value::Instance(h) => {
            let fresh = Map::new();
            fresh.borrow_mut().entries = h.borrow().entries.clone();
            match v {
                Value::Map(_) => Value::Map(fresh),
                Value::Class(_) => Value::Class(fresh),
                _ => Value::Instance(fresh),
            }
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_to_bool() {
        assert!(!Value::Null.coerce_to_bool().unwrap());
        assert!(!Value::Num(0.0).coerce_to_bool().unwrap());
        assert!(Value::Num(-2.5).coerce_to_bool().unwrap());
        assert!(!Value::str("").coerce_to_bool().unwrap());
        assert!(Value::str("x").coerce_to_bool().unwrap());
        assert!(Value::Vec(Vector::from_items(vec![])).coerce_to_bool().unwrap());
        assert!(Value::SymbolName(Rc::from("x")).coerce_to_bool().is_err());
    }

    #[test]
    fn test_total_compare_orders_tags_first() {
        assert_eq!(
            total_compare(&Value::Null, &Value::Bool(false)),
            Ordering::Less
        );
        assert_eq!(
            total_compare(&Value::Num(999.0), &Value::str("a")),
            Ordering::Less
        );
    }

    #[test]
    fn test_total_compare_payloads() {
        assert_eq!(
            total_compare(&Value::Num(1.0), &Value::Num(2.0)),
            Ordering::Less
        );
        assert_eq!(
            total_compare(&Value::str("a"), &Value::str("b")),
            Ordering::Less
        );
        assert_eq!(
            total_compare(&Value::Bool(false), &Value::Bool(true)),
            Ordering::Less
        );
        assert_eq!(total_compare(&Value::Null, &Value::Null), Ordering::Equal);
    }

    #[test]
    fn test_heap_identity_compare() {
        let a = Value::Vec(Vector::from_items(vec![]));
        let b = a.clone();
        let c = Value::Vec(Vector::from_items(vec![]));
        assert_eq!(total_compare(&a, &b), Ordering::Equal);
        assert_ne!(total_compare(&a, &c), Ordering::Equal);
        assert!(values_equal(&a, &b));
        assert!(!values_equal(&a, &c));
    }

    #[test]
    fn test_equality_across_types_is_false_not_error() {
        assert!(!values_equal(&Value::Num(1.0), &Value::str("1")));
        assert!(!values_equal(&Value::Null, &Value::Bool(false)));
    }

    #[test]
    fn test_ordering_rejects_mixed_types() {
        let err = compare_ordered(&Value::Num(1.0), &Value::str("1")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
        assert!(compare_ordered(&Value::Null, &Value::Null).is_err());
    }

    #[test]
    fn test_map_iterates_in_key_order() {
        let m = Map::new();
        m.borrow_mut()
            .entries
            .insert(MapKey(Value::str("b")), Value::Num(2.0));
        m.borrow_mut()
            .entries
            .insert(MapKey(Value::str("a")), Value::Num(1.0));
        let keys: Vec<String> = m
            .borrow()
            .entries
            .keys()
            .map(|k| display(&k.0))
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_display() {
        assert_eq!(display(&Value::Num(14.0)), "14");
        assert_eq!(display(&Value::Num(2.5)), "2.5");
        assert_eq!(display(&Value::str("plain")), "plain");
        let v = Value::Vec(Vector::from_items(vec![
            Value::Num(1.0),
            Value::str("s"),
            Value::Null,
        ]));
        assert_eq!(display(&v), "[1, \"s\", null]");
    }

    #[test]
    fn test_copy_makes_distinct_handle() {
        let v = Value::Vec(Vector::from_items(vec![Value::Num(1.0)]));
        let w = copy_value(&v);
        assert!(!values_equal(&v, &w));
        let (Value::Vec(a), Value::Vec(b)) = (&v, &w) else { panic!() };
        assert_eq!(a.borrow().items.len(), b.borrow().items.len());
        b.borrow_mut().items.push(Value::Num(2.0));
        assert_eq!(a.borrow().items.len(), 1);
    }

    #[test]
    fn test_integral_check() {
        assert_eq!(Value::Num(3.0).integral("index").unwrap(), 3);
        let err = Value::Num(3.5).integral("index").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NumericError);
        let err = Value::str("x").integral("index").unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
    }
}
