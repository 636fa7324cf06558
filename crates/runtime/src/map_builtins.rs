//! Built-in methods on maps
//!
//! Consulted by `method_load` for plain map receivers (before the map's own
//! entries) and as a fallback for classes and instances. Maps iterate in the
//! canonical key order, so `next` indexes into the sorted entry sequence.

use deva_core::RuntimeResult;

use crate::builtin_helpers::BuiltinHelper;
use crate::value::{copy_value, NativeFn, NativeFunction, Value, Vector};
use crate::vm::Vm;

const BUILTINS: &[(&str, &'static str, NativeFunction)] = &[
    ("length", "map.length", do_length),
    ("copy", "map.copy", do_copy),
    ("keys", "map.keys", do_keys),
    ("values", "map.values", do_values),
    ("find", "map.find", do_find),
    ("remove", "map.remove", do_remove),
    ("rewind", "map.rewind", do_rewind),
    ("next", "map.next", do_next),
];

pub fn find(name: &str) -> Option<NativeFn> {
    BUILTINS
        .iter()
        .find(|&&(n, _, _)| n == name)
        .map(|&(_, qualified, func)| NativeFn { name: qualified, func, is_method: true })
}

fn do_length(vm: &mut Vm) -> RuntimeResult<Value> {
    let helper = BuiltinHelper::new(vm, "map", "length");
    helper.check_num_args(1)?;
    let map = helper.expect_map(&helper.local(0)?)?;
    let len = map.borrow().entries.len();
    Ok(Value::Num(len as f64))
}

fn do_copy(vm: &mut Vm) -> RuntimeResult<Value> {
    let helper = BuiltinHelper::new(vm, "map", "copy");
    helper.check_num_args(1)?;
    let this = helper.local(0)?;
    helper.expect_map(&this)?;
    Ok(copy_value(&this))
}

fn do_keys(vm: &mut Vm) -> RuntimeResult<Value> {
    let helper = BuiltinHelper::new(vm, "map", "keys");
    helper.check_num_args(1)?;
    let map = helper.expect_map(&helper.local(0)?)?;
    let keys: Vec<Value> = map.borrow().entries.keys().map(|k| k.0.clone()).collect();
    Ok(Value::Vec(Vector::from_items(keys)))
}

fn do_values(vm: &mut Vm) -> RuntimeResult<Value> {
    let helper = BuiltinHelper::new(vm, "map", "values");
    helper.check_num_args(1)?;
    let map = helper.expect_map(&helper.local(0)?)?;
    let values: Vec<Value> = map.borrow().entries.values().cloned().collect();
    Ok(Value::Vec(Vector::from_items(values)))
}

/// Lookup that answers null instead of raising `KeyError`.
fn do_find(vm: &mut Vm) -> RuntimeResult<Value> {
    let helper = BuiltinHelper::new(vm, "map", "find");
    helper.check_num_args(2)?;
    let map = helper.expect_map(&helper.local(0)?)?;
    let key = helper.local(1)?;
    let found = map.borrow().get(&key).cloned();
    Ok(found.unwrap_or(Value::Null))
}

/// Remove a key, returning whether it was present.
fn do_remove(vm: &mut Vm) -> RuntimeResult<Value> {
    let helper = BuiltinHelper::new(vm, "map", "remove");
    helper.check_num_args(2)?;
    let map = helper.expect_map(&helper.local(0)?)?;
    let key = helper.local(1)?;
    let removed = map
        .borrow_mut()
        .entries
        .remove_entry(&crate::value::MapKey(key));
    match removed {
        Some((old_key, old_value)) => {
            vm.release(old_key.0)?;
            vm.release(old_value)?;
            Ok(Value::Bool(true))
        }
        None => Ok(Value::Bool(false)),
    }
}

fn do_rewind(vm: &mut Vm) -> RuntimeResult<Value> {
    let helper = BuiltinHelper::new(vm, "map", "rewind");
    helper.check_num_args(1)?;
    let map = helper.expect_map(&helper.local(0)?)?;
    map.borrow_mut().index = 0;
    Ok(Value::Null)
}

/// Return `[more, [key, value]]` in canonical key order and advance the
/// cursor; `[false, null]` once exhausted.
fn do_next(vm: &mut Vm) -> RuntimeResult<Value> {
    let helper = BuiltinHelper::new(vm, "map", "next");
    helper.check_num_args(1)?;
    let map = helper.expect_map(&helper.local(0)?)?;
    let mut map = map.borrow_mut();
    let idx = map.index;
    let result = if let Some((key, value)) =
        map.entries.iter().nth(idx).map(|(k, v)| (k.0.clone(), v.clone()))
    {
        map.index += 1;
        let pair = Vector::from_items(vec![key, value]);
        vec![Value::Bool(true), Value::Vec(pair)]
    } else {
        // exhausted; the cursor stays put so an empty map ends at 0
        vec![Value::Bool(false), Value::Null]
    };
    Ok(Value::Vec(Vector::from_items(result)))
}
