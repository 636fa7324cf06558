//! Built-in methods on vectors
//!
//! A fixed table mapping method names to native functions. `method_load`
//! consults it whenever the receiver is a vector; every entry is a method,
//! so self arrives in local slot 0.
//!
//! `rewind` and `next` are the enumerable contract `for x in v` relies on:
//! `rewind` resets the vector's cursor, `next` returns `[more, value]` and
//! advances it. The cursor lives on the vector itself, so nested iteration
//! over the same vector is not supported.

use deva_core::{ErrorKind, RuntimeError, RuntimeResult};

use crate::builtin_helpers::BuiltinHelper;
use crate::value::{copy_value, NativeFn, NativeFunction, Value, Vector};
use crate::vm::Vm;

const BUILTINS: &[(&str, &'static str, NativeFunction)] = &[
    ("append", "vector.append", do_append),
    ("length", "vector.length", do_length),
    ("copy", "vector.copy", do_copy),
    ("reverse", "vector.reverse", do_reverse),
    ("join", "vector.join", do_join),
    ("rewind", "vector.rewind", do_rewind),
    ("next", "vector.next", do_next),
];

/// Table lookup used by `method_load`.
pub fn find(name: &str) -> Option<NativeFn> {
    BUILTINS
        .iter()
        .find(|&&(n, _, _)| n == name)
        .map(|&(_, qualified, func)| NativeFn { name: qualified, func, is_method: true })
}

fn do_append(vm: &mut Vm) -> RuntimeResult<Value> {
    let helper = BuiltinHelper::new(vm, "vector", "append");
    helper.check_num_args(2)?;
    let vec = helper.expect_vector(&helper.local(0)?)?;
    let item = helper.local(1)?;
    vec.borrow_mut().items.push(item);
    Ok(Value::Null)
}

fn do_length(vm: &mut Vm) -> RuntimeResult<Value> {
    let helper = BuiltinHelper::new(vm, "vector", "length");
    helper.check_num_args(1)?;
    let vec = helper.expect_vector(&helper.local(0)?)?;
    let len = vec.borrow().items.len();
    Ok(Value::Num(len as f64))
}

fn do_copy(vm: &mut Vm) -> RuntimeResult<Value> {
    let helper = BuiltinHelper::new(vm, "vector", "copy");
    helper.check_num_args(1)?;
    let this = helper.local(0)?;
    helper.expect_vector(&this)?;
    Ok(copy_value(&this))
}

fn do_reverse(vm: &mut Vm) -> RuntimeResult<Value> {
    let helper = BuiltinHelper::new(vm, "vector", "reverse");
    helper.check_num_args(1)?;
    let vec = helper.expect_vector(&helper.local(0)?)?;
    vec.borrow_mut().items.reverse();
    Ok(Value::Null)
}

/// Concatenate string elements with a separator (empty by default).
fn do_join(vm: &mut Vm) -> RuntimeResult<Value> {
    let helper = BuiltinHelper::new(vm, "vector", "join");
    helper.check_num_args_range(1, 2)?;
    let vec = helper.expect_vector(&helper.local(0)?)?;
    let sep = if helper.num_args()? == 2 {
        helper.expect_string(&helper.local(1)?)?.to_string()
    } else {
        String::new()
    };
    let mut out = String::new();
    for (i, item) in vec.borrow().items.iter().enumerate() {
        let Value::Str(s) = item else {
            return Err(RuntimeError::new(
                ErrorKind::TypeMismatch,
                format!("vector.join: element {} is {}, not a string", i, item.type_name()),
            ));
        };
        if i > 0 {
            out.push_str(&sep);
        }
        out.push_str(s);
    }
    Ok(Value::str(&out))
}

fn do_rewind(vm: &mut Vm) -> RuntimeResult<Value> {
    let helper = BuiltinHelper::new(vm, "vector", "rewind");
    helper.check_num_args(1)?;
    let vec = helper.expect_vector(&helper.local(0)?)?;
    vec.borrow_mut().index = 0;
    Ok(Value::Null)
}

/// Return `[more, value]` and advance the cursor; `[false, null]` once the
/// vector is exhausted.
fn do_next(vm: &mut Vm) -> RuntimeResult<Value> {
    let helper = BuiltinHelper::new(vm, "vector", "next");
    helper.check_num_args(1)?;
    let vec = helper.expect_vector(&helper.local(0)?)?;
    let mut vec = vec.borrow_mut();
    let idx = vec.index;
    let result = if idx < vec.items.len() {
        let item = vec.items[idx].clone();
        vec.index += 1;
        vec![Value::Bool(true), item]
    } else {
        // exhausted; the cursor stays put so an empty vector ends at 0
        vec![Value::Bool(false), Value::Null]
    };
    Ok(Value::Vec(Vector::from_items(result)))
}
