//! Built-in methods on strings
//!
//! Strings are immutable; everything here returns a new value. Indexing and
//! lengths are in characters, not bytes.

use deva_core::RuntimeResult;

use crate::builtin_helpers::BuiltinHelper;
use crate::value::{NativeFn, NativeFunction, Value, Vector};
use crate::vm::Vm;

const BUILTINS: &[(&str, &'static str, NativeFunction)] = &[
    ("length", "string.length", do_length),
    ("copy", "string.copy", do_copy),
    ("split", "string.split", do_split),
    ("find", "string.find", do_find),
];

pub fn find(name: &str) -> Option<NativeFn> {
    BUILTINS
        .iter()
        .find(|&&(n, _, _)| n == name)
        .map(|&(_, qualified, func)| NativeFn { name: qualified, func, is_method: true })
}

fn do_length(vm: &mut Vm) -> RuntimeResult<Value> {
    let helper = BuiltinHelper::new(vm, "string", "length");
    helper.check_num_args(1)?;
    let s = helper.expect_string(&helper.local(0)?)?;
    Ok(Value::Num(s.chars().count() as f64))
}

fn do_copy(vm: &mut Vm) -> RuntimeResult<Value> {
    let helper = BuiltinHelper::new(vm, "string", "copy");
    helper.check_num_args(1)?;
    let s = helper.expect_string(&helper.local(0)?)?;
    Ok(Value::Str(s))
}

/// Split at any character of the delimiter set (whitespace by default).
/// Adjacent delimiters yield empty fields, so joining with a single-char
/// separator reproduces the original. An empty set splits into characters.
fn do_split(vm: &mut Vm) -> RuntimeResult<Value> {
    let helper = BuiltinHelper::new(vm, "string", "split");
    helper.check_num_args_range(1, 2)?;
    let s = helper.expect_string(&helper.local(0)?)?;
    let chars = if helper.num_args()? == 2 {
        helper.expect_string(&helper.local(1)?)?.to_string()
    } else {
        " \t\n".to_string()
    };

    let items: Vec<Value> = if chars.is_empty() {
        s.chars().map(|c| Value::str(&c.to_string())).collect()
    } else {
        s.split(|c| chars.contains(c)).map(Value::str).collect()
    };
    Ok(Value::Vec(Vector::from_items(items)))
}

/// Character index of the first occurrence of a substring, or null.
fn do_find(vm: &mut Vm) -> RuntimeResult<Value> {
    let helper = BuiltinHelper::new(vm, "string", "find");
    helper.check_num_args(2)?;
    let s = helper.expect_string(&helper.local(0)?)?;
    let needle = helper.expect_string(&helper.local(1)?)?;
    match s.find(&*needle) {
        Some(byte_idx) => {
            let char_idx = s[..byte_idx].chars().count();
            Ok(Value::Num(char_idx as f64))
        }
        None => Ok(Value::Null),
    }
}
