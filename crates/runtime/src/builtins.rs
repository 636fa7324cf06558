//! Global built-in functions
//!
//! The last stop in name resolution: `print`, `str`, `length`, `copy` and
//! `type` are reachable from any module without import. None of them are
//! methods, so arguments start at local slot 0.

use std::io::Write;

use deva_core::{ErrorKind, RuntimeError, RuntimeResult};

use crate::builtin_helpers::BuiltinHelper;
use crate::value::{copy_value, display, NativeFn, NativeFunction, Value, Vector};
use crate::vm::Vm;

const BUILTINS: &[(&str, NativeFunction)] = &[
    ("print", do_print),
    ("str", do_str),
    ("length", do_length),
    ("copy", do_copy),
    ("type", do_type),
    ("args", do_args),
];

pub fn find(name: &str) -> Option<NativeFn> {
    BUILTINS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|&(name, func)| NativeFn { name, func, is_method: false })
}

fn do_print(vm: &mut Vm) -> RuntimeResult<Value> {
    let text = {
        let helper = BuiltinHelper::new(vm, "", "print");
        helper.check_num_args(1)?;
        display(&helper.local(0)?)
    };
    writeln!(vm.output(), "{}", text)?;
    Ok(Value::Null)
}

fn do_str(vm: &mut Vm) -> RuntimeResult<Value> {
    let helper = BuiltinHelper::new(vm, "", "str");
    helper.check_num_args(1)?;
    Ok(Value::str(&display(&helper.local(0)?)))
}

fn do_length(vm: &mut Vm) -> RuntimeResult<Value> {
    let helper = BuiltinHelper::new(vm, "", "length");
    helper.check_num_args(1)?;
    let v = helper.local(0)?;
    let len = match &v {
        Value::Str(s) => s.chars().count(),
        Value::Vec(h) => h.borrow().items.len(),
        Value::Map(h) | Value::Class(h) | Value::Instance(h) => h.borrow().entries.len(),
        other => {
            return Err(RuntimeError::new(
                ErrorKind::TypeMismatch,
                format!("length(): {} has no length", other.type_name()),
            ))
        }
    };
    Ok(Value::Num(len as f64))
}

fn do_copy(vm: &mut Vm) -> RuntimeResult<Value> {
    let helper = BuiltinHelper::new(vm, "", "copy");
    helper.check_num_args(1)?;
    Ok(copy_value(&helper.local(0)?))
}

fn do_type(vm: &mut Vm) -> RuntimeResult<Value> {
    let helper = BuiltinHelper::new(vm, "", "type");
    helper.check_num_args(1)?;
    Ok(Value::str(helper.local(0)?.type_name()))
}

/// Command-line arguments the driver forwarded to the script.
fn do_args(vm: &mut Vm) -> RuntimeResult<Value> {
    BuiltinHelper::new(vm, "", "args").check_num_args(0)?;
    let items = vm.script_args().iter().map(|a| Value::str(a)).collect();
    Ok(Value::Vec(Vector::from_items(items)))
}
