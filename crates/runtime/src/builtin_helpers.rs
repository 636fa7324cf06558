//! Typed argument access for native functions
//!
//! Native functions read their arguments out of the frame the VM pushed for
//! them, exactly like scripted code reads its parameter slots. The helper
//! carries the function's qualified name so every failure message says who
//! was called.

use deva_core::{ErrorKind, RuntimeError, RuntimeResult};

use crate::value::{MapRef, StrRef, Value, VecRef};
use crate::vm::Vm;

pub struct BuiltinHelper<'a> {
    vm: &'a Vm,
    /// `vector`, `map`, `string`, or empty for the global built-ins.
    type_name: &'static str,
    name: &'static str,
}

impl<'a> BuiltinHelper<'a> {
    pub fn new(vm: &'a Vm, type_name: &'static str, name: &'static str) -> Self {
        BuiltinHelper { vm, type_name, name }
    }

    fn qualified(&self) -> String {
        if self.type_name.is_empty() {
            self.name.to_string()
        } else {
            format!("{}.{}", self.type_name, self.name)
        }
    }

    /// Arguments actually passed, including the implicit self for methods.
    pub fn num_args(&self) -> RuntimeResult<u32> {
        Ok(self.vm.native_frame()?.num_args)
    }

    pub fn check_num_args(&self, expected: u32) -> RuntimeResult<()> {
        let got = self.num_args()?;
        if got != expected {
            return Err(RuntimeError::new(
                ErrorKind::ArityError,
                format!(
                    "{}() takes {} arguments, {} given",
                    self.qualified(),
                    expected,
                    got
                ),
            ));
        }
        Ok(())
    }

    pub fn check_num_args_range(&self, min: u32, max: u32) -> RuntimeResult<()> {
        let got = self.num_args()?;
        if got < min || got > max {
            return Err(RuntimeError::new(
                ErrorKind::ArityError,
                format!(
                    "{}() takes {} to {} arguments, {} given",
                    self.qualified(),
                    min,
                    max,
                    got
                ),
            ));
        }
        Ok(())
    }

    /// A copy of local slot `n`; slot 0 is self for methods.
    pub fn local(&self, n: usize) -> RuntimeResult<Value> {
        self.vm
            .native_frame()?
            .locals
            .get(n)
            .cloned()
            .ok_or_else(|| {
                RuntimeError::internal(format!(
                    "{}: argument {} missing from frame",
                    self.qualified(),
                    n
                ))
            })
    }

    fn type_error(&self, wanted: &str, got: &Value) -> RuntimeError {
        RuntimeError::new(
            ErrorKind::TypeMismatch,
            format!(
                "{}: expected {}, got {}",
                self.qualified(),
                wanted,
                got.type_name()
            ),
        )
    }

    pub fn expect_vector(&self, v: &Value) -> RuntimeResult<VecRef> {
        match v {
            Value::Vec(h) => Ok(h.clone()),
            other => Err(self.type_error("a vector", other)),
        }
    }

    pub fn expect_map(&self, v: &Value) -> RuntimeResult<MapRef> {
        match v {
            Value::Map(h) | Value::Class(h) | Value::Instance(h) => Ok(h.clone()),
            other => Err(self.type_error("a map", other)),
        }
    }

    pub fn expect_string(&self, v: &Value) -> RuntimeResult<StrRef> {
        match v {
            Value::Str(s) => Ok(s.clone()),
            other => Err(self.type_error("a string", other)),
        }
    }

    pub fn expect_number(&self, v: &Value) -> RuntimeResult<f64> {
        match v {
            Value::Num(n) => Ok(*n),
            other => Err(self.type_error("a number", other)),
        }
    }
}
