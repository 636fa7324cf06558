//! Loaded modules
//!
//! A [`Module`] pairs an immutable code module with its mutable global
//! bindings, stored in a slot array parallel to the code's global-name
//! table. The table cannot grow at run time, so every global a module will
//! ever bind already has a slot.
//!
//! Native modules are statically registered objects that expose values by
//! name; `import` consults the registry before looking for a script file.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use deva_core::{read_code, Code, ErrorKind, RuntimeError, RuntimeResult};

use crate::value::Value;

/// Environment variable listing extra `import` search directories,
/// colon-separated.
pub const SEARCH_PATH_VAR: &str = "DEVA_PATH";

#[derive(Debug)]
pub struct Module {
    pub name: String,
    pub code: Rc<Code>,
    /// One binding slot per entry in `code.names()`.
    globals: RefCell<Vec<Option<Value>>>,
}

impl Module {
    pub fn new(name: &str, code: Rc<Code>) -> Rc<Module> {
        let slots = vec![None; code.names().len()];
        Rc::new(Module {
            name: name.to_string(),
            code,
            globals: RefCell::new(slots),
        })
    }

    pub fn global(&self, idx: u32) -> Option<Value> {
        self.globals.borrow().get(idx as usize).and_then(|v| v.clone())
    }

    pub fn global_by_name(&self, name: &str) -> Option<Value> {
        self.code.find_name(name).and_then(|idx| self.global(idx))
    }

    /// Bind a global, returning the previous value so the VM can release it.
    pub fn set_global(&self, idx: u32, value: Value) -> RuntimeResult<Option<Value>> {
        let mut globals = self.globals.borrow_mut();
        let slot = globals.get_mut(idx as usize).ok_or_else(|| {
            RuntimeError::internal(format!("global slot {} out of range", idx))
        })?;
        Ok(slot.replace(value))
    }

    /// Drain every binding, for teardown at the end of a run.
    pub fn take_globals(&self) -> Vec<Value> {
        self.globals.borrow_mut().iter_mut().filter_map(|s| s.take()).collect()
    }

    /// Resolve an exported name: a bound global first, then the function
    /// table.
    pub fn export(self: &Rc<Self>, name: &str) -> Option<Value> {
        if let Some(v) = self.global_by_name(name) {
            return Some(v);
        }
        self.code.find_function(name).map(|index| {
            Value::Func(crate::value::FuncRef { module: self.clone(), index })
        })
    }
}

/// A statically registered module implemented in Rust. Lookup is by name;
/// the values handed out are ordinary [`Value`]s (usually native functions).
pub trait NativeModule: std::fmt::Debug {
    fn name(&self) -> &str;
    fn get(&self, name: &str) -> Option<Value>;
}

/// Locate `name.dv` or `name.dvc` in the search path: the current directory,
/// then every entry of `DEVA_PATH`. A compiled file wins over a source file
/// in the same directory.
pub fn find_module_file(name: &str) -> Option<PathBuf> {
    let mut dirs = vec![PathBuf::from(".")];
    if let Ok(var) = std::env::var(SEARCH_PATH_VAR) {
        dirs.extend(var.split(':').filter(|s| !s.is_empty()).map(PathBuf::from));
    }
    for dir in dirs {
        let compiled = dir.join(format!("{}.dvc", name));
        if compiled.is_file() {
            return Some(compiled);
        }
        let source = dir.join(format!("{}.dv", name));
        if source.is_file() {
            return Some(source);
        }
    }
    None
}

/// Read a module's code from disk, compiling `.dv` sources on demand.
pub fn load_code(path: &Path) -> RuntimeResult<Rc<Code>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("dvc") => {
            let bytes = std::fs::read(path)?;
            Ok(Rc::new(read_code(&bytes)?))
        }
        Some("dv") => {
            let code = devac::compile_file(path, &devac::CompileOptions::default())
                .map_err(|errors| {
                    let detail = errors
                        .iter()
                        .map(|e| e.to_string())
                        .collect::<Vec<_>>()
                        .join("; ");
                    RuntimeError::new(ErrorKind::ImportError, detail)
                })?;
            Ok(Rc::new(code))
        }
        _ => Err(RuntimeError::new(
            ErrorKind::ImportError,
            format!("unrecognized module file '{}'", path.display()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_module() -> Rc<Module> {
        let mut code = Code::new();
        code.add_name("x");
        code.add_name("y");
        Module::new("m", Rc::new(code))
    }

    #[test]
    fn test_globals_start_unbound() {
        let m = empty_module();
        assert!(m.global(0).is_none());
        assert!(m.global_by_name("y").is_none());
        assert!(m.global_by_name("missing").is_none());
    }

    #[test]
    fn test_set_global_returns_previous() {
        let m = empty_module();
        assert!(m.set_global(0, Value::Num(1.0)).unwrap().is_none());
        let old = m.set_global(0, Value::Num(2.0)).unwrap();
        assert!(matches!(old, Some(Value::Num(n)) if n == 1.0));
        assert!(matches!(m.global(0), Some(Value::Num(n)) if n == 2.0));
    }

    #[test]
    fn test_set_global_out_of_range_is_internal_error() {
        let m = empty_module();
        let err = m.set_global(99, Value::Null).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }
}
