//! Module loading tests: `import` through the search path, module-qualified
//! access, and `.dvc` round trips through the loader.
//!
//! These tests mutate `DEVA_PATH`, so they run serially.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use serial_test::serial;
use tempfile::TempDir;

use deva_core::ErrorKind;
use deva_runtime::module::SEARCH_PATH_VAR;
use deva_runtime::Vm;

#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).expect("captured output is UTF-8")
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn run_with_path(source: &str, dir: &TempDir) -> Result<String, deva_core::RuntimeError> {
    // SAFETY: tests in this file are serialized, so no concurrent env access
    unsafe { std::env::set_var(SEARCH_PATH_VAR, dir.path()) };
    let code = devac::compile_source(source, "main.dv", &devac::CompileOptions::default())
        .expect("main compiles");
    let buf = SharedBuf::default();
    let mut vm = Vm::with_output(Box::new(buf.clone()));
    let result = vm.run_code(Rc::new(code), "main");
    vm.shutdown().expect("shutdown");
    unsafe { std::env::remove_var(SEARCH_PATH_VAR) };
    result.map(|_| buf.contents())
}

#[test]
#[serial]
fn test_import_source_module() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("mathy.dv"),
        "def double(x) { return x * 2; }\nanswer = 21;\n",
    )
    .unwrap();

    let out = run_with_path(
        "import mathy; print(mathy.double(mathy.answer));",
        &dir,
    )
    .unwrap();
    assert_eq!(out, "42\n");
}

#[test]
#[serial]
fn test_import_compiled_module() {
    let dir = TempDir::new().unwrap();
    let code = devac::compile_source(
        "def triple(x) { return x * 3; }",
        "trip.dv",
        &devac::CompileOptions::default(),
    )
    .unwrap();
    std::fs::write(dir.path().join("trip.dvc"), deva_core::write_code(&code)).unwrap();

    let out = run_with_path("import trip; print(trip.triple(5));", &dir).unwrap();
    assert_eq!(out, "15\n");
}

#[test]
#[serial]
fn test_import_runs_module_top_level_once() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("noisy.dv"), "print(\"loading\");\n").unwrap();

    let out = run_with_path("import noisy; import noisy; print(\"done\");", &dir).unwrap();
    assert_eq!(out, "loading\ndone\n");
}

#[test]
#[serial]
fn test_missing_module() {
    let dir = TempDir::new().unwrap();
    let err = run_with_path("import nonexistent;", &dir).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ImportError);
}

#[test]
#[serial]
fn test_module_member_missing() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("tiny.dv"), "x = 1;\n").unwrap();
    let err = run_with_path("import tiny; print(tiny.zzz);", &dir).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NameError);
}

#[test]
#[serial]
fn test_new_through_module_path() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("zoo.dv"),
        "class Dog { def new(self, name) { self.name = name; } \
         def speak(self) { return self.name + \" says woof\"; } }\n",
    )
    .unwrap();

    let out = run_with_path(
        "import zoo; d = new zoo.Dog(\"rex\"); print(d.speak());",
        &dir,
    )
    .unwrap();
    assert_eq!(out, "rex says woof\n");
}

#[test]
#[serial]
fn test_compile_error_in_import_reports_import_error() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("broken.dv"), "def (\n").unwrap();
    let err = run_with_path("import broken;", &dir).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ImportError);
}
