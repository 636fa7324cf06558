//! Deva compiler library
//!
//! The full front half of the toolchain: tokenizer and parser (`parser`),
//! semantic checker and scope table (`semantics`, `scope`), and the bytecode
//! back-end (`codegen`, `emit`). [`compile_source`] runs the whole pipeline
//! on one translation unit and hands back a ready-to-run code module.

pub mod ast;
pub mod codegen;
pub mod config;
pub mod emit;
pub mod error;
pub mod parser;
pub mod scope;
pub mod semantics;

use std::path::Path;

use deva_core::Code;

pub use codegen::CompileOptions;
pub use config::CompilerConfig;
pub use error::{CompileError, CompileErrorKind};

/// Parse, check and compile one source unit.
pub fn compile_source(
    source: &str,
    filename: &str,
    options: &CompileOptions,
) -> Result<Code, Vec<CompileError>> {
    let mut program = parser::parse_source(source, filename).map_err(|e| vec![e])?;
    let analysis = semantics::analyze(&mut program)?;
    codegen::compile(&program, &analysis, options).map_err(|e| vec![e])
}

/// Compile a `.dv` file from disk.
pub fn compile_file(path: &Path, options: &CompileOptions) -> Result<Code, Vec<CompileError>> {
    let filename = path.to_string_lossy().to_string();
    let source = std::fs::read_to_string(path).map_err(|e| {
        vec![CompileError::resolution(
            &filename,
            0,
            format!("cannot read source file: {}", e),
        )]
    })?;
    compile_source(&source, &filename, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_source_end_to_end() {
        let code = compile_source(
            "def add(a, b) { return a + b; } total = add(2, 3);",
            "t.dv",
            &CompileOptions::default(),
        )
        .unwrap();
        assert!(code.find_function("add").is_some());
        assert!(code.find_function("@main").is_some());
        assert!(!code.bytes.is_empty());
    }

    #[test]
    fn test_compile_source_reports_syntax_error() {
        let errs = compile_source("def (", "t.dv", &CompileOptions::default()).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].kind, CompileErrorKind::Syntax);
    }

    #[test]
    fn test_compile_source_reports_all_semantic_errors() {
        let errs = compile_source(
            "const a = 1; a = 2; break;",
            "t.dv",
            &CompileOptions::default(),
        )
        .unwrap_err();
        assert_eq!(errs.len(), 2);
        assert!(errs.iter().all(|e| e.kind == CompileErrorKind::Semantic));
    }

    #[test]
    fn test_compiled_module_round_trips_through_dvc() {
        let code = compile_source(
            "def f(x = 1) { return x; } print(f());",
            "t.dv",
            &CompileOptions::default(),
        )
        .unwrap();
        let image = deva_core::write_code(&code);
        let back = deva_core::read_code(&image).unwrap();
        assert_eq!(back.bytes, code.bytes);
        assert_eq!(back.functions, code.functions);
        assert_eq!(deva_core::write_code(&back), image);
    }
}
