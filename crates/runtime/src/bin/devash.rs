//! Deva interactive shell
//!
//! Reads statements (continuing across lines while braces are open),
//! compiles each batch as a small module and runs it against one persistent
//! VM, so globals defined earlier stay visible. Errors are printed and the
//! partial input discarded; the session continues.

use std::process;
use std::rc::Rc;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use devac::{parser, CompileOptions};
use deva_runtime::Vm;

fn main() {
    println!("deva {} interactive shell", env!("CARGO_PKG_VERSION"));

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("cannot start line editor: {}", e);
            process::exit(1);
        }
    };

    let mut vm = Vm::new();
    let options = CompileOptions { debug_info: true };
    let mut buffer = String::new();
    let mut snippet = 0usize;

    loop {
        let prompt = if buffer.is_empty() { "> " } else { "... " };
        match rl.readline(prompt) {
            Ok(line) => {
                buffer.push_str(&line);
                buffer.push('\n');
                if parser::is_incomplete(&buffer) {
                    continue;
                }
                let source = std::mem::take(&mut buffer);
                if source.trim().is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(source.trim());
                run_snippet(&mut vm, &source, &options, &mut snippet);
            }
            Err(ReadlineError::Interrupted) => {
                // ctrl-c discards the pending statement
                buffer.clear();
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}", e);
                break;
            }
        }
    }

    if let Err(e) = vm.shutdown() {
        eprintln!("{}", e);
    }
}

fn run_snippet(vm: &mut Vm, source: &str, options: &CompileOptions, snippet: &mut usize) {
    let name = format!("shell{}", *snippet);
    *snippet += 1;
    match devac::compile_source(source, "<shell>", options) {
        Ok(code) => match vm.run_code(Rc::new(code), &name) {
            Ok(result) => {
                if let Err(e) = vm.release(result) {
                    eprintln!("{}", e);
                }
            }
            Err(e) => eprintln!("{}", e),
        },
        Err(errors) => {
            for e in errors {
                eprintln!("{}", e);
            }
        }
    }
}
