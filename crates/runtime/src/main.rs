//! Deva interpreter CLI
//!
//! Runs a `.dv` source file (compiled on the fly) or a `.dvc` bytecode file.
//! Arguments after the script path are forwarded to the script's `args()`.

use std::path::{Path, PathBuf};
use std::process;
use std::rc::Rc;

use clap::Parser;

use deva_runtime::{refmap, Vm};

#[derive(Parser)]
#[command(name = "deva")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deva interpreter - run .dv or .dvc files", long_about = None)]
struct Cli {
    /// Script to run (.dv source or .dvc bytecode)
    script: PathBuf,

    /// Skip line-number debug info when compiling a .dv file
    #[arg(long)]
    no_debug_info: bool,

    /// Print the live-object report after the run (requires the
    /// ref-count-map feature)
    #[arg(long)]
    debug_dump: bool,

    /// Arguments forwarded to the script
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    let code = load(&cli.script, cli.no_debug_info);

    let mut vm = Vm::new();
    vm.set_script_args(cli.args);

    let module_name = cli
        .script
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "main".to_string());

    let status = match vm.run_code(Rc::new(code), &module_name) {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("{}", e);
            for frame in vm.stack_trace() {
                eprintln!("  in {}", frame);
            }
            1
        }
    };

    if let Err(e) = vm.shutdown() {
        eprintln!("{}", e);
    }

    if cli.debug_dump {
        let report = refmap::report();
        if report.is_empty() {
            println!("no live objects");
        } else {
            for (kind, count) in report {
                println!("{}: {} live", kind, count);
            }
        }
    }

    process::exit(status);
}

fn load(path: &Path, no_debug_info: bool) -> deva_core::Code {
    match path.extension().and_then(|e| e.to_str()) {
        Some("dvc") => {
            let bytes = match std::fs::read(path) {
                Ok(b) => b,
                Err(e) => {
                    eprintln!("cannot read {}: {}", path.display(), e);
                    process::exit(1);
                }
            };
            match deva_core::read_code(&bytes) {
                Ok(code) => code,
                Err(e) => {
                    eprintln!("{}", e);
                    process::exit(1);
                }
            }
        }
        _ => {
            let options = devac::CompileOptions { debug_info: !no_debug_info };
            match devac::compile_file(path, &options) {
                Ok(code) => code,
                Err(errors) => {
                    for e in errors {
                        eprintln!("{}", e);
                    }
                    process::exit(1);
                }
            }
        }
    }
}
