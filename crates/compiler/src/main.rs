//! Deva compiler CLI
//!
//! `devac build foo.dv` produces `foo.dvc`; `devac disasm` prints the
//! instruction listing of a source or compiled file.

use std::path::{Path, PathBuf};
use std::process;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

use devac::{CompileOptions, CompilerConfig};
use deva_core::{disasm, read_code, write_code, Code};

#[derive(Parser)]
#[command(name = "devac")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deva compiler - compile .dv sources to .dvc bytecode", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a .dv file to bytecode
    Build {
        /// Input .dv source file
        input: PathBuf,

        /// Output path (defaults to the input with a .dvc extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip line-number debug info
        #[arg(long)]
        no_debug_info: bool,

        /// Compiler configuration file (defaults to ./deva.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the instruction listing of a .dv or .dvc file
    Disasm {
        /// Input file
        input: PathBuf,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Commands::Build { input, output, no_debug_info, config } => {
            run_build(&input, output, no_debug_info, config.as_deref());
        }
        Commands::Disasm { input } => run_disasm(&input),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "devac", &mut std::io::stdout());
        }
    }
}

fn load_options(config: Option<&Path>, no_debug_info: bool) -> CompileOptions {
    let config = match config {
        Some(path) => match CompilerConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{}", e);
                process::exit(1);
            }
        },
        None => CompilerConfig::load_default(),
    };
    let mut options = config.compile_options();
    if no_debug_info {
        options.debug_info = false;
    }
    options
}

fn run_build(input: &Path, output: Option<PathBuf>, no_debug_info: bool, config: Option<&Path>) {
    let options = load_options(config, no_debug_info);
    let code = compile_or_exit(input, &options);
    let output = output.unwrap_or_else(|| input.with_extension("dvc"));
    if let Err(e) = std::fs::write(&output, write_code(&code)) {
        eprintln!("cannot write {}: {}", output.display(), e);
        process::exit(1);
    }
    println!("Compiled {} -> {}", input.display(), output.display());
}

fn run_disasm(input: &Path) {
    let code = match input.extension().and_then(|e| e.to_str()) {
        Some("dvc") => {
            let bytes = match std::fs::read(input) {
                Ok(b) => b,
                Err(e) => {
                    eprintln!("cannot read {}: {}", input.display(), e);
                    process::exit(1);
                }
            };
            match read_code(&bytes) {
                Ok(code) => code,
                Err(e) => {
                    eprintln!("{}", e);
                    process::exit(1);
                }
            }
        }
        _ => compile_or_exit(input, &CompileOptions::default()),
    };
    match disasm::listing(&code) {
        Ok(text) => print!("{}", text),
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

fn compile_or_exit(input: &Path, options: &CompileOptions) -> Code {
    match devac::compile_file(input, options) {
        Ok(code) => code,
        Err(errors) => {
            for e in errors {
                eprintln!("{}", e);
            }
            process::exit(1);
        }
    }
}
