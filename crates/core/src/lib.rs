//! Deva Core: the bytecode foundation shared by the compiler and the VM
//!
//! This crate defines everything both halves of the toolchain must agree on:
//! the opcode set, the code-module container (constant pool, global names,
//! function table, instruction bytes), the `.dvc` on-disk format, and the
//! runtime error vocabulary.
//!
//! # Modules
//!
//! - `opcode`: the instruction set (one byte opcode + 32-bit operands)
//! - `code`: the immutable compiled unit and its function objects
//! - `fileformat`: `.dvc` reader/writer
//! - `disasm`: instruction listing for `devac disasm` and tests
//! - `error`: runtime error kinds and the `file:line: kind: message` format

pub mod code;
pub mod disasm;
pub mod error;
pub mod fileformat;
pub mod opcode;

pub use code::{Code, Constant, DefaultValue, FunctionObject, LineMap, ParamDefault};
pub use error::{ErrorKind, RuntimeError, RuntimeResult};
pub use fileformat::{read_code, write_code, FILE_MAGIC, FILE_VERSION};
pub use opcode::Opcode;

/// Name of the synthetic per-module entry function.
pub const MAIN_FUNCTION: &str = "@main";
