//! Deva runtime: the stack-based virtual machine
//!
//! Executes code modules produced by the compiler back-end or loaded from
//! `.dvc` files. Strictly single-threaded: one [`vm::Vm`] owns the value
//! stack, the frame chain, every loaded module and the native-module
//! registry, and nothing is ever touched concurrently.
//!
//! # Modules
//!
//! - `value`: the tagged runtime value and its ordering/printing rules
//! - `frame`: activation records for calls and lexical blocks
//! - `module`: loaded script modules and the native-module registry
//! - `vm`: the dispatch loop
//! - `builtins`: global built-in functions (`print`, `str`, `length`, ...)
//! - `vector_builtins`, `map_builtins`, `string_builtins`: per-type method
//!   tables consulted by the dot operator
//! - `builtin_helpers`: typed argument access for native functions
//! - `refmap`: live-object registry behind the `ref-count-map` feature

pub mod builtin_helpers;
pub mod builtins;
pub mod frame;
pub mod map_builtins;
pub mod module;
pub mod refmap;
pub mod string_builtins;
pub mod value;
pub mod vector_builtins;
pub mod vm;

pub use module::{Module, NativeModule};
pub use value::Value;
pub use vm::Vm;
