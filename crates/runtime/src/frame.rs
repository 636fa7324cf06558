//! Activation records
//!
//! The VM's frame chain mixes two kinds of entry: call frames (one per
//! scripted or native invocation, owning the local slots) and block frames
//! (pushed by `enter`, popped by `leave`). Block frames own no storage of
//! their own — locals declared inside a block live in the enclosing call
//! frame's slot array — but they remember which slots were defined inside
//! them so `leave` can release those eagerly.

use crate::value::{FuncRef, StrRef, Value};

/// What a call frame is executing.
#[derive(Debug)]
pub enum Callee {
    Scripted(FuncRef),
    Native { name: StrRef },
}

#[derive(Debug)]
pub struct CallFrame {
    pub callee: Callee,
    /// Local slots; parameters occupy `0..num_params`.
    pub locals: Vec<Value>,
    /// Arguments actually passed by the caller (before default fill-in).
    pub num_args: u32,
    /// Caller state to restore on return. Meaningless for native frames.
    pub return_ip: usize,
    pub caller_module: Option<crate::value::ModuleRef>,
}

#[derive(Debug)]
pub enum Frame {
    Call(CallFrame),
    /// A lexical block scope; `slots` are the locals defined inside it.
    Block { slots: Vec<u32> },
}

impl Frame {
    pub fn is_block(&self) -> bool {
        matches!(self, Frame::Block { .. })
    }

    pub fn as_call(&self) -> Option<&CallFrame> {
        match self {
            Frame::Call(c) => Some(c),
            Frame::Block { .. } => None,
        }
    }

    pub fn as_call_mut(&mut self) -> Option<&mut CallFrame> {
        match self {
            Frame::Call(c) => Some(c),
            Frame::Block { .. } => None,
        }
    }
}

impl CallFrame {
    /// Frame description for stack traces.
    pub fn describe(&self) -> String {
        match &self.callee {
            Callee::Scripted(f) => f
                .module
                .code
                .function(f.index)
                .map(|fo| format!("{} ({})", fo.name, fo.filename))
                .unwrap_or_else(|_| "?".to_string()),
            Callee::Native { name, .. } => format!("{} (native)", name),
        }
    }
}
