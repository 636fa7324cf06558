//! Runtime error vocabulary
//!
//! Every failure an executing program can provoke is one of the kinds below.
//! Errors unwind the frame chain until the driver catches them at the top
//! level; there is no mid-execution recovery. Internal-consistency errors
//! (bad opcodes, stack underflow, unbalanced scopes) use [`ErrorKind::Internal`]
//! and indicate a bug in the compiler or VM rather than the user's program.

use std::fmt;

/// The categories of runtime failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An operation was applied to operands of the wrong type.
    TypeMismatch,
    /// Vector or string index out of range.
    IndexError,
    /// Missing map key.
    KeyError,
    /// Reference to a name that could not be resolved anywhere.
    NameError,
    /// Wrong number of arguments in a call.
    ArityError,
    /// Division or modulus by zero, or a non-integral number where an
    /// integer is required.
    NumericError,
    /// I/O failure (unreadable file, malformed `.dvc` image).
    FileError,
    /// A module could not be located or loaded.
    ImportError,
    /// Violated VM invariant: invalid opcode, stack underflow, mismatched
    /// enter/leave. Always a toolchain bug, never the user's program.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TypeMismatch => "TypeMismatch",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::KeyError => "KeyError",
            ErrorKind::NameError => "NameError",
            ErrorKind::ArityError => "ArityError",
            ErrorKind::NumericError => "NumericError",
            ErrorKind::FileError => "FileError",
            ErrorKind::ImportError => "ImportError",
            ErrorKind::Internal => "InternalError",
        }
    }
}

/// A runtime error with an optional source location.
///
/// The location is attached by the VM from its current line-number state
/// (maintained by `line_num` instructions when the module was compiled with
/// debug info); errors raised before any line marker carry no location.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<(String, u32)>,
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        RuntimeError {
            kind,
            message: message.into(),
            location: None,
        }
    }

    /// Attach a source location if none has been recorded yet.
    ///
    /// The first location wins: an error raised deep in a call chain keeps
    /// the line it was raised at, not the lines it unwound through.
    pub fn with_location(mut self, file: &str, line: u32) -> Self {
        if self.location.is_none() && line > 0 {
            self.location = Some((file.to_string(), line));
        }
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        RuntimeError::new(ErrorKind::Internal, message)
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some((file, line)) => {
                write!(f, "{}:{}: {}: {}", file, line, self.kind.as_str(), self.message)
            }
            None => write!(f, "{}: {}", self.kind.as_str(), self.message),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<std::io::Error> for RuntimeError {
    fn from(e: std::io::Error) -> Self {
        RuntimeError::new(ErrorKind::FileError, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_location() {
        let err = RuntimeError::new(ErrorKind::KeyError, "key 'x' not found")
            .with_location("test.dv", 12);
        assert_eq!(err.to_string(), "test.dv:12: KeyError: key 'x' not found");
    }

    #[test]
    fn test_display_without_location() {
        let err = RuntimeError::new(ErrorKind::NumericError, "division by zero");
        assert_eq!(err.to_string(), "NumericError: division by zero");
    }

    #[test]
    fn test_first_location_wins() {
        let err = RuntimeError::new(ErrorKind::NameError, "symbol 'y' not found")
            .with_location("inner.dv", 3)
            .with_location("outer.dv", 9);
        assert_eq!(err.location, Some(("inner.dv".to_string(), 3)));
    }
}
