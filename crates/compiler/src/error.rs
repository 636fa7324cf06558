//! Compile-time error reporting
//!
//! Syntax, semantic and resolution failures all surface as [`CompileError`]
//! values in the `file:line: kind: message` format. Compilation of the
//! current unit aborts on the first syntax error; the semantic checker
//! collects everything it finds before giving up.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    Syntax,
    Semantic,
    Resolution,
}

impl CompileErrorKind {
    fn as_str(&self) -> &'static str {
        match self {
            CompileErrorKind::Syntax => "SyntaxError",
            CompileErrorKind::Semantic => "SemanticError",
            CompileErrorKind::Resolution => "ResolutionError",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub file: String,
    pub line: u32,
    pub message: String,
}

impl CompileError {
    pub fn syntax(file: &str, line: u32, message: impl Into<String>) -> Self {
        CompileError {
            kind: CompileErrorKind::Syntax,
            file: file.to_string(),
            line,
            message: message.into(),
        }
    }

    pub fn semantic(file: &str, line: u32, message: impl Into<String>) -> Self {
        CompileError {
            kind: CompileErrorKind::Semantic,
            file: file.to_string(),
            line,
            message: message.into(),
        }
    }

    pub fn resolution(file: &str, line: u32, message: impl Into<String>) -> Self {
        CompileError {
            kind: CompileErrorKind::Resolution,
            file: file.to_string(),
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {}: {}",
            self.file,
            self.line,
            self.kind.as_str(),
            self.message
        )
    }
}

impl std::error::Error for CompileError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_format() {
        let err = CompileError::syntax("m.dv", 4, "expected ';'");
        assert_eq!(err.to_string(), "m.dv:4: SyntaxError: expected ';'");
    }
}
