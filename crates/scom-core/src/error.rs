//! The compile-error type.
//!
//! The compiler fails through exactly one channel: every parser function
//! returns `Result<_, CompileError>` and `?` unwinds to the driver, which
//! records the error in the [`Diagnostics`](crate::Diagnostics) sink and
//! abandons the compilation. Partial outputs (code, fixups) are left as-is;
//! the caller must not consume them.

use thiserror::Error;

/// A fatal compilation error, located in the source.
///
/// `User` errors point at the program text; `Internal` errors flag
/// invariants the compiler believed could not fail and should be treated as
/// compiler bugs by the host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// The program text is at fault.
    #[error("{section}:{line}: {message}")]
    User {
        /// Name of the source section the cursor was in.
        section: String,
        /// 1-based line within the section.
        line: usize,
        /// Human-readable description.
        message: String,
    },

    /// A compiler invariant failed.
    #[error("{section}:{line}: Internal error: {message}")]
    Internal {
        section: String,
        line: usize,
        message: String,
    },
}

impl CompileError {
    /// Whether this error is an internal (compiler-bug) error.
    pub fn is_internal(&self) -> bool {
        matches!(self, CompileError::Internal { .. })
    }

    /// The message text, without location or severity prefix.
    pub fn message(&self) -> &str {
        match self {
            CompileError::User { message, .. } => message,
            CompileError::Internal { message, .. } => message,
        }
    }

    /// The `(section, line)` the error points at.
    pub fn location(&self) -> (&str, usize) {
        match self {
            CompileError::User { section, line, .. } => (section, *line),
            CompileError::Internal { section, line, .. } => (section, *line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_location() {
        let err = CompileError::User {
            section: "room1.asc".to_string(),
            line: 12,
            message: "Expected ';'".to_string(),
        };
        assert_eq!(format!("{}", err), "room1.asc:12: Expected ';'");
    }

    #[test]
    fn internal_errors_are_prefixed() {
        let err = CompileError::Internal {
            section: "S".to_string(),
            line: 1,
            message: "Chunk accounting".to_string(),
        };
        assert!(format!("{}", err).contains("Internal error: Chunk accounting"));
        assert!(err.is_internal());
    }
}
