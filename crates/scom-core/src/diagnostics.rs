//! Diagnostics collection.
//!
//! The compiler reports everything it has to say — warnings as it goes,
//! plus at most one fatal error — into a [`Diagnostics`] sink owned by the
//! caller. There is no other output channel.

use std::fmt;

use crate::CompileError;

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Advisory; compilation continues.
    Warning,
    /// The program text is wrong; compilation is abandoned.
    UserError,
    /// A compiler invariant failed; compilation is abandoned.
    InternalError,
}

/// One message, located in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Name of the source section.
    pub section: String,
    /// 1-based line within the section.
    pub line: usize,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Warning => "warning",
            Severity::UserError => "error",
            Severity::InternalError => "error",
        };
        write!(
            f,
            "{}:{}: {}: {}",
            self.section, self.line, tag, self.message
        )
    }
}

/// Accumulates diagnostics over one compilation.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning at the given location.
    pub fn warn(&mut self, section: impl Into<String>, line: usize, message: impl Into<String>) {
        self.entries.push(Diagnostic {
            severity: Severity::Warning,
            section: section.into(),
            line,
            message: message.into(),
        });
    }

    /// Record a fatal error. Called once, by the driver.
    pub fn push_error(&mut self, err: &CompileError) {
        let (section, line) = err.location();
        let severity = if err.is_internal() {
            Severity::InternalError
        } else {
            Severity::UserError
        };
        // The rendered message keeps the "Internal error: " prefix so hosts
        // that only show text can still tell bugs from user mistakes.
        let message = if err.is_internal() {
            format!("Internal error: {}", err.message())
        } else {
            err.message().to_string()
        };
        self.entries.push(Diagnostic {
            severity,
            section: section.to_string(),
            line,
            message,
        });
    }

    /// All collected diagnostics, in emission order.
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// Whether a fatal error has been recorded.
    pub fn has_error(&self) -> bool {
        self.entries
            .iter()
            .any(|d| d.severity >= Severity::UserError)
    }

    /// Messages of all warnings, for tests.
    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_do_not_fail_the_compile() {
        let mut diag = Diagnostics::new();
        diag.warn("S", 3, "Code execution cannot reach this point");
        assert!(!diag.has_error());
        assert_eq!(diag.entries().len(), 1);
    }

    #[test]
    fn errors_are_fatal() {
        let mut diag = Diagnostics::new();
        diag.push_error(&CompileError::User {
            section: "S".to_string(),
            line: 7,
            message: "Expected ';'".to_string(),
        });
        assert!(diag.has_error());
    }

    #[test]
    fn internal_error_message_is_prefixed() {
        let mut diag = Diagnostics::new();
        diag.push_error(&CompileError::Internal {
            section: "S".to_string(),
            line: 1,
            message: "negative offset".to_string(),
        });
        assert!(diag.entries()[0].message.starts_with("Internal error: "));
    }
}
