//! Diagnostics collected during one parse.

use std::fmt;

use serde::Serialize;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "debug",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// One reported condition, tagged with the nesting depth it occurred at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub depth: usize,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}{}", self.severity, "  ".repeat(self.depth), self.message)
    }
}

/// Everything the parser reported, in order. Each entry is also logged.
#[derive(Debug, Clone, Default)]
pub struct ParseResults {
    diagnostics: Vec<Diagnostic>,
}

impl ParseResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn debug(&mut self, depth: usize, message: impl Into<String>) {
        let message = message.into();
        debug!(depth, "{message}");
        self.push(Severity::Debug, depth, message);
    }

    pub fn warn(&mut self, depth: usize, message: impl Into<String>) {
        let message = message.into();
        warn!(depth, "{message}");
        self.push(Severity::Warning, depth, message);
    }

    pub fn error(&mut self, depth: usize, message: impl Into<String>) {
        let message = message.into();
        error!(depth, "{message}");
        self.push(Severity::Error, depth, message);
    }

    fn push(&mut self, severity: Severity, depth: usize, message: String) {
        self.diagnostics.push(Diagnostic {
            severity,
            depth,
            message,
        });
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.with_severity(Severity::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.with_severity(Severity::Error)
    }

    fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(move |d| d.severity == severity)
    }

    pub fn has_warnings(&self) -> bool {
        self.warnings().next().is_some()
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    /// Formatted messages at warning level and above.
    pub fn msgs(&self) -> Vec<String> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity >= Severity::Warning)
            .map(ToString::to_string)
            .collect()
    }

    pub fn clear(&mut self) {
        self.diagnostics.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_in_order() {
        let mut res = ParseResults::new();
        res.debug(0, "starting");
        res.warn(1, "odd header");
        res.error(2, "no boundary");

        assert_eq!(res.diagnostics().len(), 3);
        assert!(res.has_warnings());
        assert!(res.has_errors());
        assert_eq!(res.errors().next().unwrap().depth, 2);
        assert_eq!(
            res.msgs(),
            vec!["warning:   odd header".to_string(), "error:     no boundary".to_string()]
        );

        res.clear();
        assert!(res.diagnostics().is_empty());
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Debug);
    }
}
