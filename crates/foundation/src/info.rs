//! Verification diagnostics.
//!
//! `verify_params` hooks append human-readable messages here. The
//! accumulated tree rides along with construction errors so callers see
//! every problem at once, not just the first.

use serde::Serialize;

/// Diagnostic accumulator passed to `verify_params`.
///
/// A non-empty `errors` list is a verification failure regardless of the
/// hook's boolean return value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyInfo {
    /// Fatal problems with the supplied parameters.
    pub errors: Vec<String>,
    /// Informational notes (optional entries seen, defaults applied).
    pub notes: Vec<String>,
}

impl VerifyInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fatal diagnostic.
    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Append an informational note.
    pub fn note(&mut self, msg: impl Into<String>) {
        self.notes.push(msg.into());
    }

    /// True when no errors have been recorded.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// One-line rendering for error messages.
    pub fn summary(&self) -> String {
        self.errors.join("; ")
    }
}

impl std::fmt::Display for VerifyInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.summary())
    }
}
