// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for vmsteward resource handling
#[derive(Error, Debug, Diagnostic)]
pub enum StewardError {
    /// Invalid resource
    #[error("Invalid resource: {reason}")]
    #[diagnostic(code(vmsteward::invalid_resource), help("{suggestion}"))]
    InvalidResource {
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, StewardError>;

impl StewardError {
    /// Create an InvalidResource error
    pub fn invalid_resource(reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidResource {
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }
}
