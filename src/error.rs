//! Error types produced by the percolator.
//!
//! Registration and percolation share a single error surface,
//! [`PercolatorError`]. Two failure kinds are deliberately kept apart from it:
//!
//! | Error | Where | Handling |
//! |-------|-------|----------|
//! | [`UnsupportedQuery`](crate::analyzer::UnsupportedQuery) | analyzer | recovered locally, stored query is marked `failed` |
//! | [`StoreError`](crate::store::StoreError) | postings backends | wrapped into [`PercolatorError::Store`] |
//! | [`ConfigLoadError`](crate::config::ConfigLoadError) | YAML config loading | surfaced at startup |
//!
//! Everything else is a request-level failure: nothing is committed for a
//! registration that errors, and a percolation that errors returns no partial
//! match set.

use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by registration and percolation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PercolatorError {
    /// An argument violated a structural constraint (e.g. mismatched range bound widths).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The query uses a construct that cannot be expressed as a per-document signature.
    #[error("unsupported query shape: {0}")]
    UnsupportedQueryShape(String),

    /// A registration document supplied more than one query definition.
    #[error("a document can only contain one percolator query, found {found}")]
    DuplicateRegistration { found: usize },

    /// The query DSL could not be parsed or is structurally invalid.
    #[error("malformed query: {0}")]
    MalformedQuery(String),

    /// The query references a field absent from the mapping.
    #[error("no mapping found for field [{0}]")]
    UnmappedField(String),

    /// A query or document value could not be converted to the field's type.
    #[error("invalid value for field [{field}]: {reason}")]
    InvalidValue { field: String, reason: String },

    /// The document being percolated could not be parsed.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// The exact evaluator failed while verifying a candidate.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// Serialization or compression of a stored query failed.
    #[error("codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PercolatorError {
    pub(crate) fn invalid_value(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for PercolatorError {
    fn from(e: serde_json::Error) -> Self {
        PercolatorError::Codec(e.to_string())
    }
}

impl From<std::io::Error> for PercolatorError {
    fn from(e: std::io::Error) -> Self {
        PercolatorError::Codec(e.to_string())
    }
}
