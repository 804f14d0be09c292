use thiserror::Error;

/// Errors raised while encoding, decoding, or validating DTOs.
///
/// Every failure is synchronous and local to the call that produced it; no
/// partial object is ever returned alongside an error.
#[derive(Debug, Error)]
pub enum DtoError {
    /// The JSON document could not be parsed at all
    #[error("malformed json: {0}")]
    MalformedJson(#[from] serde_json::Error),
    /// A required field was missing or empty
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    /// A string failed charset or length validation
    #[error("invalid {what}: {reason}")]
    InvalidString {
        /// What was being validated, e.g. "key" or "blob name"
        what: &'static str,
        /// Why it was rejected
        reason: String,
    },
    /// A date string did not match any accepted format
    #[error("invalid date string: {0}")]
    InvalidDate(String),
    /// A nested map exceeded the allowed depth or held an illegal value
    #[error("invalid map: {0}")]
    InvalidMap(String),
    /// Fields were combined in a way the wire format forbids
    #[error("{0}")]
    InvalidCombination(String),
}

impl DtoError {
    pub(crate) fn invalid_string(what: &'static str, reason: impl Into<String>) -> Self {
        DtoError::InvalidString {
            what,
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, DtoError>;
