use thiserror::Error;

/// Errors produced by the target model and the state store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// A target entity failed validation.
    #[error("invalid {field}: {reason}")]
    InvalidEntity {
        /// Field that failed validation.
        field: &'static str,
        /// Why it failed.
        reason: String,
    },

    /// The requested object is not in the store.
    #[error("not found")]
    NotFound,

    /// Generic dispatch was handed an object the store has no table for.
    #[error("unsupported object type")]
    UnsupportedType,

    /// The table schema is malformed.
    #[error("schema error: {0}")]
    Schema(String),

    /// Reserved for referential delete constraints. Never returned today.
    #[error("still in use")]
    StillInUse,
}

impl CoreError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        CoreError::InvalidEntity {
            field,
            reason: reason.into(),
        }
    }
}
