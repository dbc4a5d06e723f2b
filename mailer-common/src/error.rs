use thiserror::Error;

/// Errors raised by the persistence store (§3, §5 of the spec).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("row not found")]
    NotFound,
}

/// Errors raised by the job queue broker (§2.2).
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Template rendering errors, kept distinct from I/O errors per §4.4.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("unterminated variable delimiter in template")]
    UnterminatedDelimiter,
    #[error("empty variable name in template")]
    EmptyVariableName,
}

/// The outcome of classifying an SMTP or webhook delivery attempt (§4.3, §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedFailure {
    /// Further attempts cannot succeed: bad recipient, auth failure, 5xx that
    /// is known-permanent.
    Permanent(String),
    /// Eligible for retry with backoff: transient network/server error.
    Temporary(String),
}

impl ClassifiedFailure {
    pub fn message(&self) -> &str {
        match self {
            ClassifiedFailure::Permanent(m) | ClassifiedFailure::Temporary(m) => m,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            ClassifiedFailure::Permanent(_) => "permanent",
            ClassifiedFailure::Temporary(_) => "temporary",
        }
    }
}
