//! Fatal job-terminating error categories.
//!
//! Non-fatal categories (parse errors, tool failures) never reach this type —
//! they are fed back into the model as synthetic tool results inside the
//! executor and do not terminate the job.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("backend exhausted after retries: {0}")]
    BackendExhausted(String),

    #[error("context could not be compacted to fit the usable window")]
    ContextExhausted,

    #[error("max_rounds_exceeded (limit={limit})")]
    MaxRoundsExceeded { limit: u32 },

    #[error("job cancelled")]
    Cancelled,

    #[error("journal write failed: {0}")]
    Journal(String),
}

impl JobError {
    /// The stable reason string recorded on the job record (`backend_exhausted`,
    /// `context_exhausted`, `max_rounds_exceeded`, ...).
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::BackendExhausted(_) => "backend_exhausted",
            Self::ContextExhausted => "context_exhausted",
            Self::MaxRoundsExceeded { .. } => "max_rounds_exceeded",
            Self::Cancelled => "cancelled",
            Self::Journal(_) => "journal_error",
        }
    }
}
