//! Pipeline error taxonomy
//!
//! Four variants cover every failure the consumer has to make a decision
//! about. `Parse`/`Validation`/`Storage` are message-level failures (the
//! message goes to the dead-letter handler); `Transport` is retried with
//! backoff at the call site and, once retries are exhausted, leaves the
//! message on the queue for redelivery.

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Malformed or undecodable message/blob content
    #[error("parse error: {0}")]
    Parse(String),

    /// Snapshot missing required fields (no provider, no item with a code, ...)
    #[error("validation error: {0}")]
    Validation(String),

    /// Database unreachable or constraint violation during commit
    #[error("storage error: {0}")]
    Storage(#[source] BoxError),

    /// Queue or blob store unreachable
    #[error("transport error: {0}")]
    Transport(String),
}

impl PipelineError {
    /// Transport errors are the only ones worth retrying in place.
    pub fn is_transport(&self) -> bool {
        matches!(self, PipelineError::Transport(_))
    }

    pub fn storage(err: impl Into<BoxError>) -> Self {
        PipelineError::Storage(err.into())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Parse(e.to_string())
    }
}

#[cfg(feature = "db")]
impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        PipelineError::Storage(e.into())
    }
}
