//! Request-level failures of the template pipeline.
//!
//! Malformed model output and validation findings are not errors; they are
//! carried inside a successful response.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Template {0} not supported")]
    UnknownTemplate(String),

    #[error("Retrieval failed: {0:#}")]
    Retrieval(anyhow::Error),

    #[error("Generation failed: {0:#}")]
    Generation(anyhow::Error),
}

impl PipelineError {
    /// The caller sent something unusable, as opposed to a collaborator failing.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidRequest(_) | PipelineError::UnknownTemplate(_)
        )
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
