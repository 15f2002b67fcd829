//! Pipeline boundary errors.
//!
//! Malformed or truncated model output is never an error; the recovery
//! cascade absorbs it. The only failure the pipeline surfaces is the LLM
//! capability itself being unreachable or misconfigured.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The underlying generation call could not be completed.
    #[error("generation failed: {0}")]
    Generation(anyhow::Error),
}
