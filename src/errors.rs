// =============================================================================
// Caller-visible error taxonomy
// =============================================================================
//
// Validation errors are raised before any I/O. Everything past that point is
// an upstream-facing kind that the screening orchestrator classifies into a
// `warnings` entry rather than propagating, per the pipeline's "never raise
// for upstream issues when partial data is obtainable" policy. `CacheDegraded`
// is constructed only for internal logging — it must never reach a caller.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("rate limit retry budget exhausted for {key}")]
    RateLimitExhausted { key: String },

    #[error("upstream unavailable ({provider}): {detail}")]
    UpstreamUnavailable { provider: String, detail: String },

    #[error("upstream auth failure ({provider}): {detail}")]
    UpstreamAuth { provider: String, detail: String },

    #[error("cache degraded: {0}")]
    CacheDegraded(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("schema mismatch in {resource}: {detail}")]
    SchemaMismatch { resource: String, detail: String },
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Short (<=100 char) summary suitable for `error_samples` surfaces.
    pub fn short_message(&self) -> String {
        let s = self.to_string();
        if s.len() <= 100 {
            s
        } else {
            let mut truncated: String = s.chars().take(97).collect();
            truncated.push_str("...");
            truncated
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
