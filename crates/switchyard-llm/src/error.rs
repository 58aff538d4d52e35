use thiserror::Error;

use crate::finish::FinishReason;

/// Errors that can occur during inference
#[derive(Debug, Error)]
pub enum LlmError {
    /// Input rejected before any network call
    #[error("invalid request: {0}")]
    Validation(String),

    /// Vendor call failed for a reason other than cancellation
    #[error("upstream error: {0}")]
    Transport(String),

    /// Cancellation token fired before or during the call
    #[error("request cancelled")]
    Cancelled,

    /// Vendor returned no usable content and a non-stop finish reason
    #[error("{}", .0.explanation())]
    Incomplete(FinishReason),

    /// Both the primary model and its single fallback failed
    #[error("fallback failed after primary error ({primary}): {fallback}")]
    FallbackExhausted {
        /// Error raised by the primary model
        primary: Box<LlmError>,
        /// Error raised by the fallback model
        fallback: Box<LlmError>,
    },

    /// Unexpected internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl LlmError {
    /// Whether this error came from the cancellation token
    ///
    /// Cancellation is always reported as `Abort`, never as `Error`.
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether a custom model failing with this error may hop to its fallback
    pub const fn is_fallback_eligible(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::FallbackExhausted { .. })
    }

    /// Error the caller should see, unwrapping fallback diagnostics
    pub fn into_primary(self) -> Self {
        match self {
            Self::FallbackExhausted { primary, .. } => *primary,
            other => other,
        }
    }
}
