//! Error types for the capture-and-stitch pipeline

use crate::orchestrator::CaptureAttempt;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a single `capture_visible_area` call.
///
/// Every variant is retryable; the orchestrator decides when the attempt
/// budget is exhausted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The capture did not answer within the per-attempt timeout
    #[error("capture timed out after {0}ms")]
    Timeout(u64),

    /// The host failed to deliver the capture
    #[error("capture transport error: {0}")]
    Transport(String),

    /// The host answered with no image data
    #[error("capture returned an empty response")]
    EmptyResponse,
}

/// Errors that can end a full-page capture run
#[derive(Error, Debug)]
pub enum Error {
    /// Page geometry could not be read. Recoverable: the analyzer falls back
    /// to a single viewport and only logs this.
    #[error("Measurement failed: {0}")]
    Measurement(String),

    /// A tile exhausted its capture attempts
    #[error("Capture of tile {tile_index} failed after {} attempts", .attempts.len())]
    CaptureFailure {
        tile_index: usize,
        attempts: Vec<CaptureAttempt>,
    },

    /// A captured raster could not be decoded
    #[error("Tile {tile_index} raster could not be decoded: {reason}")]
    Decode { tile_index: usize, reason: String },

    /// Tiles could not be drawn onto the output canvases
    #[error("Composition failed: {0}")]
    Composition(String),

    /// A canvas could not be encoded into the requested format
    #[error("Encoding failed: {0}")]
    Encode(String),

    /// The run was cancelled at a tile boundary
    #[error("Capture aborted after {captured} of {planned} tiles")]
    Aborted { captured: usize, planned: usize },

    /// The whole run exceeded its time budget
    #[error("Run timed out after {0}ms")]
    RunTimeout(u64),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// The artifact sink failed to persist output
    #[error("Artifact sink failed: {0}")]
    Sink(String),

    /// Host adapter error (scroll/style/metrics primitives)
    #[error("Host error: {0}")]
    Host(String),
}

impl Error {
    /// Whether the run stopped because it was cancelled rather than broken.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Aborted { .. })
    }

    /// The single notification shown to a user when a run fails.
    pub fn user_message(&self) -> String {
        match self {
            Error::CaptureFailure { tile_index, .. } => format!(
                "Failed to capture screenshot: part {} of the page could not be captured. Please try again.",
                tile_index + 1
            ),
            Error::Decode { .. } | Error::Composition(_) | Error::Encode(_) => {
                "Failed to assemble the screenshot. Please try again.".to_string()
            }
            Error::Aborted { .. } => "Screenshot cancelled.".to_string(),
            Error::RunTimeout(_) => "Screenshot took too long and was stopped.".to_string(),
            Error::ConfigError(msg) => format!("Invalid screenshot settings: {}", msg),
            other => format!("Failed to capture screenshot: {}", other),
        }
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Host(err.to_string())
    }
}
