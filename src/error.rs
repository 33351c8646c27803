//! Error types shared across the playback pipeline.

use thiserror::Error;

use crate::graph::GraphError;
use crate::settings::SettingsError;
use crate::video::VideoDecoderError;

/// Errors raised by the frame pipeline and the playback controls.
#[derive(Error, Debug)]
pub enum PlayerError {
    /// The decoder reported a failed status. Not retryable for this session.
    #[error("Failed to load video: {0}")]
    DecoderFailure(String),
    /// A playback speed change was rejected; the previous rate is kept.
    #[error("{0}")]
    UnsupportedRate(String),
    /// A pixel buffer violated the 4:2:0 plane layout.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    /// Texture or framebuffer creation failed. Fatal to the session.
    #[error("GPU resource failure: {0}")]
    GpuResource(String),
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
    /// An operator received a framebuffer it has no code path for.
    #[error("{operator} cannot process {storage} framebuffers")]
    UnsupportedStorage {
        operator: String,
        storage: &'static str,
    },
    #[error("unknown filter type: {0}")]
    UnknownFilter(String),
    #[error(transparent)]
    Decoder(#[from] VideoDecoderError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    /// The session was closed and can no longer be driven.
    #[error("player is closed")]
    Closed,
}

impl PlayerError {
    /// Whether the error must terminate the playback session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PlayerError::GpuResource(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_gpu_failures_are_fatal() {
        assert!(PlayerError::GpuResource("oom".into()).is_fatal());
        assert!(!PlayerError::InvalidFrame("odd".into()).is_fatal());
        assert!(!PlayerError::UnsupportedRate("fast".into()).is_fatal());
    }

    #[test]
    fn test_decoder_failure_message() {
        let err = PlayerError::DecoderFailure("codec not found".into());
        assert_eq!(err.to_string(), "Failed to load video: codec not found");
    }
}
