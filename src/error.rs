//! Error types for the frame pipeline
//!
//! [`PipelineError`] covers lifecycle misuse and configuration failures of a
//! [`Processor`](crate::Processor). [`ConvertError`] covers frame/array
//! conversion. Failures inside user worker logic are `eyre::Report`s and are
//! published on the processor's error channel instead.

use thiserror::Error;

use crate::capture::frame::PixelFormat;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Item submitted, or `stop()` called, while the processor is stopped
    #[error("processor '{0}' is not running")]
    NotRunning(String),

    #[error("processor '{0}' is already running")]
    AlreadyRunning(String),

    /// The processing thread exited without `stop()`
    #[error("processing thread of '{0}' terminated unexpectedly")]
    ThreadTerminated(String),

    /// The worker was lost together with a dead processing thread
    #[error("processor '{0}' has no worker; call set_worker before start")]
    NoWorker(String),

    #[error("failed to spawn processing thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("unsupported pixel format: {0:?}")]
    UnsupportedFormat(PixelFormat),

    #[error("frame buffer too small: expected {expected} bytes, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },

    #[error("invalid number of channels: {0} (expected 1 to 4)")]
    InvalidChannels(usize),

    #[error("array dimensions {0}x{1} do not fit a video frame")]
    InvalidDimensions(usize, usize),

    #[error("jpeg decode failed: {0}")]
    Jpeg(#[from] jpeg_decoder::Error),

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::NotRunning("cam".to_string());
        assert_eq!(err.to_string(), "processor 'cam' is not running");

        let err = ConvertError::BufferTooSmall {
            expected: 12,
            actual: 4,
        };
        assert!(err.to_string().contains("expected 12 bytes"));
    }

    #[test]
    fn test_unsupported_format_names_format() {
        let err = ConvertError::UnsupportedFormat(PixelFormat::Nv12);
        assert!(err.to_string().contains("Nv12"));
    }
}
