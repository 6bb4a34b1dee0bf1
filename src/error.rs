//! Custom error types for the virtual camera core.
//!
//! This module defines the primary error type, `CameraError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the few failures that are allowed to leave a component.
//!
//! ## Error Hierarchy
//!
//! `CameraError` groups its variants by how the caller is expected to react:
//!
//! - **Construction-fatal**: `InvalidCapacity`, `UnsupportedFrameRate`,
//!   `LandingPageAssetNotFound`, `ImageLoading`, `AcquiringPixelBufferFailed`,
//!   `Configuration` and `ConfigurationLoad`. These are returned synchronously from
//!   constructors; the embedding extension decides whether to abort startup.
//! - **Lifecycle misuse**: `LoggerAlreadyStarted`, `NoDelegate` and
//!   `RuntimeUnavailable` indicate that a component was wired up incorrectly.
//! - **Per-tick failures**: `Media` and `InvalidSampleBuffer` are produced inside a
//!   frame tick. They are logged by the tick and never propagated past it.
//!
//! Queue overflow is deliberately absent from this list: a full `BoundedSafeQueue`
//! reports the dropped element through [`crate::queue::Enqueued`] instead.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type CameraResult<T> = std::result::Result<T, CameraError>;

/// Errors produced by the virtual camera core.
#[derive(Error, Debug)]
pub enum CameraError {
    /// A bounded queue was created with a capacity below one.
    #[error("Invalid capacity: {capacity}")]
    InvalidCapacity {
        /// The rejected capacity.
        capacity: usize,
    },

    /// The frame rate is outside the range a pacing strategy supports.
    #[error("Frame rate {frame_rate} is unsupported, expected {min}..={max}")]
    UnsupportedFrameRate {
        /// The rejected frame rate.
        frame_rate: u32,
        /// Lowest supported frame rate.
        min: u32,
        /// Highest supported frame rate.
        max: u32,
    },

    /// The landing page asset does not exist.
    #[error("Landing page asset was not found: {}", .0.display())]
    LandingPageAssetNotFound(PathBuf),

    /// The landing page asset could not be decoded.
    #[error("Loading image failed: {0}")]
    ImageLoading(#[from] image::ImageError),

    /// A pixel buffer for the landing page could not be created.
    #[error("Acquiring pixel buffer failed: {0}")]
    AcquiringPixelBufferFailed(String),

    /// Sample data does not match its format description.
    #[error("Invalid sample buffer: expected {expected} bytes, got {actual}")]
    InvalidSampleBuffer {
        /// Byte length required by the format description.
        expected: usize,
        /// Byte length actually supplied.
        actual: usize,
    },

    /// The configuration is semantically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// The configuration could not be extracted from its sources.
    #[error("Configuration error: {0}")]
    ConfigurationLoad(#[from] Box<figment::Error>),

    /// `StreamLogger::start` was called more than once.
    #[error("Logger can't be started because it is already running")]
    LoggerAlreadyStarted,

    /// A stream callback arrived after its owning device was dropped.
    #[error("Missing delegate to {0} stream")]
    NoDelegate(&'static str),

    /// A component that spawns timers was created outside a Tokio runtime.
    #[error("No Tokio runtime available to schedule timers")]
    RuntimeUnavailable,

    /// The OS media layer reported an error for a stream operation.
    #[error("Media error: {0}")]
    Media(String),
}

impl CameraError {
    /// Create a Media error
    pub fn media(msg: impl Into<String>) -> Self {
        Self::Media(msg.into())
    }

    /// Create a Configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether the error can only happen while constructing a component.
    ///
    /// Callers use this to decide whether extension startup has to be aborted.
    pub fn is_construction_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidCapacity { .. }
                | Self::UnsupportedFrameRate { .. }
                | Self::LandingPageAssetNotFound(_)
                | Self::ImageLoading(_)
                | Self::AcquiringPixelBufferFailed(_)
                | Self::Configuration(_)
                | Self::ConfigurationLoad(_)
                | Self::RuntimeUnavailable
        )
    }
}

impl From<figment::Error> for CameraError {
    fn from(err: figment::Error) -> Self {
        Self::ConfigurationLoad(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CameraError::InvalidCapacity { capacity: 0 };
        assert_eq!(err.to_string(), "Invalid capacity: 0");

        let err = CameraError::UnsupportedFrameRate {
            frame_rate: 90,
            min: 15,
            max: 60,
        };
        assert_eq!(err.to_string(), "Frame rate 90 is unsupported, expected 15..=60");

        let err = CameraError::NoDelegate("start");
        assert_eq!(err.to_string(), "Missing delegate to start stream");
    }

    #[test]
    fn test_construction_fatal_classification() {
        assert!(CameraError::InvalidCapacity { capacity: 0 }.is_construction_fatal());
        assert!(CameraError::configuration("bad").is_construction_fatal());
        assert!(!CameraError::media("gone").is_construction_fatal());
        assert!(!CameraError::LoggerAlreadyStarted.is_construction_fatal());
    }
}
