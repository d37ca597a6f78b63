use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error("Invalid sample: {0}")]
    InvalidSample(String),

    #[error("Sensor source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Sample processing failed: {0}")]
    ProcessingFailure(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fusion service error: {0}")]
    Service(String),
}

impl FusionError {
    /// The runtime error kind surfaced through `FusionOutput.error`.
    ///
    /// Configuration and service errors happen outside a session and have no
    /// runtime kind.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::InvalidSample(_) => Some(ErrorKind::InvalidSample),
            Self::SourceUnavailable(_) => Some(ErrorKind::SourceUnavailable),
            Self::PermissionDenied => Some(ErrorKind::PermissionDenied),
            Self::ProcessingFailure(_) => Some(ErrorKind::ProcessingFailure),
            Self::Config(_) | Self::Service(_) => None,
        }
    }

    /// Fatal errors end the session; an explicit `start()` is needed to retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SourceUnavailable(_) | Self::PermissionDenied)
    }
}

/// Error state published to the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidSample,
    SourceUnavailable,
    PermissionDenied,
    ProcessingFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::InvalidSample => "invalid sample",
            Self::SourceUnavailable => "compass unavailable",
            Self::PermissionDenied => "location permission denied",
            Self::ProcessingFailure => "failed to process compass data",
        };
        f.write_str(text)
    }
}

pub type Result<T> = std::result::Result<T, FusionError>;
