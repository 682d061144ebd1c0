// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Error types for the action recognition library.

use std::fmt;

/// Result type alias for action recognition operations.
pub type Result<T> = std::result::Result<T, ActionError>;

/// Main error type for the action recognition library.
#[derive(Debug)]
pub enum ActionError {
    /// Error loading or parsing a checkpoint.
    CheckpointError(String),
    /// Skeleton graph construction error.
    GraphError(String),
    /// Invalid network or scheduler configuration.
    ConfigError(String),
    /// A tensor violated its shape contract.
    ShapeError(String),
    /// Video source selection or opening error.
    SourceError(String),
    /// Error processing images.
    ImageError(String),
    /// Wrapped `std::io::Error`
    Io(std::io::Error),
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CheckpointError(msg) => write!(f, "Checkpoint error: {msg}"),
            Self::GraphError(msg) => write!(f, "Graph error: {msg}"),
            Self::ConfigError(msg) => write!(f, "Config error: {msg}"),
            Self::ShapeError(msg) => write!(f, "Shape error: {msg}"),
            Self::SourceError(msg) => write!(f, "Source error: {msg}"),
            Self::ImageError(msg) => write!(f, "Image error: {msg}"),
            Self::Io(err) => write!(f, "IO error: {err}"),
        }
    }
}

impl std::error::Error for ActionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ActionError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<image::ImageError> for ActionError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for ActionError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::ShapeError(err.to_string())
    }
}
