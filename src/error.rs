//! Error type shared by the engine, the persistence layer and the CLI.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LayerError>;

/// Coarse classification used by callers that map errors onto responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid layer index or out-of-canvas coordinate.
    Bounds,
    /// Ill-formed color, too few points, non-binary mask, size mismatch.
    Malformed,
    /// I/O, decoding or deserialization failure.
    Io,
}

#[derive(Error, Debug)]
pub enum LayerError {
    // Bounds
    #[error("{what} ({x},{y}) is outside the {width}x{height} canvas")]
    OutOfBounds {
        what: &'static str,
        x: i64,
        y: i64,
        width: u32,
        height: u32,
    },

    #[error("No layer at index {index} (stack has {len})")]
    NoLayer { index: usize, len: usize },

    // Malformed input
    #[error("Invalid color '{0}': expected #RRGGBB or #RGB")]
    InvalidColor(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // I/O and deserialization
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] Box<bincode::ErrorKind>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Project not found: {path}")]
    ProjectNotFound { path: PathBuf },
}

impl LayerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LayerError::OutOfBounds { .. } | LayerError::NoLayer { .. } => ErrorKind::Bounds,
            LayerError::InvalidColor(_) | LayerError::InvalidInput(_) => ErrorKind::Malformed,
            LayerError::Io(_)
            | LayerError::Serialize(_)
            | LayerError::Json(_)
            | LayerError::Image(_)
            | LayerError::InvalidFormat(_)
            | LayerError::ProjectNotFound { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn invalid_input(msg: impl Into<String>) -> Self {
        LayerError::InvalidInput(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinct() {
        let bounds = LayerError::OutOfBounds { what: "start point", x: 9, y: 0, width: 4, height: 4 };
        let malformed = LayerError::InvalidColor("#12".into());
        let io = LayerError::InvalidFormat("bad magic".into());
        assert_eq!(bounds.kind(), ErrorKind::Bounds);
        assert_eq!(malformed.kind(), ErrorKind::Malformed);
        assert_eq!(io.kind(), ErrorKind::Io);
    }

    #[test]
    fn out_of_bounds_message_names_the_canvas() {
        let err = LayerError::OutOfBounds { what: "start point", x: 50, y: -1, width: 50, height: 40 };
        assert_eq!(err.to_string(), "start point (50,-1) is outside the 50x40 canvas");
    }
}
