/// Core error types for the Tessel pipeline.
use std::path::PathBuf;

/// A specialized Result type for Tessel operations.
pub type TesselResult<T> = Result<T, TesselError>;

/// Top-level error type encompassing all Tessel subsystems.
#[derive(Debug, thiserror::Error)]
pub enum TesselError {
    /// A render was refused before any result was touched.
    #[error("cannot render: {0}")]
    Precondition(String),

    #[error("image too small: {width}x{height}")]
    ImageTooSmall { width: i32, height: i32 },

    #[error("tile file error: {message} ({path:?})")]
    TileFile { message: String, path: PathBuf },

    /// Pixel buffers for a result could not be allocated.
    #[error("allocation failed: {0}")]
    Allocation(String),

    #[error("render engine error: {0}")]
    Engine(String),

    #[error("compositor error: {0}")]
    Compositor(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TesselError {
    /// Create a precondition error.
    pub fn precondition(message: impl Into<String>) -> Self {
        TesselError::Precondition(message.into())
    }

    /// Create a tile file error.
    pub fn tile_file(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        TesselError::TileFile {
            message: message.into(),
            path: path.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_display() {
        let err = TesselError::precondition("no camera");
        assert_eq!(err.to_string(), "cannot render: no camera");
    }

    #[test]
    fn test_tile_file_error_display() {
        let err = TesselError::tile_file("truncated record", "/tmp/scene.tiles");
        assert!(err.to_string().contains("truncated record"));
        assert!(err.to_string().contains("scene.tiles"));
    }

    #[test]
    fn test_image_too_small_display() {
        let err = TesselError::ImageTooSmall {
            width: 0,
            height: 12,
        };
        assert_eq!(err.to_string(), "image too small: 0x12");
    }
}
