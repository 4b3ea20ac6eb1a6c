use std::path::PathBuf;
use thiserror::Error;

/// Structured error types for the background stripper.
///
/// Every variant renders its source in the message, so a single log line
/// carries the full detail of a per-file failure.
#[derive(Error, Debug)]
pub enum BgStripError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}: {source}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed (file: {path}): {source}")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Model error: {operation} failed: {source}")]
    Model {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Download error: fetching {url} failed: {source}")]
    Download {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Alpha matting cannot run on this input; callers fall back to a plain cutout.
    #[error("Alpha matting unavailable: {reason}")]
    Matting { reason: String },
}

pub type Result<T> = std::result::Result<T, BgStripError>;

impl BgStripError {
    pub(crate) fn image(
        path: &std::path::Path,
        operation: &str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::ImageProcessing {
            path: path.display().to_string(),
            operation: operation.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn file_system(
        path: &std::path::Path,
        operation: &str,
        source: std::io::Error,
    ) -> Self {
        Self::FileSystem {
            path: path.to_path_buf(),
            operation: operation.to_string(),
            source,
        }
    }

    pub(crate) fn download(
        url: &str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Download {
            url: url.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn matting(reason: impl Into<String>) -> Self {
        Self::Matting {
            reason: reason.into(),
        }
    }
}

/// Convert anyhow errors to configuration errors.
impl From<anyhow::Error> for BgStripError {
    fn from(err: anyhow::Error) -> Self {
        Self::Configuration {
            message: format!("{err:#}"),
        }
    }
}

/// Fallback for I/O errors raised without path context.
///
/// Code that knows the path and operation should build `FileSystem` directly.
impl From<std::io::Error> for BgStripError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for BgStripError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ort::Error> for BgStripError {
    fn from(err: ort::Error) -> Self {
        Self::Model {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

/// Shape errors come out of tensor conversion, so they count as model errors.
impl From<ndarray::ShapeError> for BgStripError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_source() {
        let err = BgStripError::file_system(
            std::path::Path::new("a.png"),
            "write",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let message = err.to_string();
        assert!(message.contains("write"));
        assert!(message.contains("a.png"));
        assert!(message.contains("denied"));
    }

    #[test]
    fn test_image_error_conversion() {
        let err: BgStripError = image::ImageError::IoError(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "truncated",
        ))
        .into();
        assert!(matches!(err, BgStripError::ImageProcessing { .. }));
    }
}
