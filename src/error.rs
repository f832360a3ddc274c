use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failures surfaced by the render pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Image data could not be decoded or does not have the expected shape.
    #[error("format error: {0}")]
    Format(String),
    /// The GPU device, shader module or dispatch could not be set up.
    #[error("device error: {0}")]
    Device(String),
    /// A file could not be read or written.
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    pub(crate) fn device(message: impl Into<String>) -> Self {
        Self::Device(message.into())
    }

    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Maps an `image` crate error, keeping file system failures apart from
    /// codec failures.
    pub(crate) fn from_image(path: &Path, err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(source) => Self::io(path, source),
            other => Self::Format(format!("{}: {other}", path.display())),
        }
    }
}
