use thiserror::Error;

use crate::capture::Format;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The capture format has no display equivalent
    #[error("{0} capture format is not supported for display")]
    UnsupportedFormat(Format),

    /// Staged bytes do not fit the bound image
    #[error("texture/stream format mismatch: {reason} (image {width}x{height})")]
    UploadFailure {
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("image backend: {0}")]
    Backend(String),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Errors after which the renderer cannot keep streaming
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedFormat(_) | Error::UploadFailure { .. } | Error::Backend(_)
        )
    }
}
