//! Error types for pulling WASM images.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::reference::ImageReference;
use crate::status::StatusCode;

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while pulling a WASM image.
///
/// Every failure is terminal for the pull that raised it; nothing is retried.
#[derive(Error, Debug)]
pub enum Error {
    /// The image reference does not match `[registry/]repository[:tag][@sha256:hash]`.
    #[error("Invalid image spec: \"{0}\"")]
    InvalidImageSpec(String),

    /// The working directory exists but cannot be written to.
    #[error("Invalid workdir: {}: {source}", path.display())]
    InvalidWorkdir {
        /// The offending directory.
        path: PathBuf,
        /// Why it was rejected.
        #[source]
        source: std::io::Error,
    },

    /// A registry call failed, either with a non-success status or in transit.
    #[error("{message}: {cause}")]
    InvalidRestResponse {
        /// Stage-specific message, e.g. `Failed to get manifest`.
        message: String,
        /// What went wrong.
        #[source]
        cause: RestCause,
    },

    /// An auth challenge could not be negotiated.
    #[error("Illegal auth: \"{0}\"")]
    IllegalAuth(String),

    /// The image manifest or the downloaded content violates an invariant.
    #[error("Invalid image \"{image}\": {reason}")]
    InvalidImage {
        /// The image being pulled.
        image: Box<ImageReference>,
        /// Human readable reason.
        reason: String,
    },

    /// The configured user agent cannot be sent as an HTTP header.
    #[error("Invalid user agent: \"{value}\"")]
    InvalidUserAgent {
        value: String,
        #[source]
        source: reqwest::header::InvalidHeaderValue,
    },

    /// The operation is not supported.
    #[error("Not implemented")]
    NotImplemented,
}

/// Underlying cause of an [`Error::InvalidRestResponse`].
#[derive(Debug)]
pub enum RestCause {
    /// The registry answered with a non-success status.
    Status(StatusCode),
    /// The request could not be sent or its body could not be read.
    Transport(reqwest::Error),
    /// The response body is not the expected JSON document.
    Decode(serde_json::Error),
    /// Writing the response body to disk failed.
    Io(std::io::Error),
}

impl fmt::Display for RestCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(status) => write!(f, "{status}"),
            Self::Transport(err) => write!(f, "{err}"),
            Self::Decode(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for RestCause {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Status(_) => None,
            Self::Transport(err) => Some(err),
            Self::Decode(err) => Some(err),
            Self::Io(err) => Some(err),
        }
    }
}

impl Error {
    /// Create an invalid REST response error.
    pub fn rest(message: impl Into<String>, cause: impl Into<RestCause>) -> Self {
        Self::InvalidRestResponse {
            message: message.into(),
            cause: cause.into(),
        }
    }

    /// Create an invalid image error.
    pub fn invalid_image(image: &ImageReference, reason: impl Into<String>) -> Self {
        Self::InvalidImage {
            image: Box::new(image.clone()),
            reason: reason.into(),
        }
    }

    /// Create an invalid workdir error.
    pub fn invalid_workdir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::InvalidWorkdir {
            path: path.into(),
            source,
        }
    }

    /// The HTTP status behind this error, if it came from a registry response.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::InvalidRestResponse {
                cause: RestCause::Status(status),
                ..
            } => Some(*status),
            _ => None,
        }
    }
}

impl From<StatusCode> for RestCause {
    fn from(status: StatusCode) -> Self {
        Self::Status(status)
    }
}

impl From<reqwest::Error> for RestCause {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err)
    }
}

impl From<serde_json::Error> for RestCause {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err)
    }
}

impl From<std::io::Error> for RestCause {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
