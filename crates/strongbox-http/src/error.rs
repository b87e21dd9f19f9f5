use strongbox_common::error::StrongboxError;
use strongbox_crypto::CryptoError;
use thiserror::Error;

use crate::{multipart::MultipartError, path::PathError, request::ParseError};

#[derive(Debug, Error)]
pub enum HttpError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Multipart(#[from] MultipartError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Identity(#[from] StrongboxError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HttpError {
    /// Status line used when the error is answered rather than dropped.
    pub fn status(&self) -> (u16, &'static str) {
        match self {
            Self::Parse(_) | Self::Multipart(_) | Self::Crypto(_) => (400, "Bad Request"),
            Self::Path(PathError::Escape(_)) => (403, "Forbidden"),
            Self::Path(PathError::Invalid(_)) => (400, "Bad Request"),
            Self::Identity(StrongboxError::UserAlreadyExists(_)) => (400, "User already exists"),
            Self::Identity(StrongboxError::InvalidArgument(_)) => (400, "Bad Request"),
            Self::Identity(StrongboxError::UserNotFound(_))
            | Self::Identity(StrongboxError::SessionNotFound(_)) => (401, "Unauthorized"),
            Self::Io(err) if err.kind() == std::io::ErrorKind::NotFound => (404, "Not Found"),
            Self::Identity(_) | Self::Io(_) => (500, "Internal Server Error"),
        }
    }
}

pub type Result<T> = std::result::Result<T, HttpError>;
