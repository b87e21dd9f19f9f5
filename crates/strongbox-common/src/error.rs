use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrongboxError {
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("user already exists: {0}")]
    UserAlreadyExists(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("internal error: {0}")]
    InternalError(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StrongboxError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UserNotFound(_) => "UserNotFound",
            Self::UserAlreadyExists(_) => "UserAlreadyExists",
            Self::SessionNotFound(_) => "SessionNotFound",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::InternalError(_) => "InternalError",
            Self::Io(_) => "InternalError",
        }
    }
}

pub type Result<T> = std::result::Result<T, StrongboxError>;
