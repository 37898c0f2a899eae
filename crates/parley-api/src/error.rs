use reqwest::StatusCode;

use crate::refresh::RefreshError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The session is gone (logged out, refresh failed, or a retried request
    /// was still unauthorized).
    #[error("login required")]
    LoginRequired,

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error("server returned {status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// Rejected locally before anything was sent.
    #[error("{0}")]
    Invalid(String),

    #[error("cannot read attachment: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Whether the caller should send the user back to the login screen.
    pub fn needs_login(&self) -> bool {
        match self {
            Self::LoginRequired => true,
            Self::Refresh(e) => *e != RefreshError::Cancelled,
            _ => false,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
