use parley_api::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Could not obtain an access token for the handshake.
    #[error("cannot authenticate live stream: {0}")]
    Auth(#[from] ApiError),

    #[error("invalid websocket url: {0}")]
    Url(#[from] url::ParseError),

    #[error("websocket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The server refused the upgrade with 401/403.
    #[error("websocket handshake rejected with {0}")]
    Rejected(u16),
}

impl StreamError {
    /// Errors after which reconnecting cannot help.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Auth(e) => e.needs_login(),
            Self::Url(_) => true,
            _ => false,
        }
    }
}
