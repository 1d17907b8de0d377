//! Transport-level broker errors.

/// Errors returned by a [`super::BrokerApi`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The access token was rejected.
    #[error("broker rejected the access token (401 Unauthorized)")]
    Unauthorized,

    /// Any other non-success HTTP status.
    #[error("broker returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Connection, TLS or body read failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The connection dropped without an HTTP-level error.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The response body did not have the expected shape.
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl BrokerError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, BrokerError::Unauthorized)
    }
}
