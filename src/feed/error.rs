//! Error taxonomy of the quote feed.
//!
//! Only [`ResolutionError`] ever reaches a caller. The others are produced and
//! handled inside the reader loop, where they turn into a skipped frame, a
//! reconnect or the disconnected flag.

use crate::broker::BrokerError;
use crate::market::InstrumentId;
use std::time::Duration;

/// A broker symbol could not be produced for an instrument.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolutionError {
    /// The broker's search did not list this exact contract.
    #[error("broker search returned no contract matching {0}")]
    NotFound(InstrumentId),

    /// Chains are expanded on subscribe and have no broker symbol of their own.
    #[error("{0} is an option chain, not a quotable contract")]
    Chain(InstrumentId),

    /// The search request itself failed.
    #[error("symbol search for {root} failed: {reason}")]
    Search { root: String, reason: String },
}

/// A single stream frame could not be decoded.
#[derive(Debug, thiserror::Error)]
#[error("malformed frame ({reason}): {excerpt}")]
pub struct FrameParseError {
    pub reason: String,
    /// Leading bytes of the frame, lossily decoded
    pub excerpt: String,
}

impl FrameParseError {
    const EXCERPT_LEN: usize = 120;

    pub fn new(raw: &[u8], reason: impl ToString) -> Self {
        let end = raw.len().min(Self::EXCERPT_LEN);
        Self {
            reason: reason.to_string(),
            excerpt: String::from_utf8_lossy(&raw[..end]).into_owned(),
        }
    }
}

/// The streaming connection could not be established or kept alive.
#[derive(Debug, thiserror::Error)]
pub enum StreamConnectError {
    #[error("could not open quote stream: {0}")]
    Connect(BrokerError),

    #[error("quote stream read failed: {0}")]
    Read(BrokerError),

    #[error("no data from broker for {0:?}")]
    IdleTimeout(Duration),

    #[error("broker closed the quote stream")]
    Closed,
}

/// The broker rejected the access token. Terminal for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("broker rejected the access token; streaming stopped")]
pub struct AuthorizationError;
