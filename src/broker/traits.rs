//! Broker transport seam.
//!
//! The stream reconciler only needs two things from a broker: a symbol search
//! and a long-lived quote stream. Keeping them behind a trait lets the session
//! manager run against the real HTTP client or the scripted [`super::MockBroker`].

use super::error::BrokerError;
use super::types::{SymbolSearch, SymbolSearchRow};
use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// Raw body chunks of an open quote stream. Dropping it closes the connection.
pub type QuoteByteStream = BoxStream<'static, Result<Vec<u8>, BrokerError>>;

#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// Run a symbol search and return every matching row.
    async fn search_symbols(&self, search: &SymbolSearch)
        -> Result<Vec<SymbolSearchRow>, BrokerError>;

    /// Open one streaming connection carrying quote changes for `symbols`.
    ///
    /// Resolves once the response headers arrive; the body is read lazily.
    async fn open_quote_stream(&self, symbols: &[String]) -> Result<QuoteByteStream, BrokerError>;
}
