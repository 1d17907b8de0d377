//! TradeStation REST + streaming client.

use super::error::BrokerError;
use super::traits::{BrokerApi, QuoteByteStream};
use super::types::{SymbolSearch, SymbolSearchRow};
use crate::config::BrokerConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, info, instrument};

const STREAM_CONTENT_TYPE: &str = "application/vnd.tradestation.streams+json";

/// TradeStation API client.
pub struct TradeStationClient {
    /// Short-lived requests, bounded by a total timeout
    http: Client,
    /// Quote stream; only the connect phase is bounded because the body
    /// stays open for hours
    stream_http: Client,
    base_url: String,
    access_token: String,
}

impl TradeStationClient {
    /// Create a new client from configuration.
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        let stream_http = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .context("Failed to create streaming HTTP client")?;

        Ok(Self {
            http,
            stream_http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        })
    }

    fn search_url(&self, search: &SymbolSearch) -> String {
        format!(
            "{}/data/symbols/search/{}?access_token={}",
            self.base_url,
            urlencoding::encode(&search.criteria()),
            urlencoding::encode(&self.access_token)
        )
    }

    fn stream_url(&self, symbols: &[String]) -> String {
        format!(
            "{}/stream/quote/changes/{}?access_token={}",
            self.base_url,
            urlencoding::encode(&symbols.join(",")),
            urlencoding::encode(&self.access_token)
        )
    }
}

/// Map non-success statuses onto [`BrokerError`].
async fn check_status(response: Response) -> Result<Response, BrokerError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(BrokerError::Unauthorized);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BrokerError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

#[async_trait]
impl BrokerApi for TradeStationClient {
    #[instrument(skip(self), fields(criteria = %search.criteria()))]
    async fn search_symbols(
        &self,
        search: &SymbolSearch,
    ) -> Result<Vec<SymbolSearchRow>, BrokerError> {
        let response = self.http.get(self.search_url(search)).send().await?;
        let response = check_status(response).await?;

        let text = response.text().await?;
        let rows: Vec<SymbolSearchRow> =
            serde_json::from_str(&text).map_err(|e| BrokerError::Decode(e.to_string()))?;

        debug!("Symbol search returned {} rows", rows.len());
        Ok(rows)
    }

    #[instrument(skip(self, symbols), fields(symbols = symbols.len()))]
    async fn open_quote_stream(&self, symbols: &[String]) -> Result<QuoteByteStream, BrokerError> {
        let response = self
            .stream_http
            .get(self.stream_url(symbols))
            .header(ACCEPT, STREAM_CONTENT_TYPE)
            .send()
            .await?;
        let response = check_status(response).await?;

        info!("Quote stream open for {} symbols", symbols.len());

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(BrokerError::from))
            .boxed())
    }
}
