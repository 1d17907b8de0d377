//! Scripted in-process broker for tests and offline runs.

use super::error::BrokerError;
use super::traits::{BrokerApi, QuoteByteStream};
use super::types::{BrokerTime, SymbolSearch, SymbolSearchRow};
use crate::market::OptionRight;
use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone};
use chrono_tz::America::New_York;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// What the next `open_quote_stream` call does.
#[derive(Debug)]
pub enum StreamScript {
    /// Deliver the chunks, then close the body.
    Close(Vec<String>),
    /// Deliver the chunks, then stay open without sending anything.
    Hold(Vec<String>),
    /// Deliver the chunks, then fail the read.
    Drop(Vec<String>),
    /// Refuse the connection.
    Reject(BrokerError),
}

/// Broker double with canned search results and a queue of stream scripts.
///
/// Once the queue is empty every further stream open succeeds and stays
/// silent.
#[derive(Default)]
pub struct MockBroker {
    search_results: Mutex<HashMap<String, Vec<SymbolSearchRow>>>,
    scripts: Mutex<VecDeque<StreamScript>>,
    opened: Mutex<Vec<Vec<String>>>,
    search_calls: AtomicUsize,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `search` with `rows`.
    pub fn with_search(self, search: &SymbolSearch, rows: Vec<SymbolSearchRow>) -> Self {
        self.search_results.lock().insert(search.criteria(), rows);
        self
    }

    /// Answer an option chain search for `root` with `rows`.
    pub fn with_option_chain(self, root: &str, rows: Vec<SymbolSearchRow>) -> Self {
        self.with_search(&SymbolSearch::option_chain(root), rows)
    }

    /// Queue the behaviour of the next stream open.
    pub fn push_stream(&self, script: StreamScript) {
        self.scripts.lock().push_back(script);
    }

    /// Symbol lists of every stream opened so far.
    pub fn opened_streams(&self) -> Vec<Vec<String>> {
        self.opened.lock().clone()
    }

    pub fn search_count(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    /// A search row describing one option contract, shaped like the broker's.
    pub fn option_row(
        root: &str,
        expiry: NaiveDate,
        right: OptionRight,
        strike: Decimal,
    ) -> SymbolSearchRow {
        let name = format!(
            "{} {}{}{}",
            root,
            expiry.format("%y%m%d"),
            right.code(),
            strike.normalize()
        );
        // Expirations come back as local midnight on the expiry date
        let midnight = expiry
            .and_hms_opt(0, 0, 0)
            .and_then(|naive| New_York.from_local_datetime(&naive).single())
            .map(|local| local.timestamp_millis())
            .unwrap_or_default();

        SymbolSearchRow {
            name,
            category: Some("StockOption".to_string()),
            root: Some(root.to_string()),
            underlying: Some(root.to_string()),
            strike_price: Some(strike),
            expiration_date: Some(BrokerTime::from_millis(midnight)),
            option_type: Some(
                match right {
                    OptionRight::Call => "Call",
                    OptionRight::Put => "Put",
                }
                .to_string(),
            ),
            ..Default::default()
        }
    }
}

fn chunks(frames: Vec<String>) -> impl futures_util::Stream<Item = Result<Vec<u8>, BrokerError>> {
    stream::iter(
        frames
            .into_iter()
            .map(|chunk| Ok(chunk.into_bytes()))
            .collect::<Vec<_>>(),
    )
}

#[async_trait]
impl BrokerApi for MockBroker {
    async fn search_symbols(
        &self,
        search: &SymbolSearch,
    ) -> Result<Vec<SymbolSearchRow>, BrokerError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .search_results
            .lock()
            .get(&search.criteria())
            .cloned()
            .unwrap_or_default())
    }

    async fn open_quote_stream(&self, symbols: &[String]) -> Result<QuoteByteStream, BrokerError> {
        self.opened.lock().push(symbols.to_vec());
        let script = self.scripts.lock().pop_front();
        debug!(?script, "Mock stream open for {:?}", symbols);

        match script {
            Some(StreamScript::Close(frames)) => Ok(chunks(frames).boxed()),
            Some(StreamScript::Hold(frames)) => Ok(chunks(frames).chain(stream::pending()).boxed()),
            Some(StreamScript::Drop(frames)) => Ok(chunks(frames)
                .chain(stream::once(async {
                    Err(BrokerError::ConnectionLost("reset by peer".to_string()))
                }))
                .boxed()),
            Some(StreamScript::Reject(error)) => Err(error),
            None => Ok(stream::pending().boxed()),
        }
    }
}
