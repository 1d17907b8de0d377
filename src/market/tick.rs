//! Normalized tick records handed to the downstream consumer.

use super::instrument::InstrumentId;
use chrono::DateTime;
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::Serialize;

/// Trade print or top-of-book quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TickKind {
    Trade,
    Quote,
}

/// One normalized market data event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tick {
    pub symbol: InstrumentId,
    /// Wall-clock receipt time in the exchange's timezone
    pub time: DateTime<Tz>,
    pub kind: TickKind,
    /// Last trade price for trades, bid/ask midpoint for quotes
    pub price: Decimal,
    /// Last trade size for trades, zero for quotes
    pub size: Decimal,
    pub bid: Decimal,
    pub bid_size: Decimal,
    pub ask: Decimal,
    pub ask_size: Decimal,
    pub exchange: String,
}
