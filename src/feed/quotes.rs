//! Last-known quote per broker symbol.
//!
//! The broker sends a full record as the first frame for a symbol and then
//! only the fields that changed. Merging those deltas onto the stored record
//! reconstructs the complete quote after every frame.

use crate::broker::QuoteFrame;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Complete (as far as known) quote for one broker symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuoteSnapshot {
    pub symbol: String,
    pub exchange: Option<String>,
    pub trade_time: Option<DateTime<Utc>>,
    pub last: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub bid: Option<Decimal>,
    pub bid_size: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub ask_size: Option<Decimal>,
}

impl QuoteSnapshot {
    /// Baseline from the first frame seen for a symbol, partial or not.
    pub fn from_frame(frame: &QuoteFrame) -> Self {
        let mut snapshot = Self {
            symbol: frame.symbol.clone(),
            ..Default::default()
        };
        snapshot.apply(frame);
        snapshot
    }

    /// Overwrite every field the frame carries; keep the rest.
    pub fn apply(&mut self, frame: &QuoteFrame) {
        if let Some(exchange) = frame.exchange.as_ref().filter(|e| !e.is_empty()) {
            self.exchange = Some(exchange.clone());
        }
        if let Some(time) = frame.trade_time.and_then(|t| t.valid()) {
            self.trade_time = Some(time);
        }
        overwrite(&mut self.last, frame.last);
        overwrite(&mut self.volume, frame.volume);
        overwrite(&mut self.bid, frame.bid);
        overwrite(&mut self.bid_size, frame.bid_size);
        overwrite(&mut self.ask, frame.ask);
        overwrite(&mut self.ask_size, frame.ask_size);
    }

    /// Both sides of the book are known.
    pub fn has_quote(&self) -> bool {
        self.bid.is_some() && self.ask.is_some()
    }
}

fn overwrite(slot: &mut Option<Decimal>, incoming: Option<Decimal>) {
    if incoming.is_some() {
        *slot = incoming;
    }
}

/// Snapshots keyed by broker symbol. One cache lives for one stream session.
#[derive(Debug, Default)]
pub struct QuoteMergeCache {
    snapshots: HashMap<String, QuoteSnapshot>,
}

impl QuoteMergeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a frame and return the updated snapshot.
    pub fn merge(&mut self, frame: &QuoteFrame) -> &QuoteSnapshot {
        match self.snapshots.entry(frame.symbol.clone()) {
            Entry::Occupied(entry) => {
                let snapshot = entry.into_mut();
                snapshot.apply(frame);
                snapshot
            }
            Entry::Vacant(entry) => entry.insert(QuoteSnapshot::from_frame(frame)),
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&QuoteSnapshot> {
        self.snapshots.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Forget every snapshot.
    pub fn clear(&mut self) {
        self.snapshots.clear();
    }
}
