//! TradeStation broker integration.
//!
//! Provides the two endpoints the quote feed depends on:
//! - Symbol search (option chain listing, name lookup)
//! - Quote change stream (chunked HTTP, concatenated JSON objects)
//!
//! plus a scripted [`MockBroker`] for tests.

mod client;
mod error;
pub mod frames;
pub mod mock;
mod traits;
mod types;

pub use client::TradeStationClient;
pub use error::BrokerError;
pub use frames::FrameSplitter;
pub use mock::{MockBroker, StreamScript};
pub use traits::{BrokerApi, QuoteByteStream};
pub use types::*;
