//! Broker-independent market data model.
//!
//! - `instrument`: normalized instrument identifiers
//! - `hours`: exchange sessions and timezones
//! - `tick`: the records the feed emits

mod hours;
mod instrument;
mod tick;

pub use hours::MarketHours;
pub use instrument::{InstrumentId, OptionContract, OptionRight, OptionStyle, SecurityType};
pub use tick::{Tick, TickKind};
