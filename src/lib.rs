//! # TradeStation Feed
//!
//! Real-time quote stream reconciler for the TradeStation brokerage API.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `broker`: TradeStation API client (symbol search + chunked quote stream)
//! - `market`: Normalized instruments, exchange hours and tick records
//! - `feed`: Symbol resolution, subscriptions, quote merging and the
//!   streaming session that turns broker frames into ticks
//! - `utils`: Shared utilities and decimal arithmetic

pub mod broker;
pub mod config;
pub mod feed;
pub mod market;
pub mod utils;

pub use config::Config;
