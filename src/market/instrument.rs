//! Normalized instrument identity.
//!
//! An [`InstrumentId`] is an immutable value: two identifiers are the same
//! instrument exactly when they compare equal. Broker-native names are kept
//! out of this type entirely; see `feed::resolver` for that mapping.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Security class of an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityType {
    Equity,
    Option,
    Future,
}

impl SecurityType {
    /// Category name used by the broker's symbol search.
    pub fn search_category(&self) -> &'static str {
        match self {
            SecurityType::Equity => "Stock",
            SecurityType::Option => "StockOption",
            SecurityType::Future => "Future",
        }
    }
}

impl fmt::Display for SecurityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityType::Equity => write!(f, "equity"),
            SecurityType::Option => write!(f, "option"),
            SecurityType::Future => write!(f, "future"),
        }
    }
}

/// Put or call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionRight {
    Call,
    Put,
}

impl OptionRight {
    /// Single-letter code as used in OCC-style names.
    pub fn code(&self) -> char {
        match self {
            OptionRight::Call => 'C',
            OptionRight::Put => 'P',
        }
    }
}

/// Exercise style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OptionStyle {
    #[default]
    American,
    European,
}

/// A single listed option contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionContract {
    /// Underlying ticker (e.g. "SPY")
    pub underlying: String,
    pub strike: Decimal,
    pub expiry: NaiveDate,
    pub right: OptionRight,
    pub style: OptionStyle,
}

/// Normalized identity of a tradable symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstrumentId {
    Equity { ticker: String },
    Future { ticker: String },
    Option(OptionContract),
    /// Every listed contract on an underlying. Subscribing to a chain expands
    /// it into the individual contracts the broker lists at that moment.
    OptionChain { underlying: String },
}

impl InstrumentId {
    pub fn equity(ticker: impl Into<String>) -> Self {
        InstrumentId::Equity {
            ticker: ticker.into().to_uppercase(),
        }
    }

    pub fn future(ticker: impl Into<String>) -> Self {
        InstrumentId::Future {
            ticker: ticker.into().to_uppercase(),
        }
    }

    pub fn option_chain(underlying: impl Into<String>) -> Self {
        InstrumentId::OptionChain {
            underlying: underlying.into().to_uppercase(),
        }
    }

    pub fn option(
        underlying: impl Into<String>,
        strike: Decimal,
        expiry: NaiveDate,
        right: OptionRight,
        style: OptionStyle,
    ) -> Self {
        InstrumentId::Option(OptionContract {
            underlying: underlying.into().to_uppercase(),
            // Normalized so 200 and 200.00 hash the same
            strike: strike.normalize(),
            expiry,
            right,
            style,
        })
    }

    pub fn security_type(&self) -> SecurityType {
        match self {
            InstrumentId::Equity { .. } => SecurityType::Equity,
            InstrumentId::Future { .. } => SecurityType::Future,
            InstrumentId::Option(_) | InstrumentId::OptionChain { .. } => SecurityType::Option,
        }
    }

    /// Underlying ticker for options and chains, the ticker itself otherwise.
    pub fn root(&self) -> &str {
        match self {
            InstrumentId::Equity { ticker } | InstrumentId::Future { ticker } => ticker,
            InstrumentId::Option(contract) => &contract.underlying,
            InstrumentId::OptionChain { underlying } => underlying,
        }
    }

    /// True for option chains, which stand for a set of contracts rather
    /// than something that can be quoted.
    pub fn is_chain(&self) -> bool {
        matches!(self, InstrumentId::OptionChain { .. })
    }

    pub fn as_option(&self) -> Option<&OptionContract> {
        match self {
            InstrumentId::Option(contract) => Some(contract),
            _ => None,
        }
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentId::Equity { ticker } | InstrumentId::Future { ticker } => {
                write!(f, "{ticker}")
            }
            InstrumentId::Option(c) => write!(
                f,
                "{} {}{}{}",
                c.underlying,
                c.expiry.format("%y%m%d"),
                c.right.code(),
                c.strike
            ),
            InstrumentId::OptionChain { underlying } => write!(f, "?{underlying}"),
        }
    }
}
