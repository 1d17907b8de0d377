//! Type definitions for TradeStation API payloads.

use crate::market::SecurityType;
use crate::utils::decimal::parse_decimal;
use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

/// Timestamp as reported by the broker.
///
/// The broker frequently sends a default value (epoch zero or year 1) instead
/// of a real time; that is kept distinct so callers can refuse to trust it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerTime {
    At(DateTime<Utc>),
    Sentinel,
}

impl BrokerTime {
    /// Build from milliseconds since the Unix epoch.
    pub fn from_millis(millis: i64) -> Self {
        if millis <= 0 {
            return BrokerTime::Sentinel;
        }
        DateTime::from_timestamp_millis(millis)
            .map(BrokerTime::At)
            .unwrap_or(BrokerTime::Sentinel)
    }

    /// Parse any of the textual encodings the broker uses:
    /// `/Date(1420826400000-0600)/`, RFC 3339, naive ISO-8601 (UTC) or bare
    /// epoch milliseconds.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();

        if let Some(inner) = raw
            .strip_prefix("/Date(")
            .and_then(|rest| rest.strip_suffix(")/"))
        {
            // Trailing +hhmm/-hhmm is informational; the millis are UTC.
            let end = inner
                .char_indices()
                .skip(1)
                .find(|(_, c)| *c == '+' || *c == '-')
                .map(|(i, _)| i)
                .unwrap_or(inner.len());
            return inner[..end].parse::<i64>().ok().map(Self::from_millis);
        }

        if let Ok(millis) = raw.parse::<i64>() {
            return Some(Self::from_millis(millis));
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(Self::from_utc(dt.with_timezone(&Utc)));
        }

        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| Self::from_utc(naive.and_utc()))
    }

    fn from_utc(dt: DateTime<Utc>) -> Self {
        if dt.year() <= 1 || dt.timestamp_millis() <= 0 {
            BrokerTime::Sentinel
        } else {
            BrokerTime::At(dt)
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, BrokerTime::Sentinel)
    }

    /// The timestamp, unless it is the sentinel.
    pub fn valid(&self) -> Option<DateTime<Utc>> {
        match self {
            BrokerTime::At(dt) => Some(*dt),
            BrokerTime::Sentinel => None,
        }
    }
}

/// One quote-change frame from the streaming endpoint.
///
/// The first frame per symbol is a full snapshot; later frames only carry the
/// fields that changed, so everything except `Symbol` is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QuoteFrame {
    pub symbol: String,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default, deserialize_with = "de_broker_time")]
    pub trade_time: Option<BrokerTime>,
    #[serde(default, deserialize_with = "de_decimal")]
    pub last: Option<Decimal>,
    #[serde(default, deserialize_with = "de_decimal")]
    pub volume: Option<Decimal>,
    #[serde(default, deserialize_with = "de_decimal")]
    pub bid: Option<Decimal>,
    #[serde(default, deserialize_with = "de_decimal")]
    pub bid_size: Option<Decimal>,
    #[serde(default, deserialize_with = "de_decimal")]
    pub ask: Option<Decimal>,
    #[serde(default, deserialize_with = "de_decimal")]
    pub ask_size: Option<Decimal>,
}

impl QuoteFrame {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Default::default()
        }
    }

    /// True if the frame reports traded volume.
    pub fn has_volume(&self) -> bool {
        self.volume.is_some_and(|v| !v.is_zero())
    }
}

/// One row of a symbol search response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SymbolSearchRow {
    /// Broker-native name, e.g. "SPY 161216C200"
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub underlying: Option<String>,
    #[serde(default, deserialize_with = "de_decimal")]
    pub strike_price: Option<Decimal>,
    #[serde(default, deserialize_with = "de_broker_time")]
    pub expiration_date: Option<BrokerTime>,
    /// "Call" or "Put"
    #[serde(default)]
    pub option_type: Option<String>,
    /// "American" or "European"
    #[serde(default)]
    pub exercise_style: Option<String>,
}

/// How the search value is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchField {
    /// Exact root/underlying, used to list an option chain
    Root,
    /// Name pattern
    Name,
}

/// Symbol search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolSearch {
    pub field: SearchField,
    pub value: String,
    pub category: SecurityType,
}

impl SymbolSearch {
    /// All listed contracts for an underlying.
    pub fn option_chain(root: &str) -> Self {
        Self {
            field: SearchField::Root,
            value: root.to_uppercase(),
            category: SecurityType::Option,
        }
    }

    /// Instruments whose name matches `pattern`.
    pub fn by_name(pattern: &str, category: SecurityType) -> Self {
        Self {
            field: SearchField::Name,
            value: pattern.to_string(),
            category,
        }
    }

    /// The criteria path segment, before URL encoding.
    pub fn criteria(&self) -> String {
        let key = match self.field {
            SearchField::Root => "R",
            SearchField::Name => "N",
        };
        format!("{}={}&C={}", key, self.value, self.category.search_category())
    }
}

fn de_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(serde_json::Number),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => parse_decimal(&n.to_string())
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("unrepresentable number {n}"))),
        Some(Raw::Text(s)) => parse_decimal(&s)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("non-numeric value {s:?}"))),
    }
}

fn de_broker_time<'de, D>(deserializer: D) -> Result<Option<BrokerTime>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Millis(ms)) => Ok(Some(BrokerTime::from_millis(ms))),
        Some(Raw::Text(s)) => BrokerTime::parse(&s)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("unrecognized timestamp {s:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_full_frame() {
        let json = r#"{"Symbol":"SPY","Exchange":"ARCX","TradeTime":"/Date(1420826400000-0600)/",
            "Last":205.43,"Volume":"1200","Bid":205.42,"BidSize":3,"Ask":"205.44","AskSize":7}"#;
        let frame: QuoteFrame = serde_json::from_str(json).unwrap();

        assert_eq!(frame.symbol, "SPY");
        assert_eq!(frame.exchange.as_deref(), Some("ARCX"));
        assert_eq!(
            frame.trade_time,
            Some(BrokerTime::At(Utc.timestamp_millis_opt(1420826400000).unwrap()))
        );
        assert_eq!(frame.last, Some(dec!(205.43)));
        assert_eq!(frame.volume, Some(dec!(1200)));
        assert_eq!(frame.ask, Some(dec!(205.44)));
        assert!(frame.has_volume());
    }

    #[test]
    fn test_delta_frame_leaves_fields_absent() {
        let frame: QuoteFrame = serde_json::from_str(r#"{"Symbol":"SPY","Ask":205.5}"#).unwrap();
        assert_eq!(frame.ask, Some(dec!(205.5)));
        assert_eq!(frame.bid, None);
        assert_eq!(frame.trade_time, None);
        assert!(!frame.has_volume());
    }

    #[test]
    fn test_nan_string_rejects_frame() {
        let result = serde_json::from_str::<QuoteFrame>(r#"{"Symbol":"SPY","Bid":"NaN"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_symbol_rejects_frame() {
        assert!(serde_json::from_str::<QuoteFrame>(r#"{"Bid":1.0}"#).is_err());
    }

    #[test]
    fn test_sentinel_times() {
        assert_eq!(BrokerTime::parse("/Date(0)/"), Some(BrokerTime::Sentinel));
        assert_eq!(
            BrokerTime::parse("/Date(-62135596800000)/"),
            Some(BrokerTime::Sentinel)
        );
        assert_eq!(
            BrokerTime::parse("0001-01-01T00:00:00"),
            Some(BrokerTime::Sentinel)
        );
        assert_eq!(BrokerTime::from_millis(0), BrokerTime::Sentinel);
        assert!(BrokerTime::parse("garbage").is_none());
    }

    #[test]
    fn test_time_encodings() {
        let expected = Utc.with_ymd_and_hms(2024, 7, 10, 14, 30, 0).unwrap();
        assert_eq!(
            BrokerTime::parse("2024-07-10T10:30:00-04:00"),
            Some(BrokerTime::At(expected))
        );
        assert_eq!(
            BrokerTime::parse("2024-07-10T14:30:00"),
            Some(BrokerTime::At(expected))
        );
        assert_eq!(
            BrokerTime::parse(&expected.timestamp_millis().to_string()),
            Some(BrokerTime::At(expected))
        );
    }

    #[test]
    fn test_search_row() {
        let json = r#"{"Name":"SPY 161216C200","Category":"StockOption","Root":"SPY",
            "Underlying":"SPY","StrikePrice":"200","ExpirationDate":"/Date(1481864400000)/",
            "OptionType":"Call","Exchange":"OPRA"}"#;
        let row: SymbolSearchRow = serde_json::from_str(json).unwrap();
        assert_eq!(row.name, "SPY 161216C200");
        assert_eq!(row.strike_price, Some(dec!(200)));
        assert_eq!(row.option_type.as_deref(), Some("Call"));
        assert!(row.exercise_style.is_none());
    }

    #[test]
    fn test_search_criteria() {
        assert_eq!(SymbolSearch::option_chain("spy").criteria(), "R=SPY&C=StockOption");
        assert_eq!(
            SymbolSearch::by_name("AAP", SecurityType::Equity).criteria(),
            "N=AAP&C=Stock"
        );
    }
}
