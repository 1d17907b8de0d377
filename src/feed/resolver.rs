//! Mapping between normalized instruments and broker-native names.
//!
//! Option contracts have no derivable broker name; they are learned by listing
//! the underlying's chain through the broker's symbol search. Everything
//! learned is cached for the life of the process and never evicted.

use super::error::ResolutionError;
use crate::broker::{BrokerApi, SymbolSearch, SymbolSearchRow};
use crate::market::{InstrumentId, MarketHours, OptionRight, OptionStyle, SecurityType};
use chrono::NaiveDate;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Bidirectional instrument <-> broker name map with O(1) lookups both ways.
#[derive(Debug, Default)]
struct SymbolMap {
    by_instrument: HashMap<InstrumentId, String>,
    by_name: HashMap<String, InstrumentId>,
}

impl SymbolMap {
    /// Pair `instrument` with `name`, replacing any previous pairing of either.
    ///
    /// Returns the instrument that previously owned `name`, if it was a
    /// different one. Stream frames carry only the name, so one name can
    /// route to one instrument at a time.
    fn insert(&mut self, instrument: InstrumentId, name: String) -> Option<InstrumentId> {
        if let Some(old_name) = self.by_instrument.get(&instrument) {
            if *old_name != name {
                self.by_name.remove(old_name);
            }
        }

        let mut displaced = None;
        if let Some(old_instrument) = self.by_name.get(&name) {
            if *old_instrument != instrument {
                if old_instrument.security_type() != instrument.security_type() {
                    warn!(
                        "Broker name {} now routes to {} {} instead of {} {}",
                        name,
                        instrument.security_type(),
                        instrument,
                        old_instrument.security_type(),
                        old_instrument
                    );
                }
                self.by_instrument.remove(old_instrument);
                displaced = Some(old_instrument.clone());
            }
        }

        self.by_instrument.insert(instrument.clone(), name.clone());
        self.by_name.insert(name, instrument);
        displaced
    }

    fn name_of(&self, instrument: &InstrumentId) -> Option<&String> {
        self.by_instrument.get(instrument)
    }

    fn instrument_of(&self, name: &str) -> Option<&InstrumentId> {
        self.by_name.get(name)
    }

    fn len(&self) -> usize {
        self.by_instrument.len()
    }
}

/// Resolves instruments to broker names and back.
pub struct SymbolResolver {
    broker: Arc<dyn BrokerApi>,
    map: RwLock<SymbolMap>,
}

impl SymbolResolver {
    pub fn new(broker: Arc<dyn BrokerApi>) -> Self {
        Self {
            broker,
            map: RwLock::new(SymbolMap::default()),
        }
    }

    /// List every contract on `underlying` and register their broker names.
    ///
    /// Always issues a fresh search; entries from earlier calls are
    /// overwritten rather than used to skip the request.
    #[instrument(skip(self))]
    pub async fn resolve_option_chain(
        &self,
        underlying: &str,
    ) -> Result<Vec<InstrumentId>, ResolutionError> {
        let rows = self
            .broker
            .search_symbols(&SymbolSearch::option_chain(underlying))
            .await
            .map_err(|e| ResolutionError::Search {
                root: underlying.to_uppercase(),
                reason: e.to_string(),
            })?;

        let mut contracts = Vec::with_capacity(rows.len());
        {
            let mut map = self.map.write();
            for row in &rows {
                match option_from_row(row, underlying) {
                    Some(contract) => {
                        map.insert(contract.clone(), row.name.clone());
                        contracts.push(contract);
                    }
                    None => debug!("Skipping undecodable option row {:?}", row.name),
                }
            }
        }

        info!(
            "Resolved {} contracts for {} ({} rows)",
            contracts.len(),
            underlying,
            rows.len()
        );
        Ok(contracts)
    }

    /// Broker name for `instrument`.
    ///
    /// An unknown option contract triggers one chain resolution of its
    /// underlying before giving up.
    pub async fn to_broker_name(&self, instrument: &InstrumentId) -> Result<String, ResolutionError> {
        if let Some(name) = self.cached_broker_name(instrument) {
            return Ok(name);
        }

        match instrument {
            InstrumentId::Equity { ticker } | InstrumentId::Future { ticker } => {
                self.map.write().insert(instrument.clone(), ticker.clone());
                Ok(ticker.clone())
            }
            InstrumentId::Option(contract) => {
                self.resolve_option_chain(&contract.underlying).await?;
                self.cached_broker_name(instrument)
                    .ok_or_else(|| ResolutionError::NotFound(instrument.clone()))
            }
            InstrumentId::OptionChain { .. } => Err(ResolutionError::Chain(instrument.clone())),
        }
    }

    /// Cached broker name, without touching the network.
    pub fn cached_broker_name(&self, instrument: &InstrumentId) -> Option<String> {
        self.map.read().name_of(instrument).cloned()
    }

    /// Instrument for a broker name.
    ///
    /// Names never seen before are taken as equity tickers unless they look
    /// like option contracts, which always need prior resolution.
    pub fn to_instrument(&self, name: &str) -> Option<InstrumentId> {
        if let Some(instrument) = self.map.read().instrument_of(name) {
            return Some(instrument.clone());
        }
        if looks_like_equity(name) {
            Some(InstrumentId::equity(name))
        } else {
            None
        }
    }

    /// Search instruments by name pattern.
    ///
    /// Option lookups list the chain of `pattern`; other classes run a name
    /// search and register what comes back.
    #[instrument(skip(self))]
    pub async fn lookup(
        &self,
        pattern: &str,
        security_type: SecurityType,
    ) -> Result<Vec<InstrumentId>, ResolutionError> {
        if security_type == SecurityType::Option {
            return self.resolve_option_chain(pattern).await;
        }

        let rows = self
            .broker
            .search_symbols(&SymbolSearch::by_name(pattern, security_type))
            .await
            .map_err(|e| ResolutionError::Search {
                root: pattern.to_string(),
                reason: e.to_string(),
            })?;

        let mut map = self.map.write();
        let instruments = rows
            .into_iter()
            .map(|row| {
                let instrument = match security_type {
                    SecurityType::Future => InstrumentId::future(&row.name),
                    _ => InstrumentId::equity(&row.name),
                };
                map.insert(instrument.clone(), row.name);
                instrument
            })
            .collect();
        Ok(instruments)
    }

    /// Number of cached pairings.
    pub fn cached_len(&self) -> usize {
        self.map.read().len()
    }
}

fn looks_like_equity(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '/')
}

/// Build a contract from a search row, falling back to the name's
/// "ROOT YYMMDD[C|P]STRIKE" layout for any field the row leaves out.
fn option_from_row(row: &SymbolSearchRow, requested_root: &str) -> Option<InstrumentId> {
    let parsed = parse_option_name(&row.name);

    let underlying = row
        .underlying
        .clone()
        .or_else(|| row.root.clone())
        .or_else(|| parsed.as_ref().map(|p| p.root.clone()))
        .unwrap_or_else(|| requested_root.to_string());

    let strike = row.strike_price.or(parsed.as_ref().map(|p| p.strike))?;

    let expiry = row
        .expiration_date
        .and_then(|t| t.valid())
        .map(|t| MarketHours::exchange_time(SecurityType::Option, t).date_naive())
        .or(parsed.as_ref().map(|p| p.expiry))?;

    let right = row
        .option_type
        .as_deref()
        .and_then(parse_right)
        .or(parsed.as_ref().map(|p| p.right))?;

    let style = match row.exercise_style.as_deref() {
        Some(s) if s.eq_ignore_ascii_case("european") => OptionStyle::European,
        _ => OptionStyle::American,
    };

    Some(InstrumentId::option(underlying, strike, expiry, right, style))
}

fn parse_right(raw: &str) -> Option<OptionRight> {
    match raw.to_ascii_lowercase().as_str() {
        "call" | "c" => Some(OptionRight::Call),
        "put" | "p" => Some(OptionRight::Put),
        _ => None,
    }
}

#[derive(Debug, PartialEq)]
struct ParsedOptionName {
    root: String,
    expiry: NaiveDate,
    right: OptionRight,
    strike: Decimal,
}

/// Parse "SPY 161216C200" style names.
fn parse_option_name(name: &str) -> Option<ParsedOptionName> {
    let (root, rest) = name.trim().split_once(' ')?;
    if rest.len() < 8 || !rest.is_char_boundary(6) || !rest.is_char_boundary(7) {
        return None;
    }
    let expiry = NaiveDate::parse_from_str(&rest[..6], "%y%m%d").ok()?;
    let right = parse_right(&rest[6..7])?;
    let strike = Decimal::from_str(&rest[7..]).ok()?;

    Some(ParsedOptionName {
        root: root.to_string(),
        expiry,
        right,
        strike,
    })
}
