//! Desired-instrument registry with debounced stream rebuilds.
//!
//! The broker serves every symbol over one connection whose URL lists them
//! all, so any change to the set means tearing that connection down and
//! opening a new one. Frameworks tend to add and remove instruments in
//! bursts; the registry therefore only raises the rebuild signal once a burst
//! has gone quiet.

use super::debounce::Debouncer;
use super::resolver::SymbolResolver;
use crate::market::InstrumentId;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Flag + wakeup telling the reader task the subscription set changed.
#[derive(Debug, Default)]
pub struct RebuildSignal {
    pending: AtomicBool,
    notify: Notify,
    raised: AtomicU64,
}

impl RebuildSignal {
    fn raise(&self) {
        self.raised.fetch_add(1, Ordering::SeqCst);
        self.pending.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Whether a rebuild is pending, without consuming it.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Consume a pending rebuild.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }

    /// Wait for the next raise. May also return for a raise that has already
    /// been consumed, so re-check [`Self::is_pending`].
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// How many times the debounce timer has fired.
    pub fn raised_count(&self) -> u64 {
        self.raised.load(Ordering::SeqCst)
    }
}

/// Tracks which instruments the consumer wants streamed.
pub struct SubscriptionRegistry {
    resolver: Arc<SymbolResolver>,
    desired: RwLock<HashMap<InstrumentId, bool>>,
    signal: Arc<RebuildSignal>,
    debouncer: Debouncer,
}

impl SubscriptionRegistry {
    /// Create the registry and start its debounce timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(resolver: Arc<SymbolResolver>, debounce: Duration) -> Self {
        let signal = Arc::new(RebuildSignal::default());
        let timer_signal = signal.clone();
        let debouncer = Debouncer::spawn(debounce, move || {
            debug!("Subscription changes settled; requesting stream rebuild");
            timer_signal.raise();
        });

        Self {
            resolver,
            desired: RwLock::new(HashMap::new()),
            signal,
            debouncer,
        }
    }

    pub fn resolver(&self) -> &Arc<SymbolResolver> {
        &self.resolver
    }

    pub fn signal(&self) -> &Arc<RebuildSignal> {
        &self.signal
    }

    /// Mark instruments as desired.
    ///
    /// Option chains are expanded into the contracts the broker lists right
    /// now. An instrument that cannot be resolved is logged and skipped; the
    /// rest of the batch still goes through. Returns how many instruments
    /// became desired.
    pub async fn subscribe(&self, instruments: &[InstrumentId]) -> usize {
        let mut added = 0;

        for instrument in instruments {
            if self.is_desired(instrument) {
                continue;
            }

            match instrument {
                InstrumentId::OptionChain { underlying } => {
                    match self.resolver.resolve_option_chain(underlying).await {
                        Ok(contracts) => {
                            if contracts.is_empty() {
                                warn!("No listed contracts for {}", instrument);
                            }
                            let mut desired = self.desired.write();
                            desired.insert(instrument.clone(), true);
                            for contract in contracts {
                                if desired.insert(contract, true) != Some(true) {
                                    added += 1;
                                }
                            }
                        }
                        Err(e) => warn!("Cannot subscribe {}: {}", instrument, e),
                    }
                }
                _ => match self.resolver.to_broker_name(instrument).await {
                    Ok(_) => {
                        self.desired.write().insert(instrument.clone(), true);
                        added += 1;
                    }
                    Err(e) => warn!("Cannot subscribe {}: {}", instrument, e),
                },
            }
        }

        if added > 0 {
            info!("Subscribed {} instruments", added);
            self.debouncer.poke();
        }
        added
    }

    /// Mark instruments as no longer desired. Unsubscribing a chain drops
    /// every contract on its underlying. Returns how many were dropped.
    pub fn unsubscribe(&self, instruments: &[InstrumentId]) -> usize {
        let mut removed = 0;
        {
            let mut desired = self.desired.write();
            for instrument in instruments {
                if let InstrumentId::OptionChain { underlying } = instrument {
                    desired.insert(instrument.clone(), false);
                    for (candidate, wanted) in desired.iter_mut() {
                        let on_chain = candidate
                            .as_option()
                            .is_some_and(|c| &c.underlying == underlying);
                        if on_chain && *wanted {
                            *wanted = false;
                            removed += 1;
                        }
                    }
                } else if let Some(wanted) = desired.get_mut(instrument) {
                    if *wanted {
                        *wanted = false;
                        removed += 1;
                    }
                }
            }
        }

        if removed > 0 {
            info!("Unsubscribed {} instruments", removed);
            self.debouncer.poke();
        }
        removed
    }

    pub fn is_desired(&self, instrument: &InstrumentId) -> bool {
        self.desired.read().get(instrument).copied().unwrap_or(false)
    }

    /// Desired quotable instruments (chains excluded).
    pub fn desired_instruments(&self) -> Vec<InstrumentId> {
        self.desired
            .read()
            .iter()
            .filter(|(instrument, wanted)| **wanted && !instrument.is_chain())
            .map(|(instrument, _)| instrument.clone())
            .collect()
    }

    /// Sorted, de-duplicated broker names to open the stream with.
    pub fn broker_symbols(&self) -> Vec<String> {
        self.desired_instruments()
            .iter()
            .filter_map(|instrument| self.resolver.cached_broker_name(instrument))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.desired_instruments().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;
    use crate::market::{OptionRight, OptionStyle};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use tokio::time::sleep;

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 19).unwrap()
    }

    fn registry() -> SubscriptionRegistry {
        let broker = Arc::new(MockBroker::new().with_option_chain(
            "QQQ",
            vec![
                MockBroker::option_row("QQQ", expiry(), OptionRight::Call, dec!(450)),
                MockBroker::option_row("QQQ", expiry(), OptionRight::Put, dec!(450)),
            ],
        ));
        SubscriptionRegistry::new(
            Arc::new(SymbolResolver::new(broker)),
            Duration::from_secs(5),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_subscribes_triggers_one_rebuild() {
        let registry = registry();

        for ticker in ["AAPL", "MSFT", "SPY", "IWM", "TLT"] {
            registry.subscribe(&[InstrumentId::equity(ticker)]).await;
            sleep(Duration::from_millis(500)).await;
        }
        assert!(!registry.signal().is_pending());

        sleep(Duration::from_secs(6)).await;
        assert_eq!(registry.signal().raised_count(), 1);
        assert!(registry.signal().take());
        assert!(!registry.signal().take());
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_expands_to_contracts() {
        let registry = registry();
        let added = registry
            .subscribe(&[InstrumentId::option_chain("QQQ"), InstrumentId::equity("QQQ")])
            .await;
        assert_eq!(added, 3);

        let put = InstrumentId::option("QQQ", dec!(450), expiry(), OptionRight::Put, OptionStyle::American);
        assert!(registry.is_desired(&put));
        assert_eq!(
            registry.broker_symbols(),
            vec!["QQQ", "QQQ 240719C450", "QQQ 240719P450"]
        );

        // Re-subscribing is a no-op
        assert_eq!(registry.subscribe(&[InstrumentId::option_chain("QQQ")]).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_chain_drops_contracts() {
        let registry = registry();
        registry
            .subscribe(&[InstrumentId::option_chain("QQQ"), InstrumentId::equity("QQQ")])
            .await;

        assert_eq!(registry.unsubscribe(&[InstrumentId::option_chain("QQQ")]), 2);
        assert_eq!(registry.broker_symbols(), vec!["QQQ"]);
        assert_eq!(registry.unsubscribe(&[InstrumentId::equity("QQQ")]), 1);
        assert!(registry.is_empty());

        // Nothing left to drop
        assert_eq!(registry.unsubscribe(&[InstrumentId::equity("QQQ")]), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolvable_instrument_skipped() {
        let registry = registry();
        let missing = InstrumentId::option("QQQ", dec!(1), expiry(), OptionRight::Call, OptionStyle::American);

        let added = registry
            .subscribe(&[missing.clone(), InstrumentId::equity("SPY")])
            .await;

        assert_eq!(added, 1);
        assert!(!registry.is_desired(&missing));
        assert!(registry.is_desired(&InstrumentId::equity("SPY")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_change_no_rebuild() {
        let registry = registry();
        registry.unsubscribe(&[InstrumentId::equity("SPY")]);
        sleep(Duration::from_secs(10)).await;
        assert_eq!(registry.signal().raised_count(), 0);
    }
}
