//! Turns decoded frames into normalized ticks, and the consumer-side stream.

use super::quotes::{QuoteMergeCache, QuoteSnapshot};
use super::subscriptions::SubscriptionRegistry;
use crate::broker::QuoteFrame;
use crate::market::{InstrumentId, MarketHours, SecurityType, Tick, TickKind};
use crate::utils::decimal::midpoint;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use rust_decimal::Decimal;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Why a frame produced no tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppressed {
    /// Broker symbol has no known instrument
    Unresolved,
    /// Instrument is not in the desired set; the snapshot is still kept current
    NotSubscribed,
    /// Broker sent its default timestamp, or none has been seen yet
    SentinelTime,
    /// Merged quote still lacks the fields this tick kind needs
    NotActionable,
}

impl Suppressed {
    /// Whether the frame was merged into the cache before being dropped.
    pub fn merged(&self) -> bool {
        !matches!(self, Suppressed::Unresolved)
    }
}

/// Per-session frame-to-tick pipeline: resolve, merge, filter, classify.
pub struct TickEmitter {
    cache: QuoteMergeCache,
    registry: Arc<SubscriptionRegistry>,
}

impl TickEmitter {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            cache: QuoteMergeCache::new(),
            registry,
        }
    }

    /// Process one frame received at `now`.
    pub fn on_frame(&mut self, frame: &QuoteFrame, now: DateTime<Utc>) -> Result<Tick, Suppressed> {
        let instrument = self
            .registry
            .resolver()
            .to_instrument(&frame.symbol)
            .ok_or(Suppressed::Unresolved)?;

        let snapshot = self.cache.merge(frame);

        if !self.registry.is_desired(&instrument) {
            return Err(Suppressed::NotSubscribed);
        }

        let sentinel = frame.trade_time.is_some_and(|t| t.is_sentinel());
        if sentinel || snapshot.trade_time.is_none() {
            return Err(Suppressed::SentinelTime);
        }

        // Option feeds carry no dependable last-trade attribution
        let kind = match instrument.security_type() {
            SecurityType::Option => TickKind::Quote,
            SecurityType::Equity | SecurityType::Future if frame.has_volume() => TickKind::Trade,
            SecurityType::Equity | SecurityType::Future => TickKind::Quote,
        };

        build_tick(instrument, kind, snapshot, now).ok_or(Suppressed::NotActionable)
    }

    /// Drop all snapshots; called when a new stream session starts.
    pub fn reset(&mut self) {
        self.cache.clear();
    }

    pub fn cache(&self) -> &QuoteMergeCache {
        &self.cache
    }
}

fn build_tick(
    instrument: InstrumentId,
    kind: TickKind,
    snapshot: &QuoteSnapshot,
    now: DateTime<Utc>,
) -> Option<Tick> {
    let (price, size) = match kind {
        TickKind::Trade => (snapshot.last?, snapshot.volume.unwrap_or_default()),
        TickKind::Quote => {
            if !snapshot.has_quote() {
                return None;
            }
            (midpoint(snapshot.bid?, snapshot.ask?)?, Decimal::ZERO)
        }
    };

    Some(Tick {
        time: MarketHours::exchange_time(instrument.security_type(), now),
        symbol: instrument,
        kind,
        price,
        size,
        bid: snapshot.bid.unwrap_or_default(),
        bid_size: snapshot.bid_size.unwrap_or_default(),
        ask: snapshot.ask.unwrap_or_default(),
        ask_size: snapshot.ask_size.unwrap_or_default(),
        exchange: snapshot.exchange.clone().unwrap_or_default(),
    })
}

/// Single-consumer pull sequence of ticks.
///
/// Waits until the next tick arrives and yields `None` once the reader has
/// stopped (disconnect or authorization failure). It cannot be restarted;
/// ask the handler for a new one after reconnecting.
#[derive(Debug)]
pub struct TickStream {
    rx: mpsc::Receiver<Tick>,
}

impl TickStream {
    pub(crate) fn new(rx: mpsc::Receiver<Tick>) -> Self {
        Self { rx }
    }

    pub async fn next_tick(&mut self) -> Option<Tick> {
        self.rx.recv().await
    }
}

impl Stream for TickStream {
    type Item = Tick;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Tick>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerTime, MockBroker};
    use crate::feed::resolver::SymbolResolver;
    use crate::market::{OptionRight, OptionStyle};
    use chrono::{NaiveDate, TimeZone};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const NOW_MS: i64 = 1_720_620_000_000;

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 19).unwrap()
    }

    async fn emitter() -> TickEmitter {
        let broker = Arc::new(MockBroker::new().with_option_chain(
            "QQQ",
            vec![MockBroker::option_row("QQQ", expiry(), OptionRight::Call, dec!(450))],
        ));
        let registry = Arc::new(SubscriptionRegistry::new(
            Arc::new(SymbolResolver::new(broker)),
            Duration::from_secs(5),
        ));
        registry
            .subscribe(&[InstrumentId::equity("SPY"), InstrumentId::option_chain("QQQ")])
            .await;
        TickEmitter::new(registry)
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(NOW_MS).unwrap()
    }

    fn quote(symbol: &str) -> QuoteFrame {
        QuoteFrame {
            exchange: Some("Q".to_string()),
            trade_time: Some(BrokerTime::from_millis(NOW_MS)),
            last: Some(dec!(1.45)),
            bid: Some(dec!(1.40)),
            bid_size: Some(dec!(10)),
            ask: Some(dec!(1.50)),
            ask_size: Some(dec!(12)),
            ..QuoteFrame::new(symbol)
        }
    }

    #[tokio::test]
    async fn test_option_ticks_are_always_quotes() {
        let mut emitter = emitter().await;
        let frame = QuoteFrame {
            volume: Some(dec!(25)),
            ..quote("QQQ 240719C450")
        };

        let tick = emitter.on_frame(&frame, now()).unwrap();
        assert_eq!(tick.kind, TickKind::Quote);
        assert_eq!(
            tick.symbol,
            InstrumentId::option("QQQ", dec!(450), expiry(), OptionRight::Call, OptionStyle::American)
        );
        assert_eq!(tick.price, dec!(1.45));
        assert_eq!(tick.size, Decimal::ZERO);
        assert_eq!(tick.bid_size, dec!(10));
    }

    #[tokio::test]
    async fn test_equity_trade_or_quote_by_volume() {
        let mut emitter = emitter().await;

        let trade = emitter
            .on_frame(&QuoteFrame { volume: Some(dec!(100)), ..quote("SPY") }, now())
            .unwrap();
        assert_eq!(trade.kind, TickKind::Trade);
        assert_eq!(trade.price, dec!(1.45));
        assert_eq!(trade.size, dec!(100));

        // Delta without volume: quote, built on the merged snapshot
        let delta = QuoteFrame {
            ask: Some(dec!(1.60)),
            ..QuoteFrame::new("SPY")
        };
        let tick = emitter.on_frame(&delta, now()).unwrap();
        assert_eq!(tick.kind, TickKind::Quote);
        assert_eq!(tick.bid, dec!(1.40));
        assert_eq!(tick.ask, dec!(1.60));
        assert_eq!(tick.exchange, "Q");
    }

    #[tokio::test]
    async fn test_unsubscribed_symbol_suppressed() {
        let mut emitter = emitter().await;
        let result = emitter.on_frame(&quote("AAPL"), now());
        assert_eq!(result, Err(Suppressed::NotSubscribed));
        assert!(result.unwrap_err().merged());
        assert!(emitter.cache().get("AAPL").is_some());

        assert_eq!(
            emitter.on_frame(&quote("QQQ 240719P999"), now()),
            Err(Suppressed::Unresolved)
        );
        assert_eq!(emitter.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_tracks_deltas_while_unsubscribed() {
        let mut emitter = emitter().await;
        let spy = InstrumentId::equity("SPY");
        let full = QuoteFrame {
            bid: Some(dec!(10.0)),
            ask: Some(dec!(10.2)),
            ..quote("SPY")
        };
        emitter.on_frame(&full, now()).unwrap();

        emitter.registry.unsubscribe(&[spy.clone()]);
        let bid_delta = QuoteFrame {
            bid: Some(dec!(11.0)),
            ..QuoteFrame::new("SPY")
        };
        assert_eq!(emitter.on_frame(&bid_delta, now()), Err(Suppressed::NotSubscribed));

        emitter.registry.subscribe(&[spy]).await;
        let ask_delta = QuoteFrame {
            ask: Some(dec!(11.2)),
            ..QuoteFrame::new("SPY")
        };
        let tick = emitter.on_frame(&ask_delta, now()).unwrap();
        assert_eq!(tick.bid, dec!(11.0));
        assert_eq!(tick.ask, dec!(11.2));
        assert_eq!(tick.price, dec!(11.1));
    }

    #[tokio::test]
    async fn test_overflowing_quote_not_actionable() {
        let mut emitter = emitter().await;
        let frame = QuoteFrame {
            bid: Some(Decimal::MAX),
            ask: Some(Decimal::MAX),
            ..quote("SPY")
        };
        assert_eq!(emitter.on_frame(&frame, now()), Err(Suppressed::NotActionable));
        assert_eq!(emitter.cache().get("SPY").and_then(|s| s.bid), Some(Decimal::MAX));
    }

    #[tokio::test]
    async fn test_sentinel_time_suppressed() {
        let mut emitter = emitter().await;
        let frame = QuoteFrame {
            trade_time: Some(BrokerTime::Sentinel),
            ..quote("SPY")
        };
        assert_eq!(emitter.on_frame(&frame, now()), Err(Suppressed::SentinelTime));

        // No valid time seen yet for this symbol
        let untimed = QuoteFrame {
            trade_time: None,
            ..quote("SPY")
        };
        assert_eq!(emitter.on_frame(&untimed, now()), Err(Suppressed::SentinelTime));

        // A good timestamp later unlocks the symbol
        assert!(emitter.on_frame(&quote("SPY"), now()).is_ok());
    }

    #[tokio::test]
    async fn test_one_sided_quote_not_actionable() {
        let mut emitter = emitter().await;
        let frame = QuoteFrame {
            trade_time: Some(BrokerTime::from_millis(NOW_MS)),
            bid: Some(dec!(1.40)),
            ..QuoteFrame::new("QQQ 240719C450")
        };
        let result = emitter.on_frame(&frame, now());
        assert_eq!(result, Err(Suppressed::NotActionable));
        assert!(result.unwrap_err().merged());
    }

    #[tokio::test]
    async fn test_tick_stamped_in_exchange_time() {
        let mut emitter = emitter().await;
        let tick = emitter.on_frame(&quote("SPY"), now()).unwrap();
        // 2024-07-10 14:00 UTC is 10:00 in New York
        assert_eq!(tick.time.naive_local().format("%H:%M").to_string(), "10:00");
        assert_eq!(tick.time.with_timezone(&Utc), now());
    }

    #[tokio::test]
    async fn test_reset_discards_snapshots() {
        let mut emitter = emitter().await;
        emitter.on_frame(&quote("SPY"), now()).unwrap();
        assert_eq!(emitter.cache().len(), 1);
        emitter.reset();
        assert!(emitter.cache().is_empty());
    }

    #[tokio::test]
    async fn test_tick_stream_waits_then_ends() {
        use tokio_test::{assert_pending, assert_ready_eq, task};

        let (tx, rx) = mpsc::channel(4);
        let mut stream = TickStream::new(rx);

        {
            let mut next = task::spawn(stream.next_tick());
            assert_pending!(next.poll());
        }

        drop(tx);
        let mut next = task::spawn(stream.next_tick());
        assert_ready_eq!(next.poll(), None);
    }
}
