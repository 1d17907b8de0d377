//! Streaming session manager.
//!
//! One reader task owns the broker connection for the whole process and
//! drives it through `Idle -> Connecting -> Streaming`, dropping to `Faulted`
//! (and possibly `MarketClosedWait`) whenever the connection dies. Nothing
//! that goes wrong in here reaches the tick consumer as an error: frames are
//! skipped, connections are retried, and an authorization failure quietly
//! ends the stream and clears the connected flag.

use super::emitter::{TickEmitter, TickStream};
use super::error::{AuthorizationError, FrameParseError, StreamConnectError};
use super::subscriptions::SubscriptionRegistry;
use crate::broker::{BrokerApi, FrameSplitter, QuoteByteStream, QuoteFrame};
use crate::config::{Config, MarketHoursConfig, StreamConfig};
use crate::market::{InstrumentId, MarketHours, Tick};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

/// Phase of the streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Faulted,
    MarketClosedWait,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Streaming => "streaming",
            SessionState::Faulted => "faulted",
            SessionState::MarketClosedWait => "market-closed-wait",
        };
        f.write_str(name)
    }
}

/// Decode one JSON object cut from the stream body.
pub fn decode_frame(raw: &[u8]) -> Result<QuoteFrame, FrameParseError> {
    serde_json::from_slice(raw).map_err(|e| FrameParseError::new(raw, e))
}

/// Running counters for the reader loop.
#[derive(Debug, Default)]
pub struct StreamStats {
    frames_received: AtomicU64,
    frames_malformed: AtomicU64,
    snapshots_merged: AtomicU64,
    ticks_emitted: AtomicU64,
    ticks_suppressed: AtomicU64,
    sessions_opened: AtomicU64,
    faults: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl StreamStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_malformed: self.frames_malformed.load(Ordering::Relaxed),
            snapshots_merged: self.snapshots_merged.load(Ordering::Relaxed),
            ticks_emitted: self.ticks_emitted.load(Ordering::Relaxed),
            ticks_suppressed: self.ticks_suppressed.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`StreamStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    pub frames_malformed: u64,
    pub snapshots_merged: u64,
    pub ticks_emitted: u64,
    pub ticks_suppressed: u64,
    pub sessions_opened: u64,
    pub faults: u64,
}

/// State shared between the reader task and the handler that owns it.
#[derive(Debug)]
pub struct SessionControl {
    connected: AtomicBool,
    cancel: CancellationToken,
    state: watch::Sender<SessionState>,
    stats: StreamStats,
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionControl {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            connected: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            state,
            stats: StreamStats::default(),
        }
    }

    /// False after a disconnect or an authorization failure.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Ask the reader to stop. It closes the stream at its next suspension
    /// point.
    pub fn cancel(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Session {} -> {}", previous, state);
        }
    }
}

/// How long to wait before reconnecting after a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Some subscribed market is open: retry soon
    Backoff(Duration),
    /// Every subscribed market is closed: wait long
    MarketClosed(Duration),
}

impl RetryDecision {
    pub fn delay(&self) -> Duration {
        match self {
            RetryDecision::Backoff(d) | RetryDecision::MarketClosed(d) => *d,
        }
    }
}

/// Market-hours-aware reconnect policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    fault_backoff: Duration,
    market_closed_wait: Duration,
    hours: MarketHours,
    clock: fn() -> DateTime<Utc>,
}

impl RetryPolicy {
    pub fn new(fault_backoff: Duration, market_closed_wait: Duration, hours: MarketHours) -> Self {
        Self {
            fault_backoff,
            market_closed_wait,
            hours,
            clock: Utc::now,
        }
    }

    /// Replace the wall clock used by [`RetryPolicy::decide`].
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn from_config(stream: &StreamConfig, hours: &MarketHoursConfig) -> Self {
        Self::new(
            stream.fault_backoff(),
            stream.market_closed_wait(),
            MarketHours::new(hours.extended_hours),
        )
    }

    pub fn after_fault(&self, subscribed: &[InstrumentId], now: DateTime<Utc>) -> RetryDecision {
        if self.hours.any_open(subscribed, now) {
            RetryDecision::Backoff(self.fault_backoff)
        } else {
            RetryDecision::MarketClosed(self.market_closed_wait)
        }
    }

    /// Decide at the policy's current time.
    pub fn decide(&self, subscribed: &[InstrumentId]) -> RetryDecision {
        self.after_fault(subscribed, (self.clock)())
    }
}

/// Why a streaming session ended.
enum SessionEnd {
    Rebuild,
    Cancelled,
    Fault(StreamConnectError),
}

/// The reader task.
pub struct SessionManager {
    broker: Arc<dyn BrokerApi>,
    registry: Arc<SubscriptionRegistry>,
    emitter: TickEmitter,
    retry: RetryPolicy,
    idle_timeout: Duration,
    max_frame_bytes: usize,
    ticks: mpsc::Sender<Tick>,
    control: Arc<SessionControl>,
}

impl SessionManager {
    /// Build the manager and the tick stream it feeds.
    pub fn new(
        broker: Arc<dyn BrokerApi>,
        registry: Arc<SubscriptionRegistry>,
        config: &Config,
        control: Arc<SessionControl>,
    ) -> (Self, TickStream) {
        let (ticks, rx) = mpsc::channel(config.stream.tick_buffer.max(1));
        let manager = Self {
            broker,
            emitter: TickEmitter::new(registry.clone()),
            registry,
            retry: RetryPolicy::from_config(&config.stream, &config.market_hours),
            idle_timeout: config.stream.idle_timeout(),
            max_frame_bytes: config.stream.max_frame_bytes,
            ticks,
            control,
        };
        (manager, TickStream::new(rx))
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run until cancelled or the broker rejects the token.
    #[instrument(name = "quote_session", skip_all)]
    pub async fn run(mut self) {
        info!("Quote session manager started");

        let mut state = SessionState::Idle;
        let mut body: Option<QuoteByteStream> = None;
        let mut closed_wait = Duration::ZERO;

        while !self.control.is_cancelled() {
            self.control.set_state(state);

            state = match state {
                SessionState::Idle => {
                    if !self.wait_for_work().await {
                        break;
                    }
                    SessionState::Connecting
                }

                SessionState::Connecting => match self.connect().await {
                    Ok(Some(stream)) => {
                        body = Some(stream);
                        SessionState::Streaming
                    }
                    Ok(None) => SessionState::Idle,
                    Err(StreamConnectError::Connect(e)) if e.is_unauthorized() => {
                        error!("{}", AuthorizationError);
                        self.control.connected.store(false, Ordering::SeqCst);
                        break;
                    }
                    Err(e) => {
                        self.record_fault(&e);
                        SessionState::Faulted
                    }
                },

                SessionState::Streaming => match body.take() {
                    None => SessionState::Connecting,
                    Some(stream) => match self.pump(stream).await {
                        SessionEnd::Rebuild => {
                            info!("Subscriptions changed; rebuilding quote stream");
                            SessionState::Idle
                        }
                        SessionEnd::Cancelled => break,
                        SessionEnd::Fault(e) => {
                            self.record_fault(&e);
                            SessionState::Faulted
                        }
                    },
                },

                SessionState::Faulted => {
                    let subscribed = self.registry.desired_instruments();
                    match self.retry.decide(&subscribed) {
                        RetryDecision::Backoff(delay) => {
                            warn!("Reconnecting in {:?}", delay);
                            if !self.pause(delay).await {
                                break;
                            }
                            SessionState::Connecting
                        }
                        RetryDecision::MarketClosed(delay) => {
                            closed_wait = delay;
                            SessionState::MarketClosedWait
                        }
                    }
                }

                SessionState::MarketClosedWait => {
                    info!("All subscribed markets closed; retrying in {:?}", closed_wait);
                    if !self.pause(closed_wait).await {
                        break;
                    }
                    SessionState::Connecting
                }
            };
        }

        self.control.set_state(SessionState::Idle);
        let stats = self.control.stats.snapshot();
        info!(
            "Quote session manager stopped: {} sessions, {} frames ({} malformed), {} ticks emitted, {} suppressed, {} faults",
            stats.sessions_opened,
            stats.frames_received,
            stats.frames_malformed,
            stats.ticks_emitted,
            stats.ticks_suppressed,
            stats.faults
        );
    }

    /// Block in `Idle` until a rebuild is pending for a non-empty set.
    /// Returns false on cancellation.
    async fn wait_for_work(&self) -> bool {
        let signal = self.registry.signal();
        loop {
            if signal.take() && !self.registry.is_empty() {
                return true;
            }
            tokio::select! {
                _ = self.control.cancel.cancelled() => return false,
                _ = signal.notified() => {}
            }
        }
    }

    /// Open a stream for the current subscription set. `Ok(None)` means
    /// there is nothing to stream, or the open was cancelled.
    async fn connect(&mut self) -> Result<Option<QuoteByteStream>, StreamConnectError> {
        // Whatever is pending now is covered by this connection
        self.registry.signal().take();

        let symbols = self.registry.broker_symbols();
        if symbols.is_empty() {
            info!("No subscribed symbols; quote stream stays closed");
            return Ok(None);
        }

        info!("Opening quote stream for {} symbols", symbols.len());
        let opened = tokio::select! {
            _ = self.control.cancel.cancelled() => return Ok(None),
            opened = self.broker.open_quote_stream(&symbols) => opened,
        };
        let body = opened.map_err(StreamConnectError::Connect)?;

        bump(&self.control.stats.sessions_opened);
        self.emitter.reset();
        Ok(Some(body))
    }

    /// Read the body until it fails, goes idle, or has to be rebuilt.
    async fn pump(&mut self, mut body: QuoteByteStream) -> SessionEnd {
        let mut splitter = FrameSplitter::new(self.max_frame_bytes);
        let signal = self.registry.signal().clone();
        let cancel = self.control.cancel.clone();

        loop {
            if signal.is_pending() {
                return SessionEnd::Rebuild;
            }

            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                _ = signal.notified() => continue,
                read = timeout(self.idle_timeout, body.next()) => read,
            };

            let chunk = match read {
                Err(_) => return SessionEnd::Fault(StreamConnectError::IdleTimeout(self.idle_timeout)),
                Ok(None) => return SessionEnd::Fault(StreamConnectError::Closed),
                Ok(Some(Err(e))) => return SessionEnd::Fault(StreamConnectError::Read(e)),
                Ok(Some(Ok(chunk))) => chunk,
            };

            for raw in splitter.push(&chunk) {
                if !self.handle_frame(&raw, &cancel).await {
                    return SessionEnd::Cancelled;
                }
            }
        }
    }

    /// Decode, merge and forward one frame. Returns false if cancelled while
    /// waiting for room in the tick buffer.
    async fn handle_frame(&mut self, raw: &[u8], cancel: &CancellationToken) -> bool {
        let control = self.control.clone();
        let stats = control.stats();
        bump(&stats.frames_received);

        let frame = match decode_frame(raw) {
            Ok(frame) => frame,
            Err(e) => {
                bump(&stats.frames_malformed);
                debug!("Skipping {}", e);
                return true;
            }
        };

        match self.emitter.on_frame(&frame, Utc::now()) {
            Ok(tick) => {
                bump(&stats.snapshots_merged);
                tokio::select! {
                    _ = cancel.cancelled() => return false,
                    sent = self.ticks.send(tick) => {
                        if sent.is_ok() {
                            bump(&stats.ticks_emitted);
                        } else {
                            bump(&stats.ticks_suppressed);
                        }
                    }
                }
            }
            Err(reason) => {
                if reason.merged() {
                    bump(&stats.snapshots_merged);
                }
                bump(&stats.ticks_suppressed);
                trace!("No tick for {}: {:?}", frame.symbol, reason);
            }
        }
        true
    }

    fn record_fault(&self, e: &StreamConnectError) {
        bump(&self.control.stats.faults);
        warn!("Quote stream fault: {}", e);
    }

    /// Sleep for `delay`, waking early for a subscription change.
    /// Returns false on cancellation.
    async fn pause(&self, delay: Duration) -> bool {
        let signal = self.registry.signal();
        tokio::select! {
            _ = self.control.cancel.cancelled() => false,
            _ = sleep(delay) => true,
            _ = async {
                loop {
                    signal.notified().await;
                    if signal.is_pending() {
                        break;
                    }
                }
            } => true,
        }
    }
}
