//! Framework-facing entry point to the quote feed.

use super::emitter::TickStream;
use super::error::ResolutionError;
use super::resolver::SymbolResolver;
use super::session::{SessionControl, SessionManager, SessionState, StatsSnapshot};
use super::subscriptions::SubscriptionRegistry;
use crate::broker::BrokerApi;
use crate::config::Config;
use crate::market::{InstrumentId, SecurityType};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

/// Identifies the algorithm run on whose behalf a subscription is made.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobContext {
    pub job_id: String,
}

impl JobContext {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
        }
    }
}

/// Live quote feed: owns the reader task, the subscription set and the tick
/// stream handed to the consumer.
pub struct DataQueueHandler {
    registry: Arc<SubscriptionRegistry>,
    control: Arc<SessionControl>,
    ticks: Mutex<Option<TickStream>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl DataQueueHandler {
    /// Start the feed. Nothing is streamed until the first subscription.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(broker: Arc<dyn BrokerApi>, config: &Config) -> Self {
        let resolver = Arc::new(SymbolResolver::new(broker.clone()));
        let registry = Arc::new(SubscriptionRegistry::new(resolver, config.stream.debounce()));
        let control = Arc::new(SessionControl::new());

        let (manager, ticks) =
            SessionManager::new(broker, registry.clone(), config, control.clone());
        let reader = tokio::spawn(manager.run());

        info!(
            "Data queue handler started (debounce {:?}, idle timeout {:?})",
            config.stream.debounce(),
            config.stream.idle_timeout()
        );

        Self {
            registry,
            control,
            ticks: Mutex::new(Some(ticks)),
            reader: Mutex::new(Some(reader)),
        }
    }

    /// Add instruments to the stream. Chains expand to their listed
    /// contracts. Returns how many instruments were added.
    #[instrument(skip(self, instruments), fields(job_id = %job.job_id, count = instruments.len()))]
    pub async fn subscribe(&self, job: &JobContext, instruments: &[InstrumentId]) -> usize {
        self.registry.subscribe(instruments).await
    }

    /// Remove instruments from the stream. Returns how many were removed.
    #[instrument(skip(self, instruments), fields(job_id = %job.job_id, count = instruments.len()))]
    pub fn unsubscribe(&self, job: &JobContext, instruments: &[InstrumentId]) -> usize {
        self.registry.unsubscribe(instruments)
    }

    /// Find instruments matching `pattern`. For options, `pattern` is the
    /// underlying whose chain is listed.
    pub async fn lookup_symbols(
        &self,
        pattern: &str,
        security_type: SecurityType,
    ) -> Result<Vec<InstrumentId>, ResolutionError> {
        self.registry.resolver().lookup(pattern, security_type).await
    }

    pub async fn to_broker_name(&self, instrument: &InstrumentId) -> Result<String, ResolutionError> {
        self.registry.resolver().to_broker_name(instrument).await
    }

    /// Take the tick stream. There is only one; later calls return `None`.
    pub fn ticks(&self) -> Option<TickStream> {
        self.ticks.lock().take()
    }

    /// Instruments currently streamed (chains excluded).
    pub fn subscribed(&self) -> Vec<InstrumentId> {
        self.registry.desired_instruments()
    }

    /// False once disconnected or after the broker rejected the token.
    pub fn is_connected(&self) -> bool {
        self.control.is_connected()
    }

    pub fn state(&self) -> SessionState {
        self.control.state()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.control.state_changes()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.control.stats().snapshot()
    }

    /// Stop streaming and wait for the reader to close the connection.
    pub async fn disconnect(&self) {
        info!("Disconnecting quote feed");
        self.control.cancel();

        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            if let Err(e) = reader.await {
                warn!("Quote reader task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for DataQueueHandler {
    fn drop(&mut self) {
        self.control.cancel();
    }
}
