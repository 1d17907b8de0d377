//! Trailing-edge debounce timer.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

/// Runs a callback once a burst of [`Debouncer::poke`] calls has been quiet
/// for the configured delay. Every poke re-arms the timer.
///
/// The callback runs on the timer's own task, so it should only flip state
/// (a flag, a notify) and never do I/O.
#[derive(Debug, Clone)]
pub struct Debouncer {
    tx: mpsc::UnboundedSender<()>,
}

impl Debouncer {
    /// Spawn the timer task on the current tokio runtime.
    pub fn spawn<F>(delay: Duration, on_fire: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();

        tokio::spawn(async move {
            // Wait for the first poke of a burst
            while rx.recv().await.is_some() {
                loop {
                    tokio::select! {
                        _ = sleep(delay) => {
                            on_fire();
                            break;
                        }
                        poke = rx.recv() => {
                            if poke.is_none() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        Self { tx }
    }

    /// Arm (or re-arm) the timer.
    pub fn poke(&self) {
        let _ = self.tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(delay: Duration) -> (Debouncer, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let debouncer = Debouncer::spawn(delay, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (debouncer, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_fires_once() {
        let (debouncer, fired) = counting(Duration::from_secs(5));

        for _ in 0..10 {
            debouncer.poke();
            sleep(Duration::from_secs(1)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_fire_separately() {
        let (debouncer, fired) = counting(Duration::from_secs(5));

        debouncer.poke();
        sleep(Duration::from_secs(6)).await;
        debouncer.poke();
        debouncer.poke();
        sleep(Duration::from_secs(6)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timer_never_fires() {
        let (_debouncer, fired) = counting(Duration::from_secs(5));
        sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
