use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::data::ValueProvider;
use crate::events::ServerEvent;
use crate::subscription::{ConnectionId, SubscriptionKey, SymbolSet, Topic};

static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);
const RETIRED: u64 = 0;

// Epoch of the one task currently allowed to push for a subscription slot.
// Shared by every task that slot has ever run; each new task takes a fresh,
// larger epoch and thereby silences all of its predecessors.
#[derive(Debug, Clone, Default)]
pub struct Generation(Arc<Mutex<u64>>);

impl Generation {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    fn begin(&self) -> u64 {
        let epoch = NEXT_EPOCH.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut current) = self.0.lock() {
            *current = epoch;
        }
        epoch
    }

    fn retire(&self, epoch: u64) {
        if let Ok(mut current) = self.0.lock() {
            if *current == epoch {
                *current = RETIRED;
            }
        }
    }

    #[cfg(test)]
    pub fn current(&self) -> Option<u64> {
        self.0.lock()
            .ok()
            .map(|current| *current)
            .filter(|epoch| *epoch != RETIRED)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    // Outbound queue full, this push is lost
    Dropped,
    // A newer task owns the slot, or the slot was cancelled
    Stale,
    Closed,
}

pub struct Emitter {
    connection: ConnectionId,
    key: SubscriptionKey,
    epoch: u64,
    generation: Generation,
    outbound: mpsc::Sender<ServerEvent>,
}

impl Emitter {
    pub fn emit(&self, event: ServerEvent) -> Delivery {
        // The epoch lock stays held through the send: once a cancel or
        // replace has returned, nothing from this epoch can reach the queue.
        let current = match self.generation.0.lock() {
            Ok(current) => current,
            Err(_) => return Delivery::Closed,
        };
        if *current != self.epoch {
            debug!("Suppressed stale {} push for {} (epoch {})", self.key, self.connection, self.epoch);
            return Delivery::Stale;
        }

        match self.outbound.try_send(event) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue full for {}, dropping {} push", self.connection, self.key);
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

// Owner of one running push loop. Cancelled exactly once: by `cancel` or,
// failing that, on drop.
pub struct TaskHandle {
    epoch: u64,
    generation: Generation,
    join: Option<JoinHandle<()>>,
}

impl TaskHandle {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn cancel(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(join) = self.join.take() {
            self.generation.retire(self.epoch);
            join.abort();
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// The unit of work repeated by a push loop
pub struct PushCycle {
    topic: Topic,
    symbols: SymbolSet,
    provider: Arc<dyn ValueProvider>,
}

impl PushCycle {
    pub fn new(topic: Topic, symbols: SymbolSet, provider: Arc<dyn ValueProvider>) -> Self {
        Self {
            topic,
            symbols,
            provider,
        }
    }

    // Never fails: an empty result becomes one error event for this cycle
    pub async fn run(&self, first: bool) -> ServerEvent {
        let feed = self.provider.feed();
        match self.topic {
            Topic::Quote => {
                let snapshots = self.provider.fetch_many(&self.symbols).await;
                if snapshots.is_empty() {
                    ServerEvent::error(&feed.quote_failure(&self.symbols))
                } else {
                    ServerEvent::new(feed.quote_event(), &snapshots)
                }
            }
            Topic::Series => {
                let charts = if first {
                    self.provider.load_series(&self.symbols).await
                } else {
                    self.provider.advance_series(&self.symbols).await
                };
                if charts.is_empty() {
                    ServerEvent::error(&feed.chart_failure(&self.symbols))
                } else {
                    ServerEvent::new(feed.chart_event(), &charts)
                }
            }
        }
    }
}

pub struct PushScheduler {
    period: Duration,
}

impl PushScheduler {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    // Runs the cycle at once, then every period. Runs of one loop never
    // overlap; a slow cycle delays the next tick instead of stacking up.
    pub fn start(
        &self,
        connection: ConnectionId,
        key: SubscriptionKey,
        generation: &Generation,
        outbound: mpsc::Sender<ServerEvent>,
        cycle: PushCycle,
    ) -> TaskHandle {
        let epoch = generation.begin();
        let emitter = Emitter {
            connection,
            key,
            epoch,
            generation: generation.clone(),
            outbound,
        };
        let period = self.period;

        let join = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut first = true;

            loop {
                ticker.tick().await;
                let event = cycle.run(first).await;
                first = false;

                match emitter.emit(event) {
                    Delivery::Sent | Delivery::Dropped => {}
                    Delivery::Stale | Delivery::Closed => break,
                }
            }
            debug!("Push loop {} for {} (epoch {}) finished", key, connection, epoch);
        });

        TaskHandle {
            epoch,
            generation: generation.clone(),
            join: Some(join),
        }
    }
}
