use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use log::{debug, error, info};
use tokio::sync::mpsc;

use crate::data::Feed;
use crate::events::ServerEvent;
use crate::subscription::scheduler::{Generation, TaskHandle};
use crate::subscription::{ConnectionId, SubscriptionKey, SymbolSet, Topic};

pub struct Subscription {
    pub feed: Feed,
    pub symbols: SymbolSet,
    pub interval: Duration,
    generation: Generation,
    handle: TaskHandle,
}

impl Subscription {
    fn cancel(self) {
        self.handle.cancel();
    }
}

struct ConnectionSlot {
    outbound: mpsc::Sender<ServerEvent>,
    subscriptions: HashMap<Topic, Subscription>,
}

// Every open connection and its running push loops, behind one lock. A
// connection missing from the map is closed (or was never opened) and cannot
// gain new subscriptions.
#[derive(Default)]
pub struct SubscriptionRegistry {
    connections: Mutex<HashMap<ConnectionId, ConnectionSlot>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, connection: ConnectionId, outbound: mpsc::Sender<ServerEvent>) -> Result<(), String> {
        let mut connections = self.connections.lock()
            .map_err(|_| "Registry lock poisoned".to_string())?;

        if connections.contains_key(&connection) {
            return Err(format!("Connection {} already open", connection));
        }
        connections.insert(connection, ConnectionSlot {
            outbound,
            subscriptions: HashMap::new(),
        });
        Ok(())
    }

    pub fn outbound(&self, connection: ConnectionId) -> Option<mpsc::Sender<ServerEvent>> {
        self.connections.lock()
            .ok()?
            .get(&connection)
            .map(|slot| slot.outbound.clone())
    }

    // Swaps in a new push loop for the connection's `key.topic` slot, whatever
    // feed the previous loop used. That loop, if any, is cancelled before this
    // returns. Returns the new loop's epoch, or None when the connection is not
    // open.
    pub fn replace<F>(
        &self,
        connection: ConnectionId,
        key: SubscriptionKey,
        symbols: SymbolSet,
        interval: Duration,
        task_factory: F,
    ) -> Option<u64>
    where
        F: FnOnce(&Generation, mpsc::Sender<ServerEvent>, &SymbolSet) -> TaskHandle,
    {
        let mut connections = match self.connections.lock() {
            Ok(connections) => connections,
            Err(_) => {
                error!("Registry lock poisoned, dropping {} subscribe for {}", key, connection);
                return None;
            }
        };
        let slot = match connections.get_mut(&connection) {
            Some(slot) => slot,
            None => {
                debug!("Ignoring {} subscribe for closed connection {}", key, connection);
                return None;
            }
        };

        let previous = slot.subscriptions.remove(&key.topic);
        let generation = previous
            .as_ref()
            .map(|subscription| subscription.generation.clone())
            .unwrap_or_default();
        let handle = task_factory(&generation, slot.outbound.clone(), &symbols);
        let epoch = handle.epoch();

        match previous {
            Some(previous) => {
                info!("Connection {} replaced {} [{}] with {} [{}]",
                      connection, SubscriptionKey::new(previous.feed, key.topic), previous.symbols, key, symbols);
                previous.cancel();
            }
            None => info!("Connection {} subscribed to {} [{}]", connection, key, symbols),
        }

        slot.subscriptions.insert(key.topic, Subscription {
            feed: key.feed,
            symbols,
            interval,
            generation,
            handle,
        });
        Some(epoch)
    }

    pub fn cancel(&self, connection: ConnectionId, topic: Topic) -> bool {
        let removed = self.connections.lock()
            .ok()
            .and_then(|mut connections| {
                connections.get_mut(&connection)
                    .and_then(|slot| slot.subscriptions.remove(&topic))
            });

        match removed {
            Some(subscription) => {
                info!("Connection {} unsubscribed from {} (every {:?})",
                      connection, SubscriptionKey::new(subscription.feed, topic), subscription.interval);
                subscription.cancel();
                true
            }
            None => false,
        }
    }

    // Closes the connection: it is removed under the lock, so no subscribe can
    // land after this starts. Unknown or already closed ids are a no-op.
    pub fn cancel_all(&self, connection: ConnectionId) -> usize {
        let slot = match self.connections.lock() {
            Ok(mut connections) => connections.remove(&connection),
            Err(_) => {
                error!("Registry lock poisoned while closing {}", connection);
                None
            }
        };

        let Some(slot) = slot else {
            return 0;
        };
        let count = slot.subscriptions.len();
        for (_, subscription) in slot.subscriptions {
            subscription.cancel();
        }
        count
    }

    pub fn subscription_count(&self) -> usize {
        self.connections.lock()
            .map(|connections| connections.values().map(|slot| slot.subscriptions.len()).sum())
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub fn is_open(&self, connection: ConnectionId) -> bool {
        self.connections.lock()
            .map(|connections| connections.contains_key(&connection))
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub fn subscription(&self, connection: ConnectionId, topic: Topic) -> Option<(Feed, SymbolSet, u64)> {
        self.connections.lock()
            .ok()?
            .get(&connection)?
            .subscriptions
            .get(&topic)
            .map(|subscription| (subscription.feed, subscription.symbols.clone(), subscription.handle.epoch()))
    }

    #[cfg(test)]
    pub fn topics(&self, connection: ConnectionId) -> Vec<Topic> {
        self.connections.lock()
            .ok()
            .and_then(|connections| {
                connections.get(&connection)
                    .map(|slot| slot.subscriptions.keys().copied().collect())
            })
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn connection_count(&self) -> usize {
        self.connections.lock()
            .map(|connections| connections.len())
            .unwrap_or(0)
    }
}
