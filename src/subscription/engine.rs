use std::sync::Arc;
use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::data::{Feed, ValueProvider};
use crate::events::{ClientCommand, ServerEvent};
use crate::subscription::registry::SubscriptionRegistry;
use crate::subscription::scheduler::{PushCycle, PushScheduler};
use crate::subscription::{ConnectionId, SubscriptionKey, SymbolSet, Topic};

// Entry point for the transport layer: every client event ends up here.
pub struct BroadcastEngine {
    registry: SubscriptionRegistry,
    scheduler: PushScheduler,
    simulated: Arc<dyn ValueProvider>,
    real: Arc<dyn ValueProvider>,
}

impl BroadcastEngine {
    pub fn new(
        scheduler: PushScheduler,
        simulated: Arc<dyn ValueProvider>,
        real: Arc<dyn ValueProvider>,
    ) -> Self {
        Self {
            registry: SubscriptionRegistry::new(),
            scheduler,
            simulated,
            real,
        }
    }

    #[cfg(test)]
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn provider(&self, feed: Feed) -> Arc<dyn ValueProvider> {
        match feed {
            Feed::Simulated => self.simulated.clone(),
            Feed::Real => self.real.clone(),
        }
    }

    pub fn attach(&self, connection: ConnectionId, outbound: mpsc::Sender<ServerEvent>) -> Result<(), String> {
        self.registry.open(connection, outbound)
    }

    // Starts (or restarts) the connection's push loop for `topic`, now pulling
    // from `feed`. Whatever loop held the topic before is replaced, even one on
    // the other feed. The first push goes out straight away.
    // Returns the normalized symbol set, or None if the connection is closed.
    pub fn subscribe(
        &self,
        connection: ConnectionId,
        feed: Feed,
        topic: Topic,
        payload: &Value,
    ) -> Option<SymbolSet> {
        let symbols = SymbolSet::from_payload(payload);
        if symbols.is_empty() {
            warn!("Connection {} sent {} subscribe with no usable symbols: {}", connection, feed.as_str(), payload);
        }

        let key = SubscriptionKey::new(feed, topic);
        let provider = self.provider(feed);
        self.registry.replace(
            connection,
            key,
            symbols.clone(),
            self.scheduler.period(),
            |generation, outbound, symbols| {
                self.scheduler.start(
                    connection,
                    key,
                    generation,
                    outbound,
                    PushCycle::new(topic, symbols.clone(), provider),
                )
            },
        )?;
        Some(symbols)
    }

    // `None` drops every topic.
    pub fn unsubscribe(&self, connection: ConnectionId, topic: Option<Topic>) -> usize {
        Topic::ALL
            .into_iter()
            .filter(|candidate| topic.map_or(true, |topic| *candidate == topic))
            .filter(|candidate| self.registry.cancel(connection, *candidate))
            .count()
    }

    // One-shot push of the whole catalog. Leaves subscriptions alone.
    pub async fn get_all_snapshot(&self, connection: ConnectionId, feed: Feed) -> bool {
        let outbound = match self.registry.outbound(connection) {
            Some(outbound) => outbound,
            None => return false,
        };

        let snapshots = self.provider(feed).fetch_all().await;
        let event = if snapshots.is_empty() {
            ServerEvent::error(feed.catalog_failure())
        } else {
            ServerEvent::new(feed.quote_event(), &snapshots)
        };

        match outbound.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not deliver {} snapshot to {}: {}", feed.as_str(), connection, e);
                false
            }
        }
    }

    pub fn on_disconnect(&self, connection: ConnectionId) -> usize {
        let cancelled = self.registry.cancel_all(connection);
        if cancelled > 0 {
            info!("Cancelled {} subscription(s) for {}", cancelled, connection);
        }
        cancelled
    }

    pub async fn dispatch(&self, connection: ConnectionId, command: ClientCommand) {
        debug!("Connection {} -> {:?}", connection, command);
        match command {
            ClientCommand::Subscribe { feed, topic, payload } => {
                self.subscribe(connection, feed, topic, &payload);
            }
            ClientCommand::Snapshot { feed } => {
                self.get_all_snapshot(connection, feed).await;
            }
            ClientCommand::Unsubscribe { topic } => {
                let cancelled = self.unsubscribe(connection, topic);
                debug!("Connection {} dropped {} subscription(s)", connection, cancelled);
            }
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.registry.subscription_count()
    }
}
