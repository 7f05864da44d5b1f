use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use log::{error, info, warn};

use crate::events::ServerEvent;
use crate::subscription::engine::BroadcastEngine;
use crate::subscription::ConnectionId;

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub peer_addr: String,
    pub connected_at: Instant,
}

impl ConnectionInfo {
    pub fn new(peer_addr: &str) -> Self {
        Self {
            peer_addr: peer_addr.to_string(),
            connected_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        Instant::now().duration_since(self.connected_at)
    }
}

// Tracks live transport sessions and ties their end to subscription teardown
#[derive(Clone)]
pub struct ConnectionLifecycle {
    active: Arc<Mutex<HashMap<ConnectionId, ConnectionInfo>>>,
    engine: Arc<BroadcastEngine>,
    max_connections: usize,
}

impl ConnectionLifecycle {
    pub fn new(engine: Arc<BroadcastEngine>, max_connections: usize) -> Self {
        Self {
            active: Arc::new(Mutex::new(HashMap::new())),
            engine,
            max_connections,
        }
    }

    pub fn engine(&self) -> &Arc<BroadcastEngine> {
        &self.engine
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn has_capacity(&self) -> bool {
        self.connection_count() < self.max_connections
    }

    pub fn on_connect(&self, peer_addr: &str, outbound: mpsc::Sender<ServerEvent>) -> Result<ConnectionId, String> {
        let mut active = self.active.lock()
            .map_err(|_| "Connection lock poisoned".to_string())?;

        if active.len() >= self.max_connections {
            return Err("Maximum connections reached".to_string());
        }

        let id = ConnectionId::generate();
        self.engine.attach(id, outbound)?;
        active.insert(id, ConnectionInfo::new(peer_addr));

        info!("Connection {} opened from {} ({}/{})", id, peer_addr, active.len(), self.max_connections);
        Ok(id)
    }

    // Safe to call more than once; only the first call tears anything down
    pub fn on_disconnect(&self, id: ConnectionId) -> usize {
        let info = match self.active.lock() {
            Ok(mut active) => active.remove(&id),
            Err(_) => {
                error!("Connection lock poisoned while closing {}", id);
                None
            }
        };

        let cancelled = self.engine.on_disconnect(id);
        match info {
            Some(info) => info!("Connection {} from {} closed after {:?}, {} subscription(s) cancelled",
                                id, info.peer_addr, info.uptime(), cancelled),
            None if cancelled > 0 => warn!("Untracked connection {} still held {} subscription(s)", id, cancelled),
            None => {}
        }
        cancelled
    }

    #[cfg(test)]
    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.active.lock()
            .map(|active| active.contains_key(&id))
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub fn connection_info(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.active.lock()
            .ok()?
            .get(&id)
            .cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.active.lock()
            .map(|active| active.len())
            .unwrap_or(0)
    }

    pub fn log_stats(&self) {
        let connections = self.connection_count();
        let subscriptions = self.engine.subscription_count();
        if connections > 0 || subscriptions > 0 {
            info!("Stats - Connections: {}/{}, Subscriptions: {}",
                  connections, self.max_connections, subscriptions);
        }
    }
}
