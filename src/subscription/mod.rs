pub mod symbols;
pub mod scheduler;
pub mod registry;
pub mod engine;
pub mod lifecycle;

use std::fmt;
use uuid::Uuid;

use crate::data::Feed;

pub use symbols::SymbolSet;
pub use scheduler::PushScheduler;
pub use engine::BroadcastEngine;
pub use lifecycle::ConnectionLifecycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

// Logged in short form, full ids are noise in the logs
impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.0.simple().to_string();
        write!(f, "{}", &id[..8])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Quote,
    Series,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::Quote, Topic::Series];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "quote" | "stock" => Some(Topic::Quote),
            "chart" | "series" => Some(Topic::Series),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Quote => "quote",
            Topic::Series => "chart",
        }
    }
}

// What a push loop serves. A connection runs at most one loop per topic,
// whichever feed it pulls from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub feed: Feed,
    pub topic: Topic,
}

impl SubscriptionKey {
    pub fn new(feed: Feed, topic: Topic) -> Self {
        Self { feed, topic }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.feed.as_str(), self.topic.as_str())
    }
}
