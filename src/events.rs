use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use log::error;

use crate::data::Feed;
use crate::subscription::Topic;

// Inbound events
pub const GET_STOCK_DUMMY: &str = "getStockDummy";
pub const GET_STOCK_REAL: &str = "getStockReal";
pub const GET_ALL_STOCKS_DUMMY: &str = "getAllStocksDummy";
pub const GET_ALL_STOCKS_REAL: &str = "getAllStocksReal";
pub const GET_CHART_DUMMY: &str = "getChartDummy";
pub const GET_CHART_REAL: &str = "getChartReal";
pub const UNSUBSCRIBE: &str = "unsubscribe";

// Outbound events
pub const STOCK_DATA_DUMMY: &str = "stockDataDummy";
pub const STOCK_DATA_REAL: &str = "stockDataReal";
pub const CHART_DATA_DUMMY: &str = "chartDataDummy";
pub const CHART_DATA_REAL: &str = "chartDataReal";
pub const ERROR: &str = "error";

// Text frame sent by the client: {"event": "...", "data": ...}
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

// Text frame pushed to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEvent {
    pub event: String,
    pub data: Value,
}

impl ServerEvent {
    pub fn new<T: Serialize>(event: &str, data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Self {
                event: event.to_string(),
                data,
            },
            Err(e) => {
                error!("Failed to serialize {} payload: {}", event, e);
                Self::error(&format!("Failed to encode {}", event))
            }
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            event: ERROR.to_string(),
            data: json!({ "message": message }),
        }
    }

    #[cfg(test)]
    pub fn is_error(&self) -> bool {
        self.event == ERROR
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Subscribe { feed: Feed, topic: Topic, payload: Value },
    Snapshot { feed: Feed },
    // None drops every subscription of the connection
    Unsubscribe { topic: Option<Topic> },
}

impl ClientCommand {
    pub fn from_envelope(envelope: ClientEnvelope) -> Option<Self> {
        let ClientEnvelope { event, data } = envelope;
        let command = match event.as_str() {
            GET_STOCK_DUMMY => Self::Subscribe { feed: Feed::Simulated, topic: Topic::Quote, payload: data },
            GET_STOCK_REAL => Self::Subscribe { feed: Feed::Real, topic: Topic::Quote, payload: data },
            GET_CHART_DUMMY => Self::Subscribe { feed: Feed::Simulated, topic: Topic::Series, payload: data },
            GET_CHART_REAL => Self::Subscribe { feed: Feed::Real, topic: Topic::Series, payload: data },
            GET_ALL_STOCKS_DUMMY => Self::Snapshot { feed: Feed::Simulated },
            GET_ALL_STOCKS_REAL => Self::Snapshot { feed: Feed::Real },
            UNSUBSCRIBE => Self::Unsubscribe {
                topic: data.as_str().and_then(Topic::parse),
            },
            _ => return None,
        };
        Some(command)
    }

    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str::<ClientEnvelope>(text)
            .ok()
            .and_then(Self::from_envelope)
    }
}
