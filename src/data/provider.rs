use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;

use crate::data::models::{ChartData, InstrumentSnapshot};
use crate::events;
use crate::subscription::SymbolSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Feed {
    Simulated,
    Real,
}

impl Feed {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feed::Simulated => "simulated",
            Feed::Real => "real",
        }
    }

    pub fn quote_event(&self) -> &'static str {
        match self {
            Feed::Simulated => events::STOCK_DATA_DUMMY,
            Feed::Real => events::STOCK_DATA_REAL,
        }
    }

    pub fn chart_event(&self) -> &'static str {
        match self {
            Feed::Simulated => events::CHART_DATA_DUMMY,
            Feed::Real => events::CHART_DATA_REAL,
        }
    }

    pub fn quote_failure(&self, symbols: &SymbolSet) -> String {
        match self {
            Feed::Simulated => format!("Stock symbol(s) not found: {}", symbols),
            Feed::Real => format!("Failed to fetch stock data for: {}", symbols),
        }
    }

    pub fn chart_failure(&self, symbols: &SymbolSet) -> String {
        match self {
            Feed::Simulated => format!("Stock symbol(s) not found: {}", symbols),
            Feed::Real => format!("Failed to fetch chart data for: {}", symbols),
        }
    }

    pub fn catalog_failure(&self) -> &'static str {
        "Failed to fetch stocks data"
    }
}

// A source of instrument values. Lookups never fail outright: symbols that
// are unknown or could not be fetched are simply absent from the result.
#[async_trait]
pub trait ValueProvider: Send + Sync {
    fn feed(&self) -> Feed;

    async fn fetch_one(&self, symbol: &str) -> Option<InstrumentSnapshot>;

    async fn fetch_all(&self) -> Vec<InstrumentSnapshot>;

    // Moves each requested series forward one step and returns them
    async fn advance_series(&self, symbols: &SymbolSet) -> Vec<ChartData>;

    // Series for the first push of a subscription
    async fn load_series(&self, symbols: &SymbolSet) -> Vec<ChartData> {
        self.advance_series(symbols).await
    }

    async fn fetch_many(&self, symbols: &SymbolSet) -> Vec<InstrumentSnapshot> {
        let lookups = symbols.iter().map(|symbol| self.fetch_one(symbol));
        join_all(lookups).await.into_iter().flatten().collect()
    }
}
