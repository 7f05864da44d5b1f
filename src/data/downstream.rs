use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::{debug, error, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::config::DEFAULT_SERIES_CAPACITY;
use crate::data::models::{
    price_change, ChartData, HistoryPoint, InstrumentSnapshot, SeriesPoint, SessionDetail, StockHistory,
};
use crate::data::provider::{Feed, ValueProvider};
use crate::data::series::SeriesStore;
use crate::data::symbol_map::SymbolMap;
use crate::subscription::SymbolSet;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Downstream returned status {0}")]
    Status(u16),
    #[error("Invalid downstream payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("No history returned for {0}")]
    EmptyHistory(String),
    #[error("Snapshot table unavailable for {0}")]
    Store(String),
}

// Downstream dates come as RFC 3339, "YYYY-MM-DD HH:MM:SS+07:00", naive
// date-times (taken as UTC) or bare dates
pub fn parse_timestamp(date: &str) -> Option<i64> {
    let date = date.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(date) {
        return Some(parsed.timestamp());
    }
    for format in ["%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M:%S%z"] {
        if let Ok(parsed) = DateTime::parse_from_str(date, format) {
            return Some(parsed.timestamp());
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(date, format) {
            return Some(parsed.and_utc().timestamp());
        }
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc().timestamp())
}

// Proxy to the external stock-data API
pub struct DownstreamProvider {
    client: reqwest::Client,
    base_url: String,
    snapshots: SymbolMap<InstrumentSnapshot>,
    series: SeriesStore,
}

impl DownstreamProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            snapshots: SymbolMap::new(),
            series: SeriesStore::new(DEFAULT_SERIES_CAPACITY),
        })
    }

    #[cfg(test)]
    pub fn series(&self) -> &SeriesStore {
        &self.series
    }

    #[cfg(test)]
    pub fn cached(&self, symbol: &str) -> Option<InstrumentSnapshot> {
        self.snapshots.get(symbol)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn fetch_history(&self, symbol: &str) -> Result<StockHistory, ProviderError> {
        self.get_json(&format!("/api/stocks/{}", urlencoding::encode(symbol))).await
    }

    pub async fn refresh(&self, symbol: &str) -> Result<InstrumentSnapshot, ProviderError> {
        let history = self.fetch_history(symbol).await?;
        self.absorb(symbol, history.data)
    }

    // Turns a fetched history (most recent last) into the symbol's snapshot
    // and chart. The change is against the second-to-last close, or against
    // the cached snapshot when only one row came back.
    pub fn absorb(&self, symbol: &str, history: Vec<HistoryPoint>) -> Result<InstrumentSnapshot, ProviderError> {
        let latest = history
            .last()
            .cloned()
            .ok_or_else(|| ProviderError::EmptyHistory(symbol.to_string()))?;
        let previous_close = history.len().checked_sub(2).map(|i| history[i].close);
        let chart: Vec<SeriesPoint> = history
            .iter()
            .filter_map(|point| {
                parse_timestamp(&point.date).map(|timestamp| SeriesPoint { timestamp, price: point.close })
            })
            .collect();

        self.snapshots
            .update(symbol, |cached| {
                let (change, change_percent) = match (previous_close, cached) {
                    (Some(previous), _) => price_change(previous, latest.close),
                    (None, Some(cached)) => price_change(cached.price, latest.close),
                    (None, None) => (0.0, 0.0),
                };
                self.series.replace(symbol, chart);

                InstrumentSnapshot {
                    symbol: symbol.to_string(),
                    price: latest.close,
                    change,
                    change_percent,
                    session: Some(SessionDetail {
                        high: latest.high,
                        low: latest.low,
                        open: latest.open,
                        volume: latest.volume,
                        date: latest.date.clone(),
                        weekly_data: history,
                    }),
                }
            })
            .ok_or_else(|| ProviderError::Store(symbol.to_string()))
    }
}

#[async_trait]
impl ValueProvider for DownstreamProvider {
    fn feed(&self) -> Feed {
        Feed::Real
    }

    async fn fetch_one(&self, symbol: &str) -> Option<InstrumentSnapshot> {
        match self.refresh(symbol).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Error fetching stock data for {}: {}", symbol, e);
                None
            }
        }
    }

    // One bad entry in the catalog response only drops that symbol
    async fn fetch_all(&self) -> Vec<InstrumentSnapshot> {
        // Map keeps the downstream key order
        let catalog: serde_json::Map<String, Value> = match self.get_json("/api/stocks").await {
            Ok(catalog) => catalog,
            Err(e) => {
                error!("Error fetching all stocks data: {}", e);
                return Vec::new();
            }
        };

        catalog
            .into_iter()
            .filter_map(|(symbol, raw)| {
                let history: StockHistory = match serde_json::from_value(raw) {
                    Ok(history) => history,
                    Err(e) => {
                        warn!("Skipping malformed catalog entry {}: {}", symbol, e);
                        return None;
                    }
                };
                match self.absorb(&symbol, history.data) {
                    Ok(snapshot) => Some(snapshot),
                    Err(ProviderError::EmptyHistory(_)) => None,
                    Err(e) => {
                        warn!("Skipping catalog entry {}: {}", symbol, e);
                        None
                    }
                }
            })
            .collect()
    }

    // Re-fetches every symbol; only symbols that came back are charted
    async fn advance_series(&self, symbols: &SymbolSet) -> Vec<ChartData> {
        self.fetch_many(symbols)
            .await
            .into_iter()
            .map(|snapshot| ChartData {
                chart: self.series.get(&snapshot.symbol),
                symbol: snapshot.symbol,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use tokio::net::TcpListener;

    fn row(close: f64, day: usize) -> Value {
        json!({
            "Close": close,
            "Date": format!("2024-06-{:02} 00:00:00+07:00", day),
            "Dividends": 0.0,
            "High": close + 25.0,
            "Low": close - 25.0,
            "Open": close - 5.0,
            "Stock Splits": 0.0,
            "Volume": 1_000_000
        })
    }

    fn history(ticker: &str, closes: &[f64]) -> Value {
        let data: Vec<Value> = closes.iter().enumerate().map(|(i, c)| row(*c, i + 1)).collect();
        json!({
            "ticker": ticker,
            "period": "1wk",
            "start_date": "2024-06-01",
            "end_date": "2024-06-07",
            "total_records": data.len(),
            "data": data
        })
    }

    async fn single(Path(symbol): Path<String>) -> Response {
        match symbol.as_str() {
            "BBRI" => Json(history("BBRI", &[5450.0, 5500.0])).into_response(),
            "TLKM" => Json(history("TLKM", &[3500.0])).into_response(),
            "FAIL" => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            _ => StatusCode::NOT_FOUND.into_response(),
        }
    }

    async fn catalog() -> Json<Value> {
        Json(json!({
            "BBRI": history("BBRI", &[5450.0, 5500.0]),
            "BBCA": history("BBCA", &[9525.0, 9500.0]),
            "EMPTY": history("EMPTY", &[]),
            "BROKEN": {"data": "not-a-list"}
        }))
    }

    async fn spawn_downstream() -> String {
        let router = Router::new()
            .route("/api/stocks", get(catalog))
            .route("/api/stocks/:symbol", get(single));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn closed_port_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    fn rows(closes: &[f64]) -> Vec<HistoryPoint> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| serde_json::from_value(row(*c, i + 1)).unwrap())
            .collect()
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(parse_timestamp("2024-06-03"), Some(1_717_372_800));
        assert_eq!(parse_timestamp("2024-06-03T00:00:00Z"), Some(1_717_372_800));
        assert_eq!(parse_timestamp("2024-06-03 00:00:00+07:00"), Some(1_717_347_600));
        assert_eq!(parse_timestamp("2024-06-03 00:00:00"), Some(1_717_372_800));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_absorb_uses_second_to_last_close() {
        let provider = DownstreamProvider::new("http://localhost:3001", Duration::from_secs(1)).unwrap();
        let snapshot = provider.absorb("BBRI", rows(&[5400.0, 5450.0, 5500.0])).unwrap();
        assert_eq!(snapshot.price, 5500.0);
        assert_eq!(snapshot.change, 50.0);
        assert_eq!(snapshot.change_percent, 0.92);

        let session = snapshot.session.unwrap();
        assert_eq!(session.high, 5525.0);
        assert_eq!(session.weekly_data.len(), 3);
        assert_eq!(provider.series().get("BBRI").len(), 3);
    }

    #[test]
    fn test_absorb_single_row_against_cache() {
        let provider = DownstreamProvider::new("http://localhost:3001", Duration::from_secs(1)).unwrap();

        let first = provider.absorb("TLKM", rows(&[3500.0])).unwrap();
        assert_eq!((first.change, first.change_percent), (0.0, 0.0));

        let second = provider.absorb("TLKM", rows(&[3535.0])).unwrap();
        assert_eq!(second.change, 35.0);
        assert_eq!(second.change_percent, 1.0);
    }

    #[test]
    fn test_absorb_empty_history() {
        let provider = DownstreamProvider::new("http://localhost:3001", Duration::from_secs(1)).unwrap();
        let result = provider.absorb("EMPTY", Vec::new());
        assert!(matches!(result, Err(ProviderError::EmptyHistory(_))));
        assert!(provider.cached("EMPTY").is_none());
    }

    #[tokio::test]
    async fn test_fetch_one_from_downstream() {
        let provider = DownstreamProvider::new(&spawn_downstream().await, Duration::from_secs(2)).unwrap();

        let bbri = provider.fetch_one("BBRI").await.unwrap();
        assert_eq!(bbri.price, 5500.0);
        assert_eq!(bbri.change, 50.0);
        assert_eq!(provider.series().get("BBRI").len(), 2);

        assert!(provider.fetch_one("NOPE").await.is_none());
        assert!(provider.fetch_one("FAIL").await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_many_keeps_resolved_symbols() {
        let provider = DownstreamProvider::new(&spawn_downstream().await, Duration::from_secs(2)).unwrap();
        let symbols: SymbolSet = ["bbri", "nope", "tlkm"].iter().collect();
        let mut found: Vec<String> = provider
            .fetch_many(&symbols)
            .await
            .into_iter()
            .map(|s| s.symbol)
            .collect();
        found.sort();
        assert_eq!(found, vec!["BBRI", "TLKM"]);
    }

    #[tokio::test]
    async fn test_fetch_all_skips_bad_entries_in_downstream_order() {
        let provider = DownstreamProvider::new(&spawn_downstream().await, Duration::from_secs(2)).unwrap();
        let all = provider.fetch_all().await;
        let symbols: Vec<&str> = all.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BBRI", "BBCA"]);
        assert_eq!(all[0].change, 50.0);
        assert_eq!(all[1].change, -25.0);
        assert_eq!(all[1].change_percent, -0.26);
    }

    #[tokio::test]
    async fn test_advance_series_refetches_history() {
        let provider = DownstreamProvider::new(&spawn_downstream().await, Duration::from_secs(2)).unwrap();
        let symbols: SymbolSet = ["BBRI", "NOPE"].iter().collect();
        let charts = provider.advance_series(&symbols).await;
        assert_eq!(charts.len(), 1);
        assert_eq!(charts[0].symbol, "BBRI");
        assert_eq!(charts[0].chart.len(), 2);
        assert!(charts[0].chart[0].timestamp < charts[0].chart[1].timestamp);
    }

    #[tokio::test]
    async fn test_unreachable_downstream_yields_nothing() {
        let provider = DownstreamProvider::new(&closed_port_url().await, Duration::from_secs(1)).unwrap();
        assert!(provider.fetch_all().await.is_empty());
        assert!(provider.fetch_one("BBRI").await.is_none());
    }
}
