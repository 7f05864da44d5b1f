use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: i64,
    pub price: f64,
}

// Fields only the downstream feed knows about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub volume: f64,
    pub date: String,
    pub weekly_data: Vec<HistoryPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentSnapshot {
    pub symbol: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    #[serde(flatten, default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionDetail>,
}

impl InstrumentSnapshot {
    pub fn new(symbol: &str, price: f64, change: f64, change_percent: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            price,
            change,
            change_percent,
            session: None,
        }
    }

    // Moves to a new price; the change is taken against the price held before this call
    pub fn reprice(&mut self, price: f64) {
        let (change, change_percent) = price_change(self.price, price);
        self.price = price;
        self.change = change;
        self.change_percent = change_percent;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    pub symbol: String,
    pub chart: Vec<SeriesPoint>,
}

// One row of downstream history, field names as the data API sends them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    #[serde(rename = "Close")]
    pub close: f64,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Dividends", default)]
    pub dividends: f64,
    #[serde(rename = "High", default)]
    pub high: f64,
    #[serde(rename = "Low", default)]
    pub low: f64,
    #[serde(rename = "Open", default)]
    pub open: f64,
    #[serde(rename = "Stock Splits", default)]
    pub stock_splits: f64,
    #[serde(rename = "Volume", default)]
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockHistory {
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub period: String,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
    #[serde(default)]
    pub total_records: usize,
    #[serde(default)]
    pub data: Vec<HistoryPoint>,
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// (absolute, percent) change from `previous` to `current`, both rounded to 2 places
pub fn price_change(previous: f64, current: f64) -> (f64, f64) {
    let change = current - previous;
    let percent = if previous != 0.0 {
        change / previous * 100.0
    } else {
        0.0
    };
    (round2(change), round2(percent))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_change_rounds_to_cents() {
        assert_eq!(price_change(5450.0, 5500.0), (50.0, 0.92));
        assert_eq!(price_change(9525.0, 9500.0), (-25.0, -0.26));
        assert_eq!(price_change(0.0, 10.0), (10.0, 0.0));
    }

    #[test]
    fn test_reprice_uses_value_before_mutation() {
        let mut snapshot = InstrumentSnapshot::new("BBRI", 5500.0, 50.0, 0.92);
        snapshot.reprice(5510.0);
        assert_eq!(snapshot.price, 5510.0);
        assert_eq!(snapshot.change, 10.0);
        assert_eq!(snapshot.change_percent, 0.18);

        snapshot.reprice(5500.0);
        assert_eq!(snapshot.change, -10.0);
        assert_eq!(snapshot.change_percent, -0.18);
    }

    #[test]
    fn test_snapshot_wire_shape() {
        let snapshot = InstrumentSnapshot::new("BBCA", 9500.0, -25.0, -0.26);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["symbol"], "BBCA");
        assert_eq!(json["changePercent"], -0.26);
        assert!(json.get("session").is_none());
        assert!(json.get("weeklyData").is_none());
    }

    #[test]
    fn test_history_point_from_downstream_json() {
        let raw = r#"{"Close": 5525.0, "Date": "2024-06-03 00:00:00+07:00", "Dividends": 0.0,
                      "High": 5600.0, "Low": 5475.0, "Open": 5500.0, "Stock Splits": 0.0, "Volume": 120300500}"#;
        let point: HistoryPoint = serde_json::from_str(raw).unwrap();
        assert_eq!(point.close, 5525.0);
        assert_eq!(point.volume, 120300500.0);
        assert_eq!(point.date, "2024-06-03 00:00:00+07:00");
    }
}
