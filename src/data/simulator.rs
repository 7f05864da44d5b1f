use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use rand::Rng;

use crate::config::SERIES_SEED_SPACING_SECS;
use crate::data::models::{ChartData, InstrumentSnapshot, SeriesPoint};
use crate::data::provider::{Feed, ValueProvider};
use crate::data::series::SeriesStore;
use crate::data::symbol_map::SymbolMap;
use crate::subscription::SymbolSet;

// Starting catalog: (symbol, price, change, changePercent)
pub const DEFAULT_CATALOG: [(&str, f64, f64, f64); 4] = [
    ("BBRI", 5500.0, 50.0, 0.92),
    ("BBCA", 9500.0, -25.0, -0.26),
    ("TLKM", 3500.0, 15.0, 0.43),
    ("ANTM", 1200.0, -10.0, -0.83),
];

#[derive(Debug, Clone, Copy)]
pub struct RandomWalk {
    floor: f64,
    step: f64,
}

impl RandomWalk {
    pub fn new(floor: f64, step: f64) -> Self {
        Self { floor, step }
    }

    // max(floor, last + round((u - 0.5) * step)), u uniform in [0, 1)
    pub fn next<R: Rng + ?Sized>(&self, last: f64, rng: &mut R) -> f64 {
        let delta = ((rng.gen::<f64>() - 0.5) * self.step).round();
        (last + delta).max(self.floor)
    }
}

pub struct SimulatedProvider {
    catalog: Vec<String>,
    snapshots: SymbolMap<InstrumentSnapshot>,
    series: SeriesStore,
    walk: RandomWalk,
}

impl SimulatedProvider {
    pub fn new(walk: RandomWalk, capacity: usize) -> Self {
        let catalog = DEFAULT_CATALOG
            .iter()
            .map(|(symbol, price, change, percent)| InstrumentSnapshot::new(symbol, *price, *change, *percent))
            .collect();
        Self::with_catalog(catalog, walk, capacity, Utc::now().timestamp())
    }

    // Each symbol starts with a full series ending at `now`, one point per
    // minute, walked forward from its catalog price.
    pub fn with_catalog(catalog: Vec<InstrumentSnapshot>, walk: RandomWalk, capacity: usize, now: i64) -> Self {
        let provider = Self {
            catalog: catalog.iter().map(|snapshot| snapshot.symbol.clone()).collect(),
            snapshots: SymbolMap::new(),
            series: SeriesStore::new(capacity),
            walk,
        };

        let mut rng = rand::thread_rng();
        for snapshot in catalog {
            let symbol = snapshot.symbol.clone();
            let mut price = snapshot.price;
            let history = (0..capacity)
                .map(|i| {
                    price = walk.next(price, &mut rng);
                    SeriesPoint {
                        timestamp: now - (capacity - 1 - i) as i64 * SERIES_SEED_SPACING_SECS,
                        price,
                    }
                })
                .collect();
            provider.series.replace(&symbol, history);
            provider.snapshots.insert(&symbol, snapshot);
        }

        info!("Simulated catalog seeded with {} symbols ({} points each)",
              provider.catalog.len(), capacity);
        provider
    }

    pub fn catalog(&self) -> &[String] {
        &self.catalog
    }

    #[cfg(test)]
    pub fn series(&self) -> &SeriesStore {
        &self.series
    }

    pub fn snapshot(&self, symbol: &str) -> Option<InstrumentSnapshot> {
        self.snapshots.get(symbol)
    }

    // One simulated step for `symbol`. Runs under the symbol's snapshot lock
    // so the quote and the series move together. Symbols with no history are
    // left alone.
    pub fn tick(&self, symbol: &str, now: i64) -> Option<SeriesPoint> {
        self.snapshots
            .with(symbol, |snapshot| {
                let last = self.series.last(symbol)?;
                let price = self.walk.next(last.price, &mut rand::thread_rng());
                snapshot.reprice(price);
                self.series.advance(symbol, SeriesPoint { timestamp: now, price })
            })
            .flatten()
    }

    fn charts(&self, symbols: &SymbolSet) -> Vec<ChartData> {
        symbols
            .iter()
            .map(|symbol| ChartData {
                symbol: symbol.clone(),
                chart: self.series.get(symbol),
            })
            .collect()
    }

    pub fn snapshot_all(&self) -> Vec<InstrumentSnapshot> {
        self.catalog
            .iter()
            .filter_map(|symbol| self.snapshots.get(symbol))
            .collect()
    }
}

#[async_trait]
impl ValueProvider for SimulatedProvider {
    fn feed(&self) -> Feed {
        Feed::Simulated
    }

    async fn fetch_one(&self, symbol: &str) -> Option<InstrumentSnapshot> {
        self.snapshots.get(symbol)
    }

    async fn fetch_all(&self) -> Vec<InstrumentSnapshot> {
        self.snapshot_all()
    }

    async fn advance_series(&self, symbols: &SymbolSet) -> Vec<ChartData> {
        let now = Utc::now().timestamp();
        for symbol in symbols.iter() {
            if let Some(point) = self.tick(symbol, now) {
                debug!("Simulated tick {} -> {}", symbol, point.price);
            }
        }
        self.charts(symbols)
    }

    // The first chart push shows the stored history as-is
    async fn load_series(&self, symbols: &SymbolSet) -> Vec<ChartData> {
        self.charts(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn provider() -> SimulatedProvider {
        SimulatedProvider::new(RandomWalk::new(100.0, 20.0), 30)
    }

    #[test]
    fn test_walk_never_below_floor() {
        let walk = RandomWalk::new(100.0, 20.0);
        let mut rng = StdRng::seed_from_u64(7);
        let starts = [0.0, 50.0, 99.0, 100.0, 101.0, 105.0, 110.0, 1_200.0, 9_500.0];
        let mut advances = 0;
        for start in starts {
            let mut value = start;
            for _ in 0..1_200 {
                value = walk.next(value, &mut rng);
                assert!(value >= 100.0, "value {} fell below floor", value);
                advances += 1;
            }
        }
        assert!(advances >= 10_000);
    }

    #[test]
    fn test_walk_step_is_bounded_integer() {
        let walk = RandomWalk::new(100.0, 20.0);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..1_000 {
            let next = walk.next(5_000.0, &mut rng);
            let delta = next - 5_000.0;
            assert!((-10.0..=10.0).contains(&delta));
            assert_eq!(delta, delta.round());
        }
    }

    #[test]
    fn test_seeded_history_shape() {
        let provider = SimulatedProvider::with_catalog(
            vec![InstrumentSnapshot::new("BBRI", 5500.0, 50.0, 0.92)],
            RandomWalk::new(100.0, 20.0),
            30,
            1_000_000,
        );
        let series = provider.series().get("BBRI");
        assert_eq!(series.len(), 30);
        assert_eq!(series[29].timestamp, 1_000_000);
        assert_eq!(series[0].timestamp, 1_000_000 - 29 * 60);
        assert!(series.iter().all(|p| p.price >= 100.0));
        // seeding does not touch the quote
        assert_eq!(provider.snapshot("BBRI").unwrap().price, 5500.0);
    }

    #[tokio::test]
    async fn test_fetch_one_unknown_symbol_absent() {
        let provider = provider();
        assert!(provider.fetch_one("XYZ").await.is_none());
        let bbca = provider.fetch_one("BBCA").await.unwrap();
        assert_eq!(bbca.price, 9500.0);
    }

    #[tokio::test]
    async fn test_fetch_all_in_catalog_order() {
        let provider = provider();
        let all = provider.fetch_all().await;
        let symbols: Vec<&str> = all.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BBRI", "BBCA", "TLKM", "ANTM"]);
    }

    #[test]
    fn test_tick_moves_series_and_quote_together() {
        let provider = provider();
        let before_series = provider.series().get("TLKM");
        let before_quote = provider.snapshot("TLKM").unwrap();
        let now = before_series.last().unwrap().timestamp + 5;

        let point = provider.tick("TLKM", now).unwrap();
        let after_series = provider.series().get("TLKM");
        let after_quote = provider.snapshot("TLKM").unwrap();

        assert_eq!(after_series.len(), 30);
        assert_eq!(after_series.last().copied(), Some(point));
        assert_eq!(after_series[0], before_series[1]);
        assert_eq!(after_quote.price, point.price);
        let (change, percent) = crate::data::models::price_change(before_quote.price, point.price);
        assert_eq!(after_quote.change, change);
        assert_eq!(after_quote.change_percent, percent);
    }

    #[test]
    fn test_tick_unknown_symbol_is_noop() {
        let provider = provider();
        assert!(provider.tick("ZZZ", 1).is_none());
        assert!(provider.series().get("ZZZ").is_empty());
    }

    #[tokio::test]
    async fn test_load_series_does_not_advance() {
        let provider = provider();
        let symbols: SymbolSet = ["bbri", "xyz"].iter().collect();
        let before = provider.series().get("BBRI");
        let charts = provider.load_series(&symbols).await;
        assert_eq!(charts.len(), 2);
        let bbri = charts.iter().find(|c| c.symbol == "BBRI").unwrap();
        assert_eq!(bbri.chart, before);
        let xyz = charts.iter().find(|c| c.symbol == "XYZ").unwrap();
        assert!(xyz.chart.is_empty());
    }

    #[tokio::test]
    async fn test_advance_series_appends_one_point() {
        let provider = provider();
        let symbols: SymbolSet = ["antm"].iter().collect();
        let before = provider.series().get("ANTM");
        let charts = provider.advance_series(&symbols).await;
        assert_eq!(charts[0].chart.len(), 30);
        assert_eq!(charts[0].chart[0], before[1]);
        assert!(charts[0].chart[29].timestamp > before[29].timestamp);
    }
}
