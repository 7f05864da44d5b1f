use std::collections::VecDeque;

use crate::data::models::SeriesPoint;
use crate::data::symbol_map::SymbolMap;

// Rolling per-symbol price history backing the chart pushes
pub struct SeriesStore {
    capacity: usize,
    series: SymbolMap<VecDeque<SeriesPoint>>,
}

// Drops from the front until there is room, then appends. Timestamps stay
// strictly increasing even when two ticks land in the same second.
fn push_point(points: &mut VecDeque<SeriesPoint>, mut point: SeriesPoint, capacity: usize) -> SeriesPoint {
    if let Some(last) = points.back() {
        if point.timestamp <= last.timestamp {
            point.timestamp = last.timestamp + 1;
        }
    }
    while !points.is_empty() && points.len() >= capacity {
        points.pop_front();
    }
    points.push_back(point);
    point
}

impl SeriesStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: SymbolMap::new(),
        }
    }

    pub fn get(&self, symbol: &str) -> Vec<SeriesPoint> {
        self.series
            .with(symbol, |points| points.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn last(&self, symbol: &str) -> Option<SeriesPoint> {
        self.series.with(symbol, |points| points.back().copied()).flatten()
    }

    pub fn advance(&self, symbol: &str, point: SeriesPoint) -> Option<SeriesPoint> {
        let capacity = self.capacity;
        self.series.with_or_insert(symbol, VecDeque::new, |points| {
            push_point(points, point, capacity)
        })
    }

    // Authoritative overwrite from a fetched history, no capacity trimming
    pub fn replace(&self, symbol: &str, points: Vec<SeriesPoint>) {
        self.series.insert(symbol, VecDeque::from(points));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize) -> SeriesStore {
        let store = SeriesStore::new(capacity);
        for i in 0..capacity {
            store.advance("BBRI", SeriesPoint { timestamp: 1_000 + i as i64 * 60, price: 5_000.0 + i as f64 });
        }
        store
    }

    #[test]
    fn test_get_unknown_symbol_is_empty() {
        let store = SeriesStore::new(30);
        assert!(store.get("XYZ").is_empty());
    }

    #[test]
    fn test_advance_at_capacity_keeps_length() {
        let store = filled(30);
        let before = store.get("BBRI");
        assert_eq!(before.len(), 30);

        for step in 0..45 {
            store.advance("BBRI", SeriesPoint { timestamp: 10_000 + step, price: 6_000.0 });
            let series = store.get("BBRI");
            assert_eq!(series.len(), 30);
            assert!(series.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        }

        let after = store.get("BBRI");
        assert_eq!(after.last().unwrap().timestamp, 10_044);
    }

    #[test]
    fn test_advance_drops_oldest_appends_newest() {
        let store = filled(30);
        let before = store.get("BBRI");
        store.advance("BBRI", SeriesPoint { timestamp: 99_999, price: 1.0 });
        let after = store.get("BBRI");
        assert_eq!(after[0], before[1]);
        assert_eq!(after[28], before[29]);
        assert_eq!(after[29], SeriesPoint { timestamp: 99_999, price: 1.0 });
    }

    #[test]
    fn test_same_second_ticks_stay_increasing() {
        let store = filled(5);
        let last = store.get("BBRI").last().unwrap().timestamp;
        let a = store.advance("BBRI", SeriesPoint { timestamp: last, price: 1.0 }).unwrap();
        let b = store.advance("BBRI", SeriesPoint { timestamp: last, price: 2.0 }).unwrap();
        assert_eq!(a.timestamp, last + 1);
        assert_eq!(b.timestamp, last + 2);
    }

    #[test]
    fn test_last_point() {
        let store = filled(5);
        assert_eq!(store.last("BBRI"), store.get("BBRI").last().copied());
        assert_eq!(store.last("ZZZ"), None);
        assert!(store.get("ZZZ").is_empty());
    }

    #[test]
    fn test_replace_is_not_trimmed() {
        let store = SeriesStore::new(3);
        let points: Vec<SeriesPoint> = (0..7)
            .map(|i| SeriesPoint { timestamp: i, price: i as f64 })
            .collect();
        store.replace("BBCA", points.clone());
        assert_eq!(store.get("BBCA"), points);
    }
}
