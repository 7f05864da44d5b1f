use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use log::error;

// Process-wide table keyed by symbol. Each symbol has its own lock, the outer
// map lock is only held long enough to find or create that slot.
pub struct SymbolMap<T> {
    entries: RwLock<HashMap<String, Arc<Mutex<T>>>>,
}

impl<T> Default for SymbolMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SymbolMap<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn slot(&self, symbol: &str) -> Option<Arc<Mutex<T>>> {
        match self.entries.read() {
            Ok(entries) => entries.get(symbol).cloned(),
            Err(_) => {
                error!("Symbol map lock poisoned while reading {}", symbol);
                None
            }
        }
    }

    fn slot_or_insert(&self, symbol: &str, init: impl FnOnce() -> T) -> Option<Arc<Mutex<T>>> {
        if let Some(slot) = self.slot(symbol) {
            return Some(slot);
        }

        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(_) => {
                error!("Symbol map lock poisoned while inserting {}", symbol);
                return None;
            }
        };
        let slot = entries
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(init())));
        Some(slot.clone())
    }

    // Runs `f` under the symbol's lock; None if the symbol was never stored
    pub fn with<R>(&self, symbol: &str, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let slot = self.slot(symbol)?;
        let mut value = match slot.lock() {
            Ok(value) => value,
            Err(_) => {
                error!("Lock poisoned for symbol {}", symbol);
                return None;
            }
        };
        Some(f(&mut *value))
    }

    pub fn with_or_insert<R>(
        &self,
        symbol: &str,
        init: impl FnOnce() -> T,
        f: impl FnOnce(&mut T) -> R,
    ) -> Option<R> {
        let slot = self.slot_or_insert(symbol, init)?;
        let mut value = match slot.lock() {
            Ok(value) => value,
            Err(_) => {
                error!("Lock poisoned for symbol {}", symbol);
                return None;
            }
        };
        Some(f(&mut *value))
    }

    pub fn insert(&self, symbol: &str, value: T) {
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(_) => {
                error!("Symbol map lock poisoned while replacing {}", symbol);
                return;
            }
        };
        match entries.entry(symbol.to_string()) {
            Entry::Occupied(slot) => {
                if let Ok(mut current) = slot.get().lock() {
                    *current = value;
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(value)));
            }
        }
    }

    // Stores the value computed from the previous one (if any) under the symbol's lock
    pub fn update(&self, symbol: &str, f: impl FnOnce(Option<&T>) -> T) -> Option<T>
    where
        T: Clone,
    {
        if let Some(slot) = self.slot(symbol) {
            let mut value = match slot.lock() {
                Ok(value) => value,
                Err(_) => {
                    error!("Lock poisoned for symbol {}", symbol);
                    return None;
                }
            };
            *value = f(Some(&*value));
            return Some(value.clone());
        }

        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(_) => {
                error!("Symbol map lock poisoned while updating {}", symbol);
                return None;
            }
        };
        match entries.entry(symbol.to_string()) {
            Entry::Occupied(slot) => {
                let mut value = slot.get().lock().ok()?;
                *value = f(Some(&*value));
                Some(value.clone())
            }
            Entry::Vacant(slot) => {
                let value = f(None);
                slot.insert(Arc::new(Mutex::new(value.clone())));
                Some(value)
            }
        }
    }

    pub fn get(&self, symbol: &str) -> Option<T>
    where
        T: Clone,
    {
        self.with(symbol, |value| value.clone())
    }
}
