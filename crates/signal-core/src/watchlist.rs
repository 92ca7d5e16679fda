use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::Symbol;

/// Optional per-symbol scan bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BucketTag {
    Intraday,
    Premarket,
}

/// Immutable view of the watchlist at a point in time.
#[derive(Debug, Clone, Default)]
pub struct WatchlistSnapshot {
    pub symbols: HashSet<Symbol>,
    pub tags: HashMap<Symbol, HashSet<BucketTag>>,
    pub version: u64,
}

impl WatchlistSnapshot {
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.symbols.contains(symbol)
    }

    /// Symbols in a bucket; untagged symbols belong to every bucket.
    pub fn bucket(&self, tag: BucketTag) -> Vec<Symbol> {
        let mut out: Vec<Symbol> = self
            .symbols
            .iter()
            .filter(|s| match self.tags.get(s) {
                Some(tags) => tags.contains(&tag),
                None => true,
            })
            .cloned()
            .collect();
        out.sort();
        out
    }
}

/// Copy-on-write symbol set behind a versioned pointer swap. Scanners sample
/// the snapshot once per tick; mutations build a new snapshot and swap it in,
/// so changes take effect on the next tick.
#[derive(Debug, Default)]
pub struct Watchlist {
    inner: RwLock<Arc<WatchlistSnapshot>>,
}

impl Watchlist {
    pub fn new(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        let snapshot = WatchlistSnapshot {
            symbols: symbols.into_iter().collect(),
            tags: HashMap::new(),
            version: 0,
        };
        Self {
            inner: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn snapshot(&self) -> Arc<WatchlistSnapshot> {
        self.inner
            .read()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_default()
    }

    pub fn add(&self, symbol: Symbol) {
        self.mutate(|snap| {
            snap.symbols.insert(symbol.clone());
        });
    }

    pub fn remove(&self, symbol: &Symbol) {
        self.mutate(|snap| {
            snap.symbols.remove(symbol);
            snap.tags.remove(symbol);
        });
    }

    pub fn tag(&self, symbol: Symbol, tag: BucketTag) {
        self.mutate(|snap| {
            snap.symbols.insert(symbol.clone());
            snap.tags.entry(symbol.clone()).or_default().insert(tag);
        });
    }

    pub fn len(&self) -> usize {
        self.snapshot().symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn mutate(&self, f: impl FnOnce(&mut WatchlistSnapshot)) {
        if let Ok(mut guard) = self.inner.write() {
            let mut next = (**guard).clone();
            f(&mut next);
            next.version = guard.version + 1;
            *guard = Arc::new(next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    #[test]
    fn test_snapshot_is_stable_across_mutation() {
        let watchlist = Watchlist::new([sym("AAPL")]);
        let before = watchlist.snapshot();

        watchlist.add(sym("TSLA"));

        // The held snapshot is untouched; the next one sees the change
        assert!(!before.contains(&sym("TSLA")));
        let after = watchlist.snapshot();
        assert!(after.contains(&sym("TSLA")));
        assert!(after.version > before.version);
    }

    #[test]
    fn test_untagged_symbols_belong_to_every_bucket() {
        let watchlist = Watchlist::new([sym("AAPL")]);
        watchlist.tag(sym("TSLA"), BucketTag::Intraday);

        let snap = watchlist.snapshot();
        let intraday = snap.bucket(BucketTag::Intraday);
        assert!(intraday.contains(&sym("AAPL")));
        assert!(intraday.contains(&sym("TSLA")));

        let premarket = snap.bucket(BucketTag::Premarket);
        assert!(premarket.contains(&sym("AAPL")));
        assert!(!premarket.contains(&sym("TSLA")));
    }
}
