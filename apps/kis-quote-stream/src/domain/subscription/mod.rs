//! Subscription Registry
//!
//! The authoritative set of symbols the streaming client wants. Mutated by
//! subscribe/unsubscribe from any thread and read in full on every
//! (re)connect to rebuild the upstream subscriptions.

use std::collections::HashSet;

use parking_lot::RwLock;

use super::streaming::Symbol;

/// Thread-safe set of streamed symbols.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    symbols: RwLock<HashSet<Symbol>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a symbol.
    ///
    /// Returns `true` if the symbol was not already present.
    pub fn insert(&self, symbol: Symbol) -> bool {
        self.symbols.write().insert(symbol)
    }

    /// Remove a symbol.
    ///
    /// Returns `true` if the symbol was present.
    pub fn remove(&self, symbol: &str) -> bool {
        self.symbols.write().remove(symbol)
    }

    /// Check whether a symbol is registered.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.read().contains(symbol)
    }

    /// Copy of the full symbol set, sorted.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.symbols.read().iter().cloned().collect();
        symbols.sort_unstable();
        symbols
    }

    /// Number of registered symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.read().len()
    }

    /// Check if no symbols are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.insert("005930".to_string()));
        assert!(!registry.insert("005930".to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_reports_presence() {
        let registry = SubscriptionRegistry::new();
        registry.insert("005930".to_string());

        assert!(registry.remove("005930"));
        assert!(!registry.remove("005930"));
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_sorted_copy() {
        let registry = SubscriptionRegistry::new();
        registry.insert("035720".to_string());
        registry.insert("005930".to_string());
        registry.insert("000660".to_string());

        let snapshot = registry.snapshot();
        assert_eq!(snapshot, vec!["000660", "005930", "035720"]);

        registry.remove("005930");
        assert_eq!(snapshot.len(), 3);
        assert!(!registry.contains("005930"));
    }

    #[test]
    fn concurrent_inserts_are_not_lost() {
        let registry = Arc::new(SubscriptionRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        registry.insert(format!("{worker}{i:05}"));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 800);
    }
}
