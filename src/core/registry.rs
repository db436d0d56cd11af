//! Adapter registry: program id to protocol adapter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use solana_sdk::pubkey::Pubkey;

use crate::adapters::ProtocolAdapter;

/// Usage counters for an [`AdapterRegistry`].
#[derive(Debug, Default)]
pub struct RegistryMetrics {
    /// Total lookups.
    pub lookup_calls: AtomicU64,
    /// Lookups that found an adapter.
    pub lookup_hits: AtomicU64,
}

impl RegistryMetrics {
    fn inc_calls(&self) {
        self.lookup_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_hits(&self) {
        self.lookup_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Reports current counters to logs.
    pub fn report(&self, registered: usize) {
        tracing::info!(
            registered,
            lookup_calls = self.lookup_calls.load(Ordering::Relaxed),
            lookup_hits = self.lookup_hits.load(Ordering::Relaxed),
            "Adapter registry stats"
        );
    }
}

/// Maps owning program ids to the adapter that understands their
/// accounts.
///
/// Lookups vastly outnumber registrations, so the table sits behind a
/// read/write lock and `get` takes the read side only.
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<Pubkey, Arc<dyn ProtocolAdapter>>>,
    metrics: RegistryMetrics,
}

impl AdapterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
            metrics: RegistryMetrics::default(),
        }
    }

    /// Registers an adapter under its program id.
    ///
    /// Registering a second adapter for the same program replaces the
    /// first and logs a warning.
    pub fn register(&self, adapter: Arc<dyn ProtocolAdapter>) {
        let program_id = adapter.program_id();
        let name = adapter.name();
        let previous = self.adapters.write().unwrap().insert(program_id, adapter);
        match previous {
            Some(old) => tracing::warn!(
                program_id = %program_id,
                replaced = old.name(),
                with = name,
                "Adapter registration overwrote existing mapping"
            ),
            None => tracing::info!(
                program_id = %program_id,
                adapter = name,
                "Adapter registered"
            ),
        }
    }

    /// Removes and returns the adapter for `program_id`.
    pub fn unregister(&self, program_id: &Pubkey) -> Option<Arc<dyn ProtocolAdapter>> {
        self.adapters.write().unwrap().remove(program_id)
    }

    /// Looks up the adapter for `program_id`.
    #[must_use]
    pub fn get(&self, program_id: &Pubkey) -> Option<Arc<dyn ProtocolAdapter>> {
        self.metrics.inc_calls();
        let found = self.adapters.read().unwrap().get(program_id).cloned();
        if found.is_some() {
            self.metrics.inc_hits();
        }
        found
    }

    /// Program ids with a registered adapter, in no particular order.
    #[must_use]
    pub fn program_ids(&self) -> Vec<Pubkey> {
        self.adapters.read().unwrap().keys().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.read().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.read().unwrap().is_empty()
    }

    /// Lookup counters.
    #[must_use]
    pub fn metrics(&self) -> &RegistryMetrics {
        &self.metrics
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{OracleFeedAdapter, ParimutuelAdapter};

    #[test]
    fn test_register_and_lookup() {
        let registry = AdapterRegistry::new();
        let program_id = Pubkey::new_unique();
        registry.register(Arc::new(OracleFeedAdapter::new(program_id)));

        assert_eq!(registry.len(), 1);
        let adapter = registry.get(&program_id).unwrap();
        assert_eq!(adapter.name(), "oracle-feed");
        assert!(registry.get(&Pubkey::new_unique()).is_none());
    }

    #[test]
    fn test_register_overwrites_same_program() {
        let registry = AdapterRegistry::new();
        let program_id = Pubkey::new_unique();
        registry.register(Arc::new(OracleFeedAdapter::new(program_id)));
        registry.register(Arc::new(ParimutuelAdapter::new(program_id)));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&program_id).unwrap().name(), "parimutuel");
    }

    #[test]
    fn test_unregister_returns_adapter() {
        let registry = AdapterRegistry::new();
        let program_id = Pubkey::new_unique();
        registry.register(Arc::new(OracleFeedAdapter::new(program_id)));

        let removed = registry.unregister(&program_id).unwrap();
        assert_eq!(removed.name(), "oracle-feed");
        assert!(registry.is_empty());
        assert!(registry.unregister(&program_id).is_none());
    }

    #[test]
    fn test_lookup_metrics() {
        let registry = AdapterRegistry::new();
        let program_id = Pubkey::new_unique();
        registry.register(Arc::new(OracleFeedAdapter::new(program_id)));

        let _ = registry.get(&program_id);
        let _ = registry.get(&Pubkey::new_unique());

        assert_eq!(registry.metrics().lookup_calls.load(Ordering::Relaxed), 2);
        assert_eq!(registry.metrics().lookup_hits.load(Ordering::Relaxed), 1);
    }
}
