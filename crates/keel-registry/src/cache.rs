use std::collections::HashMap;
use std::sync::RwLock;

use crate::endpoint::EndpointInfo;

/// Local cache of discovered endpoint lists, keyed by service key.
///
/// Discovery is cache-first: a non-empty cached list is served without any
/// backing-store access. Invalidation is coarse on purpose - a change
/// notification for any node of a service drops that service's whole entry,
/// trading staleness precision for correctness and simplicity. An
/// invalidation racing a discovery write resolves as "next read is a forced
/// miss", never as a silently lost invalidation.
#[derive(Debug, Default)]
pub struct DiscoveryCache {
    entries: RwLock<HashMap<String, Vec<EndpointInfo>>>,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached list for a service, treating an empty list as a
    /// miss so discovery retries the backing store.
    pub fn get(&self, service_key: &str) -> Option<Vec<EndpointInfo>> {
        let entries = self.entries.read().expect("discovery cache lock poisoned");
        entries
            .get(service_key)
            .filter(|list| !list.is_empty())
            .cloned()
    }

    pub fn put(&self, service_key: impl Into<String>, endpoints: Vec<EndpointInfo>) {
        let mut entries = self.entries.write().expect("discovery cache lock poisoned");
        entries.insert(service_key.into(), endpoints);
    }

    /// Drops the whole entry for one service.
    pub fn invalidate(&self, service_key: &str) {
        let mut entries = self.entries.write().expect("discovery cache lock poisoned");
        entries.remove(service_key);
    }

    /// Drops every entry. Used by backends whose change events do not say
    /// which service changed.
    pub fn clear(&self) {
        let mut entries = self.entries.write().expect("discovery cache lock poisoned");
        entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(port: u16) -> EndpointInfo {
        EndpointInfo::new("svc", "localhost", port)
    }

    #[test]
    fn test_miss_then_hit() {
        let cache = DiscoveryCache::new();
        assert!(cache.get("svc:1.0").is_none());

        cache.put("svc:1.0", vec![endpoint(1), endpoint(2)]);
        let hit = cache.get("svc:1.0").unwrap();
        assert_eq!(hit.len(), 2);
    }

    #[test]
    fn test_empty_list_is_a_miss() {
        let cache = DiscoveryCache::new();
        cache.put("svc:1.0", vec![]);
        assert!(cache.get("svc:1.0").is_none());
    }

    #[test]
    fn test_invalidate_drops_only_that_service() {
        let cache = DiscoveryCache::new();
        cache.put("a:1.0", vec![endpoint(1)]);
        cache.put("b:1.0", vec![endpoint(2)]);

        cache.invalidate("a:1.0");
        assert!(cache.get("a:1.0").is_none());
        assert!(cache.get("b:1.0").is_some());
    }

    #[test]
    fn test_clear_drops_everything() {
        let cache = DiscoveryCache::new();
        cache.put("a:1.0", vec![endpoint(1)]);
        cache.put("b:1.0", vec![endpoint(2)]);

        cache.clear();
        assert!(cache.get("a:1.0").is_none());
        assert!(cache.get("b:1.0").is_none());
    }
}
