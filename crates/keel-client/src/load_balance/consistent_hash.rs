use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use keel_registry::EndpointInfo;

use super::{LoadBalancer, RequestHints};

/// Virtual nodes per physical endpoint. More replicas smooth the key
/// distribution at the cost of a larger ring.
const VIRTUAL_NODES: usize = 100;

/// Consistent-hash selection keyed on the method name.
///
/// Each endpoint contributes [`VIRTUAL_NODES`] ring positions hashed from
/// `"{address}#{replica}"`; a request takes the first position at or after
/// the hash of its routing key, wrapping around. Adding or removing one
/// endpoint therefore only remaps the keys whose ring arcs that endpoint
/// owned.
///
/// The ring is rebuilt from the candidate list on every selection, which
/// keeps it trivially consistent with a node set that changes between
/// calls.
#[derive(Debug, Default)]
pub struct ConsistentHashLoadBalancer;

impl ConsistentHashLoadBalancer {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for ConsistentHashLoadBalancer {
    fn select(&self, hints: &RequestHints, endpoints: &[EndpointInfo]) -> Option<EndpointInfo> {
        match endpoints {
            [] => None,
            [only] => Some(only.clone()),
            _ => {
                let mut ring: BTreeMap<u64, usize> = BTreeMap::new();
                for (index, endpoint) in endpoints.iter().enumerate() {
                    let address = endpoint.address();
                    for replica in 0..VIRTUAL_NODES {
                        ring.insert(hash_of(&format!("{}#{}", address, replica)), index);
                    }
                }

                let key = hash_of(&hints.method_name);
                let index = ring
                    .range(key..)
                    .next()
                    .or_else(|| ring.iter().next())
                    .map(|(_, index)| *index)?;
                Some(endpoints[index].clone())
            }
        }
    }
}

fn hash_of(value: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balance::{test_endpoints, test_hints};

    #[test]
    fn test_empty_list_selects_nothing() {
        let balancer = ConsistentHashLoadBalancer::new();
        assert!(balancer.select(&test_hints("m"), &[]).is_none());
    }

    #[test]
    fn test_singleton_returned_directly() {
        let balancer = ConsistentHashLoadBalancer::new();
        let endpoints = test_endpoints(&[9001]);
        let picked = balancer.select(&test_hints("anything"), &endpoints).unwrap();
        assert_eq!(picked.port, 9001);
    }

    #[test]
    fn test_same_key_is_sticky() {
        let balancer = ConsistentHashLoadBalancer::new();
        let endpoints = test_endpoints(&[9001, 9002, 9003]);

        let first = balancer.select(&test_hints("get_user"), &endpoints).unwrap();
        for _ in 0..10 {
            let again = balancer.select(&test_hints("get_user"), &endpoints).unwrap();
            assert_eq!(again.port, first.port);
        }
    }

    #[test]
    fn test_removal_only_remaps_keys_of_the_removed_endpoint() {
        let balancer = ConsistentHashLoadBalancer::new();
        let endpoints = test_endpoints(&[9001, 9002, 9003]);

        let keys: Vec<String> = (0..200).map(|i| format!("method_{}", i)).collect();
        let before: Vec<u16> = keys
            .iter()
            .map(|key| balancer.select(&test_hints(key), &endpoints).unwrap().port)
            .collect();

        // Drop the endpoint on port 9002.
        let survivors = test_endpoints(&[9001, 9003]);
        for (key, old_port) in keys.iter().zip(&before) {
            let new_port = balancer.select(&test_hints(key), &survivors).unwrap().port;
            if *old_port != 9002 {
                assert_eq!(new_port, *old_port, "key {} moved needlessly", key);
            } else {
                assert_ne!(new_port, 9002);
            }
        }
    }

    #[test]
    fn test_keys_spread_over_multiple_endpoints() {
        let balancer = ConsistentHashLoadBalancer::new();
        let endpoints = test_endpoints(&[9001, 9002, 9003]);

        let mut seen = std::collections::HashSet::new();
        for i in 0..200 {
            let picked = balancer
                .select(&test_hints(&format!("method_{}", i)), &endpoints)
                .unwrap();
            seen.insert(picked.port);
        }
        // 200 distinct keys over 300 virtual nodes should hit every node.
        assert_eq!(seen.len(), endpoints.len());
    }
}
