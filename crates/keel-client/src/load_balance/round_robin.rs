use std::sync::atomic::{AtomicUsize, Ordering};

use keel_registry::EndpointInfo;

use super::{LoadBalancer, RequestHints};

/// Round-robin selection over the candidate list.
///
/// A shared monotonically increasing counter indexes the list modulo its
/// length. The atomic increment keeps concurrent callers from landing on
/// the same slot twice for one counter value.
#[derive(Debug, Default)]
pub struct RoundRobinLoadBalancer {
    counter: AtomicUsize,
}

impl RoundRobinLoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobinLoadBalancer {
    fn select(&self, _hints: &RequestHints, endpoints: &[EndpointInfo]) -> Option<EndpointInfo> {
        match endpoints {
            [] => None,
            [only] => Some(only.clone()),
            _ => {
                let index = self.counter.fetch_add(1, Ordering::Relaxed) % endpoints.len();
                Some(endpoints[index].clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balance::{test_endpoints, test_hints};

    #[test]
    fn test_empty_list_selects_nothing() {
        let balancer = RoundRobinLoadBalancer::new();
        assert!(balancer.select(&test_hints("m"), &[]).is_none());
    }

    #[test]
    fn test_singleton_returned_directly() {
        let balancer = RoundRobinLoadBalancer::new();
        let endpoints = test_endpoints(&[9001]);
        for _ in 0..3 {
            let picked = balancer.select(&test_hints("m"), &endpoints).unwrap();
            assert_eq!(picked.port, 9001);
        }
    }

    #[test]
    fn test_k_calls_visit_each_endpoint_once_in_order() {
        let balancer = RoundRobinLoadBalancer::new();
        let endpoints = test_endpoints(&[9001, 9002, 9003, 9004]);

        let picked: Vec<u16> = (0..endpoints.len())
            .map(|_| balancer.select(&test_hints("m"), &endpoints).unwrap().port)
            .collect();
        assert_eq!(picked, vec![9001, 9002, 9003, 9004]);

        // Wraps around in the same order.
        let next = balancer.select(&test_hints("m"), &endpoints).unwrap();
        assert_eq!(next.port, 9001);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        use std::sync::Arc;

        let balancer = Arc::new(RoundRobinLoadBalancer::new());
        let endpoints = Arc::new(test_endpoints(&[9001, 9002, 9003]));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let balancer = balancer.clone();
                let endpoints = endpoints.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        balancer.select(&test_hints("m"), &endpoints).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // 600 selections over 3 endpoints leave the counter at exactly 600.
        assert_eq!(balancer.counter.load(Ordering::Relaxed), 600);
    }
}
