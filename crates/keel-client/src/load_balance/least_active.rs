use std::collections::HashMap;
use std::sync::Mutex;

use rand::Rng;

use keel_registry::EndpointInfo;

use super::{LoadBalancer, RequestHints};

/// Least-active selection: prefer the endpoint with the fewest in-flight
/// calls.
///
/// The in-flight counters are fed by the [`LoadBalancer`] capability hooks,
/// which the orchestrator brackets around every network call. Selection
/// scans the candidates for the minimum count, collects every endpoint tied
/// at that minimum and breaks the tie uniformly at random. Decrements only
/// ever undo a matching increment, so a count can never go below zero.
#[derive(Debug, Default)]
pub struct LeastActiveLoadBalancer {
    active: Mutex<HashMap<String, u64>>,
}

impl LeastActiveLoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current in-flight count for an address.
    pub fn active_count(&self, addr: &str) -> u64 {
        let active = self.active.lock().expect("active count lock poisoned");
        active.get(addr).copied().unwrap_or(0)
    }
}

impl LoadBalancer for LeastActiveLoadBalancer {
    fn select(&self, _hints: &RequestHints, endpoints: &[EndpointInfo]) -> Option<EndpointInfo> {
        match endpoints {
            [] => None,
            [only] => Some(only.clone()),
            _ => {
                let active = self.active.lock().expect("active count lock poisoned");

                let mut minimum = u64::MAX;
                let mut candidates: Vec<usize> = Vec::new();
                for (index, endpoint) in endpoints.iter().enumerate() {
                    let count = active.get(&endpoint.address()).copied().unwrap_or(0);
                    if count < minimum {
                        minimum = count;
                        candidates.clear();
                        candidates.push(index);
                    } else if count == minimum {
                        candidates.push(index);
                    }
                }
                drop(active);

                let index = if candidates.len() == 1 {
                    candidates[0]
                } else {
                    candidates[rand::thread_rng().gen_range(0..candidates.len())]
                };
                Some(endpoints[index].clone())
            }
        }
    }

    fn call_started(&self, addr: &str) {
        let mut active = self.active.lock().expect("active count lock poisoned");
        *active.entry(addr.to_string()).or_insert(0) += 1;
    }

    fn call_finished(&self, addr: &str) {
        let mut active = self.active.lock().expect("active count lock poisoned");
        if let Some(count) = active.get_mut(addr) {
            *count = count.saturating_sub(1);
        }
    }
}
