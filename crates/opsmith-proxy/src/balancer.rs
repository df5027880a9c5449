//! Backend selection strategies.

use crate::route::{Backend, HealthStatus};
use opsmith_core::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Load-balancing strategy names accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    RoundRobin,
    LeastConnections,
    IpHash,
    Weighted,
}

impl Strategy {
    /// Parse a configured strategy name; empty means round-robin.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "" | "round-robin" => Ok(Strategy::RoundRobin),
            "least-conn" => Ok(Strategy::LeastConnections),
            "ip-hash" => Ok(Strategy::IpHash),
            "weighted" => Ok(Strategy::Weighted),
            other => Err(Error::config(format!(
                "unknown load-balance strategy: {other}"
            ))),
        }
    }
}

/// Selects a healthy backend under the configured strategy.
///
/// The only state is a single atomic counter shared by the round-robin and
/// weighted strategies.
pub struct LoadBalancer {
    strategy: Strategy,
    counter: AtomicU64,
}

impl LoadBalancer {
    #[must_use]
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            counter: AtomicU64::new(0),
        }
    }

    /// Pick a backend for a request.
    ///
    /// Backends are filtered to `healthy` first; `None` means no backend can
    /// take the request (a 503 at the edge).
    pub fn select(&self, backends: &[Arc<Backend>], client_ip: &str) -> Option<Arc<Backend>> {
        let healthy: Vec<&Arc<Backend>> = backends
            .iter()
            .filter(|b| b.health.status() == HealthStatus::Healthy)
            .collect();
        if healthy.is_empty() {
            return None;
        }

        let chosen = match self.strategy {
            Strategy::RoundRobin => {
                let idx = self.counter.fetch_add(1, Ordering::Relaxed) as usize;
                healthy[idx % healthy.len()]
            }
            Strategy::LeastConnections => *healthy
                .iter()
                .min_by_key(|b| b.health.connections())
                .expect("nonempty healthy set"),
            Strategy::IpHash => {
                let idx = fnv1a_32(client_ip.as_bytes()) as usize;
                healthy[idx % healthy.len()]
            }
            Strategy::Weighted => {
                let weights: Vec<u64> = healthy
                    .iter()
                    .map(|b| if b.weight <= 0 { 1 } else { b.weight as u64 })
                    .collect();
                let total: u64 = weights.iter().sum();
                let mut slot = self.counter.fetch_add(1, Ordering::Relaxed) % total;
                let mut chosen = healthy[0];
                for (backend, weight) in healthy.iter().zip(&weights) {
                    if slot < *weight {
                        chosen = *backend;
                        break;
                    }
                    slot -= weight;
                }
                chosen
            }
        };

        Some(Arc::clone(chosen))
    }
}

/// 32-bit FNV-1a hash.
fn fnv1a_32(data: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in data {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}
