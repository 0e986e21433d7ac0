//! Load Balancer Service
//!
//! Pluggable selection of a server index from a cluster's bound sequence.
//! Strategies are pure: they never inspect server state, only the sequence
//! the cluster hands them.

use crate::domain::entities::LbStrategy;
use crate::domain::request::DispatchRequest;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

/// A load-balance strategy.
///
/// `select` returns an index into `servers`; anything negative or out of
/// range means "no server".
pub trait LoadBalance: Send + Sync {
    fn select(&self, req: &DispatchRequest, servers: &[u64]) -> i64;
}

/// Build the selector for a cluster's configured strategy.
pub fn new_load_balance(strategy: LbStrategy) -> Box<dyn LoadBalance> {
    match strategy {
        LbStrategy::RoundRobin => Box::new(RoundRobin::new()),
        LbStrategy::Random => Box::new(Random),
    }
}

/// Rotates through the sequence with a shared operation counter.
pub struct RoundRobin {
    ops: AtomicU64,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            ops: AtomicU64::new(0),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalance for RoundRobin {
    fn select(&self, _req: &DispatchRequest, servers: &[u64]) -> i64 {
        if servers.is_empty() {
            return -1;
        }
        let n = self.ops.fetch_add(1, Ordering::Relaxed);
        (n % servers.len() as u64) as i64
    }
}

/// Picks a uniformly random index.
pub struct Random;

impl LoadBalance for Random {
    fn select(&self, _req: &DispatchRequest, servers: &[u64]) -> i64 {
        if servers.is_empty() {
            return -1;
        }
        rand::thread_rng().gen_range(0..servers.len()) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn request() -> DispatchRequest {
        DispatchRequest::new(Method::GET, "/")
    }

    #[test]
    fn test_round_robin_rotates() {
        let lb = RoundRobin::new();
        let servers = vec![10, 20, 30];

        assert_eq!(lb.select(&request(), &servers), 0);
        assert_eq!(lb.select(&request(), &servers), 1);
        assert_eq!(lb.select(&request(), &servers), 2);
        assert_eq!(lb.select(&request(), &servers), 0);
    }

    #[test]
    fn test_round_robin_empty_sequence() {
        let lb = RoundRobin::new();
        assert_eq!(lb.select(&request(), &[]), -1);
    }

    #[test]
    fn test_random_in_range() {
        let lb = Random;
        let servers = vec![10, 20, 30, 40];

        for _ in 0..100 {
            let idx = lb.select(&request(), &servers);
            assert!((0..4).contains(&idx));
        }
    }

    #[test]
    fn test_random_empty_sequence() {
        let lb = Random;
        assert_eq!(lb.select(&request(), &[]), -1);
    }

    #[test]
    fn test_factory_builds_configured_strategy() {
        let lb = new_load_balance(LbStrategy::RoundRobin);
        let servers = vec![1, 2];
        assert_eq!(lb.select(&request(), &servers), 0);
        assert_eq!(lb.select(&request(), &servers), 1);
    }
}
