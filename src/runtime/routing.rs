//! Routing Runtime
//!
//! A traffic-split rule's live state. Each routing carries its own PRNG,
//! seeded from the wall clock at creation, so replicas dice independently.

use crate::domain::entities::{Routing, RoutingStrategy};
use crate::domain::request::DispatchRequest;
use crate::runtime::expr::condition_matches;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct RoutingRuntime {
    meta: Routing,
    rng: Mutex<StdRng>,
}

impl RoutingRuntime {
    pub fn new(meta: Routing) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self {
            meta,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn id(&self) -> u64 {
        self.meta.id
    }

    pub fn meta(&self) -> &Routing {
        &self.meta
    }

    pub fn cluster_id(&self) -> u64 {
        self.meta.cluster_id
    }

    pub fn strategy(&self) -> RoutingStrategy {
        self.meta.strategy
    }

    /// True when the routing applies to this request: the API filter
    /// passes (0 filters nothing), every condition holds, and the dice
    /// lands inside the traffic rate.
    pub fn matches(&self, api_id: u64, req: &DispatchRequest) -> bool {
        if self.meta.api > 0 && api_id != self.meta.api {
            return false;
        }

        if !self
            .meta
            .conditions
            .iter()
            .all(|c| condition_matches(c, req))
        {
            return false;
        }

        let n: u32 = self.rng.lock().gen_range(0..100);
        n < self.meta.traffic_rate
    }
}
