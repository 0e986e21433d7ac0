//! Dispatcher
//!
//! The central registry of the gateway: every entity runtime lives in one
//! place, mutated only by the event loop and the bulk loader under a
//! single write lock, read by every request worker under the shared side.
//!
//! `meta` holds the mutations and the event loop, `health` the probe loop
//! that drives server state.

mod health;
mod meta;

pub use meta::{DispatchError, EntityKind};

use crate::domain::entities::{CircuitStatus, Proxy, RoutingStrategy};
use crate::domain::ports::{Analyser, MetaStore};
use crate::domain::request::DispatchRequest;
use crate::infrastructure::{HealthCheckConfig, HealthProbe, TimerWheel};
use crate::runtime::{ApiRuntime, ClusterRuntime, RoutingRuntime, ServerRuntime};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// All registry maps, guarded together by one lock.
#[derive(Default)]
struct DispatchState {
    proxies: HashMap<String, Proxy>,
    clusters: HashMap<u64, Arc<ClusterRuntime>>,
    servers: HashMap<u64, Arc<ServerRuntime>>,
    apis: HashMap<u64, Arc<ApiRuntime>>,
    routings: HashMap<u64, Arc<RoutingRuntime>>,
    /// Reverse index: server id -> clusters it is bound to
    binds: HashMap<u64, HashMap<u64, Arc<ClusterRuntime>>>,
}

/// One forwarding target produced by a dispatch decision.
#[derive(Debug, Clone)]
pub struct DispatchTarget {
    pub node_index: usize,
    pub cluster_id: u64,
    /// Selected backend, 0 when the cluster has no usable server
    pub server_id: u64,
    /// Mirrored targets receive a copy of the request; their response is
    /// discarded
    pub mirror: bool,
    /// Rewritten URI, empty when no rewrite applies
    pub rewritten_url: String,
}

/// The dispatch decision for one request.
pub struct DispatchResult {
    pub api: Arc<ApiRuntime>,
    /// False when the client IP failed the API's access lists
    pub allowed: bool,
    /// False when a dispatch node's validations rejected the request
    pub valid: bool,
    pub targets: Vec<DispatchTarget>,
}

pub struct Dispatcher {
    /// Self-handle for background tasks spawned from `&self` methods
    weak: Weak<Dispatcher>,
    state: RwLock<DispatchState>,
    store: Arc<dyn MetaStore>,
    analyser: Arc<dyn Analyser>,
    tw: Arc<TimerWheel>,
    probe: HealthProbe,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn MetaStore>,
        analyser: Arc<dyn Analyser>,
        health: HealthCheckConfig,
    ) -> anyhow::Result<Arc<Self>> {
        let probe = HealthProbe::new(health)?;
        Ok(Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            state: RwLock::new(DispatchState::default()),
            store,
            analyser,
            tw: Arc::new(TimerWheel::new()),
            probe,
        }))
    }

    /// The shared timer wheel, also used by the caching filter.
    pub fn timer_wheel(&self) -> Arc<TimerWheel> {
        self.tw.clone()
    }

    // ----- read side -----

    pub fn cluster(&self, id: u64) -> Option<Arc<ClusterRuntime>> {
        self.state.read().clusters.get(&id).cloned()
    }

    pub fn server(&self, id: u64) -> Option<Arc<ServerRuntime>> {
        self.state.read().servers.get(&id).cloned()
    }

    pub fn api(&self, id: u64) -> Option<Arc<ApiRuntime>> {
        self.state.read().apis.get(&id).cloned()
    }

    pub fn routing(&self, id: u64) -> Option<Arc<RoutingRuntime>> {
        self.state.read().routings.get(&id).cloned()
    }

    pub fn proxy_count(&self) -> usize {
        self.state.read().proxies.len()
    }

    pub fn has_bind(&self, cluster_id: u64, server_id: u64) -> bool {
        self.state
            .read()
            .binds
            .get(&server_id)
            .map(|clusters| clusters.contains_key(&cluster_id))
            .unwrap_or(false)
    }

    /// Find the API serving a request. With several candidates the lowest
    /// id wins, keeping the decision stable across replicas.
    pub fn select_api(&self, req: &DispatchRequest) -> Option<Arc<ApiRuntime>> {
        self.state
            .read()
            .apis
            .values()
            .filter(|api| api.matches(req))
            .min_by_key(|api| api.id())
            .cloned()
    }

    /// Answer the full dispatch decision for a request.
    pub fn dispatch(&self, req: &DispatchRequest) -> Option<DispatchResult> {
        let api = self.select_api(req)?;

        if !api.access_allowed(req.remote_ip()) {
            tracing::debug!("api <{}> denied ip <{}>", api.id(), req.remote_ip());
            return Some(DispatchResult {
                api,
                allowed: false,
                valid: true,
                targets: Vec::new(),
            });
        }

        if !api.nodes().iter().all(|node| node.validate(req)) {
            return Some(DispatchResult {
                api,
                allowed: true,
                valid: false,
                targets: Vec::new(),
            });
        }

        let state = self.state.read();

        let matched: Vec<Arc<RoutingRuntime>> = state
            .routings
            .values()
            .filter(|r| r.matches(api.id(), req))
            .cloned()
            .collect();

        let split = matched
            .iter()
            .find(|r| r.strategy() == RoutingStrategy::Split)
            .map(|r| r.cluster_id());

        let mut targets = Vec::with_capacity(api.nodes().len());
        for (node_index, node) in api.nodes().iter().enumerate() {
            let cluster_id = split.unwrap_or_else(|| node.cluster_id());
            let server_id = state
                .clusters
                .get(&cluster_id)
                .map(|c| c.select_server(req))
                .unwrap_or(0);

            targets.push(DispatchTarget {
                node_index,
                cluster_id,
                server_id,
                mirror: false,
                rewritten_url: api.rewrite_url(req, &node.meta().url_rewrite),
            });
        }

        for routing in matched
            .iter()
            .filter(|r| r.strategy() == RoutingStrategy::Copy)
        {
            let cluster_id = routing.cluster_id();
            let server_id = state
                .clusters
                .get(&cluster_id)
                .map(|c| c.select_server(req))
                .unwrap_or(0);

            targets.push(DispatchTarget {
                node_index: 0,
                cluster_id,
                server_id,
                mirror: true,
                rewritten_url: String::new(),
            });
        }

        Some(DispatchResult {
            api,
            allowed: true,
            valid: true,
            targets,
        })
    }

    /// Admission check for a selected server: a tripped circuit or an
    /// empty token bucket denies the request.
    pub fn admit(&self, server_id: u64) -> bool {
        match self.server(server_id) {
            Some(server) => {
                !server.is_circuit(CircuitStatus::Close) && server.limiter().allow()
            }
            None => false,
        }
    }
}
