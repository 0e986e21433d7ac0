//! Registry mutations, bulk load and the watch-event loop.
//!
//! Every mutation takes the write side of the registry lock and fails
//! with a typed error on duplicate adds or missing targets. The event
//! loop is the single consumer of the watch channel, so event application
//! is totally ordered.

use super::Dispatcher;
use crate::domain::entities::{Api, Bind, Cluster, Proxy, Routing, Server};
use crate::domain::ports::{Event, EventSource, EventType, MetaValue};
use crate::runtime::{ApiRuntime, ClusterRuntime, RoutingRuntime, ServerRuntime};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Entity classes the registry manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Proxy,
    Cluster,
    Server,
    Bind,
    Api,
    Routing,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::Proxy => "proxy",
            EntityKind::Cluster => "cluster",
            EntityKind::Server => "server",
            EntityKind::Bind => "bind",
            EntityKind::Api => "api",
            EntityKind::Routing => "routing",
        };
        write!(f, "{}", name)
    }
}

/// Expected registry errors; surfaced to the event loop for logging.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("{0} already exists")]
    AlreadyExists(EntityKind),
    #[error("{0} not found")]
    NotFound(EntityKind),
}

/// Page size for bulk loads from the store.
const LOAD_PAGE_SIZE: u64 = 32;

fn effective_qps(proxy_count: usize, max_qps: u64) -> u64 {
    max_qps / proxy_count.max(1) as u64
}

impl Dispatcher {
    // ----- proxies -----

    pub fn add_proxy(&self, meta: Proxy) -> Result<(), DispatchError> {
        let mut state = self.state.write();

        if state.proxies.contains_key(&meta.addr) {
            return Err(DispatchError::AlreadyExists(EntityKind::Proxy));
        }

        let addr = meta.addr.clone();
        state.proxies.insert(addr.clone(), meta);

        let divisor = state.proxies.len();
        for server in state.servers.values() {
            server
                .limiter()
                .set_rate(effective_qps(divisor, server.meta().max_qps));
        }

        tracing::info!("proxy <{}> added", addr);
        Ok(())
    }

    pub fn remove_proxy(&self, addr: &str) -> Result<(), DispatchError> {
        let mut state = self.state.write();

        if state.proxies.remove(addr).is_none() {
            return Err(DispatchError::NotFound(EntityKind::Proxy));
        }

        let divisor = state.proxies.len();
        for server in state.servers.values() {
            server
                .limiter()
                .set_rate(effective_qps(divisor, server.meta().max_qps));
        }

        tracing::info!("proxy <{}> deleted", addr);
        Ok(())
    }

    // ----- clusters -----

    pub fn add_cluster(&self, meta: Cluster) -> Result<(), DispatchError> {
        let mut state = self.state.write();

        if state.clusters.contains_key(&meta.id) {
            return Err(DispatchError::AlreadyExists(EntityKind::Cluster));
        }

        let id = meta.id;
        state.clusters.insert(id, Arc::new(ClusterRuntime::new(meta)));

        tracing::info!("cluster <{}> added", id);
        Ok(())
    }

    pub fn update_cluster(&self, meta: Cluster) -> Result<(), DispatchError> {
        let state = self.state.write();

        let rt = state
            .clusters
            .get(&meta.id)
            .ok_or(DispatchError::NotFound(EntityKind::Cluster))?;

        let id = meta.id;
        rt.update_meta(meta);

        tracing::info!("cluster <{}> updated", id);
        Ok(())
    }

    /// Remove a cluster and scrub it from every bind reverse index. API
    /// nodes may still reference the id afterwards; they select no server
    /// until reconfigured.
    pub fn remove_cluster(&self, id: u64) -> Result<(), DispatchError> {
        let mut state = self.state.write();

        if !state.clusters.contains_key(&id) {
            return Err(DispatchError::NotFound(EntityKind::Cluster));
        }

        for clusters in state.binds.values_mut() {
            clusters.remove(&id);
        }
        state.clusters.remove(&id);

        tracing::info!("cluster <{}> removed", id);
        Ok(())
    }

    // ----- servers -----

    pub fn add_server(&self, meta: Server) -> Result<(), DispatchError> {
        let rt = {
            let mut state = self.state.write();

            if state.servers.contains_key(&meta.id) {
                return Err(DispatchError::AlreadyExists(EntityKind::Server));
            }

            let qps = effective_qps(state.proxies.len(), meta.max_qps);
            let rt = ServerRuntime::new(meta, qps);
            state.servers.insert(rt.id(), rt.clone());
            rt
        };

        self.add_analysis(&rt);
        self.add_to_check(rt.clone());

        tracing::info!("server <{}> added", rt.id());
        Ok(())
    }

    pub fn update_server(&self, meta: Server) -> Result<(), DispatchError> {
        let rt = {
            let state = self.state.write();

            let rt = state
                .servers
                .get(&meta.id)
                .ok_or(DispatchError::NotFound(EntityKind::Server))?
                .clone();

            let qps = effective_qps(state.proxies.len(), meta.max_qps);
            rt.update_meta(meta, qps);
            rt
        };

        self.add_analysis(&rt);
        self.add_to_check(rt.clone());

        tracing::info!("server <{}> updated", rt.id());
        Ok(())
    }

    pub fn remove_server(&self, id: u64) -> Result<(), DispatchError> {
        let mut state = self.state.write();

        if state.servers.remove(&id).is_none() {
            return Err(DispatchError::NotFound(EntityKind::Server));
        }

        for cluster in state.clusters.values() {
            cluster.remove(id);
        }

        tracing::info!("server <{}> removed", id);
        Ok(())
    }

    fn add_analysis(&self, server: &ServerRuntime) {
        let meta = server.meta();
        self.analyser.remove_target(meta.id);
        self.analyser.add_target(meta.id, Duration::from_secs(1));
        if let Some(cb) = &meta.circuit_breaker {
            self.analyser
                .add_target(meta.id, Duration::from_secs(cb.rate_check_period_secs));
        }
    }

    // ----- binds -----

    pub fn add_bind(&self, bind: Bind) -> Result<(), DispatchError> {
        let mut state = self.state.write();

        let server = state
            .servers
            .get(&bind.server_id)
            .ok_or_else(|| {
                tracing::warn!("bind failed, server <{}> not found", bind.server_id);
                DispatchError::NotFound(EntityKind::Server)
            })?
            .clone();

        let cluster = state
            .clusters
            .get(&bind.cluster_id)
            .ok_or_else(|| {
                tracing::warn!("bind failed, cluster <{}> not found", bind.cluster_id);
                DispatchError::NotFound(EntityKind::Cluster)
            })?
            .clone();

        state
            .binds
            .entry(bind.server_id)
            .or_default()
            .insert(bind.cluster_id, cluster.clone());

        tracing::info!("bind <{},{}> created", bind.cluster_id, bind.server_id);

        if server.status().is_up() {
            cluster.add(bind.server_id);
        }
        Ok(())
    }

    pub fn remove_bind(&self, bind: Bind) -> Result<(), DispatchError> {
        let mut state = self.state.write();

        if !state.servers.contains_key(&bind.server_id) {
            tracing::warn!("remove bind failed, server <{}> not found", bind.server_id);
            return Err(DispatchError::NotFound(EntityKind::Server));
        }

        let cluster = state
            .clusters
            .get(&bind.cluster_id)
            .ok_or_else(|| {
                tracing::warn!("remove bind failed, cluster <{}> not found", bind.cluster_id);
                DispatchError::NotFound(EntityKind::Cluster)
            })?
            .clone();

        cluster.remove(bind.server_id);

        if let Some(clusters) = state.binds.get_mut(&bind.server_id) {
            clusters.remove(&bind.cluster_id);
            tracing::info!("bind <{},{}> removed", bind.cluster_id, bind.server_id);
        }
        Ok(())
    }

    // ----- apis -----

    pub fn add_api(&self, meta: Api) -> Result<(), DispatchError> {
        let mut state = self.state.write();

        if state.apis.contains_key(&meta.id) {
            return Err(DispatchError::AlreadyExists(EntityKind::Api));
        }

        let id = meta.id;
        state.apis.insert(id, Arc::new(ApiRuntime::new(meta)));

        tracing::info!("api <{}> added", id);
        Ok(())
    }

    pub fn update_api(&self, meta: Api) -> Result<(), DispatchError> {
        let mut state = self.state.write();

        if !state.apis.contains_key(&meta.id) {
            return Err(DispatchError::NotFound(EntityKind::Api));
        }

        let id = meta.id;
        state.apis.insert(id, Arc::new(ApiRuntime::new(meta)));

        tracing::info!("api <{}> updated", id);
        Ok(())
    }

    pub fn remove_api(&self, id: u64) -> Result<(), DispatchError> {
        let mut state = self.state.write();

        if state.apis.remove(&id).is_none() {
            return Err(DispatchError::NotFound(EntityKind::Api));
        }

        tracing::info!("api <{}> removed", id);
        Ok(())
    }

    // ----- routings -----

    pub fn add_routing(&self, meta: Routing) -> Result<(), DispatchError> {
        let mut state = self.state.write();

        if state.routings.contains_key(&meta.id) {
            return Err(DispatchError::AlreadyExists(EntityKind::Routing));
        }

        let id = meta.id;
        state.routings.insert(id, Arc::new(RoutingRuntime::new(meta)));

        tracing::info!("routing <{}> added", id);
        Ok(())
    }

    pub fn update_routing(&self, meta: Routing) -> Result<(), DispatchError> {
        let mut state = self.state.write();

        if !state.routings.contains_key(&meta.id) {
            return Err(DispatchError::NotFound(EntityKind::Routing));
        }

        let id = meta.id;
        state.routings.insert(id, Arc::new(RoutingRuntime::new(meta)));

        tracing::info!("routing <{}> updated", id);
        Ok(())
    }

    pub fn remove_routing(&self, id: u64) -> Result<(), DispatchError> {
        let mut state = self.state.write();

        if state.routings.remove(&id).is_none() {
            return Err(DispatchError::NotFound(EntityKind::Routing));
        }

        tracing::info!("routing <{}> deleted", id);
        Ok(())
    }

    // ----- bulk load -----

    /// Spawn the watch plumbing and load the full model. Load order is
    /// load-bearing: binds need clusters and servers present, server
    /// limiters need the proxy count settled first.
    pub async fn start(&self, stop: watch::Receiver<bool>) {
        let (tx, rx) = mpsc::channel(1024);

        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.watch(tx, stop).await {
                tracing::error!("store watch failed: {}", e);
            }
        });
        if let Some(this) = self.weak.upgrade() {
            tokio::spawn(this.run_event_loop(rx));
        }

        self.load().await;
    }

    pub async fn load(&self) {
        self.load_proxies().await;
        self.load_clusters().await;
        self.load_servers().await;
        self.load_binds().await;
        self.load_apis().await;
        self.load_routings().await;
    }

    async fn load_proxies(&self) {
        tracing::info!("load proxies");

        let result = self
            .store
            .get_proxies(LOAD_PAGE_SIZE, &mut |meta| {
                self.add_proxy(meta).map_err(Into::into)
            })
            .await;
        if let Err(e) = result {
            tracing::error!("load proxies failed: {}", e);
        }
    }

    async fn load_clusters(&self) {
        tracing::info!("load clusters");

        let result = self
            .store
            .get_clusters(LOAD_PAGE_SIZE, &mut |meta| {
                self.add_cluster(meta).map_err(Into::into)
            })
            .await;
        if let Err(e) = result {
            tracing::error!("load clusters failed: {}", e);
        }
    }

    async fn load_servers(&self) {
        tracing::info!("load servers");

        let result = self
            .store
            .get_servers(LOAD_PAGE_SIZE, &mut |meta| {
                self.add_server(meta).map_err(Into::into)
            })
            .await;
        if let Err(e) = result {
            tracing::error!("load servers failed: {}", e);
        }
    }

    async fn load_binds(&self) {
        tracing::info!("load binds");

        let cluster_ids: Vec<u64> = self.state.read().clusters.keys().copied().collect();
        for cluster_id in cluster_ids {
            let servers = match self.store.get_bind_servers(cluster_id).await {
                Ok(servers) => servers,
                Err(e) => {
                    tracing::error!("load binds failed: {}", e);
                    return;
                }
            };

            for server_id in servers {
                let bind = Bind {
                    cluster_id,
                    server_id,
                };
                if let Err(e) = self.add_bind(bind) {
                    tracing::error!("bind <{},{}> add failed: {}", cluster_id, server_id, e);
                }
            }
        }
    }

    async fn load_apis(&self) {
        tracing::info!("load apis");

        let result = self
            .store
            .get_apis(LOAD_PAGE_SIZE, &mut |meta| {
                self.add_api(meta).map_err(Into::into)
            })
            .await;
        if let Err(e) = result {
            tracing::error!("load apis failed: {}", e);
        }
    }

    async fn load_routings(&self) {
        tracing::info!("load routings");

        let result = self
            .store
            .get_routings(LOAD_PAGE_SIZE, &mut |meta| {
                self.add_routing(meta).map_err(Into::into)
            })
            .await;
        if let Err(e) = result {
            tracing::error!("load routings failed: {}", e);
        }
    }

    // ----- event loop -----

    /// Single consumer of the watch channel; exits when the watch side
    /// closes it.
    pub async fn run_event_loop(self: Arc<Self>, mut events: mpsc::Receiver<Event>) {
        tracing::info!("dispatcher starts watching meta data");

        while let Some(evt) = events.recv().await {
            self.handle_event(evt);
        }

        tracing::info!("watch channel closed, event loop exits");
    }

    pub fn handle_event(&self, evt: Event) {
        match evt.src {
            EventSource::Cluster => self.do_cluster_event(evt),
            EventSource::Server => self.do_server_event(evt),
            EventSource::Bind => self.do_bind_event(evt),
            EventSource::Api => self.do_api_event(evt),
            EventSource::Routing => self.do_routing_event(evt),
            EventSource::Proxy => self.do_proxy_event(evt),
        }
    }

    fn do_cluster_event(&self, evt: Event) {
        let result = match (evt.event_type, evt.value) {
            (EventType::New, Some(MetaValue::Cluster(meta))) => self.add_cluster(meta),
            (EventType::Update, Some(MetaValue::Cluster(meta))) => self.update_cluster(meta),
            (EventType::Delete, _) => match parse_id(&evt.key) {
                Some(id) => self.remove_cluster(id),
                None => return,
            },
            _ => {
                tracing::warn!("unexpected cluster event payload, key <{}>", evt.key);
                return;
            }
        };

        if let Err(e) = result {
            tracing::warn!("cluster event <{}> not applied: {}", evt.key, e);
        }
    }

    fn do_server_event(&self, evt: Event) {
        let result = match (evt.event_type, evt.value) {
            (EventType::New, Some(MetaValue::Server(meta))) => self.add_server(meta),
            (EventType::Update, Some(MetaValue::Server(meta))) => self.update_server(meta),
            (EventType::Delete, _) => match parse_id(&evt.key) {
                Some(id) => self.remove_server(id),
                None => return,
            },
            _ => {
                tracing::warn!("unexpected server event payload, key <{}>", evt.key);
                return;
            }
        };

        if let Err(e) = result {
            tracing::warn!("server event <{}> not applied: {}", evt.key, e);
        }
    }

    fn do_bind_event(&self, evt: Event) {
        let bind = match (&evt.value, parse_bind_key(&evt.key)) {
            (Some(MetaValue::Bind(bind)), _) => *bind,
            (_, Some(bind)) => bind,
            _ => {
                tracing::warn!("unexpected bind event payload, key <{}>", evt.key);
                return;
            }
        };

        let result = match evt.event_type {
            EventType::New => self.add_bind(bind),
            EventType::Delete => self.remove_bind(bind),
            EventType::Update => return,
        };

        if let Err(e) = result {
            tracing::warn!("bind event <{}> not applied: {}", evt.key, e);
        }
    }

    fn do_api_event(&self, evt: Event) {
        let result = match (evt.event_type, evt.value) {
            (EventType::New, Some(MetaValue::Api(meta))) => self.add_api(meta),
            (EventType::Update, Some(MetaValue::Api(meta))) => self.update_api(meta),
            (EventType::Delete, _) => match parse_id(&evt.key) {
                Some(id) => self.remove_api(id),
                None => return,
            },
            _ => {
                tracing::warn!("unexpected api event payload, key <{}>", evt.key);
                return;
            }
        };

        if let Err(e) = result {
            tracing::warn!("api event <{}> not applied: {}", evt.key, e);
        }
    }

    fn do_routing_event(&self, evt: Event) {
        let result = match (evt.event_type, evt.value) {
            (EventType::New, Some(MetaValue::Routing(meta))) => self.add_routing(meta),
            (EventType::Update, Some(MetaValue::Routing(meta))) => self.update_routing(meta),
            (EventType::Delete, _) => match parse_id(&evt.key) {
                Some(id) => self.remove_routing(id),
                None => return,
            },
            _ => {
                tracing::warn!("unexpected routing event payload, key <{}>", evt.key);
                return;
            }
        };

        if let Err(e) = result {
            tracing::warn!("routing event <{}> not applied: {}", evt.key, e);
        }
    }

    fn do_proxy_event(&self, evt: Event) {
        let result = match (evt.event_type, evt.value) {
            (EventType::New, Some(MetaValue::Proxy(meta))) => self.add_proxy(meta),
            (EventType::Delete, _) => self.remove_proxy(&evt.key),
            _ => {
                tracing::warn!("unexpected proxy event payload, key <{}>", evt.key);
                return;
            }
        };

        if let Err(e) = result {
            tracing::warn!("proxy event <{}> not applied: {}", evt.key, e);
        }
    }
}

fn parse_id(key: &str) -> Option<u64> {
    match key.parse() {
        Ok(id) => Some(id),
        Err(_) => {
            tracing::warn!("event key <{}> is not an id", key);
            None
        }
    }
}

/// Bind delete events may carry only the `cluster-server` key.
fn parse_bind_key(key: &str) -> Option<Bind> {
    let (cluster, server) = key.split_once('-')?;
    Some(Bind {
        cluster_id: cluster.parse().ok()?,
        server_id: server.parse().ok()?,
    })
}
