//! In-memory Metadata Store
//!
//! A `MetaStore` backed by plain maps, used by the composition root when
//! no external store is wired in, and by tests. Entities are seeded up
//! front or mutated through `put_*`/`publish`; watch subscribers get
//! every published event in order.

use crate::domain::entities::{Api, Bind, Cluster, Proxy, Routing, Server};
use crate::domain::ports::{Event, MetaStore, Visitor};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::BTreeMap;
use tokio::sync::{broadcast, mpsc, watch};

/// Bootstrap snapshot, typically read from a JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub proxies: Vec<Proxy>,
    #[serde(default)]
    pub clusters: Vec<Cluster>,
    #[serde(default)]
    pub servers: Vec<Server>,
    #[serde(default)]
    pub binds: Vec<Bind>,
    #[serde(default)]
    pub apis: Vec<Api>,
    #[serde(default)]
    pub routings: Vec<Routing>,
}

pub struct MemStore {
    proxies: RwLock<BTreeMap<String, Proxy>>,
    clusters: RwLock<BTreeMap<u64, Cluster>>,
    servers: RwLock<BTreeMap<u64, Server>>,
    apis: RwLock<BTreeMap<u64, Api>>,
    routings: RwLock<BTreeMap<u64, Routing>>,
    binds: RwLock<Vec<Bind>>,
    events: broadcast::Sender<Event>,
}

impl MemStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            proxies: RwLock::new(BTreeMap::new()),
            clusters: RwLock::new(BTreeMap::new()),
            servers: RwLock::new(BTreeMap::new()),
            apis: RwLock::new(BTreeMap::new()),
            routings: RwLock::new(BTreeMap::new()),
            binds: RwLock::new(Vec::new()),
            events,
        }
    }

    pub fn from_seed(seed: Seed) -> Self {
        let store = Self::new();
        for proxy in seed.proxies {
            store.put_proxy(proxy);
        }
        for cluster in seed.clusters {
            store.put_cluster(cluster);
        }
        for server in seed.servers {
            store.put_server(server);
        }
        for bind in seed.binds {
            store.put_bind(bind);
        }
        for api in seed.apis {
            store.put_api(api);
        }
        for routing in seed.routings {
            store.put_routing(routing);
        }
        store
    }

    pub fn put_proxy(&self, proxy: Proxy) {
        self.proxies.write().insert(proxy.addr.clone(), proxy);
    }

    pub fn put_cluster(&self, cluster: Cluster) {
        self.clusters.write().insert(cluster.id, cluster);
    }

    pub fn put_server(&self, server: Server) {
        self.servers.write().insert(server.id, server);
    }

    pub fn put_api(&self, api: Api) {
        self.apis.write().insert(api.id, api);
    }

    pub fn put_routing(&self, routing: Routing) {
        self.routings.write().insert(routing.id, routing);
    }

    pub fn put_bind(&self, bind: Bind) {
        self.binds.write().push(bind);
    }

    /// Push an event to every active watcher.
    pub fn publish(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk a snapshot in pages of `limit`, feeding the visitor one entity at
/// a time. A visitor error aborts the walk.
fn visit_paged<T: Clone>(items: Vec<T>, limit: u64, visitor: Visitor<'_, T>) -> Result<()> {
    for page in items.chunks(limit.max(1) as usize) {
        for item in page {
            visitor(item.clone())?;
        }
    }
    Ok(())
}

#[async_trait]
impl MetaStore for MemStore {
    async fn get_proxies(&self, limit: u64, visitor: Visitor<'_, Proxy>) -> Result<()> {
        let items: Vec<Proxy> = self.proxies.read().values().cloned().collect();
        visit_paged(items, limit, visitor)
    }

    async fn get_clusters(&self, limit: u64, visitor: Visitor<'_, Cluster>) -> Result<()> {
        let items: Vec<Cluster> = self.clusters.read().values().cloned().collect();
        visit_paged(items, limit, visitor)
    }

    async fn get_servers(&self, limit: u64, visitor: Visitor<'_, Server>) -> Result<()> {
        let items: Vec<Server> = self.servers.read().values().cloned().collect();
        visit_paged(items, limit, visitor)
    }

    async fn get_apis(&self, limit: u64, visitor: Visitor<'_, Api>) -> Result<()> {
        let items: Vec<Api> = self.apis.read().values().cloned().collect();
        visit_paged(items, limit, visitor)
    }

    async fn get_routings(&self, limit: u64, visitor: Visitor<'_, Routing>) -> Result<()> {
        let items: Vec<Routing> = self.routings.read().values().cloned().collect();
        visit_paged(items, limit, visitor)
    }

    async fn get_bind_servers(&self, cluster_id: u64) -> Result<Vec<u64>> {
        Ok(self
            .binds
            .read()
            .iter()
            .filter(|b| b.cluster_id == cluster_id)
            .map(|b| b.server_id)
            .collect())
    }

    async fn watch(
        &self,
        events: mpsc::Sender<Event>,
        stop: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut rx = self.events.subscribe();
        let mut stop = stop;

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return Ok(());
                    }
                }
                event = rx.recv() => {
                    match event {
                        Ok(event) => {
                            if events.send(event).await.is_err() {
                                return Ok(());
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("watch lagged, {} events dropped", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => return Ok(()),
                    }
                }
            }
        }
    }
}
