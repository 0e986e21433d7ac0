//! Metadata Store Port
//!
//! Defines the consumed interface of the external metadata store. The
//! dispatcher reads the full model in pages at startup and then follows a
//! totally-ordered watch channel for the rest of its life.

use crate::domain::entities::{Api, Bind, Cluster, Proxy, Routing, Server};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

/// Which entity class an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Cluster,
    Server,
    Bind,
    Api,
    Routing,
    Proxy,
}

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    New,
    Update,
    Delete,
}

/// Decoded metadata payload of an event, typed by source.
#[derive(Debug, Clone)]
pub enum MetaValue {
    Cluster(Cluster),
    Server(Server),
    Bind(Bind),
    Api(Api),
    Routing(Routing),
    Proxy(Proxy),
}

/// One watch event.
///
/// Delete events carry only the key; for integer-keyed entities the key is
/// the id as a base-10 decimal string, for proxies it is the address.
#[derive(Debug, Clone)]
pub struct Event {
    pub src: EventSource,
    pub event_type: EventType,
    pub key: String,
    pub value: Option<MetaValue>,
}

/// Visitor invoked once per entity during a paged bulk read.
pub type Visitor<'a, T> = &'a mut (dyn FnMut(T) -> Result<()> + Send);

/// Read/watch interface of the authoritative metadata store.
///
/// Paged reads call the visitor once per entity, fetching `limit` entities
/// per page. An error from the visitor aborts that entity class only.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn get_proxies(&self, limit: u64, visitor: Visitor<'_, Proxy>) -> Result<()>;

    async fn get_clusters(&self, limit: u64, visitor: Visitor<'_, Cluster>) -> Result<()>;

    async fn get_servers(&self, limit: u64, visitor: Visitor<'_, Server>) -> Result<()>;

    async fn get_apis(&self, limit: u64, visitor: Visitor<'_, Api>) -> Result<()>;

    async fn get_routings(&self, limit: u64, visitor: Visitor<'_, Routing>) -> Result<()>;

    /// Server ids currently bound to a cluster.
    async fn get_bind_servers(&self, cluster_id: u64) -> Result<Vec<u64>>;

    /// Push events into `events` until `stop` flips to true or the store
    /// connection dies. Blocks for the lifetime of the watch.
    async fn watch(
        &self,
        events: mpsc::Sender<Event>,
        stop: watch::Receiver<bool>,
    ) -> Result<()>;
}
