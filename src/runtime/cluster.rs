//! Cluster Runtime
//!
//! A cluster's live state: the ordered sequence of server ids that are
//! both bound and Up, plus the selector built from its configured
//! strategy. The sequence is mutated by bind events and health
//! transitions; request workers only read it.

use crate::domain::entities::{Cluster, LbStrategy};
use crate::domain::request::DispatchRequest;
use crate::domain::services::{new_load_balance, LoadBalance};
use parking_lot::RwLock;

pub struct ClusterRuntime {
    meta: RwLock<Cluster>,
    /// Insertion-ordered, duplicate-free
    svrs: RwLock<Vec<u64>>,
    lb: RwLock<Box<dyn LoadBalance>>,
}

impl ClusterRuntime {
    pub fn new(meta: Cluster) -> Self {
        let lb = new_load_balance(meta.load_balance);
        Self {
            meta: RwLock::new(meta),
            svrs: RwLock::new(Vec::new()),
            lb: RwLock::new(lb),
        }
    }

    pub fn id(&self) -> u64 {
        self.meta.read().id
    }

    pub fn meta(&self) -> Cluster {
        self.meta.read().clone()
    }

    pub fn strategy(&self) -> LbStrategy {
        self.meta.read().load_balance
    }

    /// Replace the metadata and rebuild the selector. The server sequence
    /// is untouched.
    pub fn update_meta(&self, meta: Cluster) {
        *self.lb.write() = new_load_balance(meta.load_balance);
        *self.meta.write() = meta;
    }

    /// Append a server to the sequence; no-op when already present.
    pub fn add(&self, id: u64) {
        let mut svrs = self.svrs.write();
        if svrs.contains(&id) {
            return;
        }
        svrs.push(id);
        tracing::info!("bind <{},{}> actived", self.id(), id);
    }

    /// Drop a server from the sequence, preserving the order of the rest.
    pub fn remove(&self, id: u64) {
        let mut svrs = self.svrs.write();
        if let Some(pos) = svrs.iter().position(|&s| s == id) {
            svrs.remove(pos);
            tracing::info!("bind <{},{}> inactived", self.id(), id);
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.svrs.read().contains(&id)
    }

    pub fn servers(&self) -> Vec<u64> {
        self.svrs.read().clone()
    }

    pub fn len(&self) -> usize {
        self.svrs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.svrs.read().is_empty()
    }

    /// Walk the sequence from back to front.
    pub fn foreach<F>(&self, mut f: F)
    where
        F: FnMut(u64),
    {
        for &id in self.svrs.read().iter().rev() {
            f(id);
        }
    }

    /// Ask the strategy for a server. Returns 0 when the selector yields
    /// nothing usable.
    pub fn select_server(&self, req: &DispatchRequest) -> u64 {
        let svrs = self.svrs.read();
        let index = self.lb.read().select(req, &svrs);
        if index < 0 {
            return 0;
        }
        svrs.get(index as usize).copied().unwrap_or(0)
    }
}
