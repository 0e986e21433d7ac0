//! Server Runtime
//!
//! A backend server's live state: health status, circuit gate, probe
//! backoff counters and the per-server token bucket. Transient state is
//! kept in atomics so health workers and timer callbacks never contend
//! with the registry lock.
//!
//! Circuit naming is inverted on purpose (`Open` = traffic flows,
//! `Close` = tripped); see [`CircuitStatus`].

use crate::domain::entities::{CircuitStatus, Server, Status};
use crate::infrastructure::{QpsLimiter, TimerWheel};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

const STATUS_UP: u32 = 0;
const STATUS_DOWN: u32 = 1;

const CIRCUIT_OPEN: u32 = 0;
const CIRCUIT_HALF: u32 = 1;
const CIRCUIT_CLOSE: u32 = 2;

fn encode_status(status: Status) -> u32 {
    match status {
        Status::Up => STATUS_UP,
        Status::Down => STATUS_DOWN,
    }
}

pub struct ServerRuntime {
    /// Self-handle for the circuit timer, which must not keep a removed
    /// server alive
    weak: Weak<ServerRuntime>,
    meta: RwLock<Server>,
    limiter: QpsLimiter,
    status: AtomicU32,
    circuit: AtomicU32,
    check_fail_count: AtomicU32,
    check_interval_ms: AtomicU64,
    /// Set once the health loop for this runtime is running
    checking: AtomicBool,
}

impl ServerRuntime {
    /// Build the runtime for freshly loaded metadata. Servers start Down
    /// with the circuit admitting traffic; the health checker promotes
    /// them.
    pub fn new(meta: Server, effective_qps: u64) -> Arc<Self> {
        let base_interval_ms = meta.health_check.check_interval_secs * 1000;
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            limiter: QpsLimiter::new(effective_qps),
            status: AtomicU32::new(STATUS_DOWN),
            circuit: AtomicU32::new(CIRCUIT_OPEN),
            check_fail_count: AtomicU32::new(0),
            check_interval_ms: AtomicU64::new(base_interval_ms),
            checking: AtomicBool::new(false),
            meta: RwLock::new(meta),
        })
    }

    pub fn id(&self) -> u64 {
        self.meta.read().id
    }

    pub fn meta(&self) -> Server {
        self.meta.read().clone()
    }

    /// Replace the metadata and re-derive the limiter. Status, circuit,
    /// fail count and the current check interval carry over.
    pub fn update_meta(&self, meta: Server, effective_qps: u64) {
        *self.meta.write() = meta;
        self.limiter.set_rate(effective_qps);
    }

    pub fn limiter(&self) -> &QpsLimiter {
        &self.limiter
    }

    pub fn status(&self) -> Status {
        match self.status.load(Ordering::SeqCst) {
            STATUS_UP => Status::Up,
            _ => Status::Down,
        }
    }

    pub fn change_to(&self, status: Status) {
        self.status.store(encode_status(status), Ordering::SeqCst);
    }

    pub fn circuit(&self) -> CircuitStatus {
        match self.circuit.load(Ordering::SeqCst) {
            CIRCUIT_OPEN => CircuitStatus::Open,
            CIRCUIT_HALF => CircuitStatus::Half,
            _ => CircuitStatus::Close,
        }
    }

    pub fn is_circuit(&self, target: CircuitStatus) -> bool {
        self.circuit() == target
    }

    /// URL probed by the health checker.
    pub fn check_url(&self) -> String {
        let meta = self.meta.read();
        format!(
            "{}://{}{}",
            meta.protocol.scheme(),
            meta.addr,
            meta.health_check.path
        )
    }

    /// Record a probe failure: bump the counter and stretch the interval
    /// by half of itself.
    pub fn fail(&self) {
        self.check_fail_count.fetch_add(1, Ordering::SeqCst);
        let current = self.check_interval_ms.load(Ordering::SeqCst);
        self.check_interval_ms
            .store(current + current / 2, Ordering::SeqCst);
    }

    /// Clear the failure streak and restore the configured base interval.
    pub fn reset(&self) {
        self.check_fail_count.store(0, Ordering::SeqCst);
        let base_ms = self.meta.read().health_check.check_interval_secs * 1000;
        self.check_interval_ms.store(base_ms, Ordering::SeqCst);
    }

    pub fn fail_count(&self) -> u32 {
        self.check_fail_count.load(Ordering::SeqCst)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.load(Ordering::SeqCst))
    }

    /// Trip the circuit. No-op without a breaker or when already tripped.
    /// Schedules the move to `Half` once the close timeout elapses; the
    /// timer holds a weak reference and tolerates server removal.
    pub fn circuit_to_close(&self, tw: &TimerWheel) {
        let close_timeout = {
            let meta = self.meta.read();
            match &meta.circuit_breaker {
                Some(cb) => Duration::from_secs(cb.close_timeout_secs),
                None => return,
            }
        };

        if self.circuit.swap(CIRCUIT_CLOSE, Ordering::SeqCst) == CIRCUIT_CLOSE {
            return;
        }

        tracing::warn!("server <{}> circuit change to close", self.id());

        let weak = self.weak.clone();
        tw.schedule(close_timeout, move || {
            if let Some(server) = weak.upgrade() {
                server.circuit_to_half();
            }
        });
    }

    /// Start probing after a trip. No-op without a breaker.
    pub fn circuit_to_half(&self) {
        if self.meta.read().circuit_breaker.is_none() {
            return;
        }
        self.circuit.store(CIRCUIT_HALF, Ordering::SeqCst);
        tracing::warn!("server <{}> circuit change to half", self.id());
    }

    /// Probe succeeded: readmit traffic. Only valid from `Half`.
    pub fn circuit_to_open(&self) {
        if self.meta.read().circuit_breaker.is_none() {
            return;
        }
        if self
            .circuit
            .compare_exchange(
                CIRCUIT_HALF,
                CIRCUIT_OPEN,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            tracing::info!("server <{}> circuit change to open", self.id());
        }
    }

    pub(crate) fn mark_checking(&self) -> bool {
        !self.checking.swap(true, Ordering::SeqCst)
    }
}
