//! apigate Library
//!
//! The dispatcher core of an API gateway: ingest live configuration from
//! a metadata store, keep a consistent in-memory model of the fleet, and
//! answer per-request dispatch decisions.

pub mod adapters;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod filter;
pub mod infrastructure;
pub mod runtime;

// Re-export commonly used types
pub use config::load_config;
pub use dispatcher::{DispatchError, DispatchResult, DispatchTarget, Dispatcher, EntityKind};
pub use domain::entities::{Api, Bind, CircuitStatus, Cluster, Proxy, Routing, Server, Status};
pub use domain::ports::{Analyser, Event, EventSource, EventType, MetaStore, MetaValue};
pub use domain::request::DispatchRequest;
pub use filter::{CachingFilter, Filter, FilterContext};
