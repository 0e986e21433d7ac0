//! Entity Runtimes
//!
//! Derived per-entity state wrapping raw metadata: compiled patterns,
//! limiters, health counters, server sequences. Constructed by the
//! dispatcher from store snapshots and rebuilt on update events.

pub mod api;
pub mod cluster;
pub mod expr;
pub mod routing;
pub mod server;

pub use api::{ApiNode, ApiRuntime, ApiValidation, IpSegment};
pub use cluster::ClusterRuntime;
pub use expr::{condition_matches, param_value};
pub use routing::RoutingRuntime;
pub use server::ServerRuntime;
