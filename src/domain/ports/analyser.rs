//! Analyser Port
//!
//! Target registry of the external metrics analyser. Servers are
//! registered with one or more analysis periods; the analyser samples
//! request outcomes per target and period.

use std::time::Duration;

/// Registry of per-server analysis targets.
pub trait Analyser: Send + Sync {
    /// Start analysing a server over the given period. Registering the
    /// same server twice with different periods keeps both.
    fn add_target(&self, server_id: u64, period: Duration);

    /// Drop every analysis target for a server.
    fn remove_target(&self, server_id: u64);
}
