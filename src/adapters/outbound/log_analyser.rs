//! Log Analyser
//!
//! Analyser adapter that records targets and reports registrations via
//! tracing. Stands in for the external analysis pipeline in the default
//! wiring and in tests.

use crate::domain::ports::Analyser;
use dashmap::DashMap;
use std::time::Duration;

pub struct LogAnalyser {
    targets: DashMap<u64, Vec<Duration>>,
}

impl LogAnalyser {
    pub fn new() -> Self {
        Self {
            targets: DashMap::new(),
        }
    }

    /// Analysis periods registered for a server.
    pub fn periods(&self, server_id: u64) -> Vec<Duration> {
        self.targets
            .get(&server_id)
            .map(|p| p.value().clone())
            .unwrap_or_default()
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }
}

impl Default for LogAnalyser {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyser for LogAnalyser {
    fn add_target(&self, server_id: u64, period: Duration) {
        self.targets.entry(server_id).or_default().push(period);
        tracing::debug!("analysis target <{}> added, period {:?}", server_id, period);
    }

    fn remove_target(&self, server_id: u64) {
        self.targets.remove(&server_id);
        tracing::debug!("analysis target <{}> removed", server_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove_targets() {
        let analyser = LogAnalyser::new();

        analyser.add_target(1, Duration::from_secs(1));
        analyser.add_target(1, Duration::from_secs(5));
        assert_eq!(
            analyser.periods(1),
            vec![Duration::from_secs(1), Duration::from_secs(5)]
        );

        analyser.remove_target(1);
        assert!(analyser.periods(1).is_empty());
        assert_eq!(analyser.target_count(), 0);
    }
}
