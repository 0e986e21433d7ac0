//! Health-check loop.
//!
//! Every registered server gets a probe cycle scheduled on the timer
//! wheel at the server's current check interval, which stretches while
//! probes keep failing. Probe outcomes drive server status, cluster
//! membership and the circuit gate. Timers hold weak references and go
//! quiet once the server or the dispatcher is gone.

use super::Dispatcher;
use crate::domain::entities::{CircuitStatus, Status};
use crate::runtime::ServerRuntime;
use std::sync::Arc;

impl Dispatcher {
    /// Enqueue a server for health checking. Idempotent: a runtime is
    /// only ever driven by one probe cycle.
    pub(crate) fn add_to_check(&self, server: Arc<ServerRuntime>) {
        if !server.mark_checking() {
            return;
        }
        self.schedule_check(server);
    }

    fn schedule_check(&self, server: Arc<ServerRuntime>) {
        let dispatcher = self.weak.clone();
        let target = Arc::downgrade(&server);

        self.tw.schedule(server.check_interval(), move || {
            if let (Some(dispatcher), Some(server)) = (dispatcher.upgrade(), target.upgrade()) {
                tokio::spawn(async move {
                    dispatcher.check(server).await;
                });
            }
        });
    }

    async fn check(&self, server: Arc<ServerRuntime>) {
        // The runtime may have been removed or replaced since the probe
        // was scheduled; a stale cycle just stops.
        let registered = self
            .state
            .read()
            .servers
            .get(&server.id())
            .map(|current| Arc::ptr_eq(current, &server))
            .unwrap_or(false);
        if !registered {
            tracing::debug!("server <{}> no longer checked", server.id());
            return;
        }

        let url = server.check_url();
        match self.probe.probe(&url).await {
            Ok(()) => self.on_check_success(&server),
            Err(e) => self.on_check_fail(&server, &e),
        }

        self.schedule_check(server);
    }

    fn on_check_success(&self, server: &Arc<ServerRuntime>) {
        if server.status() == Status::Down {
            server.change_to(Status::Up);
            tracing::info!("server <{}> is up", server.id());

            let state = self.state.read();
            if let Some(clusters) = state.binds.get(&server.id()) {
                for cluster in clusters.values() {
                    cluster.add(server.id());
                }
            }
        }

        server.reset();

        if server.is_circuit(CircuitStatus::Half) {
            server.circuit_to_open();
        }
    }

    fn on_check_fail(&self, server: &Arc<ServerRuntime>, error: &str) {
        server.fail();
        tracing::warn!(
            "server <{}> check failed ({} times): {}",
            server.id(),
            server.fail_count(),
            error
        );

        if server.fail_count() < self.probe.max_failures() {
            return;
        }

        if server.status() == Status::Up {
            server.change_to(Status::Down);
            tracing::warn!("server <{}> is down", server.id());

            let state = self.state.read();
            if let Some(clusters) = state.binds.get(&server.id()) {
                for cluster in clusters.values() {
                    cluster.remove(server.id());
                }
            }
        }

        server.circuit_to_close(&self.tw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::outbound::{LogAnalyser, MemStore};
    use crate::domain::entities::{
        Bind, CircuitBreaker, Cluster, HealthCheck, LbStrategy, Protocol, Server,
    };
    use crate::infrastructure::HealthCheckConfig;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn dispatcher() -> Arc<Dispatcher> {
        Dispatcher::new(
            Arc::new(MemStore::new()),
            Arc::new(LogAnalyser::new()),
            HealthCheckConfig {
                timeout: Duration::from_millis(500),
                max_failures: 2,
            },
        )
        .unwrap()
    }

    fn server_meta(id: u64, addr: String) -> Server {
        Server {
            id,
            protocol: Protocol::Http,
            addr,
            health_check: HealthCheck {
                path: "/health".to_string(),
                check_interval_secs: 0,
            },
            max_qps: 100,
            circuit_breaker: Some(CircuitBreaker {
                close_timeout_secs: 60,
                rate_check_period_secs: 1,
            }),
        }
    }

    #[tokio::test]
    async fn test_probe_success_promotes_to_up_and_joins_clusters() {
        let backend = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&backend)
            .await;

        let d = dispatcher();
        d.add_cluster(Cluster {
            id: 1,
            name: "c1".to_string(),
            load_balance: LbStrategy::RoundRobin,
        })
        .unwrap();

        let addr = backend.uri().trim_start_matches("http://").to_string();
        d.add_server(server_meta(10, addr)).unwrap();
        d.add_bind(Bind {
            cluster_id: 1,
            server_id: 10,
        })
        .unwrap();

        // Down on arrival, so the cluster sequence stays empty
        assert!(d.cluster(1).unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(300)).await;

        let server = d.server(10).unwrap();
        assert_eq!(server.status(), Status::Up);
        assert_eq!(d.cluster(1).unwrap().servers(), vec![10]);
    }

    #[tokio::test]
    async fn test_probe_failures_demote_and_trip_circuit() {
        let backend = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&backend)
            .await;

        let d = dispatcher();
        d.add_cluster(Cluster {
            id: 1,
            name: "c1".to_string(),
            load_balance: LbStrategy::RoundRobin,
        })
        .unwrap();

        let addr = backend.uri().trim_start_matches("http://").to_string();
        d.add_server(server_meta(10, addr)).unwrap();
        d.add_bind(Bind {
            cluster_id: 1,
            server_id: 10,
        })
        .unwrap();

        // Simulate a previously healthy server
        let server = d.server(10).unwrap();
        server.change_to(Status::Up);
        d.cluster(1).unwrap().add(10);

        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(server.status(), Status::Down);
        assert!(d.cluster(1).unwrap().is_empty());
        assert_eq!(server.circuit(), CircuitStatus::Close);
    }

    #[tokio::test]
    async fn test_removed_server_stops_probing() {
        let backend = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0..)
            .mount(&backend)
            .await;

        let d = dispatcher();
        let addr = backend.uri().trim_start_matches("http://").to_string();
        d.add_server(server_meta(10, addr)).unwrap();

        let server = d.server(10).unwrap();
        d.remove_server(10).unwrap();
        drop(server);

        // Probe cycle notices the removal and winds down without panicking
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(d.server(10).is_none());
    }
}
