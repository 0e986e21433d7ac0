//! Health Probe
//!
//! Performs a single HTTP health check against a backend server. The
//! dispatcher owns the probe loop and the state transitions; this module
//! only knows how to ask a server whether it is alive.

use std::time::Duration;

/// Health checking configuration.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Timeout for each probe
    pub timeout: Duration,
    /// Consecutive failures before a server is marked Down
    pub max_failures: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_failures: 3,
        }
    }
}

/// HTTP GET prober with a shared client.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: reqwest::Client,
    config: HealthCheckConfig,
}

impl HealthProbe {
    pub fn new(config: HealthCheckConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn max_failures(&self) -> u32 {
        self.config.max_failures
    }

    /// Probe a check URL. Any non-2xx status or transport error is a
    /// failure.
    pub async fn probe(&self, url: &str) -> Result<(), String> {
        match self.client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(format!("unhealthy status: {}", resp.status())),
            Err(e) => Err(format!("request failed: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_config_default() {
        let config = HealthCheckConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_failures, 3);
    }

    #[tokio::test]
    async fn test_probe_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let probe = HealthProbe::new(HealthCheckConfig::default()).unwrap();
        let url = format!("{}/health", server.uri());
        assert!(probe.probe(&url).await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_unhealthy_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let probe = HealthProbe::new(HealthCheckConfig::default()).unwrap();
        let url = format!("{}/health", server.uri());
        let err = probe.probe(&url).await.unwrap_err();
        assert!(err.contains("503"));
    }

    #[tokio::test]
    async fn test_probe_connection_refused() {
        let probe = HealthProbe::new(HealthCheckConfig {
            timeout: Duration::from_millis(200),
            max_failures: 3,
        })
        .unwrap();

        let err = probe.probe("http://127.0.0.1:59999/health").await;
        assert!(err.is_err());
    }
}
