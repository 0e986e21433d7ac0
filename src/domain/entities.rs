//! Domain Entities - Gateway metadata model
//!
//! Plain metadata snapshots as delivered by the external store. The wire
//! schema (protobuf) lives outside this crate; these structs reproduce its
//! field semantics. Runtime state derived from them (compiled patterns,
//! limiters, health counters) lives in the `runtime` module.

use serde::{Deserialize, Serialize};

/// Availability of a server or API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Up,
    Down,
}

impl Status {
    pub fn is_up(&self) -> bool {
        matches!(self, Status::Up)
    }
}

/// Per-server circuit gate.
///
/// Terminology is inverted relative to the usual breaker naming and must
/// stay that way for metadata compatibility: `Open` admits traffic,
/// `Close` blocks it, `Half` probes after a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitStatus {
    Open,
    Half,
    Close,
}

/// Condition comparator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cmp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Match,
}

/// Where a parameter is extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamSource {
    QueryString,
    FormData,
    JsonBody,
    Header,
    Cookie,
    PathValue,
}

/// Load-balance strategy of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LbStrategy {
    RoundRobin,
    Random,
}

impl Default for LbStrategy {
    fn default() -> Self {
        LbStrategy::RoundRobin
    }
}

/// What a matching routing does with the traffic share it claims.
///
/// `Split` diverts the request to the routing's cluster; `Copy` mirrors it
/// there while the original target still serves the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingStrategy {
    Copy,
    Split,
}

/// Backend protocol used for forwarding and health probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Http
    }
}

/// A peer gateway instance. Live proxies divide every server's QPS ceiling
/// among themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proxy {
    /// Listen address of the peer, also its registry key
    pub addr: String,
}

/// A named pool of interchangeable backend servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    /// Strategy used to pick a server from the bound set
    #[serde(default)]
    pub load_balance: LbStrategy,
}

/// Health probe settings for a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Probe path, appended to the server address
    pub path: String,
    /// Base interval between probes, in seconds
    pub check_interval_secs: u64,
}

/// Circuit-breaker settings for a server. Absent means the circuit never
/// trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreaker {
    /// How long a tripped circuit stays closed before probing, in seconds
    pub close_timeout_secs: u64,
    /// Analysis window for the failure-rate target, in seconds
    pub rate_check_period_secs: u64,
}

/// A concrete backend endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: u64,
    #[serde(default)]
    pub protocol: Protocol,
    /// host:port the backend listens on
    pub addr: String,
    pub health_check: HealthCheck,
    /// Absolute QPS ceiling for this server across the whole proxy fleet
    pub max_qps: u64,
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreaker>,
}

/// A (cluster, server) membership relation. Existence of the pair is the
/// entire state; binds have no attributes of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bind {
    pub cluster_id: u64,
    pub server_id: u64,
}

/// A parameter specification: which value to pull out of a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    /// Name to look up; for `JsonBody` a dotted path into the body
    #[serde(default)]
    pub name: String,
    pub source: ParamSource,
    /// Path segment index, only meaningful for `PathValue`
    #[serde(default)]
    pub index: u32,
}

/// A compiled-at-runtime validation rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Regular expression the extracted value must match
    pub expression: String,
}

/// Validation of one request parameter on a dispatch node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validation {
    pub parameter: Parameter,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// A condition over an extracted parameter value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub parameter: Parameter,
    pub cmp: Cmp,
    pub expect: String,
}

/// Response-cache settings of a dispatch node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSpec {
    /// Parameters appended to the request URI to form the cache key
    #[serde(default)]
    pub keys: Vec<Parameter>,
    /// Seconds a cached response stays servable
    pub deadline_secs: u64,
    /// All conditions must hold for the request to use the cache at all
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// One forwarding target within an API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchNode {
    pub cluster_id: u64,
    /// Rewrite template applied through the API's URL pattern; empty
    /// disables rewriting
    #[serde(default)]
    pub url_rewrite: String,
    #[serde(default)]
    pub cache: Option<CacheSpec>,
    #[serde(default)]
    pub validations: Vec<Validation>,
}

/// A name/value pair used for default cookies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairValue {
    pub name: String,
    pub value: String,
}

/// Values attached to responses when the backend supplies none.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultValue {
    #[serde(default)]
    pub cookies: Vec<PairValue>,
}

/// IP access control lists. Entries are dotted segments where `*` matches
/// any octet, e.g. `10.0.*.*`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpAccessControl {
    #[serde(default)]
    pub whitelist: Vec<String>,
    #[serde(default)]
    pub blacklist: Vec<String>,
}

/// A matchable inbound route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Api {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    /// Regex matched against the request URI; empty means domain-only
    #[serde(default)]
    pub url_pattern: String,
    /// HTTP verb, or `*` for any
    #[serde(default = "any_method")]
    pub method: String,
    /// Exact Host match; empty disables domain matching
    #[serde(default)]
    pub domain: String,
    pub status: Status,
    #[serde(default)]
    pub nodes: Vec<DispatchNode>,
    #[serde(default)]
    pub default_value: Option<DefaultValue>,
    #[serde(default)]
    pub ip_access_control: Option<IpAccessControl>,
}

fn any_method() -> String {
    "*".to_string()
}

/// A conditional traffic-split rule applied after API match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Routing {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    /// Destination cluster for the claimed traffic share
    pub cluster_id: u64,
    /// Only applies to this API; 0 matches any API
    #[serde(default)]
    pub api: u64,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Percentage of matching requests claimed, 0-100
    pub traffic_rate: u32,
    pub strategy: RoutingStrategy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_up() {
        assert!(Status::Up.is_up());
        assert!(!Status::Down.is_up());
    }

    #[test]
    fn test_protocol_scheme() {
        assert_eq!(Protocol::Http.scheme(), "http");
        assert_eq!(Protocol::Https.scheme(), "https");
    }

    #[test]
    fn test_server_json_round_trip() {
        let server = Server {
            id: 7,
            protocol: Protocol::Http,
            addr: "10.0.0.1:9090".to_string(),
            health_check: HealthCheck {
                path: "/health".to_string(),
                check_interval_secs: 10,
            },
            max_qps: 1000,
            circuit_breaker: Some(CircuitBreaker {
                close_timeout_secs: 30,
                rate_check_period_secs: 5,
            }),
        };

        let encoded = serde_json::to_string(&server).unwrap();
        let decoded: Server = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.addr, "10.0.0.1:9090");
        assert_eq!(decoded.max_qps, 1000);
        assert!(decoded.circuit_breaker.is_some());
    }

    #[test]
    fn test_api_defaults_from_sparse_json() {
        let api: Api =
            serde_json::from_str(r#"{"id": 1, "url_pattern": "^/users", "status": "Up"}"#).unwrap();

        assert_eq!(api.method, "*");
        assert_eq!(api.domain, "");
        assert!(api.nodes.is_empty());
        assert!(api.ip_access_control.is_none());
    }

    #[test]
    fn test_bind_equality() {
        let a = Bind {
            cluster_id: 1,
            server_id: 2,
        };
        let b = Bind {
            cluster_id: 1,
            server_id: 2,
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_cluster_default_strategy() {
        let cluster: Cluster = serde_json::from_str(r#"{"id": 3}"#).unwrap();
        assert_eq!(cluster.load_balance, LbStrategy::RoundRobin);
    }
}
