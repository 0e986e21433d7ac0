//! API Runtime
//!
//! A route's derived state: compiled URL pattern, per-node validation
//! rules, parsed IP access lists and materialized default cookies. All
//! compilation happens eagerly when the runtime is (re)built from
//! metadata; request workers only run compiled artifacts.
//!
//! Metadata is operator-supplied and expected valid: an invalid regex
//! panics at construction.

use crate::domain::entities::{Api, DispatchNode, PairValue, Validation};
use crate::domain::request::DispatchRequest;
use crate::runtime::expr::param_value;
use regex::Regex;

/// One entry of an IP access list: dotted tokens where `*` matches any
/// octet.
#[derive(Debug, Clone)]
pub struct IpSegment {
    tokens: Vec<String>,
}

impl IpSegment {
    pub fn parse_from(value: &str) -> Self {
        Self {
            tokens: value.split('.').map(|t| t.to_string()).collect(),
        }
    }

    pub fn matches(&self, ip: &str) -> bool {
        let actual: Vec<&str> = ip.split('.').collect();

        for (index, token) in self.tokens.iter().enumerate() {
            if token == "*" {
                continue;
            }
            match actual.get(index) {
                Some(part) if *part == token => {}
                _ => return false,
            }
        }

        true
    }
}

struct ApiRule {
    pattern: Regex,
}

impl ApiRule {
    fn validate(&self, value: &str) -> bool {
        self.pattern.is_match(value)
    }
}

/// A compiled validation of one parameter.
pub struct ApiValidation {
    meta: Validation,
    rules: Vec<ApiRule>,
}

impl ApiValidation {
    fn new(meta: Validation) -> Self {
        let rules = meta
            .rules
            .iter()
            .map(|r| ApiRule {
                pattern: Regex::new(&r.expression).expect("invalid validation rule expression"),
            })
            .collect();
        Self { meta, rules }
    }

    pub fn validate(&self, req: &DispatchRequest) -> bool {
        if self.rules.is_empty() && !self.meta.required {
            return true;
        }

        let value = param_value(&self.meta.parameter, req);
        if value.is_empty() {
            return !self.meta.required;
        }

        self.rules.iter().all(|r| r.validate(&value))
    }
}

/// A dispatch node with its compiled validations.
pub struct ApiNode {
    meta: DispatchNode,
    validations: Vec<ApiValidation>,
}

impl ApiNode {
    fn new(meta: DispatchNode) -> Self {
        let validations = meta
            .validations
            .iter()
            .cloned()
            .map(ApiValidation::new)
            .collect();
        Self { meta, validations }
    }

    pub fn meta(&self) -> &DispatchNode {
        &self.meta
    }

    pub fn cluster_id(&self) -> u64 {
        self.meta.cluster_id
    }

    /// All validations must pass; a node without validations passes.
    pub fn validate(&self, req: &DispatchRequest) -> bool {
        self.validations.iter().all(|v| v.validate(req))
    }
}

pub struct ApiRuntime {
    meta: Api,
    nodes: Vec<ApiNode>,
    url_pattern: Option<Regex>,
    default_cookies: Vec<PairValue>,
    parsed_whitelist: Vec<IpSegment>,
    parsed_blacklist: Vec<IpSegment>,
}

impl ApiRuntime {
    pub fn new(meta: Api) -> Self {
        let url_pattern = if meta.url_pattern.is_empty() {
            None
        } else {
            Some(Regex::new(&meta.url_pattern).expect("invalid API url pattern"))
        };

        let nodes = meta.nodes.iter().cloned().map(ApiNode::new).collect();

        let default_cookies = meta
            .default_value
            .as_ref()
            .map(|dv| dv.cookies.clone())
            .unwrap_or_default();

        let (parsed_whitelist, parsed_blacklist) = match &meta.ip_access_control {
            Some(acl) => (
                acl.whitelist.iter().map(|s| IpSegment::parse_from(s)).collect(),
                acl.blacklist.iter().map(|s| IpSegment::parse_from(s)).collect(),
            ),
            None => (Vec::new(), Vec::new()),
        };

        Self {
            meta,
            nodes,
            url_pattern,
            default_cookies,
            parsed_whitelist,
            parsed_blacklist,
        }
    }

    pub fn id(&self) -> u64 {
        self.meta.id
    }

    pub fn meta(&self) -> &Api {
        &self.meta
    }

    pub fn nodes(&self) -> &[ApiNode] {
        &self.nodes
    }

    pub fn default_cookies(&self) -> &[PairValue] {
        &self.default_cookies
    }

    /// A request matches when the API is Up and either the domain matches
    /// exactly or both method and URI match.
    pub fn matches(&self, req: &DispatchRequest) -> bool {
        self.is_up() && (self.is_domain_match(req) || (self.is_method_match(req) && self.is_uri_match(req)))
    }

    fn is_up(&self) -> bool {
        self.meta.status.is_up()
    }

    fn is_method_match(&self, req: &DispatchRequest) -> bool {
        self.meta.method == "*" || req.method().as_str() == self.meta.method
    }

    fn is_uri_match(&self, req: &DispatchRequest) -> bool {
        match &self.url_pattern {
            Some(pattern) => pattern.is_match(req.uri()),
            None => false,
        }
    }

    fn is_domain_match(&self, req: &DispatchRequest) -> bool {
        !self.meta.domain.is_empty() && req.host() == self.meta.domain
    }

    /// True when no blacklist entry covers the ip.
    pub fn allow_with_blacklist(&self, ip: &str) -> bool {
        !self.parsed_blacklist.iter().any(|seg| seg.matches(ip))
    }

    /// True when the whitelist is empty or some entry covers the ip.
    pub fn allow_with_whitelist(&self, ip: &str) -> bool {
        if self.meta.ip_access_control.is_none() || self.parsed_whitelist.is_empty() {
            return true;
        }
        self.parsed_whitelist.iter().any(|seg| seg.matches(ip))
    }

    /// Combined ACL verdict used by the dispatch path.
    pub fn access_allowed(&self, ip: &str) -> bool {
        self.allow_with_whitelist(ip) && self.allow_with_blacklist(ip)
    }

    /// Regex-replace the request URI through the API pattern. Empty when
    /// either the template or the pattern is missing.
    pub fn rewrite_url(&self, req: &DispatchRequest, rewrite: &str) -> String {
        match &self.url_pattern {
            Some(pattern) if !rewrite.is_empty() => {
                pattern.replace_all(req.uri(), rewrite).into_owned()
            }
            _ => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{
        Cmp, Condition, IpAccessControl, ParamSource, Parameter, Rule, Status,
    };
    use http::Method;

    fn api(id: u64) -> Api {
        Api {
            id,
            name: format!("api-{}", id),
            url_pattern: r"^/users/(\d+)$".to_string(),
            method: "GET".to_string(),
            domain: "api.example.com".to_string(),
            status: Status::Up,
            nodes: vec![],
            default_value: None,
            ip_access_control: None,
        }
    }

    #[test]
    fn test_matches_method_and_uri() {
        let rt = ApiRuntime::new(api(1));
        let req = DispatchRequest::new(Method::GET, "/users/42").with_host("other.com");
        assert!(rt.matches(&req));
    }

    #[test]
    fn test_matches_domain_alone() {
        let rt = ApiRuntime::new(api(1));
        // wrong method+uri but the Host matches exactly
        let req = DispatchRequest::new(Method::POST, "/nope").with_host("api.example.com");
        assert!(rt.matches(&req));
    }

    #[test]
    fn test_no_match_when_both_fail() {
        let rt = ApiRuntime::new(api(1));
        let req = DispatchRequest::new(Method::POST, "/users/42").with_host("other.com");
        assert!(!rt.matches(&req));
    }

    #[test]
    fn test_down_api_never_matches() {
        let mut meta = api(1);
        meta.status = Status::Down;
        let rt = ApiRuntime::new(meta);

        let req = DispatchRequest::new(Method::GET, "/users/42").with_host("api.example.com");
        assert!(!rt.matches(&req));
    }

    #[test]
    fn test_wildcard_method() {
        let mut meta = api(1);
        meta.method = "*".to_string();
        meta.domain = String::new();
        let rt = ApiRuntime::new(meta);

        assert!(rt.matches(&DispatchRequest::new(Method::DELETE, "/users/7")));
    }

    #[test]
    fn test_empty_pattern_is_domain_only() {
        let mut meta = api(1);
        meta.url_pattern = String::new();
        let rt = ApiRuntime::new(meta);

        let on_domain = DispatchRequest::new(Method::GET, "/anything").with_host("api.example.com");
        assert!(rt.matches(&on_domain));

        let off_domain = DispatchRequest::new(Method::GET, "/anything").with_host("other.com");
        assert!(!rt.matches(&off_domain));
    }

    #[test]
    fn test_ip_segment_wildcards() {
        let seg = IpSegment::parse_from("10.0.*.*");
        assert!(seg.matches("10.0.3.7"));
        assert!(seg.matches("10.0.255.1"));
        assert!(!seg.matches("10.1.3.7"));
        assert!(!seg.matches("11.0.0.1"));
    }

    #[test]
    fn test_acl_whitelist_and_blacklist() {
        let mut meta = api(1);
        meta.ip_access_control = Some(IpAccessControl {
            whitelist: vec!["10.0.*.*".to_string()],
            blacklist: vec!["10.0.5.*".to_string()],
        });
        let rt = ApiRuntime::new(meta);

        assert!(rt.access_allowed("10.0.3.7"));
        assert!(!rt.access_allowed("10.0.5.7")); // blacklisted
        assert!(!rt.access_allowed("11.0.0.1")); // not whitelisted
    }

    #[test]
    fn test_acl_absent_allows_everything() {
        let rt = ApiRuntime::new(api(1));
        assert!(rt.access_allowed("203.0.113.9"));
    }

    #[test]
    fn test_rewrite_url() {
        let rt = ApiRuntime::new(api(1));
        let req = DispatchRequest::new(Method::GET, "/users/42");

        assert_eq!(rt.rewrite_url(&req, "/v2/accounts/$1"), "/v2/accounts/42");
        assert_eq!(rt.rewrite_url(&req, ""), "");
    }

    #[test]
    fn test_rewrite_url_without_pattern() {
        let mut meta = api(1);
        meta.url_pattern = String::new();
        let rt = ApiRuntime::new(meta);

        let req = DispatchRequest::new(Method::GET, "/users/42");
        assert_eq!(rt.rewrite_url(&req, "/v2/$1"), "");
    }

    fn validation(name: &str, required: bool, expr: Option<&str>) -> Validation {
        Validation {
            parameter: Parameter {
                name: name.to_string(),
                source: ParamSource::QueryString,
                index: 0,
            },
            required,
            rules: expr
                .map(|e| {
                    vec![Rule {
                        expression: e.to_string(),
                    }]
                })
                .unwrap_or_default(),
        }
    }

    #[test]
    fn test_node_validation() {
        let mut meta = api(1);
        meta.nodes = vec![DispatchNode {
            cluster_id: 5,
            url_rewrite: String::new(),
            cache: None,
            validations: vec![validation("id", true, Some(r"^\d+$"))],
        }];
        let rt = ApiRuntime::new(meta);
        let node = &rt.nodes()[0];

        assert!(node.validate(&DispatchRequest::new(Method::GET, "/users/1?id=42")));
        assert!(!node.validate(&DispatchRequest::new(Method::GET, "/users/1?id=abc")));
        // required but missing
        assert!(!node.validate(&DispatchRequest::new(Method::GET, "/users/1")));
    }

    #[test]
    fn test_optional_validation_passes_when_missing() {
        let v = ApiValidation::new(validation("tag", false, Some(r"^[a-z]+$")));

        assert!(v.validate(&DispatchRequest::new(Method::GET, "/")));
        assert!(v.validate(&DispatchRequest::new(Method::GET, "/?tag=abc")));
        assert!(!v.validate(&DispatchRequest::new(Method::GET, "/?tag=ABC")));
    }

    #[test]
    fn test_default_cookies_materialized() {
        let mut meta = api(1);
        meta.default_value = Some(crate::domain::entities::DefaultValue {
            cookies: vec![PairValue {
                name: "lang".to_string(),
                value: "en".to_string(),
            }],
        });
        let rt = ApiRuntime::new(meta);

        assert_eq!(rt.default_cookies().len(), 1);
        assert_eq!(rt.default_cookies()[0].name, "lang");
    }

    #[test]
    #[should_panic]
    fn test_invalid_pattern_panics() {
        let mut meta = api(1);
        meta.url_pattern = "(".to_string();
        let _ = ApiRuntime::new(meta);
    }

    #[test]
    fn test_cache_conditions_are_carried() {
        let mut meta = api(1);
        meta.nodes = vec![DispatchNode {
            cluster_id: 5,
            url_rewrite: String::new(),
            cache: Some(crate::domain::entities::CacheSpec {
                keys: vec![],
                deadline_secs: 2,
                conditions: vec![Condition {
                    parameter: Parameter {
                        name: "q".to_string(),
                        source: ParamSource::QueryString,
                        index: 0,
                    },
                    cmp: Cmp::Eq,
                    expect: "cat".to_string(),
                }],
            }),
            validations: vec![],
        }];
        let rt = ApiRuntime::new(meta);

        let cache = rt.nodes()[0].meta().cache.as_ref().unwrap();
        assert_eq!(cache.deadline_secs, 2);
        assert_eq!(cache.conditions.len(), 1);
    }
}
