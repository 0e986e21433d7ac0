//! Match Engine
//!
//! Stateless predicates over requests: parameter extraction from the six
//! sources and comparator evaluation for routing, validation and cache
//! conditions.

use crate::domain::entities::{Cmp, Condition, ParamSource, Parameter};
use crate::domain::request::DispatchRequest;
use regex::Regex;

/// Extract a parameter value from a request. Missing values come back as
/// the empty string.
pub fn param_value(param: &Parameter, req: &DispatchRequest) -> String {
    match param.source {
        ParamSource::QueryString => req.query_value(&param.name).unwrap_or_default(),
        ParamSource::FormData => req.form_value(&param.name).unwrap_or_default(),
        ParamSource::JsonBody => json_body_value(&param.name, req.body()),
        ParamSource::Header => req.header_value(&param.name).unwrap_or_default(),
        ParamSource::Cookie => req.cookie_value(&param.name).unwrap_or_default(),
        ParamSource::PathValue => req.path_value(param.index as usize).unwrap_or_default(),
    }
}

/// Navigate a dotted path into a JSON body. Non-string leaves are
/// rendered with their JSON representation.
fn json_body_value(path: &str, body: &[u8]) -> String {
    let root: serde_json::Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(_) => return String::new(),
    };

    let mut current = &root;
    for segment in path.split('.') {
        current = match current.get(segment) {
            Some(v) => v,
            None => return String::new(),
        };
    }

    match current {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Evaluate one condition. A missing parameter value fails the condition.
pub fn condition_matches(cond: &Condition, req: &DispatchRequest) -> bool {
    let value = param_value(&cond.parameter, req);
    if value.is_empty() {
        return false;
    }

    match cond.cmp {
        Cmp::Eq => value == cond.expect,
        Cmp::Lt => int_cmp(&value, &cond.expect, |a, b| a < b),
        Cmp::Le => int_cmp(&value, &cond.expect, |a, b| a <= b),
        Cmp::Gt => int_cmp(&value, &cond.expect, |a, b| a > b),
        Cmp::Ge => int_cmp(&value, &cond.expect, |a, b| a >= b),
        Cmp::In => cond.expect.contains(&value),
        Cmp::Match => Regex::new(&cond.expect)
            .map(|re| re.is_match(&value))
            .unwrap_or(false),
    }
}

/// Numeric comparison; false when either side fails to parse.
fn int_cmp<F>(actual: &str, expect: &str, f: F) -> bool
where
    F: Fn(i64, i64) -> bool,
{
    match (actual.parse::<i64>(), expect.parse::<i64>()) {
        (Ok(a), Ok(b)) => f(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn param(source: ParamSource, name: &str) -> Parameter {
        Parameter {
            name: name.to_string(),
            source,
            index: 0,
        }
    }

    fn cond(source: ParamSource, name: &str, cmp: Cmp, expect: &str) -> Condition {
        Condition {
            parameter: param(source, name),
            cmp,
            expect: expect.to_string(),
        }
    }

    #[test]
    fn test_param_value_all_sources() {
        let req = DispatchRequest::new(Method::POST, "/api/v1/users?page=2")
            .with_header("x-tenant", "gold")
            .with_header("cookie", "session=s1")
            .with_body(r#"{"user": {"name": "alice"}}"#);

        assert_eq!(
            param_value(&param(ParamSource::QueryString, "page"), &req),
            "2"
        );
        assert_eq!(
            param_value(&param(ParamSource::Header, "x-tenant"), &req),
            "gold"
        );
        assert_eq!(
            param_value(&param(ParamSource::Cookie, "session"), &req),
            "s1"
        );
        assert_eq!(
            param_value(&param(ParamSource::JsonBody, "user.name"), &req),
            "alice"
        );

        let seg = Parameter {
            name: String::new(),
            source: ParamSource::PathValue,
            index: 2,
        };
        assert_eq!(param_value(&seg, &req), "users");
    }

    #[test]
    fn test_param_value_form_data() {
        let req = DispatchRequest::new(Method::POST, "/submit").with_body("tier=silver");
        assert_eq!(
            param_value(&param(ParamSource::FormData, "tier"), &req),
            "silver"
        );
    }

    #[test]
    fn test_json_body_non_string_leaf() {
        let req = DispatchRequest::new(Method::POST, "/").with_body(r#"{"count": 42}"#);
        assert_eq!(param_value(&param(ParamSource::JsonBody, "count"), &req), "42");
    }

    #[test]
    fn test_json_body_missing_path_or_invalid_json() {
        let req = DispatchRequest::new(Method::POST, "/").with_body(r#"{"a": 1}"#);
        assert_eq!(param_value(&param(ParamSource::JsonBody, "b.c"), &req), "");

        let bad = DispatchRequest::new(Method::POST, "/").with_body("not json");
        assert_eq!(param_value(&param(ParamSource::JsonBody, "a"), &bad), "");
    }

    #[test]
    fn test_condition_eq() {
        let req = DispatchRequest::new(Method::GET, "/").with_header("x-tenant", "gold");
        assert!(condition_matches(
            &cond(ParamSource::Header, "x-tenant", Cmp::Eq, "gold"),
            &req
        ));
        assert!(!condition_matches(
            &cond(ParamSource::Header, "x-tenant", Cmp::Eq, "silver"),
            &req
        ));
    }

    #[test]
    fn test_condition_missing_value_fails() {
        let req = DispatchRequest::new(Method::GET, "/");
        assert!(!condition_matches(
            &cond(ParamSource::Header, "x-absent", Cmp::Eq, ""),
            &req
        ));
    }

    #[test]
    fn test_condition_numeric_comparators() {
        let req = DispatchRequest::new(Method::GET, "/?age=30");

        assert!(condition_matches(
            &cond(ParamSource::QueryString, "age", Cmp::Lt, "40"),
            &req
        ));
        assert!(condition_matches(
            &cond(ParamSource::QueryString, "age", Cmp::Le, "30"),
            &req
        ));
        assert!(condition_matches(
            &cond(ParamSource::QueryString, "age", Cmp::Gt, "20"),
            &req
        ));
        assert!(condition_matches(
            &cond(ParamSource::QueryString, "age", Cmp::Ge, "30"),
            &req
        ));
        assert!(!condition_matches(
            &cond(ParamSource::QueryString, "age", Cmp::Gt, "30"),
            &req
        ));
    }

    #[test]
    fn test_condition_numeric_parse_failure() {
        let req = DispatchRequest::new(Method::GET, "/?age=unknown");
        assert!(!condition_matches(
            &cond(ParamSource::QueryString, "age", Cmp::Lt, "40"),
            &req
        ));

        let req = DispatchRequest::new(Method::GET, "/?age=30");
        assert!(!condition_matches(
            &cond(ParamSource::QueryString, "age", Cmp::Lt, "forty"),
            &req
        ));
    }

    #[test]
    fn test_condition_in_is_substring_of_expect() {
        let req = DispatchRequest::new(Method::GET, "/?env=prod");
        assert!(condition_matches(
            &cond(ParamSource::QueryString, "env", Cmp::In, "dev,prod,staging"),
            &req
        ));
        assert!(!condition_matches(
            &cond(ParamSource::QueryString, "env", Cmp::In, "dev,staging"),
            &req
        ));
    }

    #[test]
    fn test_condition_match_regex() {
        let req = DispatchRequest::new(Method::GET, "/?version=v12");
        assert!(condition_matches(
            &cond(ParamSource::QueryString, "version", Cmp::Match, r"^v\d+$"),
            &req
        ));
        assert!(!condition_matches(
            &cond(ParamSource::QueryString, "version", Cmp::Match, r"^\d+$"),
            &req
        ));
    }
}
