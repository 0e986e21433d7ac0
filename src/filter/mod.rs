//! Filter Layer
//!
//! The request pipeline runs every filter's `pre` before forwarding and
//! `post` after the backend answers. Filters communicate with the ingress
//! through attributes on the per-request context.

pub mod caching;

pub use caching::{gen_cached_value, parse_cached_value, CachingFilter, ATTR_CACHE_HIT};

use crate::domain::entities::DispatchNode;
use crate::domain::request::DispatchRequest;
use bytes::Bytes;
use std::collections::HashMap;

/// Status a filter returns when it has nothing to say.
pub const STATUS_OK: u16 = 200;

/// A backend response as the filter chain sees it.
#[derive(Debug, Clone)]
pub struct Response {
    pub content_type: String,
    pub body: Bytes,
}

/// Per-request state shared along the filter chain.
pub trait FilterContext {
    /// The request about to be (or already) forwarded.
    fn forward_request(&self) -> &DispatchRequest;

    /// The dispatch node this request was routed to.
    fn dispatch_node(&self) -> &DispatchNode;

    /// The backend response; only present during `post`.
    fn response(&self) -> Option<&Response>;

    fn set_attr(&mut self, key: &str, value: Bytes);

    fn attr(&self, key: &str) -> Option<&Bytes>;
}

/// One stage of the request pipeline.
///
/// Both hooks return a status code; an error aborts the request with that
/// status. The defaults pass the request through untouched.
pub trait Filter: Send + Sync {
    fn name(&self) -> &str;

    fn pre(&self, _ctx: &mut dyn FilterContext) -> anyhow::Result<u16> {
        Ok(STATUS_OK)
    }

    fn post(&self, _ctx: &mut dyn FilterContext) -> anyhow::Result<u16> {
        Ok(STATUS_OK)
    }
}

/// Plain context implementation used by the ingress and tests.
pub struct RequestContext {
    request: DispatchRequest,
    node: DispatchNode,
    response: Option<Response>,
    attrs: HashMap<String, Bytes>,
}

impl RequestContext {
    pub fn new(request: DispatchRequest, node: DispatchNode) -> Self {
        Self {
            request,
            node,
            response: None,
            attrs: HashMap::new(),
        }
    }

    /// Attach the backend response before running the `post` chain.
    pub fn set_response(&mut self, response: Response) {
        self.response = Some(response);
    }
}

impl FilterContext for RequestContext {
    fn forward_request(&self) -> &DispatchRequest {
        &self.request
    }

    fn dispatch_node(&self) -> &DispatchNode {
        &self.node
    }

    fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    fn set_attr(&mut self, key: &str, value: Bytes) {
        self.attrs.insert(key.to_string(), value);
    }

    fn attr(&self, key: &str) -> Option<&Bytes> {
        self.attrs.get(key)
    }
}
