//! Caching Filter
//!
//! Opportunistic response cache keyed by a request fingerprint: the
//! request URI joined with the values of the node's cache-key parameters.
//! `pre` only attaches a hit to the context; the downstream handler
//! decides whether to serve it. `post` stores the encoded response and
//! schedules its eviction on the timer wheel.

use crate::domain::entities::Parameter;
use crate::domain::request::DispatchRequest;
use crate::filter::{Filter, FilterContext, Response, STATUS_OK};
use crate::infrastructure::{LruCache, TimerWheel};
use crate::runtime::{condition_matches, param_value};
use bytes::Bytes;
use std::sync::{Arc, Weak};
use std::time::Duration;

pub const FILTER_CACHING: &str = "CACHING";

/// Context attribute holding the cached value on a hit.
pub const ATTR_CACHE_HIT: &str = "cache_hit";

pub struct CachingFilter {
    tw: Arc<TimerWheel>,
    cache: Arc<LruCache>,
}

impl CachingFilter {
    pub fn new(max_bytes: u64, tw: Arc<TimerWheel>) -> Self {
        Self {
            tw,
            cache: Arc::new(LruCache::new(max_bytes)),
        }
    }

    pub fn cache(&self) -> &LruCache {
        &self.cache
    }

    /// The fingerprint for this request, or None when the node's cache
    /// conditions reject it (neither served nor stored).
    fn caching_id(ctx: &dyn FilterContext) -> Option<String> {
        let cache = ctx.dispatch_node().cache.as_ref()?;
        let req = ctx.forward_request();

        if !cache.conditions.iter().all(|c| condition_matches(c, req)) {
            return None;
        }

        Some(fingerprint(req, &cache.keys))
    }
}

impl Filter for CachingFilter {
    fn name(&self) -> &str {
        FILTER_CACHING
    }

    fn pre(&self, ctx: &mut dyn FilterContext) -> anyhow::Result<u16> {
        if ctx.dispatch_node().cache.is_none() {
            return Ok(STATUS_OK);
        }

        if let Some(id) = Self::caching_id(ctx) {
            if let Some(value) = self.cache.get(&id) {
                ctx.set_attr(ATTR_CACHE_HIT, value);
            }
        }

        Ok(STATUS_OK)
    }

    fn post(&self, ctx: &mut dyn FilterContext) -> anyhow::Result<u16> {
        let deadline = match ctx.dispatch_node().cache.as_ref() {
            Some(cache) => cache.deadline_secs,
            None => return Ok(STATUS_OK),
        };

        let id = match Self::caching_id(ctx) {
            Some(id) => id,
            None => return Ok(STATUS_OK),
        };

        let response = match ctx.response() {
            Some(response) => response,
            None => return Ok(STATUS_OK),
        };

        self.cache.add(
            id.clone(),
            gen_cached_value(response.content_type.as_bytes(), &response.body),
        );

        let cache: Weak<LruCache> = Arc::downgrade(&self.cache);
        self.tw
            .schedule(Duration::from_secs(deadline), move || {
                if let Some(cache) = cache.upgrade() {
                    cache.remove(&id);
                }
            });

        Ok(STATUS_OK)
    }
}

/// Build the cache key: the request URI, then each key parameter's value,
/// joined with `-`.
fn fingerprint(req: &DispatchRequest, keys: &[Parameter]) -> String {
    if keys.is_empty() {
        return req.uri().to_string();
    }

    let mut parts = Vec::with_capacity(keys.len() + 1);
    parts.push(req.uri().to_string());
    for key in keys {
        parts.push(param_value(key, req));
    }
    parts.join("-")
}

/// Encode a response for the cache: 4-byte big-endian content-type
/// length, content-type bytes, body bytes.
pub fn gen_cached_value(content_type: &[u8], body: &[u8]) -> Bytes {
    let mut data = Vec::with_capacity(4 + content_type.len() + body.len());
    data.extend_from_slice(&(content_type.len() as u32).to_be_bytes());
    data.extend_from_slice(content_type);
    data.extend_from_slice(body);
    Bytes::from(data)
}

/// Split an encoded cache value back into (content-type, body).
pub fn parse_cached_value(data: &Bytes) -> (Bytes, Bytes) {
    let size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    (data.slice(4..4 + size), data.slice(4 + size..))
}
