//! Infrastructure Layer
//!
//! Cross-cutting components shared by the dispatcher and filters.

pub mod health_checker;
pub mod lru_cache;
pub mod rate_limiter;
pub mod timer_wheel;

pub use health_checker::{HealthCheckConfig, HealthProbe};
pub use lru_cache::LruCache;
pub use rate_limiter::QpsLimiter;
pub use timer_wheel::{TimerWheel, Timeout};
