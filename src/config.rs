use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Byte budget of the response cache
    pub cache_max_bytes: u64,
    /// Timeout of each health probe, seconds
    pub health_timeout_secs: u64,
    /// Consecutive probe failures before a server goes Down
    pub health_max_fails: u32,
    /// Optional JSON file seeding the in-memory store
    pub meta_path: Option<String>,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_max_bytes: 64 * 1024 * 1024,
            health_timeout_secs: 5,
            health_max_fails: 3,
            meta_path: None,
            debug: false,
        }
    }
}

pub fn load_config() -> anyhow::Result<Config> {
    let cache_max_bytes = std::env::var("APIGATE_CACHE_MAX_BYTES")
        .unwrap_or_else(|_| String::new())
        .parse()
        .unwrap_or(64 * 1024 * 1024);

    let health_timeout_secs = std::env::var("APIGATE_HEALTH_TIMEOUT_SECS")
        .unwrap_or_else(|_| "5".to_string())
        .parse()
        .unwrap_or(5);

    let health_max_fails = std::env::var("APIGATE_HEALTH_MAX_FAILS")
        .unwrap_or_else(|_| "3".to_string())
        .parse()
        .unwrap_or(3);

    let meta_path = std::env::var("APIGATE_META_PATH").ok();

    let debug = std::env::var("DEBUG").is_ok();

    Ok(Config {
        cache_max_bytes,
        health_timeout_secs,
        health_max_fails,
        meta_path,
        debug,
    })
}
