//! Environment/file-based configuration, following the teacher's
//! `ShipperConfig::from_env` / `with_overrides` pattern: every field has a
//! hardcoded default, an optional environment variable override, and an
//! optional CLI-flag override applied last.

use std::env;
use std::time::Duration;

/// Control-plane backend the three node types report status and pull
/// assignments from (`/parser/<id>`, `/config/get`, `/ndsfiles/*`).
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl BackendConfig {
    /// Reads `NDS_BACKEND_URL` / `NDS_BACKEND_TIMEOUT_SECS`, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(url) = env::var("NDS_BACKEND_URL") {
            cfg.base_url = url;
        }
        if let Ok(secs) = env::var("NDS_BACKEND_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                cfg.request_timeout = Duration::from_secs(secs);
            }
        }
        cfg
    }

    /// CLI-flag overrides win over environment and defaults.
    pub fn with_overrides(mut self, base_url: Option<String>) -> Self {
        if let Some(url) = base_url {
            self.base_url = url;
        }
        self
    }
}

/// Checkout pool sizing, shared by every `RemoteServer` the Gateway manages
/// (spec §4.2). Per-server `pool_size` from the backend-reported
/// `RemoteServer` record takes precedence over this default when present.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub default_pool_size: usize,
    pub checkout_wait: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            default_pool_size: 5,
            checkout_wait: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = env::var("NDS_POOL_SIZE") {
            if let Ok(v) = v.parse() {
                cfg.default_pool_size = v;
            }
        }
        cfg
    }
}

/// Redis connection for the task broker (spec §4.6).
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub socket_timeout: Duration,
    pub blpop_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            socket_timeout: Duration::from_secs(5),
            blpop_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(url) = env::var("NDS_REDIS_URL") {
            cfg.url = url;
        }
        cfg
    }
}

/// Analytical store (ClickHouse-shaped) connection (spec §4.8).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8123".to_string(),
            database: "default".to_string(),
            user: "default".to_string(),
            password: String::new(),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(url) = env::var("NDS_STORE_URL") {
            cfg.url = url;
        }
        if let Ok(db) = env::var("NDS_STORE_DATABASE") {
            cfg.database = db;
        }
        if let Ok(user) = env::var("NDS_STORE_USER") {
            cfg.user = user;
        }
        if let Ok(password) = env::var("NDS_STORE_PASSWORD") {
            cfg.password = password;
        }
        cfg
    }
}

/// Duplex transport liveness policy (spec §4.4).
#[derive(Debug, Clone, Copy)]
pub struct DuplexConfig {
    pub chunk_size: usize,
    pub check_interval: Duration,
    pub max_failures: u32,
}

impl Default for DuplexConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512 * 1024,
            check_interval: Duration::from_secs(30),
            max_failures: 3,
        }
    }
}

/// Directory daemon logs roll into, mirroring the teacher's
/// `get_claude_dir()` helper (there: `~/.claude/longhouse`, here a generic
/// per-node-type log root under the state directory).
pub fn log_dir(node_name: &str) -> std::path::PathBuf {
    let base = env::var("NDS_STATE_DIR").unwrap_or_else(|_| "/var/lib/nds".to_string());
    std::path::PathBuf::from(base).join(node_name).join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_config_env_override() {
        env::set_var("NDS_BACKEND_URL", "http://backend.internal:9000");
        let cfg = BackendConfig::from_env();
        assert_eq!(cfg.base_url, "http://backend.internal:9000");
        env::remove_var("NDS_BACKEND_URL");
    }

    #[test]
    fn cli_override_wins_over_env() {
        env::set_var("NDS_BACKEND_URL", "http://from-env:9000");
        let cfg = BackendConfig::from_env().with_overrides(Some("http://from-cli:9000".into()));
        assert_eq!(cfg.base_url, "http://from-cli:9000");
        env::remove_var("NDS_BACKEND_URL");
    }
}
