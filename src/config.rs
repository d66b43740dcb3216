//! Configuration (spec §6.1): the broker's recognized environment variables
//! with their documented defaults. `BrokerConfig` is plain data so it can
//! also be constructed directly when embedding the broker without a process
//! environment.

use std::env;

use crate::error::BrokerError;

const DEFAULT_VISIBILITY_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_STREAM_LEN: u64 = 100_000;
const DEFAULT_MAX_PAYLOAD_BYTES: usize = 262_144;

/// Which hot-store backend to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotStoreBackend {
    /// `chronow-redis`, addressed by `RedisConfig`.
    Native(RedisConfig),
    /// `chronow-mongo`, addressed by a Mongo connection string.
    Emulated { mongo_uri: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub url: String,
    pub tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: Option<u32>,
    pub key_prefix: Option<String>,
    pub retry_ms: Option<u64>,
    pub ca_cert: Option<String>,
    pub cluster_nodes: Option<String>,
}

/// Reserved for future payload offload; not consumed by this crate (spec §6.1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpaceConfig {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub hot_store: HotStoreBackend,
    pub mongo_uri: String,
    pub space: SpaceConfig,
    pub visibility_timeout_ms: u64,
    pub max_stream_len: u64,
    pub max_payload_bytes: usize,
    pub key_prefix: String,
    pub tenant: String,
    pub namespace: String,
}

impl BrokerConfig {
    /// Load from the process environment per spec §6.1. Fails with
    /// `ConfigInvalid` when `CHRONOW_MONGO_ONLY` is unset/false and no
    /// `REDIS_URL` is given, or when no `MONGO_URI` is present (a warm-store
    /// configuration is always required).
    pub fn from_env() -> Result<Self, BrokerError> {
        let mongo_only = env::var("CHRONOW_MONGO_ONLY").map(|v| v == "true").unwrap_or(false);
        let mongo_uri = env::var("MONGO_URI")
            .map_err(|_| BrokerError::ConfigInvalid("MONGO_URI is required (warm store)".to_string()))?;

        let hot_store = if mongo_only {
            HotStoreBackend::Emulated { mongo_uri: mongo_uri.clone() }
        } else {
            let url = env::var("REDIS_URL")
                .map_err(|_| BrokerError::ConfigInvalid("REDIS_URL is required unless CHRONOW_MONGO_ONLY=true".to_string()))?;
            HotStoreBackend::Native(RedisConfig {
                url,
                tls: env::var("REDIS_TLS").map(|v| v == "true").unwrap_or(false),
                username: env::var("REDIS_USERNAME").ok(),
                password: env::var("REDIS_PASSWORD").ok(),
                db: env::var("REDIS_DB").ok().and_then(|v| v.parse().ok()),
                key_prefix: env::var("REDIS_KEY_PREFIX").ok(),
                retry_ms: env::var("REDIS_RETRY_MS").ok().and_then(|v| v.parse().ok()),
                ca_cert: env::var("REDIS_CA_CERT").ok(),
                cluster_nodes: env::var("REDIS_CLUSTER_NODES").ok(),
            })
        };

        let key_prefix = env::var("REDIS_KEY_PREFIX").unwrap_or_else(|_| "cw:".to_string());

        Ok(Self {
            hot_store,
            mongo_uri,
            space: SpaceConfig {
                access_key: env::var("SPACE_ACCESS_KEY").ok(),
                secret_key: env::var("SPACE_SECRET_KEY").ok(),
                endpoint: env::var("SPACE_ENDPOINT").ok(),
            },
            visibility_timeout_ms: env::var("REDIS_VISIBILITY_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_VISIBILITY_TIMEOUT_MS),
            max_stream_len: env::var("REDIS_MAX_STREAM_LEN")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_STREAM_LEN),
            max_payload_bytes: env::var("REDIS_MAX_PAYLOAD_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_PAYLOAD_BYTES),
            key_prefix,
            tenant: env::var("CHRONOW_TENANT").unwrap_or_else(|_| "default".to_string()),
            namespace: env::var("CHRONOW_NAMESPACE").unwrap_or_else(|_| "default".to_string()),
        })
    }

    /// Build config directly (for embedding without environment variables).
    pub fn new(hot_store: HotStoreBackend, mongo_uri: impl Into<String>) -> Self {
        Self {
            hot_store,
            mongo_uri: mongo_uri.into(),
            space: SpaceConfig::default(),
            visibility_timeout_ms: DEFAULT_VISIBILITY_TIMEOUT_MS,
            max_stream_len: DEFAULT_MAX_STREAM_LEN,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            key_prefix: "cw:".to_string(),
            tenant: "default".to_string(),
            namespace: "default".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = BrokerConfig::new(HotStoreBackend::Emulated { mongo_uri: "mongodb://localhost".into() }, "mongodb://localhost");
        assert_eq!(config.visibility_timeout_ms, 30_000);
        assert_eq!(config.max_stream_len, 100_000);
        assert_eq!(config.max_payload_bytes, 262_144);
        assert_eq!(config.key_prefix, "cw:");
    }

    // These three tests share process-global environment state; `cargo test`
    // runs them on separate threads by default, so each guards its own
    // variables with a process-wide mutex to avoid racing the others.
    static ENV_GUARD: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn from_env_requires_mongo_uri() {
        let _guard = ENV_GUARD.lock().unwrap();
        env::remove_var("MONGO_URI");
        let err = BrokerConfig::from_env().unwrap_err();
        assert!(matches!(err, BrokerError::ConfigInvalid(_)));
    }

    #[test]
    fn from_env_requires_redis_url_unless_mongo_only() {
        let _guard = ENV_GUARD.lock().unwrap();
        env::set_var("MONGO_URI", "mongodb://localhost");
        env::remove_var("CHRONOW_MONGO_ONLY");
        env::remove_var("REDIS_URL");
        let err = BrokerConfig::from_env().unwrap_err();
        assert!(matches!(err, BrokerError::ConfigInvalid(_)));
        env::remove_var("MONGO_URI");
    }

    #[test]
    fn from_env_accepts_mongo_only() {
        let _guard = ENV_GUARD.lock().unwrap();
        env::set_var("MONGO_URI", "mongodb://localhost");
        env::set_var("CHRONOW_MONGO_ONLY", "true");
        let config = BrokerConfig::from_env().unwrap();
        assert!(matches!(config.hot_store, HotStoreBackend::Emulated { .. }));
        env::remove_var("MONGO_URI");
        env::remove_var("CHRONOW_MONGO_ONLY");
    }
}
