use serde::Deserialize;
use std::path::Path;

/// Top-level config loaded from `glucobridge.toml`, with environment
/// variables overriding individual fields (env wins, matching the
/// precedence the vendor/object-store credentials need in deployment).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub vendor: VendorConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    #[serde(default = "default_region")]
    pub region: String,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            bucket: default_bucket(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            region: default_region(),
        }
    }
}

fn default_endpoint() -> String {
    "http://localhost:9000".to_string()
}

fn default_bucket() -> String {
    "cgm-data".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct VendorConfig {
    #[serde(default = "default_vendor_region")]
    pub region: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            region: default_vendor_region(),
            username: String::new(),
            password: String::new(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

fn default_vendor_region() -> String {
    "us".to_string()
}

fn default_poll_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            log_level: default_log_level(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:1337".to_string()
}

fn default_log_level() -> String {
    "glucobridge=info,tower_http=info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// SHA-1 hex digest of the configured API secret. An incoming request
    /// carrying this digest is resolved to the synthetic `admin` subject.
    #[serde(default)]
    pub api_secret_sha1: Option<String>,
    #[serde(default = "default_role")]
    pub default_role: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_secret_sha1: None,
            default_role: default_role(),
        }
    }
}

fn default_role() -> String {
    "readable".to_string()
}

impl Config {
    /// Load config from a TOML file, falling back to defaults if it doesn't
    /// exist, then apply environment variable overrides.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut config: Config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            tracing::info!("config file not found at {}, using defaults", path.display());
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("OBJSTORE_ENDPOINT") {
            self.object_store.endpoint = v;
        }
        if let Ok(v) = std::env::var("OBJSTORE_BUCKET") {
            self.object_store.bucket = v;
        }
        if let Ok(v) = std::env::var("OBJSTORE_ACCESS_KEY_ID") {
            self.object_store.access_key_id = v;
        }
        if let Ok(v) = std::env::var("OBJSTORE_SECRET_ACCESS_KEY") {
            self.object_store.secret_access_key = v;
        }
        if let Ok(v) = std::env::var("OBJSTORE_REGION") {
            self.object_store.region = v;
        }
        if let Ok(v) = std::env::var("VENDOR_REGION") {
            self.vendor.region = v;
        }
        if let Ok(v) = std::env::var("VENDOR_USERNAME") {
            self.vendor.username = v;
        }
        if let Ok(v) = std::env::var("VENDOR_PASSWORD") {
            self.vendor.password = v;
        }
        if let Ok(v) = std::env::var("LISTEN_ADDR") {
            self.server.listen_addr = v;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            self.server.log_level = v;
        }
        if let Ok(v) = std::env::var("API_SECRET") {
            self.auth.api_secret_sha1 = Some(sha1_hex(v.as_bytes()));
        }
        if let Ok(v) = std::env::var("DEFAULT_ROLE") {
            self.auth.default_role = v;
        }
    }
}

fn sha1_hex(data: &[u8]) -> String {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
