//! Configuration for audit-node

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("audit-node")
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage directory for the database and verifier tags
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Path prefix every farmer route is mounted under
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Concurrent tokens allowed per IP address (None = unlimited)
    #[serde(default = "default_max_tokens_per_ip")]
    pub max_tokens_per_ip: Option<u32>,

    /// Minimum whitelisted balance for an address to receive tokens
    #[serde(default = "default_min_balance")]
    pub min_balance: i64,

    /// Largest ownership message accepted on token creation
    #[serde(default = "default_max_sig_message_size")]
    pub max_sig_message_size: usize,

    /// Byte budget used when a chunk request names no size
    #[serde(default = "default_chunk_size")]
    pub default_chunk_size: u64,

    #[serde(default = "default_max_chunks_per_request")]
    pub max_chunks_per_request: usize,

    /// Bytes an address may hold under live contracts across all its tokens
    #[serde(default = "default_max_size_per_address")]
    pub max_size_per_address: u64,

    /// Seconds between required proofs for generated files
    #[serde(default = "default_interval_secs")]
    pub default_interval_secs: i64,

    #[serde(default = "default_redundancy")]
    pub default_redundancy: i32,

    /// Challenges precomputed per chunk by the digest verifier
    #[serde(default = "default_challenges_per_chunk")]
    pub challenges_per_chunk: usize,

    /// JSON table of IP -> location; geolocation is disabled when absent
    #[serde(default)]
    pub geo_table_path: Option<PathBuf>,

    #[serde(default)]
    pub capacity: CapacityConfig,

    #[serde(default)]
    pub gc: GcConfig,
}

/// Chunk inventory targets for the capacity maintainer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: u64,

    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,

    /// Total bytes of idle inventory to keep on hand
    #[serde(default = "default_total_bytes")]
    pub total_bytes: u64,

    /// Geometric base for chunk sizes
    #[serde(default = "default_base")]
    pub base: u64,

    /// Sleep between reconciliation passes
    #[serde(default = "default_capacity_interval")]
    pub interval_secs: u64,
}

/// Retention of settled contracts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcConfig {
    /// How long a settled contract is kept after it expired
    #[serde(default = "default_retention_secs")]
    pub retention_secs: i64,

    #[serde(default = "default_gc_interval")]
    pub interval_secs: u64,
}

fn default_http_port() -> u16 {
    5000
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_prefix() -> String {
    "/api/downstream/v1".to_string()
}

fn default_max_tokens_per_ip() -> Option<u32> {
    Some(5)
}

fn default_min_balance() -> i64 {
    10_000
}

fn default_max_sig_message_size() -> usize {
    1024
}

fn default_chunk_size() -> u64 {
    32 * 1024 * 1024
}

fn default_max_chunks_per_request() -> usize {
    10
}

fn default_max_size_per_address() -> u64 {
    1024 * 1024 * 1024
}

fn default_interval_secs() -> i64 {
    300
}

fn default_redundancy() -> i32 {
    3
}

fn default_challenges_per_chunk() -> usize {
    288
}

fn default_true() -> bool {
    true
}

fn default_min_chunk_size() -> u64 {
    1024
}

fn default_max_chunk_size() -> u64 {
    32 * 1024 * 1024
}

fn default_total_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_base() -> u64 {
    2
}

fn default_capacity_interval() -> u64 {
    10
}

fn default_retention_secs() -> i64 {
    7 * 24 * 60 * 60
}

fn default_gc_interval() -> u64 {
    3600
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_chunk_size: default_min_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
            total_bytes: default_total_bytes(),
            base: default_base(),
            interval_secs: default_capacity_interval(),
        }
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            interval_secs: default_gc_interval(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            http_port: default_http_port(),
            bind_address: default_bind_address(),
            api_prefix: default_api_prefix(),
            max_tokens_per_ip: default_max_tokens_per_ip(),
            min_balance: default_min_balance(),
            max_sig_message_size: default_max_sig_message_size(),
            default_chunk_size: default_chunk_size(),
            max_chunks_per_request: default_max_chunks_per_request(),
            max_size_per_address: default_max_size_per_address(),
            default_interval_secs: default_interval_secs(),
            default_redundancy: default_redundancy(),
            challenges_per_chunk: default_challenges_per_chunk(),
            geo_table_path: None,
            capacity: CapacityConfig::default(),
            gc: GcConfig::default(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Verifier tags directory
    pub fn tags_dir(&self) -> PathBuf {
        self.storage_dir.join("tags")
    }

    /// SQLite database path
    pub fn db_path(&self) -> PathBuf {
        self.storage_dir.join("audit-node.db")
    }

    /// Secret key file for the digest verifier
    pub fn verifier_key_path(&self) -> PathBuf {
        self.storage_dir.join("verifier.key")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            http_port = 9000
            max_tokens_per_ip = 2

            [capacity]
            base = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.http_port, 9000);
        assert_eq!(config.max_tokens_per_ip, Some(2));
        assert_eq!(config.capacity.base, 10);
        assert_eq!(config.capacity.min_chunk_size, 1024);
        assert_eq!(config.api_prefix, "/api/downstream/v1");
        assert_eq!(config.default_chunk_size, 33_554_432);
        assert_eq!(config.gc.interval_secs, 3600);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.min_balance = 42;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.min_balance, 42);
        assert_eq!(loaded.max_tokens_per_ip, Some(5));
    }
}
