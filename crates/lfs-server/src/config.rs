//! Gateway configuration

use lfs_store::{StorageConfig, DEFAULT_CHUNK_SIZE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Gateway server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Public base URL used in action links, with a trailing slash
    pub app_url: String,
    /// Enable authentication
    pub auth_enabled: bool,
    /// Secret for capability tokens
    pub jwt_secret: Option<String>,
    /// Lifetime of capability tokens issued in batch responses (seconds)
    pub token_ttl_secs: i64,
    /// Realm sent in authentication challenges
    pub realm: String,
    /// Largest object accepted for upload (bytes, 0 = unlimited)
    pub max_file_size: i64,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// Rate limit (requests per second per caller, 0 = unlimited)
    pub rate_limit_rps: u32,
    /// Enable CORS
    pub cors_enabled: bool,
    /// CORS allowed origins
    pub cors_origins: Vec<String>,
    /// Content store backend
    pub storage: StorageConfig,
    /// Multipart part size (bytes)
    pub multipart_chunk_size: u64,
    /// Lifetime of presigned part URLs (seconds)
    pub presign_expiry_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            app_url: "http://localhost:3000/".to_string(),
            auth_enabled: true,
            jwt_secret: None,
            token_ttl_secs: 24 * 60 * 60,
            realm: "lfs".to_string(),
            max_file_size: 0,
            max_body_size: 5 * 1024 * 1024 * 1024, // 5 GB
            rate_limit_rps: 100,
            cors_enabled: true,
            cors_origins: vec!["*".to_string()],
            storage: StorageConfig::default(),
            multipart_chunk_size: DEFAULT_CHUNK_SIZE,
            presign_expiry_secs: 15 * 60,
        }
    }
}

impl GatewayConfig {
    /// Get the bind address
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `app_url` with exactly one trailing slash
    pub fn base_url(&self) -> String {
        format!("{}/", self.app_url.trim_end_matches('/'))
    }

    pub fn presign_expiry(&self) -> Duration {
        Duration::from_secs(self.presign_expiry_secs)
    }

    /// Whether an object of `size` bytes exceeds the upload limit
    pub fn exceeds_max_file_size(&self, size: i64) -> bool {
        self.max_file_size > 0 && size > self.max_file_size
    }

    /// Reject settings the server cannot start with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auth_enabled && self.jwt_secret.as_deref().map_or(true, str::is_empty) {
            anyhow::bail!("authentication is enabled but no JWT secret is configured");
        }
        if self.multipart_chunk_size == 0 {
            anyhow::bail!("multipart chunk size must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
        assert_eq!(config.presign_expiry(), Duration::from_secs(900));
        assert!(!config.exceeds_max_file_size(i64::MAX));
    }

    #[test]
    fn test_validate_requires_secret() {
        let mut config = GatewayConfig::default();
        assert!(config.validate().is_err());

        config.jwt_secret = Some("secret".to_string());
        assert!(config.validate().is_ok());

        config.jwt_secret = None;
        config.auth_enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_base_url_and_limits() {
        let config = GatewayConfig {
            app_url: "https://git.example.com//".to_string(),
            max_file_size: 10,
            ..Default::default()
        };
        assert_eq!(config.base_url(), "https://git.example.com/");
        assert!(config.exceeds_max_file_size(11));
        assert!(!config.exceeds_max_file_size(10));
    }
}
