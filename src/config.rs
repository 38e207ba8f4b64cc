//! Environment/CLI-driven configuration
//!
//! All configuration is loaded via `clap`'s `env` support, following the
//! convention of one `env = "WARMUP_..."` per field with a sane default
//! where the field is optional. `WorkerConfig::load()` is the single
//! entry point `main.rs` calls.

use std::time::Duration;

use clap::Args;
use secrecy::SecretString;

use crate::errors::{AppError, AppResult};

/// Top-level configuration, composed of one `Args` struct per external
/// collaborator (queue, KV store, relational store, crypto, OAuth) plus
/// tick timing.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "warmup-worker", version, about = "Warmup reply worker")]
pub struct WorkerConfig {
    #[command(flatten)]
    pub queue: QueueConfig,
    #[command(flatten)]
    pub kv: KvConfig,
    #[command(flatten)]
    pub db: DbConfig,
    #[command(flatten)]
    pub crypto: CryptoConfig,
    #[command(flatten)]
    pub oauth: OAuthConfig,
    #[command(flatten)]
    pub timing: TimingConfig,
}

impl WorkerConfig {
    /// Parse configuration from CLI args and environment, then validate
    /// cross-field invariants (currently: the encryption key's length).
    pub fn load() -> AppResult<Self> {
        dotenvy::dotenv().ok();
        let config = <Self as clap::Parser>::parse();
        config.crypto.validate()?;
        Ok(config)
    }
}

/// SQS-style durable queue connection.
#[derive(Debug, Clone, Args)]
pub struct QueueConfig {
    #[arg(long = "queue-url", env = "WARMUP_QUEUE_URL")]
    pub url: String,
    #[arg(long = "queue-region", env = "WARMUP_QUEUE_REGION", default_value = "us-east-1")]
    pub region: String,
    #[arg(long = "queue-access-key", env = "WARMUP_QUEUE_ACCESS_KEY")]
    pub access_key: String,
    #[arg(long = "queue-secret-key", env = "WARMUP_QUEUE_SECRET_KEY")]
    pub secret_key: SecretString,
}

/// Redis-style KV store connection, used by the cooldown store (C2).
#[derive(Debug, Clone, Args)]
pub struct KvConfig {
    #[arg(long = "kv-url", env = "WARMUP_KV_URL", default_value = "redis://127.0.0.1:6379")]
    pub url: String,
}

/// Relational store connection for credentials and warmup logs.
#[derive(Debug, Clone, Args)]
pub struct DbConfig {
    #[arg(long = "db-url", env = "WARMUP_DB_URL")]
    pub url: SecretString,
    #[arg(long = "db-tls-bundle", env = "WARMUP_DB_TLS_BUNDLE_PATH")]
    pub tls_bundle_path: Option<String>,
}

/// AES-256-CBC key used to decrypt at-rest mailbox credentials.
#[derive(Debug, Clone, Args)]
pub struct CryptoConfig {
    /// 32-byte key, hex-encoded (64 hex characters).
    #[arg(long = "encryption-key", env = "WARMUP_ENCRYPTION_KEY")]
    pub key_hex: SecretString,
}

impl CryptoConfig {
    fn validate(&self) -> AppResult<()> {
        use secrecy::ExposeSecret;
        let raw = self.key_hex.expose_secret();
        let decoded = hex::decode(raw)
            .map_err(|e| AppError::Internal(format!("WARMUP_ENCRYPTION_KEY is not valid hex: {e}")))?;
        if decoded.len() != 32 {
            return Err(AppError::Internal(format!(
                "WARMUP_ENCRYPTION_KEY must decode to 32 bytes, got {}",
                decoded.len()
            )));
        }
        Ok(())
    }
}

/// Gmail OAuth2 client credentials, used by the vendor-API mail path.
#[derive(Debug, Clone, Args)]
pub struct OAuthConfig {
    #[arg(long = "oauth-client-id", env = "WARMUP_OAUTH_CLIENT_ID")]
    pub client_id: Option<String>,
    #[arg(long = "oauth-client-secret", env = "WARMUP_OAUTH_CLIENT_SECRET")]
    pub client_secret: Option<SecretString>,
    #[arg(long = "oauth-redirect-uri", env = "WARMUP_OAUTH_REDIRECT_URI")]
    pub redirect_uri: Option<String>,
}

/// Tick intervals for the two supervised loops.
#[derive(Debug, Clone, Args)]
pub struct TimingConfig {
    #[arg(long = "ingest-interval-secs", env = "WARMUP_INGEST_INTERVAL_SECS", default_value_t = 120)]
    pub ingest_interval_secs: u64,
    #[arg(long = "batch-interval-secs", env = "WARMUP_BATCH_INTERVAL_SECS", default_value_t = 3600)]
    pub batch_interval_secs: u64,
}

impl TimingConfig {
    pub fn ingest_interval(&self) -> Duration {
        Duration::from_secs(self.ingest_interval_secs)
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_secs(self.batch_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_config_accepts_32_byte_hex_key() {
        let key_hex = hex::encode([7u8; 32]);
        let cfg = CryptoConfig { key_hex: SecretString::from(key_hex) };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn crypto_config_rejects_wrong_length() {
        let key_hex = hex::encode([7u8; 16]);
        let cfg = CryptoConfig { key_hex: SecretString::from(key_hex) };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn crypto_config_rejects_non_hex() {
        let cfg = CryptoConfig { key_hex: SecretString::from("not-hex-data!!".to_string()) };
        assert!(cfg.validate().is_err());
    }
}
