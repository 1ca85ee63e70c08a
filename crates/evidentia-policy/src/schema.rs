//! Configuration schema.
//!
//! An `EvidentiaConfig` is deserialized from TOML. Every section except
//! `[secrets]` has defaults, so a minimal file only carries the secrets
//! (and even those may come from the environment instead).
//!
//! Example:
//! ```toml
//! [server]
//! bind = "0.0.0.0:8080"
//! public_base_url = "https://shop.example.com"
//!
//! [delivery]
//! download_limit = 3
//!
//! [secrets]
//! token_secret = "..."
//! redeem_salt = "..."
//! pii_key = "<64 hex chars>"
//! webhook_secret = "..."
//! ```

use serde::{Deserialize, Serialize};

/// Root of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidentiaConfig {
    pub server: ServerConfig,
    pub delivery: DeliveryConfig,
    pub dispute: DisputeConfig,
    pub secrets: SecretsConfig,
    pub webhook: WebhookConfig,
    pub store: StoreConfig,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the HTTP server listens on.
    pub bind: String,
    /// Base URL used in download and redeem links.
    pub public_base_url: String,
    /// Bearer token for the operator endpoints.
    pub admin_token: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind", &self.bind)
            .field("public_base_url", &self.public_base_url)
            .field("admin_token", &"<redacted>")
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            public_base_url: "http://localhost:8080".to_string(),
            admin_token: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub token_ttl_minutes: i64,
    pub download_limit: u32,
    /// `0` disables the download window.
    pub download_window_days: i64,
    pub stage_download_limit: u32,
    pub redeem_link_ttl_hours: i64,
    pub mail_attempts: u32,
    pub terms_version: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            token_ttl_minutes: 24 * 60,
            download_limit: 5,
            download_window_days: 30,
            stage_download_limit: 5,
            redeem_link_ttl_hours: 72,
            mail_attempts: 3,
            terms_version: "1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisputeConfig {
    /// Days a frozen order is kept before purge is allowed.
    pub retention_days: i64,
}

impl Default for DisputeConfig {
    fn default() -> Self {
        Self { retention_days: 180 }
    }
}

/// Secret material. Never logged; `Debug` output is redacted.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// HMAC key for download tokens.
    pub token_secret: String,
    /// HMAC key for redeem link hashes.
    pub redeem_salt: String,
    /// AES-256 key for PII encryption, 64 hex characters.
    pub pii_key: String,
    /// Shared secret for provider notification signatures.
    pub webhook_secret: String,
}

impl std::fmt::Debug for SecretsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsConfig")
            .field("token_secret", &"<redacted>")
            .field("redeem_salt", &"<redacted>")
            .field("pii_key", &"<redacted>")
            .field("webhook_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Maximum age of a signed notification timestamp.
    pub signature_tolerance_secs: i64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            signature_tolerance_secs: 300,
        }
    }
}

/// Store identity shown in mail and evidence reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub name: String,
    pub support_email: String,
    pub legal_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "Evidentia Store".to_string(),
            support_email: "support@localhost".to_string(),
            legal_name: "Evidentia Store".to_string(),
        }
    }
}
