//! Loading, environment overrides and validation.
//!
//! Loading order:
//!
//! 1. Parse the TOML document (missing sections take their defaults).
//! 2. Apply `EVIDENTIA_*` environment overrides for secrets.
//! 3. `validate()` before anything is built from the result.

use std::path::Path;

use tracing::{debug, warn};

use evidentia_contracts::{EvidentiaError, EvidentiaResult};
use evidentia_core::{traits::StoreIdentity, DeliverySettings, KeyMaterial};

use crate::schema::EvidentiaConfig;

/// Shortest accepted HMAC secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;
/// Shortest accepted admin bearer token.
pub const MIN_ADMIN_TOKEN_LEN: usize = 24;

/// Environment variables that override `[secrets]` and `[server]` values.
pub const ENV_OVERRIDES: &[&str] = &[
    "EVIDENTIA_TOKEN_SECRET",
    "EVIDENTIA_REDEEM_SALT",
    "EVIDENTIA_PII_KEY",
    "EVIDENTIA_WEBHOOK_SECRET",
    "EVIDENTIA_ADMIN_TOKEN",
];

fn config_error(reason: impl Into<String>) -> EvidentiaError {
    EvidentiaError::ConfigError {
        reason: reason.into(),
    }
}

impl EvidentiaConfig {
    /// Parse `s` as TOML.
    ///
    /// Returns `EvidentiaError::ConfigError` if the TOML is malformed or does
    /// not match the schema. Does not validate.
    pub fn from_toml_str(s: &str) -> EvidentiaResult<Self> {
        toml::from_str(s).map_err(|e| config_error(format!("failed to parse config TOML: {e}")))
    }

    /// Read and parse the file at `path`, apply environment overrides and
    /// validate the result.
    pub fn from_file(path: &Path) -> EvidentiaResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            config_error(format!("failed to read config file '{}': {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&contents)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        debug!(path = %path.display(), bind = %config.server.bind, "configuration loaded");
        Ok(config)
    }

    /// Overlay secrets from the environment. `lookup` is `std::env::var`
    /// in production and a map in tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for key in ENV_OVERRIDES {
            let Some(value) = lookup(key).filter(|v| !v.is_empty()) else {
                continue;
            };
            let slot = match *key {
                "EVIDENTIA_TOKEN_SECRET" => &mut self.secrets.token_secret,
                "EVIDENTIA_REDEEM_SALT" => &mut self.secrets.redeem_salt,
                "EVIDENTIA_PII_KEY" => &mut self.secrets.pii_key,
                "EVIDENTIA_WEBHOOK_SECRET" => &mut self.secrets.webhook_secret,
                _ => &mut self.server.admin_token,
            };
            *slot = value;
            debug!(variable = key, "configuration value overridden from environment");
        }
    }

    /// Reject configurations the service must not start with.
    pub fn validate(&self) -> EvidentiaResult<()> {
        let secrets = &self.secrets;
        for (name, value) in [
            ("token_secret", &secrets.token_secret),
            ("redeem_salt", &secrets.redeem_salt),
            ("webhook_secret", &secrets.webhook_secret),
        ] {
            if value.len() < MIN_SECRET_LEN {
                return Err(config_error(format!(
                    "secrets.{name} must be at least {MIN_SECRET_LEN} bytes"
                )));
            }
        }
        if secrets.token_secret == secrets.redeem_salt {
            return Err(config_error("secrets.token_secret and secrets.redeem_salt must differ"));
        }
        self.pii_key()?;
        if self.server.admin_token.len() < MIN_ADMIN_TOKEN_LEN {
            return Err(config_error(format!(
                "server.admin_token must be at least {MIN_ADMIN_TOKEN_LEN} characters"
            )));
        }
        if !self.server.public_base_url.starts_with("http://")
            && !self.server.public_base_url.starts_with("https://")
        {
            return Err(config_error("server.public_base_url must be an http(s) URL"));
        }

        let d = &self.delivery;
        for (name, value) in [
            ("delivery.download_limit", i64::from(d.download_limit)),
            ("delivery.stage_download_limit", i64::from(d.stage_download_limit)),
            ("delivery.mail_attempts", i64::from(d.mail_attempts)),
            ("delivery.token_ttl_minutes", d.token_ttl_minutes),
            ("delivery.redeem_link_ttl_hours", d.redeem_link_ttl_hours),
        ] {
            if value <= 0 {
                return Err(config_error(format!("{name} must be greater than zero")));
            }
        }
        if d.download_window_days < 0 || self.dispute.retention_days < 0 {
            return Err(config_error("day counts must not be negative"));
        }
        if d.terms_version.trim().is_empty() {
            return Err(config_error("delivery.terms_version must not be empty"));
        }
        if self.webhook.signature_tolerance_secs <= 0 {
            return Err(config_error("webhook.signature_tolerance_secs must be greater than zero"));
        }
        if d.download_window_days == 0 {
            warn!("delivery.download_window_days is 0; downloads never expire by window");
        }
        Ok(())
    }

    fn pii_key(&self) -> EvidentiaResult<[u8; 32]> {
        let bytes = hex::decode(self.secrets.pii_key.trim())
            .map_err(|_| config_error("secrets.pii_key must be hex"))?;
        <[u8; 32]>::try_from(bytes.as_slice())
            .map_err(|_| config_error("secrets.pii_key must be 32 bytes (64 hex characters)"))
    }

    /// Delivery limits for the core.
    pub fn delivery_settings(&self) -> DeliverySettings {
        let d = &self.delivery;
        DeliverySettings {
            public_base_url: self.server.public_base_url.clone(),
            token_ttl_minutes: d.token_ttl_minutes,
            download_limit: d.download_limit,
            download_window_days: d.download_window_days,
            stage_download_limit: d.stage_download_limit,
            redeem_link_ttl_hours: d.redeem_link_ttl_hours,
            mail_attempts: d.mail_attempts,
            retention_days: self.dispute.retention_days,
            terms_version: d.terms_version.clone(),
        }
    }

    /// Signing, hashing and encryption keys for the core.
    pub fn key_material(&self) -> EvidentiaResult<KeyMaterial> {
        Ok(KeyMaterial {
            token_secret: self.secrets.token_secret.as_bytes().to_vec(),
            redeem_salt: self.secrets.redeem_salt.as_bytes().to_vec(),
            pii_key: self.pii_key()?,
        })
    }

    pub fn store_identity(&self) -> StoreIdentity {
        StoreIdentity {
            name: self.store.name.clone(),
            support_email: self.store.support_email.clone(),
            legal_name: self.store.legal_name.clone(),
        }
    }
}
