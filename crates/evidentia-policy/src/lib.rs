//! # evidentia-policy
//!
//! TOML configuration for the Evidentia service.
//!
//! ## Overview
//!
//! This crate provides [`EvidentiaConfig`], the single configuration
//! document of the service. It is parsed from TOML, overlaid with
//! `EVIDENTIA_*` environment variables for secrets, validated, and then
//! turned into the core's [`DeliverySettings`](evidentia_core::DeliverySettings)
//! and [`KeyMaterial`](evidentia_core::KeyMaterial).
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use evidentia_policy::EvidentiaConfig;
//!
//! let config = EvidentiaConfig::from_file(Path::new("evidentia.toml"))?;
//! let keys = config.key_material()?;
//! let settings = config.delivery_settings();
//! ```

pub mod loader;
pub mod schema;

pub use loader::{ENV_OVERRIDES, MIN_ADMIN_TOKEN_LEN, MIN_SECRET_LEN};
pub use schema::{
    DeliveryConfig, DisputeConfig, EvidentiaConfig, SecretsConfig, ServerConfig, StoreConfig,
    WebhookConfig,
};

// ── Tests ─────────────────────────────────────────────────────────────────────
