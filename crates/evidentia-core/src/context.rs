//! Explicit dependency bundle handed to every core component.

use std::{fmt, sync::Arc};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use evidentia_crypto::{PiiCipher, RedeemHasher, TokenSigner};
use evidentia_ledger::EventLedger;

use crate::traits::{
    AttachmentStore, Clock, DeliveryStore, FileStore, GeoResolver, Mailer, NotificationStore,
    SaleStore, SettingsProvider,
};

/// Delivery limits and windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySettings {
    /// Base URL used to build download and redeem links, without a trailing slash.
    pub public_base_url: String,
    pub token_ttl_minutes: i64,
    /// Full downloads allowed per order.
    pub download_limit: u32,
    /// Days after payment during which downloads are allowed. `0` disables the window.
    pub download_window_days: i64,
    /// Default full downloads allowed per stage.
    pub stage_download_limit: u32,
    pub redeem_link_ttl_hours: i64,
    /// Send attempts per outbound message.
    pub mail_attempts: u32,
    /// Days a frozen order must be kept before it may be purged.
    pub retention_days: i64,
    /// Version recorded with every terms acceptance.
    pub terms_version: String,
}

impl DeliverySettings {
    pub fn token_ttl(&self) -> Duration {
        Duration::minutes(self.token_ttl_minutes)
    }

    pub fn download_url(&self, raw_token: &str) -> String {
        format!("{}/download/{raw_token}", self.public_base_url.trim_end_matches('/'))
    }

    pub fn redeem_url(&self, raw_token: &str) -> String {
        format!("{}/redeem/{raw_token}", self.public_base_url.trim_end_matches('/'))
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            public_base_url: "http://localhost:8080".to_string(),
            token_ttl_minutes: 60 * 24,
            download_limit: 5,
            download_window_days: 30,
            stage_download_limit: 5,
            redeem_link_ttl_hours: 72,
            mail_attempts: 3,
            retention_days: 180,
            terms_version: "1".to_string(),
        }
    }
}

/// Secrets the core signs, hashes and encrypts with.
#[derive(Clone)]
pub struct KeyMaterial {
    pub token_secret: Vec<u8>,
    pub redeem_salt: Vec<u8>,
    pub pii_key: [u8; 32],
}

impl KeyMaterial {
    pub fn signer(&self) -> TokenSigner {
        TokenSigner::new(self.token_secret.clone())
    }

    pub fn redeem_hasher(&self) -> RedeemHasher {
        RedeemHasher::new(self.redeem_salt.clone())
    }

    pub fn cipher(&self) -> PiiCipher {
        PiiCipher::new(self.pii_key)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}

/// Every store, collaborator and key the core needs. No global state.
#[derive(Clone)]
pub struct CoreContext {
    pub delivery_store: Arc<dyn DeliveryStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub attachments: Arc<dyn AttachmentStore>,
    pub sales: Arc<dyn SaleStore>,
    pub files: Arc<dyn FileStore>,
    pub ledger: EventLedger,
    pub signer: TokenSigner,
    pub redeem_hasher: RedeemHasher,
    pub cipher: PiiCipher,
    pub mailer: Arc<dyn Mailer>,
    pub geo: Arc<dyn GeoResolver>,
    pub settings_provider: Arc<dyn SettingsProvider>,
    pub clock: Arc<dyn Clock>,
    pub settings: DeliverySettings,
}
