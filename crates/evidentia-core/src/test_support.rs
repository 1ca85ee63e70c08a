//! Fixtures shared by the core test modules.

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use evidentia_contracts::{
    order::{FileRef, Money, ProductSnapshot, StagePlan},
    EventContext, Order,
};
use evidentia_crypto::sha256_hex;

use crate::{
    context::{DeliverySettings, KeyMaterial},
    gateway::{DownloadGateway, Fulfillment},
    machine::{DeliveryStateMachine, IssuedLink, NewOrder},
    memory::{InMemoryBackend, ManualClock},
    traits::{FileStore, StoreIdentity},
};

pub(crate) const GUIDE_KEY: &str = "products/field-guide.pdf";

pub(crate) fn keys() -> KeyMaterial {
    KeyMaterial {
        token_secret: b"test-token-secret-0123456789abcdef".to_vec(),
        redeem_salt: b"test-redeem-salt".to_vec(),
        pii_key: [7u8; 32],
    }
}

pub(crate) fn client() -> EventContext {
    EventContext {
        ip: Some("203.0.113.42".to_string()),
        user_agent: Some("curl/8.5".to_string()),
        external_ref: None,
    }
}

pub(crate) fn file_ref(key: &str, content: &[u8]) -> FileRef {
    FileRef {
        key: key.to_string(),
        filename: key.rsplit('/').next().unwrap_or(key).to_string(),
        sha256: sha256_hex(content),
        size: content.len() as u64,
        content_type: Some("application/pdf".to_string()),
    }
}

pub(crate) fn guide_bytes() -> Vec<u8> {
    (0..200_000u32).map(|i| (i % 251) as u8).collect()
}

pub(crate) fn product() -> ProductSnapshot {
    ProductSnapshot {
        product_id: "field-guide".to_string(),
        title: "Field Guide".to_string(),
        description: "A guide".to_string(),
        price: Money {
            amount_minor: 4900,
            currency: "USD".to_string(),
        },
        files: vec![file_ref(GUIDE_KEY, &guide_bytes())],
        license_terms: Some("Personal use only.".to_string()),
        staged: false,
        stages: Vec::new(),
        metadata: serde_json::Value::Null,
    }
}

pub(crate) fn staged_product() -> ProductSnapshot {
    let stages = (1..=3)
        .map(|n| StagePlan {
            stage_order: n,
            stage_type: format!("chapter-{n}"),
            file: file_ref(&format!("products/course/ch{n}.zip"), format!("chapter {n}").as_bytes()),
            download_limit: None,
        })
        .collect();
    ProductSnapshot {
        product_id: "course".to_string(),
        title: "Course".to_string(),
        staged: true,
        stages,
        files: Vec::new(),
        ..product()
    }
}

/// A backend on a manual clock plus the components under test.
pub(crate) struct Harness {
    pub backend: InMemoryBackend,
    pub clock: Arc<ManualClock>,
    pub machine: DeliveryStateMachine,
    pub gateway: DownloadGateway,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(DeliverySettings::default())
    }

    pub fn with_settings(settings: DeliverySettings) -> Self {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let identity = StoreIdentity {
            name: "Test Store".to_string(),
            support_email: "help@store.test".to_string(),
            legal_name: "Test Store LLC".to_string(),
        };
        let backend = InMemoryBackend::new(&keys(), settings, identity, clock.clone());
        backend
            .files
            .upload(GUIDE_KEY, &guide_bytes(), "application/pdf")
            .unwrap();
        for n in 1..=3 {
            backend
                .files
                .upload(
                    &format!("products/course/ch{n}.zip"),
                    format!("chapter {n}").as_bytes(),
                    "application/zip",
                )
                .unwrap();
        }
        let ctx = backend.context();
        Self {
            machine: DeliveryStateMachine::new(ctx.clone()),
            gateway: DownloadGateway::new(ctx),
            backend,
            clock,
        }
    }

    pub fn pending_order(&self, product: ProductSnapshot) -> Order {
        self.machine
            .create_order(
                NewOrder {
                    product,
                    buyer_email: "Buyer@Example.com".to_string(),
                    buyer_name: Some("Ada Buyer".to_string()),
                    provider_order_id: Some(format!("PROV-{}", uuid::Uuid::new_v4())),
                },
                &client(),
            )
            .unwrap()
    }

    /// An unstaged, paid order and its checkout link.
    pub fn paid_order(&self) -> (Order, IssuedLink) {
        let order = self.pending_order(product());
        let grant = self
            .machine
            .record_payment_captured(&order.id, Some("CAP-1".to_string()), &client())
            .unwrap();
        (grant.order, grant.link.unwrap())
    }

    pub fn reissue(&self, order: &Order) -> String {
        let link = self
            .machine
            .issue_download_link(&order.id, None, "ops@store.test", &client())
            .unwrap();
        raw_token(&link.download_url).to_string()
    }

    pub fn download(&self, raw: &str, range: Option<&str>) -> Fulfillment {
        self.gateway.fulfill(raw, range, &client()).unwrap()
    }

    pub fn event_types(&self, order: &Order) -> Vec<String> {
        self.machine
            .context()
            .ledger
            .events(&order.id)
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }
}

pub(crate) fn raw_token(download_url: &str) -> &str {
    download_url
        .rsplit_once("/download/")
        .map(|(_, raw)| raw)
        .unwrap()
}

/// Drain a granted body into bytes.
pub(crate) fn body_bytes(fulfillment: Fulfillment) -> Vec<u8> {
    match fulfillment {
        Fulfillment::Granted(granted) => granted
            .body
            .map(|chunk| chunk.unwrap())
            .flatten()
            .collect(),
        Fulfillment::Denied(denial) => panic!("expected granted download, got {:?}", denial),
    }
}
