//! # evidentia-webhook
//!
//! Payment-provider notification ingestion for Evidentia.
//!
//! [`NotificationIngester`] turns a raw provider POST into at most one order
//! transition. It verifies the provider signature ([`HmacProviderVerifier`]),
//! validates the envelope with a JSON Schema ([`EnvelopeValidator`]), and
//! uses the provider event id as an idempotency key, so a notification
//! delivered any number of times changes the order once.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use evidentia_webhook::{HmacProviderVerifier, NotificationIngester, SIGNATURE_HEADER};
//!
//! let verifier = HmacProviderVerifier::new(secret, tolerance, clock);
//! let ingester = NotificationIngester::new(machine, Arc::new(verifier))?;
//! let outcome = ingester.ingest(&body, headers.get(SIGNATURE_HEADER))?;
//! ```

pub mod envelope;
pub mod ingest;
pub mod signature;

pub use envelope::{EnvelopeValidator, NotificationEnvelope};
pub use ingest::{IngestOutcome, NotificationIngester};
pub use signature::{HmacProviderVerifier, SIGNATURE_HEADER};

// ── Tests ─────────────────────────────────────────────────────────────────────
