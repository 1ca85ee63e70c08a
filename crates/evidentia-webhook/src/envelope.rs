//! Structural validation of provider notification envelopes.
//!
//! The envelope is checked against a JSON Schema document with the
//! `jsonschema` crate before anything is dispatched. All violations are
//! collected so the notification log shows the full failure set.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use evidentia_contracts::{EvidentiaError, EvidentiaResult};

/// Event types that drive order transitions.
pub const CAPTURE_COMPLETED: &str = "PAYMENT.CAPTURE.COMPLETED";
pub const CAPTURE_REFUNDED: &str = "PAYMENT.CAPTURE.REFUNDED";
pub const CAPTURE_REVERSED: &str = "PAYMENT.CAPTURE.REVERSED";
pub const DISPUTE_CREATED: &str = "CUSTOMER.DISPUTE.CREATED";

/// A structurally valid notification.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NotificationEnvelope {
    pub id: String,
    pub event_type: String,
    pub resource: Value,
    #[serde(default)]
    pub create_time: Option<String>,
}

impl NotificationEnvelope {
    /// Payment references that may identify the order, most specific first.
    ///
    /// Captures carry their own id and the provider order id; refunds and
    /// reversals link back to the capture; disputes list the disputed
    /// transactions.
    pub fn references(&self) -> Vec<String> {
        let resource = &self.resource;
        let mut refs = Vec::new();
        let mut push = |value: Option<&str>| {
            if let Some(v) = value.filter(|v| !v.is_empty()) {
                if !refs.iter().any(|r| r == v) {
                    refs.push(v.to_string());
                }
            }
        };

        push(resource.get("id").and_then(Value::as_str));
        push(
            resource
                .pointer("/supplementary_data/related_ids/order_id")
                .and_then(Value::as_str),
        );
        push(
            resource
                .pointer("/supplementary_data/related_ids/capture_id")
                .and_then(Value::as_str),
        );
        if let Some(links) = resource.get("links").and_then(Value::as_array) {
            for link in links {
                if link.get("rel").and_then(Value::as_str) == Some("up") {
                    push(
                        link.get("href")
                            .and_then(Value::as_str)
                            .and_then(|href| href.rsplit('/').next()),
                    );
                }
            }
        }
        if let Some(txs) = resource
            .get("disputed_transactions")
            .and_then(Value::as_array)
        {
            for tx in txs {
                push(tx.get("seller_transaction_id").and_then(Value::as_str));
            }
        }
        refs
    }

    /// `resource.<field>` as an owned string.
    pub fn resource_str(&self, field: &str) -> Option<String> {
        self.resource
            .get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// The envelope schema: an id, an event type and a resource object.
pub fn envelope_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "required": ["id", "event_type", "resource"],
        "properties": {
            "id": { "type": "string", "minLength": 1, "maxLength": 255 },
            "event_type": { "type": "string", "minLength": 1, "maxLength": 128 },
            "create_time": { "type": "string" },
            "resource": { "type": "object" }
        }
    })
}

/// Compiled envelope validator.
pub struct EnvelopeValidator {
    validator: jsonschema::Validator,
}

impl EnvelopeValidator {
    /// Compile the built-in envelope schema.
    pub fn new() -> EvidentiaResult<Self> {
        Self::with_schema(&envelope_schema())
    }

    /// Compile a custom schema document.
    ///
    /// Returns `EvidentiaError::ConfigError` if the document is not a valid
    /// schema; a broken schema must surface at startup.
    pub fn with_schema(schema: &Value) -> EvidentiaResult<Self> {
        let validator = jsonschema::validator_for(schema).map_err(|e| EvidentiaError::ConfigError {
            reason: format!("invalid notification envelope schema: {e}"),
        })?;
        Ok(Self { validator })
    }

    /// Validate `value` and decode it.
    ///
    /// On failure every violation is returned, formatted with its instance
    /// path.
    pub fn validate(&self, value: &Value) -> Result<NotificationEnvelope, Vec<String>> {
        let violations: Vec<String> = self
            .validator
            .iter_errors(value)
            .map(|error| format!("{}: {}", error.instance_path, error))
            .collect();
        if !violations.is_empty() {
            warn!(violations = violations.len(), "notification envelope failed validation");
            return Err(violations);
        }
        serde_json::from_value(value.clone()).map_err(|e| vec![format!("envelope decode: {e}")])
    }
}
