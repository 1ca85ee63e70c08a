//! Canonical JSON for anything that enters a hash.
//!
//! Output rules:
//!   1. object keys sorted lexicographically (byte order), at every depth
//!   2. compact separators, no whitespace
//!   3. floats rejected; amounts are integers or strings
//!   4. strings escaped exactly as `serde_json` escapes them
//!
//! Canonical bytes exist only to be hashed. They are never parsed back or
//! shown to humans.

use serde::Serialize;
use serde_json::Value;

use crate::error::CryptoError;

/// Bytes produced exclusively by canonical serialization.
///
/// The inner buffer is private; `CanonicalBytes::new` is the only way to
/// build one, so every digest in the workspace goes through the same rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalBytes(Vec<u8>);

impl CanonicalBytes {
    /// Canonicalize any serializable value.
    pub fn new(obj: &impl Serialize) -> Result<Self, CryptoError> {
        let value = serde_json::to_value(obj)
            .map_err(|e| CryptoError::Canonicalization(e.to_string()))?;
        Self::from_value(&value)
    }

    /// Canonicalize an already-parsed JSON value.
    pub fn from_value(value: &Value) -> Result<Self, CryptoError> {
        let mut out = Vec::with_capacity(128);
        write_canonical(value, &mut out)?;
        Ok(Self(out))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl AsRef<[u8]> for CanonicalBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<(), CryptoError> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => {
            if n.is_f64() {
                return Err(CryptoError::FloatRejected(n.to_string()));
            }
            out.extend_from_slice(n.to_string().as_bytes());
        }
        Value::String(s) => write_string(s, out)?,
        Value::Array(items) => {
            out.push(b'[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            // Sort explicitly; serde_json's map order depends on crate features.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (idx, key) in keys.into_iter().enumerate() {
                if idx > 0 {
                    out.push(b',');
                }
                write_string(key, out)?;
                out.push(b':');
                write_canonical(&map[key.as_str()], out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

fn write_string(s: &str, out: &mut Vec<u8>) -> Result<(), CryptoError> {
    let escaped =
        serde_json::to_string(s).map_err(|e| CryptoError::Canonicalization(e.to_string()))?;
    out.extend_from_slice(escaped.as_bytes());
    Ok(())
}
