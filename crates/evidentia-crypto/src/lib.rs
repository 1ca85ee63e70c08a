//! # evidentia-crypto
//!
//! Crypto primitives shared by the Evidentia crates: SHA-256 digests,
//! canonical JSON, HMAC signing, AES-256-GCM for personal data, IP masking,
//! random token generation and the signed download-token scheme.
//!
//! Nothing here touches storage or performs I/O.

pub mod canonical;
pub mod cipher;
pub mod error;
pub mod hash;
pub mod mac;
pub mod mask;
pub mod random;
pub mod token;

pub use canonical::CanonicalBytes;
pub use cipher::PiiCipher;
pub use error::CryptoError;
pub use hash::{canonical_sha256, sha256_hex, StreamingDigest};
pub use mac::{constant_time_eq, hmac_sha256, hmac_sha256_hex, verify_hmac_sha256};
pub use mask::mask_ip;
pub use random::{license_key, order_suffix, random_token};
pub use token::{hash_token, IssuedToken, RedeemHasher, TokenPayload, TokenRejection, TokenSigner};
