//! Randomness from the OS-seeded thread RNG.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{Rng, RngCore};

const LICENSE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub fn random_array<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// `len` random bytes encoded as unpadded base64url.
pub fn random_token(len: usize) -> String {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// A license key in `XXXX-XXXX-XXXX-XXXX` form.
///
/// The alphabet leaves out `0`, `O`, `1` and `I` so keys survive being read
/// aloud or retyped.
pub fn license_key() -> String {
    let mut rng = rand::thread_rng();
    let groups: Vec<String> = (0..4)
        .map(|_| {
            (0..4)
                .map(|_| LICENSE_ALPHABET[rng.gen_range(0..LICENSE_ALPHABET.len())] as char)
                .collect()
        })
        .collect();
    groups.join("-")
}

/// Uppercase hex suffix used in human-facing order numbers.
pub fn order_suffix() -> String {
    hex::encode_upper(random_array::<3>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn license_key_has_four_groups_of_four() {
        let key = license_key();
        let groups: Vec<&str> = key.split('-').collect();
        assert_eq!(groups.len(), 4);
        for group in groups {
            assert_eq!(group.len(), 4);
            assert!(group.bytes().all(|b| LICENSE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn random_tokens_are_url_safe_and_distinct() {
        let a = random_token(32);
        let b = random_token(32);
        assert_ne!(a, b);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn order_suffix_is_six_uppercase_hex_chars() {
        let suffix = order_suffix();
        assert_eq!(suffix.len(), 6);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }
}
