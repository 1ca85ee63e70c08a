//! Display masking for client IP addresses.

use std::net::IpAddr;

/// Mask an IP for display.
///
/// IPv4 keeps the first three octets (`203.0.113.x`); IPv6 keeps the first
/// three groups (`2001:db8:85a3::`). Anything unparsable becomes `unknown`.
pub fn mask_ip(raw: &str) -> String {
    match raw.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            let [a, b, c, _] = v4.octets();
            format!("{a}.{b}.{c}.x")
        }
        Ok(IpAddr::V6(v6)) => {
            let s = v6.segments();
            format!("{:x}:{:x}:{:x}::", s[0], s[1], s[2])
        }
        Err(_) => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_last_octet_is_hidden() {
        assert_eq!(mask_ip("203.0.113.42"), "203.0.113.x");
    }

    #[test]
    fn ipv6_keeps_three_groups() {
        assert_eq!(mask_ip("2001:db8:85a3::8a2e:370:7334"), "2001:db8:85a3::");
    }

    #[test]
    fn garbage_is_unknown() {
        assert_eq!(mask_ip("not-an-ip"), "unknown");
        assert_eq!(mask_ip(""), "unknown");
    }
}
