//! Private-address classification used by the enrichment shortcut (spec §4.3).

use std::net::IpAddr;

/// True if `ip` is RFC1918, loopback, link-local, or multicast.
pub fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_multicast()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xffc0) == 0xfe80 // link-local
                || (v6.segments()[0] & 0xfe00) == 0xfc00 // unique local
        }
    }
}

/// Fixed metadata attached for private destinations (spec §4.3).
pub const PRIVATE_COUNTRY_CODE: &str = "PRIVATE";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc1918_is_private() {
        assert!(is_private(&"192.168.1.5".parse().unwrap()));
        assert!(is_private(&"10.0.0.2".parse().unwrap()));
        assert!(is_private(&"172.16.0.1".parse().unwrap()));
    }

    #[test]
    fn loopback_and_link_local_are_private() {
        assert!(is_private(&"127.0.0.1".parse().unwrap()));
        assert!(is_private(&"169.254.1.1".parse().unwrap()));
        assert!(is_private(&"::1".parse().unwrap()));
    }

    #[test]
    fn multicast_is_private() {
        assert!(is_private(&"224.0.0.1".parse().unwrap()));
    }

    #[test]
    fn public_is_not_private() {
        assert!(!is_private(&"8.8.8.8".parse().unwrap()));
        assert!(!is_private(&"185.220.101.1".parse().unwrap()));
    }
}
