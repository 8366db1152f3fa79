//! Auth gating helpers: loopback/private-IP detection for the
//! localhost-bypass and plain-ws:// policy, and a constant-time token
//! comparison so unequal-length-in-time isn't leaked.

use std::net::IpAddr;

/// True for loopback, IPv4-private, and IPv6 ULA/link-local addresses.
///
/// Covers: 127.0.0.0/8, ::1, ::ffff:127.0.0.1, 10.0.0.0/8, 172.16.0.0/12,
/// 192.168.0.0/16, 169.254.0.0/16, fc00::/7, fe80::/10.
pub fn is_local_address(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.octets()[0] == 10
                || (v4.octets()[0] == 172 && (16..=31).contains(&v4.octets()[1]))
                || (v4.octets()[0] == 192 && v4.octets()[1] == 168)
                || (v4.octets()[0] == 169 && v4.octets()[1] == 254)
        }
        IpAddr::V6(v6) => {
            if v6.is_loopback() {
                return true;
            }
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_local_address(IpAddr::V4(v4));
            }
            let segs = v6.segments();
            // fc00::/7 (ULA): top 7 bits are 1111110
            if (segs[0] & 0xfe00) == 0xfc00 {
                return true;
            }
            // fe80::/10 (link-local)
            if (segs[0] & 0xffc0) == 0xfe80 {
                return true;
            }
            false
        }
    }
}

/// Constant-time equality check for auth tokens, so comparison time doesn't
/// leak information about where two strings first differ. Not `subtle`-crate
/// constant time, but the standard XOR-accumulate technique: every byte of
/// both inputs is compared regardless of an early mismatch, and the final
/// decision is a single branch on the accumulator.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let len_ok = a.len() == b.len();
    let n = a.len().max(b.len());
    let mut acc: u8 = if len_ok { 0 } else { 1 };
    for i in 0..n {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        acc |= x ^ y;
    }
    acc == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn loopback_and_private_are_local() {
        let locals = [
            "127.0.0.1",
            "127.255.255.255",
            "::1",
            "::ffff:127.0.0.1",
            "10.0.0.1",
            "172.16.0.0",
            "172.31.255.255",
            "192.168.1.1",
            "169.254.1.1",
        ];
        for s in locals {
            let ip: IpAddr = s.parse().unwrap();
            assert!(is_local_address(ip), "{s} should be local");
        }
        assert!(is_local_address(IpAddr::V6("fc00::1".parse::<Ipv6Addr>().unwrap())));
        assert!(is_local_address(IpAddr::V6("fd00::1".parse::<Ipv6Addr>().unwrap())));
        assert!(is_local_address(IpAddr::V6("fe80::abc".parse::<Ipv6Addr>().unwrap())));
    }

    #[test]
    fn public_addresses_are_not_local() {
        let publics = ["8.8.8.8", "172.15.0.1", "172.32.0.1", "2001:db8::"];
        for s in publics {
            let ip: IpAddr = s.parse().unwrap();
            assert!(!is_local_address(ip), "{s} should not be local");
        }
        assert!(!is_local_address(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1))));
    }

    #[test]
    fn constant_time_eq_matches_and_mismatches() {
        assert!(constant_time_eq("secret-token", "secret-token"));
        assert!(!constant_time_eq("secret-token", "secret-toknx"));
        assert!(!constant_time_eq("short", "much-longer-value"));
    }
}
