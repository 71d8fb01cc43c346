//! Small helpers shared across modules that don't warrant their own file.

use std::time::Duration;

/// Compare a certificate name against the connection's target host,
/// tolerating a single trailing dot on either side (spec §4.1 step 3).
pub fn hostnames_match(cert_name: &str, host: &str) -> bool {
    cert_name.trim_end_matches('.').eq_ignore_ascii_case(host.trim_end_matches('.'))
}

/// Exponential backoff delay for the `attempts`-th `ECONNRESET` retry
/// (spec §5 "Cancellation and timeouts": `2^attempts` seconds).
pub fn reset_backoff(attempts: u32) -> Duration {
    Duration::from_secs(1u64 << attempts.min(16))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_with_one_trailing_dot_either_side() {
        assert!(hostnames_match("example.com.", "example.com"));
        assert!(hostnames_match("example.com", "example.com."));
        assert!(hostnames_match("Example.COM", "example.com"));
    }

    #[test]
    fn rejects_different_hosts() {
        assert!(!hostnames_match("example.com", "example.org"));
    }

    #[test]
    fn backoff_doubles_and_is_capped() {
        assert_eq!(reset_backoff(0), Duration::from_secs(1));
        assert_eq!(reset_backoff(3), Duration::from_secs(8));
        assert_eq!(reset_backoff(20), Duration::from_secs(1 << 16));
    }
}
