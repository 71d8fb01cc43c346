//! MD5 digests, as used for the per-range `X-MD5` header and for the
//! leader/trailer digests bracketing each block in the cache data file.
//!
//! `spec.md` §1 lists "base64/MD5 primitives" among the external
//! collaborators this crate consumes rather than reinvents; the `md5`
//! and `hex` crates are that collaborator.

use crate::error::{Error, Result};

/// Length in bytes of a digest rendered as lowercase hex, matching the
/// `char[32]` / `char md5[32]` fields in spec §3 and §6.
pub const HEX_LEN: usize = 32;

/// An MD5 digest, always represented as 32 lowercase hex characters once
/// it leaves this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Digest([u8; 16]);

impl Digest {
    pub fn of(bytes: &[u8]) -> Self {
        Digest(md5::compute(bytes).0)
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 32-character hex digest, as received in an `X-MD5` header
    /// or read back from the cache index file. Rejects anything that
    /// isn't exactly 32 hex characters, per spec §3's `md5: char[32]`.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != HEX_LEN {
            return Err(Error::Io(format!(
                "malformed digest: expected {} hex characters, got {}",
                HEX_LEN,
                s.len()
            )));
        }
        let mut raw = [0u8; 16];
        hex::decode_to_slice(s, &mut raw)
            .map_err(|e| Error::Io(format!("malformed digest: {}", e)))?;
        Ok(Digest(raw))
    }
}

/// Incrementally hashes a fetched range body, mirroring the C
/// implementation's single running MD5 context fed first the bytes that
/// arrived alongside the response header, then each subsequently read
/// chunk (spec §4.6 step 4).
#[derive(Default)]
pub struct Hasher(md5::Context);

impl Hasher {
    pub fn new() -> Self {
        Hasher(md5::Context::new())
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.0.consume(bytes);
    }

    pub fn finalize(self) -> Digest {
        Digest(self.0.compute().0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_hex() {
        let d = Digest::of(b"hello world");
        let hex = d.to_hex();
        assert_eq!(hex.len(), HEX_LEN);
        assert_eq!(Digest::from_hex(&hex).unwrap(), d);
    }

    #[test]
    fn hasher_matches_one_shot() {
        let mut h = Hasher::new();
        h.update(b"hello ");
        h.update(b"world");
        assert_eq!(h.finalize(), Digest::of(b"hello world"));
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(Digest::from_hex("abcd").is_err());
    }

    #[test]
    fn known_vector() {
        // MD5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(Digest::of(b"").to_hex(), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
