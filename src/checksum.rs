//! SHA3-512 checksums: the content address every block, tuple member and CBL is keyed by.

use std::fmt;

use sha3::{Digest, Sha3_512};
use subtle::ConstantTimeEq;

use crate::error::Error;

/// Length in bytes of a [`Checksum`] (SHA3-512 output width).
pub const CHECKSUM_LENGTH: usize = 64;

/// A fixed-width, content-derived identifier.
///
/// Two checksums compare equal iff every byte matches; the comparison runs in
/// constant time so that checksum checks never leak timing information about
/// where a mismatch occurred.
#[derive(Clone, Copy)]
pub struct Checksum([u8; CHECKSUM_LENGTH]);

impl Checksum {
    /// Compute the SHA3-512 checksum of `bytes`.
    pub fn calculate(bytes: &[u8]) -> Self {
        let mut hasher = Sha3_512::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        let mut out = [0u8; CHECKSUM_LENGTH];
        out.copy_from_slice(&digest);
        Self(out)
    }

    /// View the raw bytes.
    pub fn as_bytes(&self) -> &[u8; CHECKSUM_LENGTH] {
        &self.0
    }

    /// Build a checksum from an exact-length byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != CHECKSUM_LENGTH {
            return Err(Error::InvalidLength {
                expected: CHECKSUM_LENGTH,
                received: bytes.len(),
            });
        }
        let mut out = [0u8; CHECKSUM_LENGTH];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// Lower-case hex encoding of the checksum.
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a lower- or upper-case hex string into a checksum.
    pub fn from_hex(s: &str) -> Result<Self, Error> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidHex(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl PartialEq for Checksum {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for Checksum {}

impl PartialOrd for Checksum {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Checksum {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl std::hash::Hash for Checksum {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Checksum").field(&self.hex()).finish()
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

impl std::str::FromStr for Checksum {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn determinism() {
        let a = Checksum::calculate(b"owner-free");
        let b = Checksum::calculate(b"owner-free");
        assert_eq!(a, b);
    }

    #[test]
    fn different_inputs_differ() {
        let a = Checksum::calculate(b"alpha");
        let b = Checksum::calculate(b"beta");
        assert_ne!(a, b);
    }

    #[test]
    fn hex_round_trip() {
        let c = Checksum::calculate(b"round-trip");
        let parsed = Checksum::from_hex(&c.hex()).unwrap();
        assert_eq!(c, parsed);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = Checksum::from_bytes(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, Error::InvalidLength { .. }));
    }

    #[test]
    fn rejects_malformed_hex() {
        let err = Checksum::from_hex("not-hex!!").unwrap_err();
        assert!(matches!(err, Error::InvalidHex(_)));
    }
}
