//! Pool namespaces used to scope tuple integrity checks.

use std::fmt;

use async_trait::async_trait;

use crate::{checksum::Checksum, error::Error};

const MAX_POOL_ID_LENGTH: usize = 64;

/// A validated pool identifier (`^[A-Za-z0-9_-]{1,64}$`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PoolId(String);

impl PoolId {
    pub fn new(raw: impl Into<String>) -> Result<Self, Error> {
        let raw = raw.into();
        if raw.is_empty() || raw.len() > MAX_POOL_ID_LENGTH {
            return Err(Error::MalformedCBL(format!(
                "pool id must be 1-{MAX_POOL_ID_LENGTH} bytes, got {}",
                raw.len()
            )));
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(Error::MalformedCBL(format!(
                "pool id {raw:?} contains characters outside [A-Za-z0-9_-]"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read-only oracle answering pool-membership questions, used to enforce the
/// pool-integrity invariant (spec §4.4, §4.6) ahead of any store read.
#[async_trait]
pub trait PoolOracle: Send + Sync {
    /// Whether `checksum` is a recognized member of `pool`.
    async fn has_in_pool(&self, pool: &PoolId, checksum: &Checksum) -> Result<bool, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_ids() {
        assert!(PoolId::new("Alpha-Pool_1").is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert!(PoolId::new("").is_err());
    }

    #[test]
    fn rejects_too_long() {
        assert!(PoolId::new("a".repeat(65)).is_err());
    }

    #[test]
    fn rejects_bad_characters() {
        assert!(PoolId::new("not a pool!").is_err());
    }
}
