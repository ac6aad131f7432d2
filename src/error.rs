//! The single tagged error enumeration for the whole crate (spec §7).
//!
//! The *kind* of an error is the contract callers rely on; the message is for humans.

use crate::checksum::Checksum;

/// Errors surfaced by any operation in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("block size {0} does not match a known `BlockSize` variant")]
    InvalidBlockSize(usize),

    #[error("checksum must be exactly {expected} bytes, got {received}")]
    InvalidLength { expected: usize, received: usize },

    #[error("malformed hex string: {0}")]
    InvalidHex(String),

    #[error("checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: Checksum, computed: Checksum },

    #[error("block size mismatch: expected {expected}, got {received}")]
    BlockSizeMismatch { expected: usize, received: usize },

    #[error("block is not readable (canRead == false)")]
    BlockNotReadable,

    #[error("a block already exists for checksum {0}")]
    BlockAlreadyExists(Checksum),

    #[error("no block found for checksum {0}")]
    KeyNotFound(Checksum),

    #[error("operation not supported by this store")]
    NotSupported,

    #[error("ephemeral structured data may never be persisted")]
    CannotStoreEphemeralData,

    #[error("data length {length} exceeds block capacity {capacity}")]
    DataLengthExceedsCapacity { length: usize, capacity: usize },

    #[error("address count {count} exceeds CBL capacity {capacity} for this block size")]
    CapacityExceeded { count: usize, capacity: usize },

    #[error("block's pool {block_pool:?} does not match tuple pool {tuple_pool}")]
    PoolMismatch {
        tuple_pool: String,
        block_pool: Option<String>,
    },

    #[error("pool integrity check failed: checksum {0} is not a member of the pool")]
    PoolIntegrityError(Checksum),

    #[error("only {available} eligible whitener blocks available, need {needed}")]
    InsufficientRandomBlocks { needed: usize, available: usize },

    #[error("malformed CBL: {0}")]
    MalformedCBL(String),

    #[error("CBL signature is invalid or the creator is unknown")]
    SignatureInvalid,

    #[error("CBL dateCreated is in the future")]
    DateInFuture,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("IV must be exactly {expected} bytes, got {received}")]
    InvalidIVLength { expected: usize, received: usize },

    #[error("authentication tag must be exactly {expected} bytes, got {received}")]
    InvalidAuthTagLength { expected: usize, received: usize },

    #[error("ephemeral public key must be exactly {expected} bytes, got {received}")]
    InvalidEphemeralPublicKeyLength { expected: usize, received: usize },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
