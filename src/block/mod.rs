//! The block model: a discriminated union of block kinds sharing one physical
//! representation (spec §3, §4.2).
//!
//! Rather than modeling each kind as a distinct type behind a trait object
//! (the source's class-hierarchy approach), every block is a single
//! [`Block`] struct carrying a [`BlockType`] tag; layout-dependent behavior
//! (header length, payload slicing) is computed from the tag plus the bytes
//! themselves, so there is no virtual dispatch on the hot XOR/read path.

pub mod cbl;
pub mod encrypted;
pub mod kind;
pub mod size;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::RngCore;

pub use self::{
    kind::{BlockDataType, BlockType},
    size::BlockSize,
};
use crate::{checksum::Checksum, error::Error, pool::PoolId};

/// A fixed-size, content-addressed, immutable byte buffer.
#[derive(Clone, Debug)]
pub struct Block {
    data: Bytes,
    id: Checksum,
    size: BlockSize,
    block_type: BlockType,
    block_data_type: BlockDataType,
    date_created: DateTime<Utc>,
    can_read: bool,
    can_persist: bool,
    pool_id: Option<PoolId>,
}

impl Block {
    /// Wrap already-framed bytes (the checksum is computed here, never
    /// supplied by the caller — `id` is always a derived property).
    pub(crate) fn new(
        data: Bytes,
        block_type: BlockType,
        block_data_type: BlockDataType,
        pool_id: Option<PoolId>,
    ) -> Result<Self, Error> {
        let size = BlockSize::from_length(data.len())?;
        let id = Checksum::calculate(&data);
        Ok(Self {
            data,
            id,
            size,
            block_type,
            block_data_type,
            date_created: Utc::now(),
            can_read: true,
            can_persist: block_data_type.is_persistable(),
            pool_id,
        })
    }

    /// Build a Raw block out of a plaintext payload no larger than `size`,
    /// padding the remainder with cryptographically random bytes (spec §4.2:
    /// "padding is cryptographically random").
    pub fn raw(
        payload: &[u8],
        size: BlockSize,
        pool_id: Option<PoolId>,
        rng: &mut impl RngCore,
    ) -> Result<Self, Error> {
        if payload.len() > size.bytes() {
            return Err(Error::DataLengthExceedsCapacity {
                length: payload.len(),
                capacity: size.bytes(),
            });
        }
        let mut buf = vec![0u8; size.bytes()];
        buf[..payload.len()].copy_from_slice(payload);
        rng.fill_bytes(&mut buf[payload.len()..]);
        Self::new(
            Bytes::from(buf),
            BlockType::Raw,
            BlockDataType::RawData,
            pool_id,
        )
    }

    /// Draw a block of fresh entropy, used as a whitener or `brighten` peer.
    pub fn random(size: BlockSize, pool_id: Option<PoolId>, rng: &mut impl RngCore) -> Self {
        let mut buf = vec![0u8; size.bytes()];
        rng.fill_bytes(&mut buf);
        // Construction from known-good, freshly generated data cannot fail.
        Self::new(
            Bytes::from(buf),
            BlockType::Random,
            BlockDataType::RawData,
            pool_id,
        )
        .expect("random block is always exactly one BlockSize")
    }

    /// Reconstitute a block previously read from a store. The checksum is
    /// recomputed and must equal `expected_id`, or `validate()` will fail later.
    pub fn from_stored(
        data: Bytes,
        expected_id: Checksum,
        block_type: BlockType,
        block_data_type: BlockDataType,
        date_created: DateTime<Utc>,
        pool_id: Option<PoolId>,
    ) -> Result<Self, Error> {
        let size = BlockSize::from_length(data.len())?;
        Ok(Self {
            data,
            id: expected_id,
            size,
            block_type,
            block_data_type,
            date_created,
            can_read: true,
            can_persist: block_data_type.is_persistable(),
            pool_id,
        })
    }

    pub fn size(&self) -> BlockSize {
        self.size
    }

    pub fn block_type(&self) -> BlockType {
        self.block_type
    }

    pub fn data_type(&self) -> BlockDataType {
        self.block_data_type
    }

    pub fn id(&self) -> Checksum {
        self.id
    }

    pub fn date_created(&self) -> DateTime<Utc> {
        self.date_created
    }

    pub fn can_read(&self) -> bool {
        self.can_read
    }

    pub fn can_persist(&self) -> bool {
        self.can_persist
    }

    pub fn pool_id(&self) -> Option<&PoolId> {
        self.pool_id.as_ref()
    }

    /// The entire block, exactly `size` bytes. Fails if `canRead` is false.
    pub fn data(&self) -> Result<&[u8], Error> {
        if !self.can_read {
            return Err(Error::BlockNotReadable);
        }
        Ok(&self.data)
    }

    /// Length in bytes of this layer's header, given the block's own framing.
    fn layer_header_len(&self) -> Result<usize, Error> {
        match self.block_type {
            BlockType::Raw | BlockType::Random | BlockType::Whitened => Ok(0),
            BlockType::Unknown | BlockType::Fec => Ok(0),
            // A handle's layer carries no header of its own; its entire
            // payload is the 64-byte checksum of the block it points at.
            BlockType::Handle => Ok(0),
            BlockType::Cbl => Ok(cbl::CBL_HEADER_LEN),
            BlockType::ExtendedCbl => cbl::extended_header_len(&self.data),
            BlockType::EncryptedOwned | BlockType::EncryptedCbl | BlockType::EncryptedExtendedCbl => {
                Ok(encrypted::ENCRYPTED_HEADER_LEN)
            }
            BlockType::MultiEncrypted => encrypted::multi_encrypted_header_len(&self.data),
        }
    }

    /// This layer's header bytes.
    pub fn layer_header_data(&self) -> Result<&[u8], Error> {
        let len = self.layer_header_len()?;
        Ok(&self.data[..len])
    }

    /// Bytes after this layer's header (and, for CBL kinds, before padding).
    pub fn layer_payload(&self) -> Result<&[u8], Error> {
        let len = self.layer_header_len()?;
        Ok(&self.data[len..])
    }

    /// Concatenation of every ancestor layer's header. This implementation
    /// does not model deeper-than-one-layer nesting (see DESIGN.md), so this
    /// is currently identical to [`Block::layer_header_data`].
    pub fn full_header_data(&self) -> Result<&[u8], Error> {
        self.layer_header_data()
    }

    /// Total header overhead in bytes.
    pub fn total_overhead(&self) -> Result<usize, Error> {
        self.layer_header_len()
    }

    /// Recompute the checksum over `data` and compare it to `id`.
    pub fn validate(&self) -> Result<(), Error> {
        let computed = Checksum::calculate(&self.data);
        if computed != self.id {
            return Err(Error::ChecksumMismatch {
                expected: self.id,
                computed,
            });
        }
        Ok(())
    }
}
