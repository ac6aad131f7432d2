//! Tuple construction and the XOR engine (spec §4.4).
//!
//! A tuple is an ordered set of same-size blocks whose bytewise XOR recovers
//! (or produces) a payload block. Whitening and pool-scoped integrity both
//! build on the same `xor_bytes` primitive.

use bytes::Bytes;

use crate::{
    block::{Block, BlockDataType, BlockSize, BlockType},
    checksum::Checksum,
    error::Error,
    pool::{PoolId, PoolOracle},
};

/// An ordered, validated set of same-size blocks, optionally pool-scoped.
#[derive(Clone, Debug)]
pub struct Tuple {
    blocks: Vec<Block>,
    pool_id: Option<PoolId>,
}

impl Tuple {
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn pool_id(&self) -> Option<&PoolId> {
        self.pool_id.as_ref()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }
}

/// Construct a tuple. Every member must share `blockSize`; if `pool_id` is
/// set, every member's own pool must match it exactly (`PoolMismatch`
/// otherwise). Without a `pool_id`, members may carry differing pools.
pub fn new_tuple(blocks: Vec<Block>, pool_id: Option<PoolId>) -> Result<Tuple, Error> {
    assert!(
        !blocks.is_empty(),
        "a tuple constructed with zero blocks bypasses its own invariant"
    );

    let size = blocks[0].size();
    for block in &blocks {
        if block.size() != size {
            return Err(Error::BlockSizeMismatch {
                expected: size.bytes(),
                received: block.size().bytes(),
            });
        }
    }

    if let Some(pool) = &pool_id {
        for block in &blocks {
            if block.pool_id() != Some(pool) {
                return Err(Error::PoolMismatch {
                    tuple_pool: pool.as_str().to_string(),
                    block_pool: block.pool_id().map(|p| p.as_str().to_string()),
                });
            }
        }
    }

    Ok(Tuple { blocks, pool_id })
}

fn xor_bytes(blocks: &[&Block], expected_size: Option<BlockSize>) -> Result<(BlockSize, Vec<u8>), Error> {
    assert!(
        blocks.len() >= 2,
        "XOR reduction requires at least two blocks"
    );
    let size = expected_size.unwrap_or_else(|| blocks[0].size());
    let mut buf = vec![0u8; size.bytes()];
    for block in blocks {
        if block.size() != size {
            return Err(Error::BlockSizeMismatch {
                expected: size.bytes(),
                received: block.size().bytes(),
            });
        }
        let data = block.data()?;
        for (out, byte) in buf.iter_mut().zip(data) {
            *out ^= byte;
        }
    }
    Ok((size, buf))
}

/// Bytewise XOR of every input block into a new, freshly-checksummed block.
/// Requires at least two same-size inputs.
pub fn xor_reduce(blocks: &[Block]) -> Result<Block, Error> {
    let refs: Vec<&Block> = blocks.iter().collect();
    let (_, buf) = xor_bytes(&refs, None)?;
    Block::new(Bytes::from(buf), BlockType::Unknown, BlockDataType::RawData, None)
}

/// Combine `payload` with `whiteners` into a single `Whitened`-tagged block.
/// `recover_payload` is its inverse (XOR is its own involution).
pub fn make_whitened(payload: &Block, whiteners: &[Block]) -> Result<Block, Error> {
    let mut refs: Vec<&Block> = Vec::with_capacity(1 + whiteners.len());
    refs.push(payload);
    refs.extend(whiteners.iter());
    let (_, buf) = xor_bytes(&refs, Some(payload.size()))?;
    Block::new(
        Bytes::from(buf),
        BlockType::Whitened,
        BlockDataType::RawData,
        payload.pool_id().cloned(),
    )
}

/// Recover the original payload from a whitened block and its whiteners.
pub fn recover_payload(whitened: &Block, whiteners: &[Block]) -> Result<Block, Error> {
    let mut refs: Vec<&Block> = Vec::with_capacity(1 + whiteners.len());
    refs.push(whitened);
    refs.extend(whiteners.iter());
    let (_, buf) = xor_bytes(&refs, Some(whitened.size()))?;
    Block::new(
        Bytes::from(buf),
        BlockType::Raw,
        BlockDataType::RawData,
        whitened.pool_id().cloned(),
    )
}

/// Verify every member checksum is a recognized member of `pool` before any
/// store read occurs (spec §4.4, §4.6). Fails fast on the first miss.
pub async fn check_pool_integrity(
    oracle: &dyn PoolOracle,
    pool: &PoolId,
    members: &[Checksum],
) -> Result<(), Error> {
    for checksum in members {
        if !oracle.has_in_pool(pool, checksum).await? {
            return Err(Error::PoolIntegrityError(*checksum));
        }
    }
    Ok(())
}
