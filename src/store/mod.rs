//! The `BlockStore` capability: a keyed repository over [`Block`]s with
//! durability levels, pool-scoped listing and the `brighten` primitive
//! (spec §4.3).

pub mod disk;
pub mod memory;

use async_trait::async_trait;
use rand::{seq::SliceRandom, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tracing::{debug, instrument, warn};

use crate::{
    block::{Block, BlockDataType, BlockType},
    checksum::Checksum,
    error::Error,
    pool::PoolId,
    tuple,
};

pub use disk::DiskStore;
pub use memory::MemoryStore;

/// How durably a block must be persisted once `put` returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DurabilityLevel {
    /// No durability guarantee beyond process lifetime (e.g. `MemoryStore`).
    Ephemeral,
    /// Fsynced / crash-durable once `put` returns (e.g. `DiskStore`).
    Durable,
}

/// Options accompanying a `put`.
#[derive(Clone, Copy, Debug)]
pub struct PutOptions {
    pub durability: DurabilityLevel,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            durability: DurabilityLevel::Durable,
        }
    }
}

/// The three identifiers returned by a successful `brighten`.
#[derive(Clone, Debug)]
pub struct BrightenResult {
    pub brightened_key: Checksum,
    pub source_key: Checksum,
    pub random_keys: Vec<Checksum>,
}

/// Engine-wide parameters the distilled spec leaves as constants (spec §4.10).
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    pub tuple_size: u8,
    pub block_size: crate::block::BlockSize,
    pub durability: DurabilityLevel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tuple_size: 3,
            block_size: crate::block::BlockSize::Small,
            durability: DurabilityLevel::Durable,
        }
    }
}

/// A keyed repository mapping checksum -> block bytes.
///
/// Implementations MUST serialize concurrent writes to the same key (spec
/// §5): a `put` racing another `put` of the same key fails with
/// `BlockAlreadyExists` rather than silently overwriting.
#[async_trait]
pub trait BlockStore: Send + Sync {
    async fn put(&self, block: Block, options: PutOptions) -> Result<(), Error>;

    async fn get(&self, key: Checksum) -> Result<Block, Error>;

    async fn has(&self, key: Checksum) -> Result<bool, Error>;

    async fn delete(&self, key: Checksum) -> Result<(), Error>;

    /// All keys currently stored under `pool`.
    async fn list_by_pool(&self, pool: &PoolId) -> Result<Vec<Checksum>, Error>;

    /// All keys of a given size class, used by `brighten`'s peer selection.
    async fn list_by_size(&self, size: crate::block::BlockSize) -> Result<Vec<Checksum>, Error>;

    /// Select `count` distinct eligible peers of `source`'s size, XOR them
    /// together with the source, and store the result as a `Whitened` block.
    ///
    /// An eligible peer shares `source`'s `blockSize`, has a `blockDataType`
    /// other than `EphemeralStructuredData`, is not the source itself, and is
    /// not of kind CBL/ExtendedCBL/EncryptedCBL/EncryptedExtendedCBL/
    /// MultiEncrypted (spec §4.3, "eligible peer").
    #[instrument(skip(self, seed), fields(source = %source))]
    async fn brighten(&self, source: Checksum, count: usize, seed: Option<u64>) -> Result<BrightenResult, Error> {
        let source_block = self.get(source).await?;
        debug!(source = %source, size = ?source_block.size(), "brighten: fetched source block");

        let candidate_keys = self.list_by_size(source_block.size()).await?;
        let mut eligible = Vec::with_capacity(candidate_keys.len());
        for key in candidate_keys {
            if key == source {
                continue;
            }
            let block = self.get(key).await?;
            if is_eligible_peer(&block) {
                eligible.push(key);
            }
        }

        if eligible.len() < count {
            warn!(
                source = %source,
                needed = count,
                available = eligible.len(),
                "brighten: not enough eligible peers"
            );
            return Err(Error::InsufficientRandomBlocks {
                needed: count,
                available: eligible.len(),
            });
        }

        // Sort before shuffling so reproducibility depends only on the store's
        // content set and the seed, never on an implementation's iteration order.
        eligible.sort();

        let mut rng: Box<dyn RngCore> = match seed {
            Some(seed) => Box::new(ChaCha20Rng::seed_from_u64(seed)),
            None => Box::new(rand::thread_rng()),
        };
        eligible.shuffle(&mut rng);
        let chosen: Vec<Checksum> = eligible.into_iter().take(count).collect();

        let mut peers = Vec::with_capacity(chosen.len());
        for key in &chosen {
            peers.push(self.get(*key).await?);
        }

        let whitened = tuple::make_whitened(&source_block, &peers)?;
        let brightened_key = whitened.id();

        self.put(whitened, PutOptions::default()).await?;
        debug!(brightened = %brightened_key, source = %source, "brighten: stored whitened result");

        Ok(BrightenResult {
            brightened_key,
            source_key: source,
            random_keys: chosen,
        })
    }
}

fn is_eligible_peer(block: &Block) -> bool {
    if block.data_type() == BlockDataType::EphemeralStructuredData {
        return false;
    }
    !matches!(
        block.block_type(),
        BlockType::Cbl
            | BlockType::ExtendedCbl
            | BlockType::EncryptedCbl
            | BlockType::EncryptedExtendedCbl
            | BlockType::MultiEncrypted
    )
}

/// Helper shared by store implementations: reject a `put` up front per the
/// invariants common to every `BlockStore` (spec §4.3).
pub(crate) fn validate_put(block: &Block, expected_size: crate::block::BlockSize) -> Result<(), Error> {
    if block.data_type() == BlockDataType::EphemeralStructuredData {
        return Err(Error::CannotStoreEphemeralData);
    }
    if block.size() != expected_size {
        return Err(Error::BlockSizeMismatch {
            expected: expected_size.bytes(),
            received: block.size().bytes(),
        });
    }
    Ok(())
}
