//! Lazy reconstruction of a file from a CBL (spec §4.6).
//!
//! Tuples are fetched and XOR-reduced one at a time as the stream is polled,
//! mirroring the reference stack's `async-stream`-based lazy block trees. The
//! stream aborts on the first error and never emits a partial tuple's bytes;
//! it is not restartable.

use std::sync::Arc;

use async_stream::try_stream;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use tracing::{debug, error};
use x25519_dalek::StaticSecret;

use crate::{
    block::{cbl, encrypted, Block, BlockType},
    checksum::Checksum,
    error::Error,
    identity::CreatorDirectory,
    pool::PoolOracle,
    store::BlockStore,
    tuple,
};

/// Knobs for a single reconstruction, beyond the CBL and store themselves.
#[derive(Clone, Default)]
pub struct ReconstructionOptions {
    /// When set, every address is checked against this oracle before any
    /// fetch — but only if the CBL block itself carries a `poolId`.
    pub pool_oracle: Option<Arc<dyn PoolOracle>>,
    /// When set, each recovered payload is treated as a single-recipient
    /// Encrypted block and decrypted with this key before being emitted.
    pub decrypt_secret: Option<Arc<StaticSecret>>,
}

/// Open a lazy byte stream reconstructing the file described by `cbl_block`.
///
/// A new call is required to re-read; the returned stream cannot be rewound.
pub fn open(
    cbl_block: Block,
    store: Arc<dyn BlockStore>,
    directory: Arc<dyn CreatorDirectory>,
    options: ReconstructionOptions,
    now: DateTime<Utc>,
) -> impl Stream<Item = Result<Bytes, Error>> {
    try_stream! {
        let contents = cbl::decode(&cbl_block, directory.as_ref(), now).map_err(|e| {
            error!(error = %e, "reconstruction: CBL validation failed");
            e
        })?;
        let tuple_size = contents.tuple_size as usize;

        if let (Some(oracle), Some(pool)) = (options.pool_oracle.as_deref(), cbl_block.pool_id()) {
            tuple::check_pool_integrity(oracle, pool, &contents.addresses)
                .await
                .map_err(|e| {
                    error!(error = %e, "reconstruction: pool integrity check failed");
                    e
                })?;
        }

        let tuple_count = contents.addresses.len() / tuple_size;
        let mut remaining = contents.original_data_length as usize;

        for tuple_index in 0..tuple_count {
            let start = tuple_index * tuple_size;
            let mut members = Vec::with_capacity(tuple_size);
            for address in &contents.addresses[start..start + tuple_size] {
                let block = fetch_member(store.as_ref(), *address).await?;
                members.push(block);
            }

            let recovered = tuple::xor_reduce(&members)?;
            debug!(tuple = tuple_index, "reconstruction: recovered payload block");

            let layer_capacity = match options.decrypt_secret.as_deref() {
                Some(_) => recovered.size().bytes() - encrypted::ENCRYPTED_HEADER_LEN,
                None => recovered.size().bytes(),
            };
            let take = remaining.min(layer_capacity);

            let mut payload_bytes = if let Some(secret) = options.decrypt_secret.as_deref() {
                let synthetic = Block::from_stored(
                    Bytes::copy_from_slice(recovered.data()?),
                    Checksum::calculate(recovered.data()?),
                    BlockType::EncryptedOwned,
                    crate::block::BlockDataType::EncryptedData,
                    recovered.date_created(),
                    None,
                )?;
                encrypted::decrypt(&synthetic, secret, take)?
            } else {
                recovered.data()?.to_vec()
            };

            payload_bytes.truncate(take);
            remaining -= take;
            yield Bytes::from(payload_bytes);
        }
    }
}

async fn fetch_member(store: &dyn BlockStore, address: Checksum) -> Result<Block, Error> {
    let block = store.get(address).await.map_err(|e| {
        error!(address = %address, error = %e, "reconstruction: failed to fetch tuple member");
        e
    })?;
    debug!(address = %address, "reconstruction: fetched tuple member");
    Ok(block)
}
