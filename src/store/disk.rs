//! A disk-backed `BlockStore` using a two-nibble fanout directory layout
//! (spec §6), grounded on the block-directory pattern of a content-addressed
//! backup tool: `<root>/<sizeLabel>/<hex[0]>/<hex[1]>/<hexChecksum>` holds
//! block bytes, with a `<hexChecksum>.m.json` sidecar for metadata. Unlike
//! that reference, every operation here is async (`tokio::fs`) and writes to
//! the same key are serialized with an in-process lock table (spec §5: the
//! store is single-writer-per-process).

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::Mutex};
use tracing::{debug, warn};

use super::{validate_put, BlockStore, PutOptions};
use crate::{
    block::{Block, BlockDataType, BlockSize, BlockType},
    checksum::Checksum,
    error::Error,
    pool::PoolId,
};

#[derive(Serialize, Deserialize)]
struct BlockMetadata {
    block_type: String,
    block_data_type: String,
    block_size: usize,
    /// Plaintext length for Encrypted/MultiEncrypted blocks, when known to
    /// the caller at `put` time; `None` for every other kind.
    length_before_encryption: Option<u64>,
    date_created: DateTime<Utc>,
    pool_id: Option<String>,
}

/// A disk-backed store implementing the filesystem layout of spec §6.
pub struct DiskStore {
    root: PathBuf,
    block_size: BlockSize,
    locks: Mutex<HashMap<Checksum, Arc<Mutex<()>>>>,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>, block_size: BlockSize) -> Self {
        Self {
            root: root.into(),
            block_size,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, key: Checksum) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn dir_for(&self, size: BlockSize, hex: &str) -> PathBuf {
        self.root.join(size.label()).join(&hex[0..1]).join(&hex[1..2])
    }

    fn block_path(&self, size: BlockSize, hex: &str) -> PathBuf {
        self.dir_for(size, hex).join(hex)
    }

    fn metadata_path(&self, size: BlockSize, hex: &str) -> PathBuf {
        self.dir_for(size, hex).join(format!("{hex}.m.json"))
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), Error> {
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, bytes).await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    async fn read_metadata(&self, key: Checksum) -> Result<BlockMetadata, Error> {
        let hex = key.hex();
        let path = self.metadata_path(self.block_size, &hex);
        let bytes = fs::read(&path).await.map_err(|_| Error::KeyNotFound(key))?;
        serde_json::from_slice(&bytes).map_err(|_| Error::KeyNotFound(key))
    }
}

#[async_trait]
impl BlockStore for DiskStore {
    async fn put(&self, block: Block, _options: PutOptions) -> Result<(), Error> {
        validate_put(&block, self.block_size)?;

        let key = block.id();
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;

        let hex = key.hex();
        let dir = self.dir_for(block.size(), &hex);
        fs::create_dir_all(&dir).await?;

        let block_path = self.block_path(block.size(), &hex);
        if fs::metadata(&block_path).await.is_ok() {
            return Err(Error::BlockAlreadyExists(key));
        }

        let metadata = BlockMetadata {
            block_type: block.block_type().as_str().to_string(),
            block_data_type: block.data_type().as_str().to_string(),
            block_size: block.size().bytes(),
            length_before_encryption: None,
            date_created: block.date_created(),
            pool_id: block.pool_id().map(|p| p.as_str().to_string()),
        };
        let metadata_bytes = serde_json::to_vec(&metadata).map_err(|e| Error::Io(std::io::Error::other(e)))?;

        self.write_atomic(&block_path, block.data()?).await?;
        self.write_atomic(&self.metadata_path(block.size(), &hex), &metadata_bytes)
            .await?;

        debug!(key = %key, size = ?block.size(), "disk store: put");
        Ok(())
    }

    async fn get(&self, key: Checksum) -> Result<Block, Error> {
        let metadata = self.read_metadata(key).await?;
        let size = BlockSize::from_length(metadata.block_size)?;
        let hex = key.hex();
        let bytes = fs::read(self.block_path(size, &hex))
            .await
            .map_err(|_| Error::KeyNotFound(key))?;

        let block_type = BlockType::parse(&metadata.block_type).ok_or_else(|| {
            warn!(key = %key, "disk store: unparseable blockType in metadata sidecar");
            Error::KeyNotFound(key)
        })?;
        let block_data_type = BlockDataType::parse(&metadata.block_data_type).ok_or_else(|| {
            warn!(key = %key, "disk store: unparseable blockDataType in metadata sidecar");
            Error::KeyNotFound(key)
        })?;
        let pool_id = metadata.pool_id.map(PoolId::new).transpose()?;

        let block = Block::from_stored(
            Bytes::from(bytes),
            key,
            block_type,
            block_data_type,
            metadata.date_created,
            pool_id,
        )?;
        block.validate()?;
        debug!(key = %key, "disk store: get");
        Ok(block)
    }

    async fn has(&self, key: Checksum) -> Result<bool, Error> {
        let hex = key.hex();
        Ok(fs::metadata(self.block_path(self.block_size, &hex)).await.is_ok())
    }

    async fn delete(&self, key: Checksum) -> Result<(), Error> {
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;

        let hex = key.hex();
        let block_path = self.block_path(self.block_size, &hex);
        fs::remove_file(&block_path).await.map_err(|_| Error::KeyNotFound(key))?;
        let _ = fs::remove_file(self.metadata_path(self.block_size, &hex)).await;
        debug!(key = %key, "disk store: delete");
        Ok(())
    }

    async fn list_by_pool(&self, pool: &PoolId) -> Result<Vec<Checksum>, Error> {
        let mut keys = Vec::new();
        let size_dir = self.root.join(self.block_size.label());
        let mut first_level = match fs::read_dir(&size_dir).await {
            Ok(rd) => rd,
            Err(_) => return Ok(keys),
        };
        while let Some(first) = first_level.next_entry().await? {
            let mut second_level = fs::read_dir(first.path()).await?;
            while let Some(second) = second_level.next_entry().await? {
                let mut files = fs::read_dir(second.path()).await?;
                while let Some(entry) = files.next_entry().await? {
                    let file_name = entry.file_name();
                    let Some(name) = file_name.to_str() else { continue };
                    if name.ends_with(".m.json") || name.ends_with(".tmp") {
                        continue;
                    }
                    let Ok(checksum) = Checksum::from_hex(name) else { continue };
                    if let Ok(metadata) = self.read_metadata(checksum).await {
                        if metadata.pool_id.as_deref() == Some(pool.as_str()) {
                            keys.push(checksum);
                        }
                    }
                }
            }
        }
        Ok(keys)
    }

    async fn list_by_size(&self, size: BlockSize) -> Result<Vec<Checksum>, Error> {
        let mut keys = Vec::new();
        let size_dir = self.root.join(size.label());
        let mut first_level = match fs::read_dir(&size_dir).await {
            Ok(rd) => rd,
            Err(_) => return Ok(keys),
        };
        while let Some(first) = first_level.next_entry().await? {
            let mut second_level = fs::read_dir(first.path()).await?;
            while let Some(second) = second_level.next_entry().await? {
                let mut files = fs::read_dir(second.path()).await?;
                while let Some(entry) = files.next_entry().await? {
                    let file_name = entry.file_name();
                    let Some(name) = file_name.to_str() else { continue };
                    if name.ends_with(".m.json") || name.ends_with(".tmp") {
                        continue;
                    }
                    if let Ok(checksum) = Checksum::from_hex(name) {
                        keys.push(checksum);
                    }
                }
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_round_trip_uses_fanout_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path(), BlockSize::Message);
        let mut rng = rand::thread_rng();
        let block = Block::raw(b"owner-free", BlockSize::Message, None, &mut rng).unwrap();
        let key = block.id();
        let hex = key.hex();

        store.put(block, PutOptions::default()).await.unwrap();

        let expected_path = dir
            .path()
            .join("message")
            .join(&hex[0..1])
            .join(&hex[1..2])
            .join(&hex);
        assert!(expected_path.exists());
        assert!(expected_path.with_file_name(format!("{hex}.m.json")).exists());

        let fetched = store.get(key).await.unwrap();
        assert_eq!(fetched.id(), key);
    }

    #[tokio::test]
    async fn put_rejects_duplicate_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path(), BlockSize::Message);
        let mut rng = rand::thread_rng();
        let block = Block::raw(b"hello", BlockSize::Message, None, &mut rng).unwrap();

        store.put(block.clone(), PutOptions::default()).await.unwrap();
        let err = store.put(block, PutOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::BlockAlreadyExists(_)));
    }

    #[tokio::test]
    async fn delete_then_get_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path(), BlockSize::Message);
        let mut rng = rand::thread_rng();
        let block = Block::raw(b"hello", BlockSize::Message, None, &mut rng).unwrap();
        let key = block.id();

        store.put(block, PutOptions::default()).await.unwrap();
        store.delete(key).await.unwrap();
        assert!(matches!(store.get(key).await.unwrap_err(), Error::KeyNotFound(_)));
    }

    #[tokio::test]
    async fn list_by_pool_finds_only_matching_members() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path(), BlockSize::Message);
        let mut rng = rand::thread_rng();
        let pool_a = PoolId::new("pool-a").unwrap();
        let pool_b = PoolId::new("pool-b").unwrap();

        let a = Block::raw(b"a", BlockSize::Message, Some(pool_a.clone()), &mut rng).unwrap();
        let a_key = a.id();
        let b = Block::raw(b"b", BlockSize::Message, Some(pool_b), &mut rng).unwrap();

        store.put(a, PutOptions::default()).await.unwrap();
        store.put(b, PutOptions::default()).await.unwrap();

        let members = store.list_by_pool(&pool_a).await.unwrap();
        assert_eq!(members, vec![a_key]);
    }
}
