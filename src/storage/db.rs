//! Block bodies by hash, and the main-chain height index
//!
//! Storage is a plain key-value lookup. The sled backend keeps two trees:
//! `blocks` (hash -> bincode block) and `heights` (big-endian height -> hash).

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use sled::{Db, Tree};
use thiserror::Error;

use crate::consensus::Block;
use crate::crypto::Hash;
use crate::error::ErrorClass;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled: {0}")]
    Sled(#[from] sled::Error),
    #[error("codec: {0}")]
    Codec(#[from] bincode::Error),
    #[error("corrupt entry under key {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Fatal
    }
}

/// Block body lookup
pub trait BlockStore: Send + Sync {
    fn put_block(&self, block: &Block) -> Result<(), StoreError>;

    fn get_block(&self, hash: &Hash) -> Result<Option<Block>, StoreError>;

    fn contains(&self, hash: &Hash) -> Result<bool, StoreError> {
        Ok(self.get_block(hash)?.is_some())
    }

    /// Record `hash` as the main-chain block at `height`
    fn set_main_chain(&self, height: u64, hash: &Hash) -> Result<(), StoreError>;

    fn main_chain_hash(&self, height: u64) -> Result<Option<Hash>, StoreError>;

    /// Forget main-chain entries above `height`
    fn truncate_main_chain(&self, height: u64) -> Result<(), StoreError>;
}

/// In-process store for tests and ephemeral nodes
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    blocks: RwLock<HashMap<Hash, Block>>,
    heights: RwLock<HashMap<u64, Hash>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}

impl BlockStore for MemoryBlockStore {
    fn put_block(&self, block: &Block) -> Result<(), StoreError> {
        self.blocks.write().insert(block.hash(), block.clone());
        Ok(())
    }

    fn get_block(&self, hash: &Hash) -> Result<Option<Block>, StoreError> {
        Ok(self.blocks.read().get(hash).cloned())
    }

    fn contains(&self, hash: &Hash) -> Result<bool, StoreError> {
        Ok(self.blocks.read().contains_key(hash))
    }

    fn set_main_chain(&self, height: u64, hash: &Hash) -> Result<(), StoreError> {
        self.heights.write().insert(height, *hash);
        Ok(())
    }

    fn main_chain_hash(&self, height: u64) -> Result<Option<Hash>, StoreError> {
        Ok(self.heights.read().get(&height).copied())
    }

    fn truncate_main_chain(&self, height: u64) -> Result<(), StoreError> {
        self.heights.write().retain(|h, _| *h <= height);
        Ok(())
    }
}

/// Sled-backed store
#[derive(Debug, Clone)]
pub struct SledBlockStore {
    db: Db,
    blocks: Tree,
    heights: Tree,
}

impl SledBlockStore {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let blocks = db.open_tree("blocks")?;
        let heights = db.open_tree("heights")?;
        Ok(Self { db, blocks, heights })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

impl BlockStore for SledBlockStore {
    fn put_block(&self, block: &Block) -> Result<(), StoreError> {
        let value = bincode::serialize(block)?;
        self.blocks.insert(block.hash().0, value)?;
        Ok(())
    }

    fn get_block(&self, hash: &Hash) -> Result<Option<Block>, StoreError> {
        match self.blocks.get(hash.0)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn contains(&self, hash: &Hash) -> Result<bool, StoreError> {
        Ok(self.blocks.contains_key(hash.0)?)
    }

    fn set_main_chain(&self, height: u64, hash: &Hash) -> Result<(), StoreError> {
        self.heights.insert(height.to_be_bytes(), hash.0.to_vec())?;
        Ok(())
    }

    fn main_chain_hash(&self, height: u64) -> Result<Option<Hash>, StoreError> {
        match self.heights.get(height.to_be_bytes())? {
            Some(bytes) => {
                let raw: [u8; 32] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| StoreError::Corrupt(format!("height {height}")))?;
                Ok(Some(Hash(raw)))
            }
            None => Ok(None),
        }
    }

    fn truncate_main_chain(&self, height: u64) -> Result<(), StoreError> {
        let Some(start) = height.checked_add(1) else {
            return Ok(());
        };
        let stale: Vec<_> = self
            .heights
            .range(start.to_be_bytes()..)
            .keys()
            .collect::<Result<Vec<_>, sled::Error>>()?;
        for key in stale {
            self.heights.remove(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterSet;

    fn genesis() -> Block {
        ParameterSet::testnet().genesis_block.clone()
    }

    fn exercise(store: &dyn BlockStore) {
        let block = genesis();
        let hash = block.hash();
        assert!(!store.contains(&hash).unwrap());

        store.put_block(&block).unwrap();
        assert_eq!(store.get_block(&hash).unwrap(), Some(block));

        store.set_main_chain(0, &hash).unwrap();
        store.set_main_chain(1, &Hash([1u8; 32])).unwrap();
        store.set_main_chain(2, &Hash([2u8; 32])).unwrap();
        store.truncate_main_chain(0).unwrap();

        assert_eq!(store.main_chain_hash(0).unwrap(), Some(hash));
        assert_eq!(store.main_chain_hash(1).unwrap(), None);
        assert_eq!(store.main_chain_hash(2).unwrap(), None);
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryBlockStore::new());
    }

    #[test]
    fn test_sled_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledBlockStore::open(dir.path()).unwrap();
        exercise(&store);
    }

    #[test]
    fn test_sled_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let hash = genesis().hash();
        {
            let store = SledBlockStore::open(dir.path()).unwrap();
            store.put_block(&genesis()).unwrap();
            store.flush().unwrap();
        }
        let store = SledBlockStore::open(dir.path()).unwrap();
        assert!(store.contains(&hash).unwrap());
    }
}
