//! Blocks waiting for their parent
//!
//! Bounded by entry count and by age. When full, the oldest entry is evicted.

use std::collections::HashMap;

use tracing::debug;

use crate::consensus::Block;
use crate::crypto::Hash;

#[derive(Debug, Clone)]
struct PendingBlock {
    block: Block,
    received_at: u64,
}

#[derive(Debug)]
pub struct OrphanPool {
    max_entries: usize,
    max_age_secs: u64,
    blocks: HashMap<Hash, PendingBlock>,
    /// parent hash -> orphans naming it
    by_parent: HashMap<Hash, Vec<Hash>>,
}

impl OrphanPool {
    pub fn new(max_entries: usize, max_age_secs: u64) -> Self {
        Self {
            max_entries,
            max_age_secs,
            blocks: HashMap::new(),
            by_parent: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.blocks.contains_key(hash)
    }

    /// Queue a block; returns false if it was already queued or the pool holds nothing
    pub fn insert(&mut self, block: Block, now: u64) -> bool {
        if self.max_entries == 0 {
            return false;
        }
        let hash = block.hash();
        if self.blocks.contains_key(&hash) {
            return false;
        }

        self.expire(now);
        while self.blocks.len() >= self.max_entries {
            if !self.evict_oldest() {
                break;
            }
        }

        let parent = block.header.prev_hash;
        self.by_parent.entry(parent).or_default().push(hash);
        self.blocks.insert(
            hash,
            PendingBlock {
                block,
                received_at: now,
            },
        );
        debug!(%hash, %parent, pool = self.blocks.len(), "orphan queued");
        true
    }

    /// Remove and return the orphans whose parent is `parent`
    pub fn take_children(&mut self, parent: &Hash) -> Vec<Block> {
        let Some(children) = self.by_parent.remove(parent) else {
            return Vec::new();
        };
        children
            .into_iter()
            .filter_map(|hash| self.blocks.remove(&hash))
            .map(|pending| pending.block)
            .collect()
    }

    /// Drop entries older than the age limit
    pub fn expire(&mut self, now: u64) -> usize {
        let cutoff = now.saturating_sub(self.max_age_secs);
        let stale: Vec<Hash> = self
            .blocks
            .iter()
            .filter(|(_, p)| p.received_at < cutoff)
            .map(|(h, _)| *h)
            .collect();
        for hash in &stale {
            self.remove(hash);
        }
        stale.len()
    }

    fn evict_oldest(&mut self) -> bool {
        let oldest = self
            .blocks
            .iter()
            .min_by_key(|(hash, p)| (p.received_at, **hash))
            .map(|(h, _)| *h);
        match oldest {
            Some(hash) => {
                self.remove(&hash);
                true
            }
            None => false,
        }
    }

    fn remove(&mut self, hash: &Hash) {
        if let Some(pending) = self.blocks.remove(hash) {
            let parent = pending.block.header.prev_hash;
            if let Some(siblings) = self.by_parent.get_mut(&parent) {
                siblings.retain(|h| h != hash);
                if siblings.is_empty() {
                    self.by_parent.remove(&parent);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::BlockHeader;

    fn orphan(parent: u8, salt: u64) -> Block {
        Block::new(
            BlockHeader::new(1, Hash([parent; 32]), Hash::zero(), 0, 5, salt),
            vec![],
        )
    }

    #[test]
    fn test_children_released_by_parent() {
        let mut pool = OrphanPool::new(10, 600);
        assert!(pool.insert(orphan(1, 0), 100));
        assert!(pool.insert(orphan(1, 1), 100));
        assert!(pool.insert(orphan(2, 0), 100));
        assert!(!pool.insert(orphan(2, 0), 100));

        let released = pool.take_children(&Hash([1; 32]));
        assert_eq!(released.len(), 2);
        assert_eq!(pool.len(), 1);
        assert!(pool.take_children(&Hash([1; 32])).is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut pool = OrphanPool::new(2, 600);
        let first = orphan(1, 0);
        let first_hash = first.hash();
        pool.insert(first, 100);
        pool.insert(orphan(1, 1), 101);
        pool.insert(orphan(1, 2), 102);

        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(&first_hash));
    }

    #[test]
    fn test_expire_by_age() {
        let mut pool = OrphanPool::new(10, 60);
        pool.insert(orphan(1, 0), 100);
        pool.insert(orphan(1, 1), 150);

        assert_eq!(pool.expire(200), 1);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.take_children(&Hash([1; 32])).len(), 1);
    }
}
