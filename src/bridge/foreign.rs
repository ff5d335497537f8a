//! Foreign (Bitcoin) header chain
//!
//! A second header arena rooted at the trusted checkpoint from the network
//! parameters. It tracks cumulative work the same way the native chain does
//! and answers the one question the bridge needs: which block is the stalest
//! one, i.e. the newest block that is already older than the tip-age window.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::consensus::{compact_to_target, hash_to_big, work_for_target};
use crate::crypto::{sha256d, Hash};
use crate::error::ErrorClass;
use crate::params::ParameterSet;

/// 80-byte Bitcoin block header
///
/// Hashes are held in display order (big-endian), the order block explorers
/// print and the checkpoint literals use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignHeader {
    pub version: i32,
    pub prev_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl ForeignHeader {
    /// Wire encoding: little-endian integers, hashes in internal byte order
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(80);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend(self.prev_hash.0.iter().rev());
        bytes.extend(self.merkle_root.0.iter().rev());
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&self.bits.to_le_bytes());
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes
    }

    /// Block hash in display order
    pub fn hash(&self) -> Hash {
        let mut digest = sha256d(&self.to_bytes()).0;
        digest.reverse();
        Hash(digest)
    }
}

#[derive(Debug, Clone)]
pub struct ForeignChainNode {
    pub hash: Hash,
    pub prev_hash: Hash,
    pub height: u64,
    pub timestamp: u64,
    pub bits: u32,
    /// Work accumulated since the checkpoint
    pub cumulative_work: BigUint,
}

#[derive(Debug, Error)]
pub enum ForeignChainError {
    #[error("foreign header {hash} has unknown parent {parent}")]
    Orphan { hash: Hash, parent: Hash },
    #[error("foreign header timestamp {timestamp} beyond limit {limit}")]
    TimestampOutOfRange { timestamp: u64, limit: u64 },
    #[error("foreign header {0} does not meet its target")]
    InvalidPoW(Hash),
}

impl ForeignChainError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ForeignChainError::Orphan { .. } => ErrorClass::Orphan,
            _ => ErrorClass::ConsensusRejected,
        }
    }
}

/// Result of adding a foreign header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignAdmit {
    pub hash: Hash,
    pub height: u64,
    pub newly_inserted: bool,
    pub tip_changed: bool,
}

/// Foreign header arena with most-work tip selection
#[derive(Debug, Clone)]
pub struct ForeignChain {
    params: Arc<ParameterSet>,
    nodes: HashMap<Hash, ForeignChainNode>,
    checkpoint: Hash,
    tip: Hash,
}

impl ForeignChain {
    pub fn new(params: Arc<ParameterSet>) -> Self {
        let checkpoint = params.bridge.checkpoint.clone();
        let root = ForeignChainNode {
            hash: checkpoint.hash,
            prev_hash: Hash::zero(),
            height: checkpoint.height,
            timestamp: checkpoint.timestamp,
            bits: checkpoint.bits,
            cumulative_work: BigUint::zero(),
        };

        let mut nodes = HashMap::new();
        nodes.insert(checkpoint.hash, root);

        Self {
            params,
            nodes,
            checkpoint: checkpoint.hash,
            tip: checkpoint.hash,
        }
    }

    pub fn tip(&self) -> &ForeignChainNode {
        // tip always points into the arena; nothing is ever removed
        &self.nodes[&self.tip]
    }

    pub fn checkpoint(&self) -> &ForeignChainNode {
        &self.nodes[&self.checkpoint]
    }

    pub fn node(&self, hash: &Hash) -> Option<&ForeignChainNode> {
        self.nodes.get(hash)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a header whose parent is known
    pub fn add_header(
        &mut self,
        header: &ForeignHeader,
        now: u64,
    ) -> Result<ForeignAdmit, ForeignChainError> {
        let hash = header.hash();
        if let Some(existing) = self.nodes.get(&hash) {
            return Ok(ForeignAdmit {
                hash,
                height: existing.height,
                newly_inserted: false,
                tip_changed: false,
            });
        }

        let parent = self
            .nodes
            .get(&header.prev_hash)
            .ok_or(ForeignChainError::Orphan {
                hash,
                parent: header.prev_hash,
            })?;

        let timestamp = u64::from(header.timestamp);
        let limit = now.saturating_add(self.params.bridge.foreign_max_tstamp_offset_secs);
        if timestamp > limit {
            return Err(ForeignChainError::TimestampOutOfRange { timestamp, limit });
        }

        let target = compact_to_target(header.bits);
        if target.is_zero() || hash_to_big(&hash) > target {
            return Err(ForeignChainError::InvalidPoW(hash));
        }

        let node = ForeignChainNode {
            hash,
            prev_hash: header.prev_hash,
            height: parent.height + 1,
            timestamp,
            bits: header.bits,
            cumulative_work: &parent.cumulative_work + work_for_target(&target),
        };
        let height = node.height;

        let tip = self.tip();
        let tip_changed = node.cumulative_work > tip.cumulative_work
            || (node.cumulative_work == tip.cumulative_work && hash < tip.hash);

        self.nodes.insert(hash, node);
        if tip_changed {
            self.tip = hash;
            info!(height, %hash, "new foreign tip");
        } else {
            debug!(height, %hash, "foreign header on side branch");
        }

        Ok(ForeignAdmit {
            hash,
            height,
            newly_inserted: true,
            tip_changed,
        })
    }

    /// Drop side branches forking more than `depth` blocks below the tip
    ///
    /// Same rule as the native header tree. Returns the removed hashes.
    pub fn prune_stale_branches(&mut self, depth: u64) -> Vec<Hash> {
        let cutoff = self.tip().height.saturating_sub(depth);

        let main_chain: HashSet<Hash> = {
            let mut set = HashSet::new();
            let mut cursor = self.nodes.get(&self.tip);
            while let Some(node) = cursor {
                set.insert(node.hash);
                cursor = self.nodes.get(&node.prev_hash);
            }
            set
        };

        let removed: Vec<Hash> = self
            .nodes
            .values()
            .filter(|node| !main_chain.contains(&node.hash))
            .filter(|node| {
                let mut cursor = *node;
                let fork_height = loop {
                    match self.nodes.get(&cursor.prev_hash) {
                        Some(parent) if main_chain.contains(&parent.hash) => break Some(parent.height),
                        Some(parent) => cursor = parent,
                        None => break None,
                    }
                };
                fork_height.map_or(true, |h| h < cutoff)
            })
            .map(|node| node.hash)
            .collect();

        for hash in &removed {
            self.nodes.remove(hash);
        }
        if !removed.is_empty() {
            debug!(count = removed.len(), cutoff, "pruned stale foreign branches");
        }
        removed
    }

    /// Tip has enough work and is inside the tip-age window
    pub fn is_current(&self, now: u64) -> bool {
        let tip = self.tip();
        tip.cumulative_work >= self.params.bridge.foreign_min_chain_work
            && !self.is_stale(tip, now)
    }

    /// Newest block above the checkpoint whose age exceeds the tip-age window
    pub fn stalest_block(&self, now: u64) -> Option<&ForeignChainNode> {
        let checkpoint_height = self.checkpoint().height;
        let mut cursor = self.nodes.get(&self.tip);
        while let Some(node) = cursor {
            if node.height <= checkpoint_height {
                return None;
            }
            if self.is_stale(node, now) {
                return Some(node);
            }
            cursor = self.nodes.get(&node.prev_hash);
        }
        None
    }

    fn is_stale(&self, node: &ForeignChainNode, now: u64) -> bool {
        node.timestamp.saturating_add(self.params.bridge.foreign_max_tip_age) < now
    }
}
