//! Header tree and best-chain selection
//!
//! Every admitted header becomes a [`ChainNode`] in an arena keyed by hash.
//! The canonical tip is the valid node with the most cumulative work, ties
//! going to the lexicographically smaller hash, so every node picks the same
//! tip from the same set of headers regardless of arrival order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use num_bigint::BigUint;
use tracing::debug;

use crate::consensus::{
    meets_target, work_for_target, BlockHeader, ChainError, DifficultyRetargeter,
};
use crate::crypto::Hash;
use crate::params::ParameterSet;

/// Validation progress of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Unvalidated,
    /// PoW, height and timestamp checked
    HeaderValid,
    /// Body applied to the ledger without error
    FullyValid,
    Invalid,
}

/// A header in the tree
#[derive(Debug, Clone)]
pub struct ChainNode {
    pub hash: Hash,
    pub header: BlockHeader,
    pub height: u64,
    pub target: BigUint,
    pub cumulative_work: BigUint,
    pub status: BlockStatus,
}

impl ChainNode {
    pub fn parent_hash(&self) -> &Hash {
        &self.header.prev_hash
    }
}

/// Blocks to disconnect and connect when moving between two nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainPath {
    pub fork_point: Hash,
    /// From the old end down to (excluding) the fork point
    pub detached: Vec<Hash>,
    /// From just above the fork point up to the new end
    pub attached: Vec<Hash>,
}

/// A move of the canonical tip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipChange {
    pub old_tip: Hash,
    pub new_tip: Hash,
    pub fork_point: Hash,
    pub detached: Vec<Hash>,
    pub attached: Vec<Hash>,
}

impl TipChange {
    /// A non-empty detach list means blocks leave the main chain
    pub fn is_reorg(&self) -> bool {
        !self.detached.is_empty()
    }
}

/// Outcome of admitting a header
#[derive(Debug, Clone)]
pub struct AdmitResult {
    pub hash: Hash,
    pub height: u64,
    pub newly_inserted: bool,
    pub tip_change: Option<TipChange>,
}

/// Arena of headers with cumulative-work fork choice
#[derive(Debug)]
pub struct ChainWorkTracker {
    params: Arc<ParameterSet>,
    retargeter: DifficultyRetargeter,
    nodes: HashMap<Hash, ChainNode>,
    children: HashMap<Hash, Vec<Hash>>,
    best_tip: Hash,
}

impl ChainWorkTracker {
    /// Create a tracker rooted at the network's genesis block
    pub fn new(params: Arc<ParameterSet>) -> Self {
        let genesis = params.genesis_block.header.clone();
        let genesis_hash = params.genesis_hash;
        let target = params.max_target.clone();
        let root = ChainNode {
            hash: genesis_hash,
            height: genesis.height,
            header: genesis,
            cumulative_work: work_for_target(&target),
            target,
            status: BlockStatus::FullyValid,
        };

        let mut nodes = HashMap::new();
        nodes.insert(genesis_hash, root);

        Self {
            retargeter: DifficultyRetargeter::new(params.clone()),
            params,
            nodes,
            children: HashMap::new(),
            best_tip: genesis_hash,
        }
    }

    pub fn params(&self) -> &Arc<ParameterSet> {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.nodes.contains_key(hash)
    }

    pub fn node(&self, hash: &Hash) -> Option<&ChainNode> {
        self.nodes.get(hash)
    }

    pub fn best_tip(&self) -> &ChainNode {
        // The tip is always present: only non-tip branches are ever removed
        &self.nodes[&self.best_tip]
    }

    pub fn best_hash(&self) -> Hash {
        self.best_tip
    }

    /// Admit a header whose parent is already in the tree
    pub fn admit(&mut self, header: BlockHeader, now: u64) -> Result<AdmitResult, ChainError> {
        let hash = header.hash();

        if let Some(existing) = self.nodes.get(&hash) {
            if existing.status == BlockStatus::Invalid {
                return Err(ChainError::KnownInvalid(hash));
            }
            return Ok(AdmitResult {
                hash,
                height: existing.height,
                newly_inserted: false,
                tip_change: None,
            });
        }

        if !header.is_known_version() {
            return Err(ChainError::UnsupportedVersion(header.version));
        }
        if !header.fits_encoding() {
            return Err(ChainError::FieldOverflow);
        }

        let parent = self
            .nodes
            .get(&header.prev_hash)
            .ok_or(ChainError::OrphanHeader {
                hash,
                parent: header.prev_hash,
            })?;
        if parent.status == BlockStatus::Invalid {
            return Err(ChainError::InvalidParent(header.prev_hash));
        }

        let expected_height = parent.height + 1;
        if header.height != expected_height {
            return Err(ChainError::BadHeight {
                expected: expected_height,
                got: header.height,
            });
        }

        let limit = now.saturating_add(self.params.max_tstamp_offset_secs);
        if header.timestamp > limit {
            return Err(ChainError::TimestampOutOfRange {
                timestamp: header.timestamp,
                limit,
            });
        }

        let target = self.expected_target(&header.prev_hash, header.version)?;
        if !meets_target(&hash, &target) {
            return Err(ChainError::InvalidPoW(hash));
        }

        let cumulative_work = &parent.cumulative_work + work_for_target(&target);
        let height = header.height;
        let prev_hash = header.prev_hash;

        self.nodes.insert(
            hash,
            ChainNode {
                hash,
                header,
                height,
                target,
                cumulative_work,
                status: BlockStatus::HeaderValid,
            },
        );
        self.children.entry(prev_hash).or_default().push(hash);

        let tip_change = if self.is_better(&hash, &self.best_tip) {
            self.move_tip(hash)?
        } else {
            debug!(height, %hash, "header admitted on side branch");
            None
        };

        Ok(AdmitResult {
            hash,
            height,
            newly_inserted: true,
            tip_change,
        })
    }

    /// Target a child of `parent` with the given header version must meet
    pub fn expected_target(&self, parent: &Hash, header_version: u32) -> Result<BigUint, ChainError> {
        let parent_node = self.nodes.get(parent).ok_or(ChainError::UnknownBlock(*parent))?;
        let height = parent_node.height + 1;

        if self.retargeter.is_retarget_height(height) {
            let start_height = height - self.retargeter.epoch_length();
            let start = self
                .ancestor(parent, start_height)
                .ok_or(ChainError::MissingAncestor {
                    hash: *parent,
                    height: start_height,
                })?;
            Ok(self.retargeter.next_target(
                &start.header,
                &parent_node.header,
                &parent_node.target,
                header_version,
            ))
        } else if header_version != parent_node.header.version {
            Ok(self.retargeter.transition_target(
                &parent_node.target,
                parent_node.header.version,
                header_version,
            ))
        } else {
            Ok(parent_node.target.clone())
        }
    }

    /// Ancestor of `hash` at `height` (the node itself at its own height)
    pub fn ancestor(&self, hash: &Hash, height: u64) -> Option<&ChainNode> {
        let mut node = self.nodes.get(hash)?;
        if height > node.height {
            return None;
        }
        while node.height > height {
            node = self.nodes.get(node.parent_hash())?;
        }
        Some(node)
    }

    /// Hash of the main-chain block at `height`
    pub fn main_chain_hash_at(&self, height: u64) -> Option<Hash> {
        self.ancestor(&self.best_tip, height).map(|n| n.hash)
    }

    pub fn is_on_main_chain(&self, hash: &Hash) -> bool {
        match self.nodes.get(hash) {
            Some(node) => self.main_chain_hash_at(node.height) == Some(*hash),
            None => false,
        }
    }

    /// Last common ancestor of two nodes
    pub fn find_fork(&self, a: &Hash, b: &Hash) -> Option<Hash> {
        let mut left = self.nodes.get(a)?;
        let mut right = self.nodes.get(b)?;

        while left.height > right.height {
            left = self.nodes.get(left.parent_hash())?;
        }
        while right.height > left.height {
            right = self.nodes.get(right.parent_hash())?;
        }
        while left.hash != right.hash {
            left = self.nodes.get(left.parent_hash())?;
            right = self.nodes.get(right.parent_hash())?;
        }
        Some(left.hash)
    }

    /// Disconnect and connect lists for moving from `from` to `to`
    pub fn path(&self, from: &Hash, to: &Hash) -> Result<ChainPath, ChainError> {
        let fork_point = self
            .find_fork(from, to)
            .ok_or(ChainError::UnknownBlock(*to))?;

        let detached = self.walk_back(from, &fork_point)?;
        let mut attached = self.walk_back(to, &fork_point)?;
        attached.reverse();

        Ok(ChainPath {
            fork_point,
            detached,
            attached,
        })
    }

    /// Set the validation status of a node
    ///
    /// Returns false if the hash is unknown. Use [`ChainWorkTracker::mark_invalid`]
    /// to invalidate, which also handles descendants and the tip.
    pub fn set_status(&mut self, hash: &Hash, status: BlockStatus) -> bool {
        match self.nodes.get_mut(hash) {
            Some(node) => {
                node.status = status;
                true
            }
            None => false,
        }
    }

    /// Mark a node and every descendant invalid, re-selecting the tip if needed
    pub fn mark_invalid(&mut self, hash: &Hash) -> Result<Option<TipChange>, ChainError> {
        if !self.nodes.contains_key(hash) {
            return Err(ChainError::UnknownBlock(*hash));
        }

        let mut queue = VecDeque::from([*hash]);
        let mut tip_invalidated = false;
        while let Some(current) = queue.pop_front() {
            if let Some(node) = self.nodes.get_mut(&current) {
                node.status = BlockStatus::Invalid;
            }
            if current == self.best_tip {
                tip_invalidated = true;
            }
            if let Some(children) = self.children.get(&current) {
                queue.extend(children.iter().copied());
            }
        }

        if !tip_invalidated {
            return Ok(None);
        }

        let best = self.select_best();
        self.move_tip(best)
    }

    /// Drop side branches forking more than `depth` blocks below the tip
    ///
    /// Returns the removed hashes.
    pub fn prune_stale_branches(&mut self, depth: u64) -> Vec<Hash> {
        let tip_height = self.best_tip().height;
        let cutoff = tip_height.saturating_sub(depth);

        let main_chain: HashSet<Hash> = {
            let mut set = HashSet::new();
            let mut cursor = self.nodes.get(&self.best_tip);
            while let Some(node) = cursor {
                set.insert(node.hash);
                cursor = self.nodes.get(node.parent_hash());
            }
            set
        };

        let mut removed = Vec::new();
        for node in self.nodes.values() {
            if main_chain.contains(&node.hash) {
                continue;
            }
            // Walk down to where this branch leaves the main chain
            let mut cursor = node;
            let fork_height = loop {
                match self.nodes.get(cursor.parent_hash()) {
                    Some(parent) if main_chain.contains(&parent.hash) => break Some(parent.height),
                    Some(parent) => cursor = parent,
                    None => break None,
                }
            };
            if fork_height.map_or(true, |h| h < cutoff) {
                removed.push(node.hash);
            }
        }

        for hash in &removed {
            if let Some(node) = self.nodes.remove(hash) {
                if let Some(siblings) = self.children.get_mut(node.parent_hash()) {
                    siblings.retain(|h| h != hash);
                }
            }
            self.children.remove(hash);
        }

        if !removed.is_empty() {
            debug!(count = removed.len(), cutoff, "pruned stale branches");
        }
        removed
    }

    /// Whether the tip has enough work and is recent enough to call the node synced
    pub fn is_current(&self, now: u64) -> bool {
        let tip = self.best_tip();
        tip.cumulative_work >= self.params.min_chain_work
            && tip.header.timestamp.saturating_add(self.params.max_tip_age) >= now
    }

    /// Valid nodes ordered by the fork-choice rule, best first
    fn select_best(&self) -> Hash {
        let mut best: Option<&ChainNode> = None;
        for node in self.nodes.values() {
            if node.status == BlockStatus::Invalid {
                continue;
            }
            best = match best {
                Some(current) if !Self::outranks(node, current) => Some(current),
                _ => Some(node),
            };
        }
        best.map(|n| n.hash).unwrap_or(self.params.genesis_hash)
    }

    fn is_better(&self, candidate: &Hash, current: &Hash) -> bool {
        match (self.nodes.get(candidate), self.nodes.get(current)) {
            (Some(a), Some(b)) => a.status != BlockStatus::Invalid && Self::outranks(a, b),
            (Some(a), None) => a.status != BlockStatus::Invalid,
            _ => false,
        }
    }

    /// More work wins; equal work goes to the smaller hash
    fn outranks(a: &ChainNode, b: &ChainNode) -> bool {
        match a.cumulative_work.cmp(&b.cumulative_work) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => a.hash < b.hash,
        }
    }

    fn move_tip(&mut self, new_tip: Hash) -> Result<Option<TipChange>, ChainError> {
        let old_tip = self.best_tip;
        if new_tip == old_tip {
            return Ok(None);
        }
        let path = self.path(&old_tip, &new_tip)?;
        self.best_tip = new_tip;
        Ok(Some(TipChange {
            old_tip,
            new_tip,
            fork_point: path.fork_point,
            detached: path.detached,
            attached: path.attached,
        }))
    }

    /// Hashes from `from` down to (excluding) `stop`
    fn walk_back(&self, from: &Hash, stop: &Hash) -> Result<Vec<Hash>, ChainError> {
        let mut out = Vec::new();
        let mut cursor = *from;
        while cursor != *stop {
            let node = self.nodes.get(&cursor).ok_or(ChainError::UnknownBlock(cursor))?;
            out.push(cursor);
            cursor = *node.parent_hash();
        }
        Ok(out)
    }
}
