//! Block template assembly
//!
//! Picks candidate transactions for the next block on top of the published
//! ledger. Burns must clear the stricter inclusion margin; everything else is
//! dry-run against a scratch copy of the ledger so the template applies
//! cleanly. Searching for a nonce is left to the caller.

use std::sync::Arc;

use num_bigint::BigUint;
use tracing::debug;

use super::Node;
use crate::bridge::{BridgeDecision, BurnCheckMode};
use crate::consensus::{Block, BlockHeader};
use crate::constants::CURRENT_HEADER_VERSION;
use crate::crypto::Hash;
use crate::error::NodeError;
use crate::storage::{BlockContext, LedgerError};
use crate::validation::{Transaction, TxPayload};

/// Unmined block plus what it must hash below
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub block: Block,
    pub target: BigUint,
    pub fees_nanos: u64,
    /// Candidates left out, with the reason
    pub skipped: Vec<(Hash, LedgerError)>,
}

pub struct BlockProducer {
    node: Arc<Node>,
}

impl BlockProducer {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }

    pub fn assemble(
        &self,
        candidates: Vec<Transaction>,
        now: u64,
    ) -> Result<BlockTemplate, NodeError> {
        let ledger = self.node.snapshot();
        let parent = ledger.tip_hash();
        let height = ledger.height() + 1;
        let parent_header = self
            .node
            .header(&parent)
            .ok_or(NodeError::UnknownBlock(parent))?;
        let target = self.node.expected_target(&parent, CURRENT_HEADER_VERSION)?;

        let header = BlockHeader::new(
            CURRENT_HEADER_VERSION,
            parent,
            Hash::zero(),
            now.max(parent_header.timestamp),
            height,
            0,
        );
        let cap = self.node.params().miner_max_block_size_bytes;
        let mut size = Block::new(header.clone(), vec![]).size_bytes();

        let mut scratch = (*ledger).clone();
        let mut included = Vec::new();
        let mut skipped = Vec::new();
        let mut fees_nanos = 0u64;
        {
            let foreign = self.node.foreign();
            let ctx = BlockContext {
                foreign: &foreign,
                now,
            };

            for tx in candidates {
                if let TxPayload::BitcoinExchange(burn) = &tx.payload {
                    match ledger
                        .bridge()
                        .validate_burn(burn, &foreign, now, BurnCheckMode::Inclusion)
                    {
                        BridgeDecision::Accepted { .. } => {}
                        BridgeDecision::Deferred => {
                            skipped.push((tx.hash(), LedgerError::BurnDeferred));
                            continue;
                        }
                        BridgeDecision::Rejected(reason) => {
                            skipped.push((tx.hash(), reason.into()));
                            continue;
                        }
                    }
                }

                let tx_size = tx.size_bytes();
                if size.saturating_add(tx_size) > cap {
                    debug!(size, cap, "block template full");
                    break;
                }

                match scratch.try_transaction(&tx, height, &ctx) {
                    Ok(fee) => {
                        size += tx_size;
                        fees_nanos = fees_nanos.saturating_add(fee);
                        included.push(tx);
                    }
                    Err(e) => skipped.push((tx.hash(), e)),
                }
            }
        }

        let mut block = Block::new(header, included);
        block.header.merkle_root = block.compute_merkle_root();
        debug!(
            height,
            txs = block.transactions.len(),
            skipped = skipped.len(),
            "block template assembled"
        );

        Ok(BlockTemplate {
            block,
            target,
            fees_nanos,
            skipped,
        })
    }
}
