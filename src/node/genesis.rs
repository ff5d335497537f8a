//! Genesis block construction for Kindle (KDL)
//!
//! The genesis block is a version-0 header at height 0 carrying a single
//! `SeedBalances` transaction. It is never mined; its hash is pinned by the
//! network parameters and it is trusted without a proof-of-work check.

use serde::Serialize;

use crate::consensus::{Block, BlockHeader};
use crate::constants::HEADER_VERSION_0;
use crate::crypto::Hash;
use crate::params::ParameterSet;
use crate::validation::{SeedOutput, Transaction, TxPayload};

/// Build the genesis block
///
/// Reproducible byte-for-byte from the same seeds and timestamp.
pub fn build_genesis_block(seeds: Vec<SeedOutput>, timestamp: u64) -> Block {
    let mut block = Block::new(
        BlockHeader::new(HEADER_VERSION_0, Hash::zero(), Hash::zero(), timestamp, 0, 0),
        vec![Transaction::seed_balances(seeds)],
    );
    block.header.merkle_root = block.compute_merkle_root();
    block
}

/// Genesis summary printed at node startup
#[derive(Debug, Clone, Serialize)]
pub struct GenesisInfo {
    pub network: String,
    pub hash: String,
    pub merkle_root: String,
    pub timestamp: u64,
    pub seed_accounts: usize,
    pub seed_total_nanos: u64,
}

impl GenesisInfo {
    pub fn new(params: &ParameterSet) -> Self {
        let genesis = &params.genesis_block;
        let seeds: Vec<&SeedOutput> = genesis
            .transactions
            .iter()
            .filter_map(|tx| match &tx.payload {
                TxPayload::SeedBalances(outputs) => Some(outputs.iter()),
                _ => None,
            })
            .flatten()
            .collect();

        Self {
            network: params.network.to_string(),
            hash: params.genesis_hash.to_hex(),
            merkle_root: genesis.header.merkle_root.to_hex(),
            timestamp: genesis.header.timestamp,
            seed_accounts: seeds.len(),
            seed_total_nanos: seeds.iter().map(|s| s.amount_nanos).sum(),
        }
    }
}
