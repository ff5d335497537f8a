//! Shared helpers for the integration suites
#![allow(dead_code)]

use std::sync::Arc;

use kindle_core::bridge::{BurnTransaction, ForeignHeader};
use kindle_core::consensus::{compact_to_target, hash_to_big, meets_target, Block, BlockHeader};
use kindle_core::constants::HEADER_VERSION_1;
use kindle_core::crypto::{hash_bytes, Hash, PrivateKey, PublicKey};
use kindle_core::node::{Node, NodeOptions};
use kindle_core::params::{ForeignCheckpoint, ParameterSet};
use kindle_core::storage::{BlockStore, MemoryBlockStore};
use kindle_core::validation::{Transaction, TxPayload};
use num_bigint::BigUint;
use num_traits::{One, Zero};

pub const NOW: u64 = 1_700_000_000;
pub const HOUR: u64 = 3600;
pub const EASY_BITS: u32 = 0x207fffff;
pub const CHECKPOINT_HEIGHT: u64 = 700_000;

/// Testnet with trivial proof of work and a foreign checkpoint near `NOW`
pub fn easy_params() -> Arc<ParameterSet> {
    let mut params = (*ParameterSet::testnet()).clone();
    params.max_target = (BigUint::one() << 256usize) - 1u32;
    params.min_target = BigUint::one();
    params.min_chain_work = BigUint::zero();
    params.bridge.checkpoint = ForeignCheckpoint {
        hash: Hash([0x0a; 32]),
        height: CHECKPOINT_HEIGHT,
        timestamp: NOW - 100 * HOUR,
        bits: EASY_BITS,
    };
    params.bridge.foreign_min_chain_work = BigUint::zero();
    Arc::new(params)
}

pub fn new_node() -> Node {
    new_node_with(Arc::new(MemoryBlockStore::new()))
}

pub fn new_node_with(store: Arc<dyn BlockStore>) -> Node {
    Node::new(easy_params(), store, NodeOptions::default()).unwrap()
}

/// Testnet seed key with secret scalar `n` (1..=3 are funded; 1 is an updater)
pub fn key(n: u8) -> PrivateKey {
    let mut secret = [0u8; 32];
    secret[31] = n;
    PrivateKey::from_bytes(&secret).unwrap()
}

/// Mine a child of `parent` known to `node`; `salt` separates siblings
pub fn mine_block(node: &Node, parent: Hash, transactions: Vec<Transaction>, salt: u64) -> Block {
    let parent_header = node.header(&parent).expect("parent admitted");
    let mut block = Block::new(
        BlockHeader::new(
            HEADER_VERSION_1,
            parent,
            Hash::zero(),
            parent_header.timestamp + 3,
            parent_header.height + 1,
            0,
        ),
        transactions,
    );
    block.header.extra_nonce = salt;
    block.header.merkle_root = block.compute_merkle_root();
    let target = node.expected_target(&parent, HEADER_VERSION_1).unwrap();
    solve(&mut block, &target);
    block
}

pub fn solve(block: &mut Block, target: &BigUint) {
    while !meets_target(&block.hash(), target) {
        block.header.nonce += 1;
    }
}

/// Mine and submit `count` empty blocks on top of `from`
pub fn extend(node: &Node, from: Hash, count: usize, salt: u64) -> Vec<Hash> {
    let mut parent = from;
    let mut hashes = Vec::new();
    for _ in 0..count {
        let block = mine_block(node, parent, vec![], salt);
        parent = block.hash();
        node.process_block(block, NOW).unwrap();
        hashes.push(parent);
    }
    hashes
}

pub fn buy(sender: &PrivateKey, nonce: u64, creator: PublicKey, reserve_nanos: u64) -> Transaction {
    Transaction::new(
        sender.public_key(),
        nonce,
        0,
        TxPayload::BuyCreatorCoin {
            creator,
            reserve_nanos,
        },
    )
    .signed(sender)
    .unwrap()
}

pub fn burn(destination: PublicKey, foreign_height: u64, id: u8) -> Transaction {
    Transaction::bitcoin_exchange(BurnTransaction {
        destination,
        amount_sats: 100_000,
        foreign_block_height: foreign_height,
        foreign_tx_id: hash_bytes(&[id]),
        proof: vec![],
    })
}

/// Foreign header with easy bits on top of `prev`
pub fn mine_foreign(prev_hash: Hash, timestamp: u64, salt: u8) -> ForeignHeader {
    let mut header = ForeignHeader {
        version: 4,
        prev_hash,
        merkle_root: Hash([salt; 32]),
        timestamp: timestamp as u32,
        bits: EASY_BITS,
        nonce: 0,
    };
    let target = compact_to_target(EASY_BITS);
    while hash_to_big(&header.hash()) > target {
        header.nonce += 1;
    }
    header
}

/// Foreign headers extending the checkpoint, one per timestamp
pub fn foreign_headers(timestamps: &[u64]) -> Vec<ForeignHeader> {
    let mut prev = easy_params().bridge.checkpoint.hash;
    timestamps
        .iter()
        .enumerate()
        .map(|(i, ts)| {
            let header = mine_foreign(prev, *ts, i as u8);
            prev = header.hash();
            header
        })
        .collect()
}

/// Timestamps whose stalest block sits at checkpoint + 2
pub fn current_foreign_view() -> Vec<u64> {
    vec![NOW - 6 * HOUR, NOW - 5 * HOUR, NOW - HOUR, NOW - 600]
}
