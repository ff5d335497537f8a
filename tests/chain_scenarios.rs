//! End-to-end scenarios through the node: reorgs, orphans, invalid bodies,
//! deferred burns and block templates.

mod common;

use std::sync::Arc;

use common::*;
use kindle_core::consensus::{Block, BlockHeader, BlockStatus};
use kindle_core::constants::NANOS_PER_UNIT;
use kindle_core::crypto::Hash;
use kindle_core::error::ErrorClass;
use kindle_core::governance::ParamUpdate;
use kindle_core::node::{BlockOutcome, BlockProducer};
use kindle_core::storage::{LedgerError, SledBlockStore};
use kindle_core::validation::{Transaction, TxPayload};

// ============================================================================
// REORGANIZATIONS
// ============================================================================

#[test]
fn test_reorg_restores_ledger_and_governance() {
    let node = new_node();
    let genesis = node.params().genesis_hash;
    let alice = key(1);
    let creator = key(2).public_key();
    let alice_start = node.balance(&alice.public_key());

    // branch A: a coin purchase, then a governance update
    let a1 = mine_block(&node, genesis, vec![buy(&alice, 0, creator, NANOS_PER_UNIT)], 1);
    let a1_hash = a1.hash();
    node.process_block(a1, NOW).unwrap();
    let update = Transaction::new(
        alice.public_key(),
        1,
        0,
        TxPayload::UpdateGlobalParams(ParamUpdate {
            usd_cents_per_bitcoin: Some(4_000_000),
            ..Default::default()
        }),
    )
    .signed(&alice)
    .unwrap();
    let a2 = mine_block(&node, a1_hash, vec![update], 1);
    node.process_block(a2, NOW).unwrap();

    assert_eq!(node.snapshot().height(), 2);
    assert!(!node.coin_state(&creator).is_empty());
    assert_eq!(node.global_params().usd_cents_per_bitcoin, 4_000_000);

    // branch B: three empty blocks from genesis carry more work
    let b = extend(&node, genesis, 3, 2);

    let ledger = node.snapshot();
    assert_eq!(ledger.tip_hash(), b[2]);
    assert_eq!(ledger.height(), 3);
    assert!(node.coin_state(&creator).is_empty());
    assert_eq!(ledger.holding(&alice.public_key(), &creator), 0);
    assert_eq!(ledger.balance(&alice.public_key()), alice_start);
    assert_eq!(ledger.nonce(&alice.public_key()), 0);
    assert_eq!(ledger.governance().history().len(), 1);
    assert_eq!(node.global_params().usd_cents_per_bitcoin, 0);
}

#[test]
fn test_deferred_branch_keeps_previous_tip() {
    // no foreign headers yet, so any burn defers
    let node = new_node();
    let genesis = node.params().genesis_hash;
    let dest = key(5).public_key();
    let a = extend(&node, genesis, 2, 1);

    let b1 = mine_block(&node, genesis, vec![burn(dest, CHECKPOINT_HEIGHT + 1, 1)], 2);
    let b1_hash = b1.hash();
    node.process_block(b1, NOW).unwrap();
    let b = extend(&node, b1_hash, 2, 2);

    assert_eq!(node.best_header().height, 3);
    let ledger = node.snapshot();
    assert_eq!(ledger.tip_hash(), a[1]);
    assert_eq!(ledger.height(), 2);
    assert_eq!(node.store().main_chain_hash(1).unwrap(), Some(a[0]));
    assert_eq!(node.store().main_chain_hash(2).unwrap(), Some(a[1]));
    assert_eq!(node.store().main_chain_hash(3).unwrap(), None);

    let activation = node.tick(NOW).unwrap();
    assert_eq!(activation.deferred, Some(b1_hash));
    assert_eq!(activation.tip, a[1]);
    assert_eq!(node.snapshot().tip_hash(), a[1]);

    // once the foreign view is current the heavier branch connects
    for header in foreign_headers(&current_foreign_view()) {
        node.add_foreign_header(&header, NOW).unwrap();
    }
    let ledger = node.snapshot();
    assert_eq!(ledger.tip_hash(), b[1]);
    assert_eq!(ledger.height(), 3);
    assert!(ledger.balance(&dest) > 0);
    assert_eq!(node.store().main_chain_hash(1).unwrap(), Some(b1_hash));
}

#[test]
fn test_reorg_back_reapplies_original_branch() {
    let node = new_node();
    let genesis = node.params().genesis_hash;
    let alice = key(1);
    let creator = key(2).public_key();

    let a1 = mine_block(&node, genesis, vec![buy(&alice, 0, creator, NANOS_PER_UNIT)], 1);
    let a1_hash = a1.hash();
    node.process_block(a1, NOW).unwrap();
    let coins_after_a1 = node.coin_state(&creator);

    extend(&node, genesis, 2, 2);
    assert!(node.coin_state(&creator).is_empty());

    // A overtakes again
    extend(&node, a1_hash, 2, 3);
    assert_eq!(node.snapshot().height(), 3);
    assert_eq!(node.coin_state(&creator), coins_after_a1);
}

// ============================================================================
// ORPHANS
// ============================================================================

#[test]
fn test_orphans_connect_when_parent_arrives() {
    // mine on a scratch node so later blocks can be built before earlier ones are known
    let miner = new_node();
    let genesis = miner.params().genesis_hash;
    let hashes = extend(&miner, genesis, 3, 7);
    let blocks: Vec<_> = hashes
        .iter()
        .map(|h| miner.store().get_block(h).unwrap().unwrap())
        .collect();

    let node = new_node();
    assert_eq!(
        node.process_block(blocks[2].clone(), NOW).unwrap(),
        BlockOutcome::Orphaned(hashes[2])
    );
    assert_eq!(
        node.process_block(blocks[1].clone(), NOW).unwrap(),
        BlockOutcome::Orphaned(hashes[1])
    );
    assert_eq!(node.orphan_count(), 2);

    node.process_block(blocks[0].clone(), NOW).unwrap();
    assert_eq!(node.orphan_count(), 0);
    assert_eq!(node.snapshot().tip_hash(), hashes[2]);
}

#[test]
fn test_rejected_and_orphan_blocks_not_stored() {
    let node = new_node();
    let genesis = node.params().genesis_hash;
    let genesis_header = node.header(&genesis).unwrap();

    let mut wrong_height = Block::new(
        BlockHeader::new(1, genesis, Hash::zero(), genesis_header.timestamp + 3, 5, 0),
        vec![],
    );
    wrong_height.header.merkle_root = wrong_height.compute_merkle_root();
    let err = node.process_block(wrong_height.clone(), NOW).unwrap_err();
    assert_eq!(err.class(), ErrorClass::ConsensusRejected);
    assert!(!node.store().contains(&wrong_height.hash()).unwrap());

    let mut orphan = Block::new(
        BlockHeader::new(1, Hash([0x33; 32]), Hash::zero(), NOW, 1, 0),
        vec![],
    );
    orphan.header.merkle_root = orphan.compute_merkle_root();
    let hash = orphan.hash();
    assert_eq!(
        node.process_block(orphan, NOW).unwrap(),
        BlockOutcome::Orphaned(hash)
    );
    assert_eq!(node.orphan_count(), 1);
    assert!(!node.store().contains(&hash).unwrap());
}

#[test]
fn test_duplicate_block_is_noop() {
    let node = new_node();
    let genesis = node.params().genesis_hash;
    let block = mine_block(&node, genesis, vec![], 0);
    let hash = block.hash();

    node.process_block(block.clone(), NOW).unwrap();
    assert_eq!(
        node.process_block(block, NOW).unwrap(),
        BlockOutcome::Duplicate(hash)
    );
    assert_eq!(node.snapshot().height(), 1);
}

// ============================================================================
// INVALID BODIES
// ============================================================================

#[test]
fn test_invalid_body_falls_back_to_previous_tip() {
    let node = new_node();
    let genesis = node.params().genesis_hash;
    let good = extend(&node, genesis, 1, 0);

    let mut forged = buy(&key(1), 0, key(2).public_key(), NANOS_PER_UNIT);
    forged.nonce = 9;
    let bad = mine_block(&node, good[0], vec![forged], 0);
    let bad_hash = bad.hash();

    // the header is fine, so the block is admitted before its body fails
    node.process_block(bad, NOW).unwrap();

    assert_eq!(node.block_status(&bad_hash), Some(BlockStatus::Invalid));
    assert_eq!(node.snapshot().tip_hash(), good[0]);
    assert_eq!(node.best_header().height, 1);

    // children of an invalid block are refused
    let err = node
        .process_block(mine_block(&node, bad_hash, vec![], 0), NOW)
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::ConsensusRejected);
}

#[test]
fn test_stripped_signature_copy_does_not_poison_block() {
    let node = new_node();
    let genesis = node.params().genesis_hash;
    let alice = key(1);
    let creator = key(2).public_key();

    let honest = mine_block(&node, genesis, vec![buy(&alice, 0, creator, NANOS_PER_UNIT)], 0);
    let hash = honest.hash();
    let mut stripped = honest.clone();
    stripped.transactions[0].signature = None;
    assert_eq!(stripped.hash(), hash);

    // the header commits to the signature, so the copy fails its merkle check
    let err = node.process_block(stripped, NOW).unwrap_err();
    assert_eq!(err.class(), ErrorClass::ConsensusRejected);
    assert_eq!(node.block_status(&hash), None);
    assert!(!node.store().contains(&hash).unwrap());

    assert_eq!(
        node.process_block(honest, NOW).unwrap(),
        BlockOutcome::Accepted { hash, height: 1 }
    );
    assert_eq!(node.block_status(&hash), Some(BlockStatus::FullyValid));
    assert!(node.snapshot().holding(&alice.public_key(), &creator) > 0);
}

#[test]
fn test_transaction_failure_keeps_block() {
    let node = new_node();
    let genesis = node.params().genesis_hash;
    let broke = key(9);

    let block = mine_block(&node, genesis, vec![buy(&broke, 0, key(2).public_key(), 1_000)], 0);
    let hash = block.hash();
    node.process_block(block, NOW).unwrap();

    assert_eq!(node.block_status(&hash), Some(BlockStatus::FullyValid));
    assert_eq!(node.snapshot().nonce(&broke.public_key()), 0);
}

// ============================================================================
// BRIDGE
// ============================================================================

#[test]
fn test_burn_waits_for_current_foreign_view() {
    let node = new_node();
    let genesis = node.params().genesis_hash;
    let dest = key(5).public_key();

    let block = mine_block(&node, genesis, vec![burn(dest, CHECKPOINT_HEIGHT + 1, 1)], 0);
    let hash = block.hash();
    node.process_block(block, NOW).unwrap();

    // header accepted, body deferred
    assert_eq!(node.best_header().height, 1);
    assert_eq!(node.snapshot().height(), 0);
    assert_eq!(node.tick(NOW).unwrap().deferred, Some(hash));

    for header in foreign_headers(&current_foreign_view()) {
        node.add_foreign_header(&header, NOW).unwrap();
    }

    let ledger = node.snapshot();
    assert_eq!(ledger.tip_hash(), hash);
    let credit = ledger
        .bridge()
        .credit_for(100_000, 0)
        .unwrap();
    assert_eq!(ledger.balance(&dest), credit.net_nanos);
}

#[test]
fn test_replayed_burn_invalidates_block() {
    let node = new_node();
    let genesis = node.params().genesis_hash;
    for header in foreign_headers(&current_foreign_view()) {
        node.add_foreign_header(&header, NOW).unwrap();
    }
    let dest = key(5).public_key();

    let first = mine_block(&node, genesis, vec![burn(dest, CHECKPOINT_HEIGHT, 1)], 0);
    let first_hash = first.hash();
    node.process_block(first, NOW).unwrap();
    let balance = node.balance(&dest);
    assert!(balance > 0);

    let replay = mine_block(&node, first_hash, vec![burn(dest, CHECKPOINT_HEIGHT, 1)], 0);
    let replay_hash = replay.hash();
    node.process_block(replay, NOW).unwrap();

    assert_eq!(node.block_status(&replay_hash), Some(BlockStatus::Invalid));
    assert_eq!(node.balance(&dest), balance);
}

// ============================================================================
// BLOCK TEMPLATES
// ============================================================================

#[test]
fn test_template_filters_and_applies() {
    let node = Arc::new(new_node());
    for header in foreign_headers(&current_foreign_view()) {
        node.add_foreign_header(&header, NOW).unwrap();
    }
    let alice = key(1);
    let creator = key(2).public_key();
    let dest = key(6).public_key();

    let candidates = vec![
        buy(&alice, 0, creator, NANOS_PER_UNIT),
        buy(&alice, 5, creator, NANOS_PER_UNIT),
        // one block of work: enough to validate, not enough to include
        burn(dest, CHECKPOINT_HEIGHT + 1, 1),
        burn(dest, CHECKPOINT_HEIGHT, 2),
    ];

    let producer = BlockProducer::new(node.clone());
    let mut template = producer.assemble(candidates, NOW).unwrap();
    assert_eq!(template.block.transactions.len(), 2);
    assert_eq!(template.skipped.len(), 2);
    assert!(template
        .skipped
        .iter()
        .any(|(_, e)| matches!(e, LedgerError::BurnRejected(_))));
    assert!(template
        .skipped
        .iter()
        .any(|(_, e)| matches!(e, LedgerError::BadNonce { .. })));

    solve(&mut template.block, &template.target);
    node.process_block(template.block, NOW).unwrap();

    let ledger = node.snapshot();
    assert_eq!(ledger.height(), 1);
    assert!(ledger.holding(&alice.public_key(), &creator) > 0);
    assert!(ledger.balance(&dest) > 0);
}

// ============================================================================
// PERSISTENCE
// ============================================================================

#[test]
fn test_restore_main_chain_from_sled() {
    let dir = tempfile::tempdir().unwrap();
    let tip = {
        let store = Arc::new(SledBlockStore::open(dir.path()).unwrap());
        let node = new_node_with(store.clone());
        let genesis = node.params().genesis_hash;
        let hashes = extend(&node, genesis, 3, 0);
        store.flush().unwrap();
        hashes[2]
    };

    let store = Arc::new(SledBlockStore::open(dir.path()).unwrap());
    let node = new_node_with(store);
    assert_eq!(node.restore_from_store(NOW).unwrap(), 3);
    assert_eq!(node.snapshot().tip_hash(), tip);
}
