//! Block processing and best-chain activation
//!
//! One writer applies blocks to the ledger at a time. Header admission only
//! needs the tracker lock, so new blocks are accepted while an activation is
//! running. Readers never touch the live ledger: they get the `Arc<Ledger>`
//! snapshot published once an activation pass is over.
//!
//! Lock order is ledger state, then tracker, then foreign chain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use num_bigint::BigUint;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, error, info, warn};

use super::OrphanPool;
use crate::bridge::{ForeignAdmit, ForeignChain, ForeignHeader};
use crate::consensus::{validate_block_body, Block, BlockHeader, BlockStatus, ChainError, ChainWorkTracker};
use crate::crypto::{Hash, PublicKey};
use crate::curve::{BuyOutcome, CreatorCoinState, CurveError, SellOutcome};
use crate::error::{ErrorClass, NodeError};
use crate::governance::GlobalParamsEntry;
use crate::params::ParameterSet;
use crate::storage::{BlockContext, BlockStore, BlockUndo, Ledger, StoreError};

/// Tunables that do not affect consensus
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub max_orphans: usize,
    pub orphan_max_age_secs: u64,
    /// Side branches forking deeper than this are dropped on tick; 0 keeps all
    pub prune_depth: u64,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            max_orphans: 100,
            orphan_max_age_secs: 20 * 60,
            prune_depth: 0,
        }
    }
}

/// What happened to a submitted block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Header admitted and body stored
    Accepted { hash: Hash, height: u64 },
    Duplicate(Hash),
    /// Parent unknown; held in the orphan pool, not stored
    Orphaned(Hash),
}

/// Result of one activation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Activation {
    pub tip: Hash,
    pub height: u64,
    pub connected: usize,
    pub disconnected: usize,
    pub invalidated: Vec<Hash>,
    /// Block whose burns could not be judged yet
    pub deferred: Option<Hash>,
}

struct LedgerState {
    ledger: Ledger,
    undo: HashMap<Hash, BlockUndo>,
}

/// Ledger as it stood before an activation started detaching blocks
struct PreviousBranch {
    ledger: Ledger,
    undo: HashMap<Hash, BlockUndo>,
    /// Detached blocks, tip first
    blocks: Vec<Hash>,
    connected: usize,
    disconnected: usize,
}

impl PreviousBranch {
    fn tip(&self) -> Hash {
        self.ledger.tip_hash()
    }
}

pub struct Node {
    params: Arc<ParameterSet>,
    options: NodeOptions,
    store: Arc<dyn BlockStore>,
    state: Mutex<LedgerState>,
    tracker: RwLock<ChainWorkTracker>,
    foreign: RwLock<ForeignChain>,
    orphans: Mutex<OrphanPool>,
    snapshot: RwLock<Arc<Ledger>>,
    halted: AtomicBool,
}

impl Node {
    pub fn new(
        params: Arc<ParameterSet>,
        store: Arc<dyn BlockStore>,
        options: NodeOptions,
    ) -> Result<Self, NodeError> {
        let ledger = Ledger::from_genesis(params.clone())?;
        store.put_block(&params.genesis_block)?;
        store.set_main_chain(0, &params.genesis_hash)?;

        info!(
            network = %params.network,
            genesis = %params.genesis_hash,
            "node initialized"
        );

        Ok(Self {
            tracker: RwLock::new(ChainWorkTracker::new(params.clone())),
            foreign: RwLock::new(ForeignChain::new(params.clone())),
            orphans: Mutex::new(OrphanPool::new(
                options.max_orphans,
                options.orphan_max_age_secs,
            )),
            snapshot: RwLock::new(Arc::new(ledger.clone())),
            state: Mutex::new(LedgerState {
                ledger,
                undo: HashMap::new(),
            }),
            halted: AtomicBool::new(false),
            params,
            options,
            store,
        })
    }

    /// Re-submit the main chain recorded in the store, lowest height first
    pub fn restore_from_store(&self, now: u64) -> Result<u64, NodeError> {
        let mut restored = 0;
        let mut height = 1;
        while let Some(hash) = self.store.main_chain_hash(height)? {
            let block = self
                .store
                .get_block(&hash)?
                .ok_or_else(|| StoreError::Corrupt(format!("block {hash}")))?;
            self.process_block(block, now)?;
            restored += 1;
            height += 1;
        }
        if restored > 0 {
            info!(blocks = restored, "restored chain from store");
        }
        Ok(restored)
    }

    pub fn params(&self) -> &Arc<ParameterSet> {
        &self.params
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Validate, admit and (if it becomes best) connect a block
    pub fn process_block(&self, block: Block, now: u64) -> Result<BlockOutcome, NodeError> {
        self.ensure_running()?;
        let outcome = self.accept_block(block, now)?;
        if let BlockOutcome::Accepted { hash, .. } = &outcome {
            self.release_orphans(*hash, now);
        }
        self.activate_best_chain(now)?;
        Ok(outcome)
    }

    /// Add a foreign header; a new foreign tip may unblock deferred blocks
    pub fn add_foreign_header(
        &self,
        header: &ForeignHeader,
        now: u64,
    ) -> Result<ForeignAdmit, NodeError> {
        self.ensure_running()?;
        let admitted = self.foreign.write().add_header(header, now)?;
        if admitted.tip_changed {
            self.activate_best_chain(now)?;
        }
        Ok(admitted)
    }

    /// Periodic housekeeping: expire orphans, retry activation, prune
    pub fn tick(&self, now: u64) -> Result<Activation, NodeError> {
        self.ensure_running()?;
        let expired = self.orphans.lock().expire(now);
        if expired > 0 {
            debug!(expired, "orphans expired");
        }

        let activation = self.activate_best_chain(now)?;

        if self.options.prune_depth > 0 {
            let state = self.state.lock();
            let mut tracker = self.tracker.write();
            if tracker.best_hash() == state.ledger.tip_hash() {
                tracker.prune_stale_branches(self.options.prune_depth);
            }
            drop(tracker);
            self.foreign.write().prune_stale_branches(self.options.prune_depth);
        }
        Ok(activation)
    }

    /// Move the ledger onto the best valid tip
    pub fn activate_best_chain(&self, now: u64) -> Result<Activation, NodeError> {
        self.ensure_running()?;
        let mut state = self.state.lock();
        let result = self.activate_locked(&mut state, now);

        *self.snapshot.write() = Arc::new(state.ledger.clone());

        if let Err(e) = &result {
            if e.class() == ErrorClass::Fatal {
                self.halted.store(true, Ordering::SeqCst);
                error!(error = %e, "activation failed, node halted");
            }
        }
        result
    }

    fn activate_locked(&self, state: &mut LedgerState, now: u64) -> Result<Activation, NodeError> {
        let mut activation = Activation::default();
        let mut previous: Option<PreviousBranch> = None;

        loop {
            let from = state.ledger.tip_hash();
            let path = {
                let tracker = self.tracker.read();
                let to = tracker.best_hash();
                if to == from {
                    break;
                }
                tracker.path(&from, &to)?
            };

            if previous.is_none() && !path.detached.is_empty() {
                previous = Some(PreviousBranch {
                    ledger: state.ledger.clone(),
                    undo: state.undo.clone(),
                    blocks: path.detached.clone(),
                    connected: activation.connected,
                    disconnected: activation.disconnected,
                });
            }

            for hash in &path.detached {
                let undo = state
                    .undo
                    .remove(hash)
                    .ok_or(NodeError::MissingUndo(*hash))?;
                state.ledger.revert_block(&undo)?;
                self.store.truncate_main_chain(undo.height - 1)?;
                activation.disconnected += 1;
            }
            if !path.detached.is_empty() {
                warn!(
                    depth = path.detached.len(),
                    fork_point = %path.fork_point,
                    "chain reorganization"
                );
            }

            let mut restart = false;
            for hash in &path.attached {
                let block = self
                    .store
                    .get_block(hash)?
                    .ok_or_else(|| StoreError::Corrupt(format!("block {hash}")))?;

                let updates_before = state.ledger.governance().history().len();
                let applied = {
                    let foreign = self.foreign.read();
                    let ctx = BlockContext {
                        foreign: &foreign,
                        now,
                    };
                    state.ledger.apply_block(&block, &ctx)
                };

                match applied {
                    Ok(applied) => {
                        self.tracker.write().set_status(hash, BlockStatus::FullyValid);
                        self.store.set_main_chain(applied.undo.height, hash)?;
                        info!(
                            height = applied.undo.height,
                            %hash,
                            txs = block.transactions.len(),
                            applied = applied.receipt.applied_count(),
                            fees_burned = applied.receipt.fees_burned,
                            "block connected"
                        );
                        if state.ledger.governance().history().len() > updates_before {
                            let params = state.ledger.global_params();
                            info!(
                                height = applied.undo.height,
                                usd_cents_per_bitcoin = params.usd_cents_per_bitcoin,
                                min_fee_per_kb = params.min_network_fee_nanos_per_kb,
                                "global params updated"
                            );
                        }
                        state.undo.insert(*hash, applied.undo);
                        activation.connected += 1;
                    }
                    Err(e) => match e.class() {
                        ErrorClass::ConsensusRejected | ErrorClass::TransactionRejected => {
                            warn!(%hash, error = %e, "block failed validation");
                            self.tracker.write().mark_invalid(hash)?;
                            activation.invalidated.push(*hash);
                            restart = true;
                            break;
                        }
                        ErrorClass::Deferred | ErrorClass::Orphan => {
                            debug!(%hash, error = %e, "activation deferred");
                            activation.deferred = Some(*hash);
                            if let Some(branch) = previous.take() {
                                if self.has_less_work(&state.ledger.tip_hash(), &branch.tip()) {
                                    self.reconnect(state, branch, &mut activation)?;
                                }
                            }
                            break;
                        }
                        ErrorClass::Fatal => return Err(e.into()),
                    },
                }
            }

            if !restart {
                break;
            }
        }

        activation.tip = state.ledger.tip_hash();
        activation.height = state.ledger.height();
        Ok(activation)
    }

    fn has_less_work(&self, candidate: &Hash, current: &Hash) -> bool {
        let tracker = self.tracker.read();
        match (tracker.node(candidate), tracker.node(current)) {
            (Some(candidate), Some(current)) => candidate.cumulative_work < current.cumulative_work,
            _ => false,
        }
    }

    /// Go back to the branch the ledger was on before this activation
    fn reconnect(
        &self,
        state: &mut LedgerState,
        branch: PreviousBranch,
        activation: &mut Activation,
    ) -> Result<(), NodeError> {
        let fork_height = branch.ledger.height() - branch.blocks.len() as u64;
        self.store.truncate_main_chain(fork_height)?;
        for hash in &branch.blocks {
            let undo = branch.undo.get(hash).ok_or(NodeError::MissingUndo(*hash))?;
            self.store.set_main_chain(undo.height, hash)?;
        }

        warn!(
            tip = %branch.tip(),
            height = branch.ledger.height(),
            "new branch cannot be judged yet, keeping previous tip"
        );
        activation.connected = branch.connected;
        activation.disconnected = branch.disconnected;
        state.ledger = branch.ledger;
        state.undo = branch.undo;
        Ok(())
    }

    fn accept_block(&self, block: Block, now: u64) -> Result<BlockOutcome, NodeError> {
        let hash = block.hash();
        if let Err(e) = validate_block_body(&block, &self.params) {
            warn!(%hash, error = %e, "block rejected");
            return Err(e.into());
        }

        // the body is stored under the tracker lock so activation never sees a header without it
        let admitted = {
            let mut tracker = self.tracker.write();
            let admitted = tracker.admit(block.header.clone(), now);
            if matches!(&admitted, Ok(result) if result.newly_inserted) {
                self.store.put_block(&block)?;
            }
            admitted
        };

        match admitted {
            Ok(result) if !result.newly_inserted => Ok(BlockOutcome::Duplicate(hash)),
            Ok(result) => {
                if let Some(change) = &result.tip_change {
                    debug!(
                        height = result.height,
                        %hash,
                        reorg = change.is_reorg(),
                        "best header moved"
                    );
                }
                Ok(BlockOutcome::Accepted {
                    hash,
                    height: result.height,
                })
            }
            Err(ChainError::OrphanHeader { parent, .. }) => {
                self.orphans.lock().insert(block, now);
                debug!(%hash, %parent, "block queued as orphan");
                Ok(BlockOutcome::Orphaned(hash))
            }
            Err(e) => {
                warn!(%hash, error = %e, "block rejected");
                Err(e.into())
            }
        }
    }

    /// Admit queued descendants of a newly accepted block
    fn release_orphans(&self, parent: Hash, now: u64) {
        let mut parents = vec![parent];
        while let Some(parent) = parents.pop() {
            let children = self.orphans.lock().take_children(&parent);
            for child in children {
                match self.accept_block(child, now) {
                    Ok(BlockOutcome::Accepted { hash, .. }) => parents.push(hash),
                    Ok(_) => {}
                    Err(e) => debug!(%parent, error = %e, "released orphan rejected"),
                }
            }
        }
    }

    fn ensure_running(&self) -> Result<(), NodeError> {
        if self.is_halted() {
            return Err(NodeError::Halted);
        }
        Ok(())
    }

    /// Latest published ledger
    pub fn snapshot(&self) -> Arc<Ledger> {
        self.snapshot.read().clone()
    }

    pub fn balance(&self, key: &PublicKey) -> u64 {
        self.snapshot().balance(key)
    }

    pub fn coin_state(&self, creator: &PublicKey) -> CreatorCoinState {
        self.snapshot().coin_state(creator)
    }

    /// Price a purchase against the published state
    pub fn quote_buy(&self, creator: &PublicKey, reserve_nanos: u64) -> Result<BuyOutcome, CurveError> {
        let ledger = self.snapshot();
        ledger.curve().buy(ledger.coin_state(creator), reserve_nanos)
    }

    pub fn quote_sell(&self, creator: &PublicKey, coins_nanos: u64) -> Result<SellOutcome, CurveError> {
        let ledger = self.snapshot();
        ledger.curve().sell(ledger.coin_state(creator), coins_nanos)
    }

    pub fn global_params(&self) -> GlobalParamsEntry {
        self.snapshot().global_params().clone()
    }

    /// Header of the best known tip (may be ahead of the ledger)
    pub fn best_header(&self) -> BlockHeader {
        self.tracker.read().best_tip().header.clone()
    }

    pub fn header(&self, hash: &Hash) -> Option<BlockHeader> {
        self.tracker.read().node(hash).map(|n| n.header.clone())
    }

    pub fn block_status(&self, hash: &Hash) -> Option<BlockStatus> {
        self.tracker.read().node(hash).map(|n| n.status)
    }

    /// Target a child of `parent` must meet
    pub fn expected_target(&self, parent: &Hash, header_version: u32) -> Result<BigUint, NodeError> {
        Ok(self.tracker.read().expected_target(parent, header_version)?)
    }

    pub fn foreign(&self) -> RwLockReadGuard<'_, ForeignChain> {
        self.foreign.read()
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.lock().len()
    }

    pub fn is_current(&self, now: u64) -> bool {
        self.tracker.read().is_current(now)
    }

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }
}
