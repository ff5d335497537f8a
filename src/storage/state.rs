//! Ledger state
//!
//! Account balances, nonces, creator coin curves and holdings, the set of
//! credited foreign burns and the governance log. Blocks are applied with a
//! journal of prior values; the journal is the undo data handed back to the
//! caller and replayed backwards on revert.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::bridge::{BridgeDecision, BridgeValidator, BurnCheckMode, BurnRejection, ForeignChain};
use crate::consensus::Block;
use crate::crypto::{hash_encoded, Hash, PublicKey};
use crate::curve::{BondingCurveEngine, CreatorCoinState, CurveError};
use crate::error::ErrorClass;
use crate::governance::{GlobalParamsEntry, GovernanceError, GovernanceParamStore};
use crate::params::ParameterSet;
use crate::validation::{Transaction, TxPayload};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("transaction {0} has an invalid signature")]
    InvalidSignature(Hash),
    #[error("bad nonce: expected {expected}, got {got}")]
    BadNonce { expected: u64, got: u64 },
    #[error("fee {fee} below required {required}")]
    FeeTooLow { fee: u64, required: u64 },
    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: u64, available: u64 },
    #[error("insufficient holdings: selling {requested}, hold {available}")]
    InsufficientHoldings { requested: u64, available: u64 },
    #[error("seed balances outside the genesis block")]
    SeedOutsideGenesis,
    #[error("curve: {0}")]
    Curve(#[from] CurveError),
    #[error("governance: {0}")]
    Governance(#[from] GovernanceError),
    #[error("burn rejected: {0}")]
    BurnRejected(#[from] BurnRejection),
    #[error("foreign view not current")]
    BurnDeferred,
    #[error("block {hash} does not extend tip {tip}")]
    WrongParent { hash: Hash, tip: Hash },
    #[error("undo data for {undo} does not match tip {tip}")]
    UndoMismatch { undo: Hash, tip: Hash },
    #[error("balance overflow")]
    Overflow,
}

impl LedgerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LedgerError::BadNonce { .. }
            | LedgerError::FeeTooLow { .. }
            | LedgerError::InsufficientBalance { .. }
            | LedgerError::InsufficientHoldings { .. } => ErrorClass::TransactionRejected,
            LedgerError::Curve(e) => e.class(),
            LedgerError::Governance(e) => e.class(),
            LedgerError::InvalidSignature(_)
            | LedgerError::SeedOutsideGenesis
            | LedgerError::BurnRejected(_) => ErrorClass::ConsensusRejected,
            LedgerError::BurnDeferred => ErrorClass::Deferred,
            LedgerError::WrongParent { .. }
            | LedgerError::UndoMismatch { .. }
            | LedgerError::Overflow => ErrorClass::Fatal,
        }
    }
}

/// Foreign view and clock a block is applied against
#[derive(Debug, Clone, Copy)]
pub struct BlockContext<'a> {
    pub foreign: &'a ForeignChain,
    pub now: u64,
}

/// One journaled mutation; holds the value before the change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoEntry {
    Balance { key: PublicKey, prev: Option<u64> },
    Nonce { key: PublicKey, prev: Option<u64> },
    CoinState { creator: PublicKey, prev: Option<CreatorCoinState> },
    Holding { creator: PublicKey, holder: PublicKey, prev: Option<u64> },
    BurnProcessed(Hash),
    GovernancePush,
}

/// Everything needed to revert one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockUndo {
    pub hash: Hash,
    pub height: u64,
    pub prev_tip: Hash,
    pub entries: Vec<UndoEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Applied { fee_nanos: u64 },
    Rejected(LedgerError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_id: Hash,
    pub status: TxStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReceipt {
    pub hash: Hash,
    pub height: u64,
    pub transactions: Vec<TxReceipt>,
    pub fees_burned: u64,
}

impl BlockReceipt {
    pub fn applied_count(&self) -> usize {
        self.transactions
            .iter()
            .filter(|r| matches!(r.status, TxStatus::Applied { .. }))
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct AppliedBlock {
    pub undo: BlockUndo,
    pub receipt: BlockReceipt,
}

/// Consensus state at one tip
#[derive(Debug, Clone)]
pub struct Ledger {
    params: Arc<ParameterSet>,
    bridge: BridgeValidator,
    curve: BondingCurveEngine,
    balances: HashMap<PublicKey, u64>,
    nonces: HashMap<PublicKey, u64>,
    coins: HashMap<PublicKey, CreatorCoinState>,
    /// Keyed `(creator, holder)` so one creator's holders are a range
    holdings: BTreeMap<(PublicKey, PublicKey), u64>,
    processed_burns: HashSet<Hash>,
    governance: GovernanceParamStore,
    tip_hash: Hash,
    height: u64,
}

impl Ledger {
    /// Ledger after the genesis block
    pub fn from_genesis(params: Arc<ParameterSet>) -> Result<Self, LedgerError> {
        let curve = BondingCurveEngine::from_params(&params.curve)?;
        let mut ledger = Self {
            bridge: BridgeValidator::new(params.clone()),
            curve,
            balances: HashMap::new(),
            nonces: HashMap::new(),
            coins: HashMap::new(),
            holdings: BTreeMap::new(),
            processed_burns: HashSet::new(),
            governance: GovernanceParamStore::new(params.clone()),
            tip_hash: params.genesis_hash,
            height: 0,
            params,
        };

        let genesis = ledger.params.genesis_block.clone();
        let mut journal = Vec::new();
        for tx in &genesis.transactions {
            if let TxPayload::SeedBalances(outputs) = &tx.payload {
                for out in outputs {
                    ledger.credit(out.public_key, out.amount_nanos, &mut journal)?;
                }
            }
        }
        Ok(ledger)
    }

    pub fn params(&self) -> &Arc<ParameterSet> {
        &self.params
    }

    pub fn tip_hash(&self) -> Hash {
        self.tip_hash
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn balance(&self, key: &PublicKey) -> u64 {
        self.balances.get(key).copied().unwrap_or(0)
    }

    /// Next nonce the account must use
    pub fn nonce(&self, key: &PublicKey) -> u64 {
        self.nonces.get(key).copied().unwrap_or(0)
    }

    pub fn coin_state(&self, creator: &PublicKey) -> CreatorCoinState {
        self.coins.get(creator).copied().unwrap_or_default()
    }

    pub fn holding(&self, holder: &PublicKey, creator: &PublicKey) -> u64 {
        self.holdings.get(&(*creator, *holder)).copied().unwrap_or(0)
    }

    pub fn is_burn_processed(&self, foreign_tx_id: &Hash) -> bool {
        self.processed_burns.contains(foreign_tx_id)
    }

    pub fn global_params(&self) -> &GlobalParamsEntry {
        self.governance.current()
    }

    pub fn governance(&self) -> &GovernanceParamStore {
        &self.governance
    }

    pub fn curve(&self) -> &BondingCurveEngine {
        &self.curve
    }

    pub fn bridge(&self) -> &BridgeValidator {
        &self.bridge
    }

    /// Sum of all balances and locked reserves
    pub fn total_nanos(&self) -> u128 {
        let balances: u128 = self.balances.values().map(|v| u128::from(*v)).sum();
        let reserves: u128 = self
            .coins
            .values()
            .map(|c| u128::from(c.reserve_balance_nanos))
            .sum();
        balances + reserves
    }

    /// Order-independent digest of the consensus state
    pub fn state_digest(&self) -> Hash {
        let balances: BTreeMap<_, _> = self.balances.iter().collect();
        let nonces: BTreeMap<_, _> = self.nonces.iter().collect();
        let coins: BTreeMap<_, _> = self.coins.iter().collect();
        let mut burns: Vec<_> = self.processed_burns.iter().collect();
        burns.sort();

        hash_encoded(&(
            balances,
            nonces,
            coins,
            &self.holdings,
            burns,
            self.governance.history(),
            self.tip_hash,
            self.height,
        ))
    }

    /// Apply a block on top of the current tip
    ///
    /// Returns the undo data and per-transaction receipts. On a block-level
    /// error the ledger is left exactly as it was.
    pub fn apply_block(
        &mut self,
        block: &Block,
        ctx: &BlockContext<'_>,
    ) -> Result<AppliedBlock, LedgerError> {
        let hash = block.hash();
        if block.header.prev_hash != self.tip_hash || block.height() != self.height + 1 {
            return Err(LedgerError::WrongParent {
                hash,
                tip: self.tip_hash,
            });
        }

        let height = block.height();
        let mut journal = Vec::new();
        let mut receipts = Vec::with_capacity(block.transactions.len());
        let mut fees_burned = 0u64;

        for tx in &block.transactions {
            let mark = journal.len();
            match self.apply_tx(tx, height, ctx, &mut journal) {
                Ok(fee_nanos) => {
                    fees_burned = fees_burned.saturating_add(fee_nanos);
                    receipts.push(TxReceipt {
                        tx_id: tx.hash(),
                        status: TxStatus::Applied { fee_nanos },
                    });
                }
                Err(e) if e.class() == ErrorClass::TransactionRejected => {
                    self.rollback(&mut journal, mark);
                    debug!(tx = %tx.hash(), error = %e, "transaction skipped");
                    receipts.push(TxReceipt {
                        tx_id: tx.hash(),
                        status: TxStatus::Rejected(e),
                    });
                }
                Err(e) => {
                    self.rollback(&mut journal, 0);
                    return Err(e);
                }
            }
        }

        let undo = BlockUndo {
            hash,
            height,
            prev_tip: self.tip_hash,
            entries: journal,
        };
        self.tip_hash = hash;
        self.height = height;

        Ok(AppliedBlock {
            undo,
            receipt: BlockReceipt {
                hash,
                height,
                transactions: receipts,
                fees_burned,
            },
        })
    }

    /// Undo the tip block
    pub fn revert_block(&mut self, undo: &BlockUndo) -> Result<(), LedgerError> {
        if undo.hash != self.tip_hash || undo.height != self.height {
            return Err(LedgerError::UndoMismatch {
                undo: undo.hash,
                tip: self.tip_hash,
            });
        }
        for entry in undo.entries.iter().rev() {
            self.undo_entry(entry);
        }
        self.tip_hash = undo.prev_tip;
        self.height = undo.height - 1;
        Ok(())
    }

    /// Apply one transaction at `height`, keeping its effects only on success
    ///
    /// Used to dry-run candidates against a scratch copy of the ledger.
    pub fn try_transaction(
        &mut self,
        tx: &Transaction,
        height: u64,
        ctx: &BlockContext<'_>,
    ) -> Result<u64, LedgerError> {
        let mut journal = Vec::new();
        let result = self.apply_tx(tx, height, ctx, &mut journal);
        if result.is_err() {
            self.rollback(&mut journal, 0);
        }
        result
    }

    fn apply_tx(
        &mut self,
        tx: &Transaction,
        height: u64,
        ctx: &BlockContext<'_>,
        journal: &mut Vec<UndoEntry>,
    ) -> Result<u64, LedgerError> {
        let sender = tx.public_key;
        let signed = tx.requires_signature();
        if signed {
            if !tx.verify_signature() {
                return Err(LedgerError::InvalidSignature(tx.hash()));
            }
            let expected = self.nonce(&sender);
            if tx.nonce != expected {
                return Err(LedgerError::BadNonce {
                    expected,
                    got: tx.nonce,
                });
            }
            let required = self.min_fee_for(tx.size_bytes());
            if tx.fee_nanos < required {
                return Err(LedgerError::FeeTooLow {
                    fee: tx.fee_nanos,
                    required,
                });
            }
        }

        match &tx.payload {
            TxPayload::SeedBalances(_) => return Err(LedgerError::SeedOutsideGenesis),
            TxPayload::BitcoinExchange(burn) => {
                if self.processed_burns.contains(&burn.foreign_tx_id) {
                    return Err(BurnRejection::AlreadyProcessed(burn.foreign_tx_id).into());
                }
                match self
                    .bridge
                    .validate_burn(burn, ctx.foreign, ctx.now, BurnCheckMode::Validation)
                {
                    BridgeDecision::Accepted { .. } => {}
                    BridgeDecision::Deferred => return Err(LedgerError::BurnDeferred),
                    BridgeDecision::Rejected(reason) => return Err(reason.into()),
                }

                let credit = self
                    .bridge
                    .credit_for(burn.amount_sats, self.governance.current().usd_cents_per_bitcoin)?;
                self.credit(burn.destination, credit.net_nanos, journal)?;
                self.processed_burns.insert(burn.foreign_tx_id);
                journal.push(UndoEntry::BurnProcessed(burn.foreign_tx_id));
            }
            TxPayload::BuyCreatorCoin {
                creator,
                reserve_nanos,
            } => {
                let cost = tx
                    .fee_nanos
                    .checked_add(*reserve_nanos)
                    .ok_or(LedgerError::Overflow)?;
                self.debit(sender, cost, journal)?;
                let outcome = self.curve.buy(self.coin_state(creator), *reserve_nanos)?;
                self.set_coin_state(*creator, outcome.state, journal);
                let held = self
                    .holding(&sender, creator)
                    .checked_add(outcome.coins_issued)
                    .ok_or(LedgerError::Overflow)?;
                self.set_holding(*creator, sender, held, journal);
            }
            TxPayload::SellCreatorCoin {
                creator,
                coins_nanos,
            } => {
                let held = self.holding(&sender, creator);
                if held < *coins_nanos {
                    return Err(LedgerError::InsufficientHoldings {
                        requested: *coins_nanos,
                        available: held,
                    });
                }
                self.debit(sender, tx.fee_nanos, journal)?;
                let outcome = self.curve.sell(self.coin_state(creator), *coins_nanos)?;
                self.set_coin_state(*creator, outcome.state, journal);
                if outcome.auto_sold {
                    self.clear_holdings(*creator, journal);
                } else {
                    self.set_holding(*creator, sender, held - coins_nanos, journal);
                }
                self.credit(sender, outcome.reserve_returned, journal)?;
            }
            TxPayload::UpdateGlobalParams(update) => {
                self.debit(sender, tx.fee_nanos, journal)?;
                self.governance.apply_update(update, &sender, height)?;
                journal.push(UndoEntry::GovernancePush);
            }
        }

        if !signed {
            return Ok(0);
        }
        let next = self.nonce(&sender) + 1;
        self.set_nonce(sender, next, journal);
        Ok(tx.fee_nanos)
    }

    /// `min_fee_per_kb * size / 1000`
    fn min_fee_for(&self, size_bytes: u64) -> u64 {
        let per_kb = u128::from(self.governance.current().min_network_fee_nanos_per_kb);
        u64::try_from(per_kb * u128::from(size_bytes) / 1000).unwrap_or(u64::MAX)
    }

    fn credit(
        &mut self,
        key: PublicKey,
        amount: u64,
        journal: &mut Vec<UndoEntry>,
    ) -> Result<(), LedgerError> {
        let balance = self
            .balance(&key)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        self.set_balance(key, balance, journal);
        Ok(())
    }

    fn debit(
        &mut self,
        key: PublicKey,
        amount: u64,
        journal: &mut Vec<UndoEntry>,
    ) -> Result<(), LedgerError> {
        let available = self.balance(&key);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                needed: amount,
                available,
            });
        }
        self.set_balance(key, available - amount, journal);
        Ok(())
    }

    fn set_balance(&mut self, key: PublicKey, value: u64, journal: &mut Vec<UndoEntry>) {
        let prev = if value == 0 {
            self.balances.remove(&key)
        } else {
            self.balances.insert(key, value)
        };
        journal.push(UndoEntry::Balance { key, prev });
    }

    fn set_nonce(&mut self, key: PublicKey, value: u64, journal: &mut Vec<UndoEntry>) {
        let prev = self.nonces.insert(key, value);
        journal.push(UndoEntry::Nonce { key, prev });
    }

    fn set_coin_state(
        &mut self,
        creator: PublicKey,
        state: CreatorCoinState,
        journal: &mut Vec<UndoEntry>,
    ) {
        let prev = if state.is_empty() {
            self.coins.remove(&creator)
        } else {
            self.coins.insert(creator, state)
        };
        journal.push(UndoEntry::CoinState { creator, prev });
    }

    fn set_holding(
        &mut self,
        creator: PublicKey,
        holder: PublicKey,
        value: u64,
        journal: &mut Vec<UndoEntry>,
    ) {
        let prev = if value == 0 {
            self.holdings.remove(&(creator, holder))
        } else {
            self.holdings.insert((creator, holder), value)
        };
        journal.push(UndoEntry::Holding {
            creator,
            holder,
            prev,
        });
    }

    /// Drop every holder of `creator` after the supply was liquidated
    fn clear_holdings(&mut self, creator: PublicKey, journal: &mut Vec<UndoEntry>) {
        let holders: Vec<PublicKey> = self
            .holdings
            .range((creator, PublicKey([0u8; 32]))..=(creator, PublicKey([0xff; 32])))
            .map(|((_, holder), _)| *holder)
            .collect();
        for holder in holders {
            self.set_holding(creator, holder, 0, journal);
        }
    }

    fn rollback(&mut self, journal: &mut Vec<UndoEntry>, mark: usize) {
        while journal.len() > mark {
            if let Some(entry) = journal.pop() {
                self.undo_entry(&entry);
            }
        }
    }

    fn undo_entry(&mut self, entry: &UndoEntry) {
        match entry {
            UndoEntry::Balance { key, prev } => restore(&mut self.balances, *key, *prev),
            UndoEntry::Nonce { key, prev } => restore(&mut self.nonces, *key, *prev),
            UndoEntry::CoinState { creator, prev } => restore(&mut self.coins, *creator, *prev),
            UndoEntry::Holding {
                creator,
                holder,
                prev,
            } => match prev {
                Some(v) => {
                    self.holdings.insert((*creator, *holder), *v);
                }
                None => {
                    self.holdings.remove(&(*creator, *holder));
                }
            },
            UndoEntry::BurnProcessed(id) => {
                self.processed_burns.remove(id);
            }
            UndoEntry::GovernancePush => {
                self.governance.pop_latest();
            }
        }
    }
}

fn restore<V>(map: &mut HashMap<PublicKey, V>, key: PublicKey, prev: Option<V>) {
    match prev {
        Some(v) => {
            map.insert(key, v);
        }
        None => {
            map.remove(&key);
        }
    }
}
