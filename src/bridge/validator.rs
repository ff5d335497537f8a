//! Burn verdicts and exchange credit
//!
//! A burn is judged against the *stalest* foreign block rather than the local
//! foreign tip. Nodes whose tips differ by a few recent blocks still agree on
//! which blocks fell out of the tip-age window, so they reach the same
//! verdict. Block producers demand one extra block of margin so that what
//! they include is accepted by validators whose view lags slightly.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ForeignChain;
use crate::constants::{BASIS_POINTS_DENOMINATOR, NANOS_PER_UNIT, SATOSHIS_PER_BITCOIN};
use crate::crypto::{Hash, PublicKey};
use crate::params::ParameterSet;

/// Proof that coins were sent to the burn address on the foreign chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnTransaction {
    /// Key credited with the exchanged coins
    pub destination: PublicKey,
    pub amount_sats: u64,
    /// Foreign block that mined the burn
    pub foreign_block_height: u64,
    /// Foreign transaction id; credited at most once
    pub foreign_tx_id: Hash,
    /// Inclusion proof, carried but not interpreted here
    pub proof: Vec<u8>,
}

/// Which side of the margin to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurnCheckMode {
    /// Checking a block someone else produced
    Validation,
    /// Choosing what to put in our own block
    Inclusion,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BurnRejection {
    #[error("burn amount is zero")]
    ZeroAmount,
    #[error("destination is not a valid public key")]
    InvalidDestination,
    #[error("burn has {work} blocks of work, needs {required}")]
    InsufficientWork { work: i64, required: i64 },
    #[error("foreign transaction {0} already credited")]
    AlreadyProcessed(Hash),
    #[error("credit does not fit in 64 bits")]
    CreditOverflow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeDecision {
    /// `work` = stalest height minus burn height
    Accepted { work: i64 },
    /// Foreign view not current; decide later
    Deferred,
    Rejected(BurnRejection),
}

impl BridgeDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, BridgeDecision::Accepted { .. })
    }
}

impl fmt::Display for BridgeDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeDecision::Accepted { work } => write!(f, "accepted ({work} blocks of work)"),
            BridgeDecision::Deferred => write!(f, "deferred"),
            BridgeDecision::Rejected(reason) => write!(f, "rejected: {reason}"),
        }
    }
}

/// Nanos credited for a burn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurnCredit {
    pub gross_nanos: u64,
    pub fee_nanos: u64,
    pub net_nanos: u64,
}

#[derive(Debug, Clone)]
pub struct BridgeValidator {
    params: Arc<ParameterSet>,
}

impl BridgeValidator {
    pub fn new(params: Arc<ParameterSet>) -> Self {
        Self { params }
    }

    /// Judge a burn against the foreign view
    pub fn validate_burn(
        &self,
        tx: &BurnTransaction,
        foreign: &ForeignChain,
        now: u64,
        mode: BurnCheckMode,
    ) -> BridgeDecision {
        if tx.amount_sats == 0 {
            return BridgeDecision::Rejected(BurnRejection::ZeroAmount);
        }
        if !tx.destination.is_valid() {
            return BridgeDecision::Rejected(BurnRejection::InvalidDestination);
        }

        if !foreign.is_current(now) {
            return BridgeDecision::Deferred;
        }
        let stalest = match foreign.stalest_block(now) {
            Some(node) => node,
            None => return BridgeDecision::Deferred,
        };

        let work = stalest.height as i64 - tx.foreign_block_height as i64;
        let min = self.params.bridge.min_burn_work_blocks as i64;
        let required = match mode {
            BurnCheckMode::Validation => min,
            BurnCheckMode::Inclusion => min + 1,
        };

        if work < required {
            return BridgeDecision::Rejected(BurnRejection::InsufficientWork { work, required });
        }
        BridgeDecision::Accepted { work }
    }

    /// Exchange credit at `usd_cents_per_bitcoin`; zero means the genesis rate
    pub fn credit_for(
        &self,
        amount_sats: u64,
        usd_cents_per_bitcoin: u64,
    ) -> Result<BurnCredit, BurnRejection> {
        let bridge = &self.params.bridge;
        let rate = match usd_cents_per_bitcoin {
            0 => bridge.genesis_usd_cents_per_bitcoin,
            rate => rate,
        };

        let gross = u128::from(amount_sats)
            .checked_mul(u128::from(rate))
            .and_then(|v| v.checked_mul(u128::from(NANOS_PER_UNIT)))
            .ok_or(BurnRejection::CreditOverflow)?
            / (u128::from(SATOSHIS_PER_BITCOIN) * u128::from(bridge.usd_cents_per_unit.max(1)));
        let fee = gross
            .checked_mul(u128::from(bridge.bridge_fee_basis_points))
            .ok_or(BurnRejection::CreditOverflow)?
            / u128::from(BASIS_POINTS_DENOMINATOR);

        let gross_nanos = u64::try_from(gross).map_err(|_| BurnRejection::CreditOverflow)?;
        let fee_nanos = u64::try_from(fee).map_err(|_| BurnRejection::CreditOverflow)?;
        Ok(BurnCredit {
            gross_nanos,
            fee_nanos,
            net_nanos: gross_nanos - fee_nanos,
        })
    }
}
