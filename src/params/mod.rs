//! Network parameter sets
//!
//! Every consensus constant lives in one immutable [`ParameterSet`]. There are
//! exactly two canonical instances, built lazily on first access and shared
//! through `Arc` for the lifetime of the process.

mod networks;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

use num_bigint::BigUint;
use num_rational::Ratio;
use serde::{Deserialize, Serialize};

use crate::consensus::Block;
use crate::crypto::{Hash, PublicKey};

/// Which chain this node follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Mainnet,
    Testnet,
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkType::Mainnet => write!(f, "mainnet"),
            NetworkType::Testnet => write!(f, "testnet"),
        }
    }
}

/// Trusted starting point of the foreign header chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignCheckpoint {
    pub hash: Hash,
    pub height: u64,
    pub timestamp: u64,
    pub bits: u32,
}

/// Parameters of the Bitcoin burn bridge
#[derive(Debug, Clone)]
pub struct BridgeParams {
    pub checkpoint: ForeignCheckpoint,
    /// Work required on top of the checkpoint before the foreign view counts as current
    pub foreign_min_chain_work: BigUint,
    pub foreign_max_tip_age: u64,
    pub foreign_max_tstamp_offset_secs: u64,
    /// Blocks required between a burn and the stalest foreign block
    pub min_burn_work_blocks: u64,
    pub bridge_fee_basis_points: u64,
    pub burn_address: String,
    /// Exchange rate used while governance has not set one
    pub genesis_usd_cents_per_bitcoin: u64,
    pub usd_cents_per_unit: u64,
}

/// Parameters of the creator coin bonding curve
#[derive(Debug, Clone)]
pub struct CurveParams {
    pub creator_coin_slope: Ratio<u64>,
    pub creator_coin_reserve_ratio: Ratio<u64>,
    pub creator_coin_trade_fee_basis_points: u64,
    pub auto_sell_threshold_nanos: u64,
}

/// Immutable per-network consensus constants
#[derive(Debug, Clone)]
pub struct ParameterSet {
    pub network: NetworkType,
    pub genesis_block: Block,
    pub genesis_hash: Hash,
    /// Easiest permitted target; also the genesis target
    pub max_target: BigUint,
    /// Hardest permitted target
    pub min_target: BigUint,
    pub min_chain_work: BigUint,
    pub max_tip_age: u64,
    pub time_between_blocks: u64,
    pub time_between_difficulty_retargets: u64,
    pub max_difficulty_retarget_factor: u64,
    pub v1_difficulty_adjustment_factor: u64,
    pub max_tstamp_offset_secs: u64,
    pub max_block_size_bytes: u64,
    pub miner_max_block_size_bytes: u64,
    pub public_key_prefix: [u8; 3],
    pub private_key_prefix: [u8; 3],
    pub bridge: BridgeParams,
    pub curve: CurveParams,
    pub param_updaters: BTreeSet<PublicKey>,
    pub max_network_fee_nanos_per_kb: u64,
    pub max_create_profile_fee_nanos: u64,
}

static MAINNET: OnceLock<Arc<ParameterSet>> = OnceLock::new();
static TESTNET: OnceLock<Arc<ParameterSet>> = OnceLock::new();

impl ParameterSet {
    /// Canonical mainnet parameters
    pub fn mainnet() -> Arc<ParameterSet> {
        MAINNET.get_or_init(|| Arc::new(networks::mainnet())).clone()
    }

    /// Canonical testnet parameters
    pub fn testnet() -> Arc<ParameterSet> {
        TESTNET.get_or_init(|| Arc::new(networks::testnet())).clone()
    }

    pub fn for_network(network: NetworkType) -> Arc<ParameterSet> {
        match network {
            NetworkType::Mainnet => Self::mainnet(),
            NetworkType::Testnet => Self::testnet(),
        }
    }

    /// Blocks per difficulty epoch (never zero)
    pub fn epoch_length(&self) -> u64 {
        (self.time_between_difficulty_retargets / self.time_between_blocks.max(1)).max(1)
    }

    pub fn is_param_updater(&self, key: &PublicKey) -> bool {
        self.param_updaters.contains(key)
    }
}
