//! Literal values for the two canonical networks

use std::collections::BTreeSet;

use num_bigint::BigUint;
use num_rational::Ratio;

use super::{BridgeParams, CurveParams, ForeignCheckpoint, NetworkType, ParameterSet};
use crate::constants::NANOS_PER_UNIT;
use crate::crypto::{Hash, PublicKey};
use crate::node::genesis::build_genesis_block;
use crate::validation::SeedOutput;

/// Genesis timestamp shared by both networks
pub const GENESIS_TIMESTAMP: u64 = 1_610_948_544;

const HOUR: u64 = 60 * 60;

/// Keys allowed to sign global parameter updates
const MAINNET_PARAM_UPDATERS: [&str; 4] = [
    "31ce434ad65ccadf7842df67f47233466b4bda02b581938c1c18ab88a65c6da8",
    "791267e34bfc19c45ed974d0b04837e4040a4b37830ef892fadc17efc1f78048",
    "4e409bfd302e3edf57fc6a0b19e24635400440bd996571dd747943b61e5a8a3f",
    "c781687a3f60ec923ee5a13a4bf05a2cb0fb47f7eda3897870a10d6a6d61161e",
];

/// Testnet well-known keys (secret scalars 1, 2 and 3)
const TESTNET_KEYS: [&str; 3] = [
    "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
    "c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5",
    "f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9",
];

fn big_hex(hex: &str) -> BigUint {
    BigUint::parse_bytes(hex.as_bytes(), 16).expect("valid hex literal")
}

fn hash_hex(hex: &str) -> Hash {
    Hash::from_hex(hex).expect("valid hash literal")
}

fn key(hex: &str) -> PublicKey {
    PublicKey::from_hex(hex).expect("valid public key literal")
}

fn curve_params() -> CurveParams {
    CurveParams {
        creator_coin_slope: Ratio::new(3, 1000),
        creator_coin_reserve_ratio: Ratio::new(1, 3),
        creator_coin_trade_fee_basis_points: 1,
        auto_sell_threshold_nanos: 10,
    }
}

pub(super) fn mainnet() -> ParameterSet {
    let seeds = vec![SeedOutput {
        public_key: key(MAINNET_PARAM_UPDATERS[0]),
        amount_nanos: 1_000_000 * NANOS_PER_UNIT,
    }];
    let genesis_block = build_genesis_block(seeds, GENESIS_TIMESTAMP);
    let genesis_hash = genesis_block.hash();

    ParameterSet {
        network: NetworkType::Mainnet,
        genesis_block,
        genesis_hash,
        max_target: big_hex("000001FFFF000000000000000000000000000000000000000000000000000000"),
        min_target: BigUint::from(1u8),
        min_chain_work: big_hex("000000000000000000000000000000000000000000000000006314f9a85a949b"),
        max_tip_age: 24 * HOUR,
        time_between_blocks: 5 * 60,
        time_between_difficulty_retargets: 24 * HOUR,
        max_difficulty_retarget_factor: 4,
        v1_difficulty_adjustment_factor: 10,
        max_tstamp_offset_secs: 2 * HOUR,
        max_block_size_bytes: 16_000_000,
        miner_max_block_size_bytes: 2_000_000,
        public_key_prefix: [0xcd, 0x14, 0x00],
        private_key_prefix: [0x35, 0x00, 0x00],
        bridge: BridgeParams {
            checkpoint: ForeignCheckpoint {
                hash: hash_hex("000000000000000000092d577cc673bede24b6d7199ee69c67eeb46c18fc978c"),
                height: 653_184,
                timestamp: 1_602_950_620,
                bits: 386_798_414,
            },
            foreign_min_chain_work: big_hex("000000000000000000000000000000000000000007e99d77f246db819c3dfa96"),
            foreign_max_tip_age: 4 * HOUR,
            foreign_max_tstamp_offset_secs: 2 * HOUR,
            min_burn_work_blocks: 1,
            bridge_fee_basis_points: 10,
            burn_address: "1PuXkbwqqwzEYo9SPGyAihAge3e9Lc71b".to_string(),
            genesis_usd_cents_per_bitcoin: 2_700_000,
            usd_cents_per_unit: 100,
        },
        curve: curve_params(),
        param_updaters: MAINNET_PARAM_UPDATERS.iter().map(|k| key(k)).collect(),
        max_network_fee_nanos_per_kb: 100 * NANOS_PER_UNIT,
        max_create_profile_fee_nanos: 100 * NANOS_PER_UNIT,
    }
}

pub(super) fn testnet() -> ParameterSet {
    let seeds = TESTNET_KEYS
        .iter()
        .map(|k| SeedOutput {
            public_key: key(k),
            amount_nanos: 1_000_000 * NANOS_PER_UNIT,
        })
        .collect();
    let genesis_block = build_genesis_block(seeds, GENESIS_TIMESTAMP);
    let genesis_hash = genesis_block.hash();

    let mut param_updaters: BTreeSet<PublicKey> =
        MAINNET_PARAM_UPDATERS.iter().map(|k| key(k)).collect();
    param_updaters.insert(key(TESTNET_KEYS[0]));

    ParameterSet {
        network: NetworkType::Testnet,
        genesis_block,
        genesis_hash,
        max_target: big_hex("0090000000000000000000000000000000000000000000000000000000000000"),
        min_target: BigUint::from(1u8),
        min_chain_work: BigUint::from(0u8),
        max_tip_age: 24 * HOUR,
        time_between_blocks: 2,
        time_between_difficulty_retargets: 6,
        max_difficulty_retarget_factor: 2,
        v1_difficulty_adjustment_factor: 10,
        max_tstamp_offset_secs: 2 * HOUR,
        max_block_size_bytes: 1_000_000,
        miner_max_block_size_bytes: 200_000,
        public_key_prefix: [0x11, 0xc2, 0x00],
        private_key_prefix: [0x4f, 0x06, 0x1b],
        bridge: BridgeParams {
            checkpoint: ForeignCheckpoint {
                hash: hash_hex("000000000000003aae8fb976056413aa1d863eb5bee381ff16c9642283b1da1a"),
                height: 1_897_056,
                timestamp: 1_607_659_152,
                bits: 424_073_553,
            },
            foreign_min_chain_work: BigUint::from(0u8),
            foreign_max_tip_age: 4 * HOUR,
            foreign_max_tstamp_offset_secs: 2 * HOUR,
            min_burn_work_blocks: 1,
            bridge_fee_basis_points: 10,
            burn_address: "mhziDsPWSMwUqvZkVdKY92CjesziGP3wHL".to_string(),
            genesis_usd_cents_per_bitcoin: 2_700_000,
            usd_cents_per_unit: 100,
        },
        curve: curve_params(),
        param_updaters,
        max_network_fee_nanos_per_kb: 100 * NANOS_PER_UNIT,
        max_create_profile_fee_nanos: 100 * NANOS_PER_UNIT,
    }
}
