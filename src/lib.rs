//! Kindle (KDL) Blockchain Core Library
//!
//! A proof-of-work chain whose initial supply is bootstrapped by burning
//! Bitcoin, with per-profile creator coins priced on a Bancor bonding curve
//! and a small set of governance-updatable network parameters.
//!
//! KDL is the short form used in addresses, logs, and protocol identifiers.

pub mod bridge;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod curve;
pub mod error;
pub mod governance;
pub mod node;
pub mod params;
pub mod storage;
pub mod validation;

/// Protocol constants - HARD-CODED, NEVER CONFIGURABLE
pub mod constants {
    /// Base units per whole coin (9 decimal places)
    pub const NANOS_PER_UNIT: u64 = 1_000_000_000;

    /// Satoshis per whole Bitcoin
    pub const SATOSHIS_PER_BITCOIN: u64 = 100_000_000;

    /// Denominator for every basis-point fee
    pub const BASIS_POINTS_DENOMINATOR: u64 = 10_000;

    /// Header version the chain started with (little-endian, double SHA-256)
    pub const HEADER_VERSION_0: u32 = 0;

    /// Widened big-endian header hashed with BLAKE3
    pub const HEADER_VERSION_1: u32 = 1;

    /// Version produced by this node
    pub const CURRENT_HEADER_VERSION: u32 = HEADER_VERSION_1;

    /// Chain name (short form for addresses/logos)
    pub const CHAIN_NAME: &str = "KDL";

    /// Full chain name
    pub const CHAIN_FULL_NAME: &str = "Kindle";
}
