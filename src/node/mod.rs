//! Node - genesis, block processing and block templates

pub mod genesis;
mod manager;
mod orphans;
mod producer;

pub use genesis::{build_genesis_block, GenesisInfo};
pub use manager::*;
pub use orphans::OrphanPool;
pub use producer::*;
