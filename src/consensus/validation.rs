//! Block validation errors and structural body checks
//!
//! Header-level checks live with the chain tracker; the functions here look
//! only at the block body and need no chain context.

use thiserror::Error;

use crate::consensus::Block;
use crate::crypto::Hash;
use crate::error::ErrorClass;
use crate::params::ParameterSet;
use crate::validation::TxPayload;

/// Validation errors
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Orphan header {hash}: parent {parent} unknown")]
    OrphanHeader { hash: Hash, parent: Hash },
    #[error("Parent {0} is invalid")]
    InvalidParent(Hash),
    #[error("Block {0} is already known to be invalid")]
    KnownInvalid(Hash),
    #[error("Unsupported header version {0}")]
    UnsupportedVersion(u32),
    #[error("Header field does not fit its version's encoding")]
    FieldOverflow,
    #[error("Invalid height: expected {expected}, got {got}")]
    BadHeight { expected: u64, got: u64 },
    #[error("Timestamp {timestamp} beyond limit {limit}")]
    TimestampOutOfRange { timestamp: u64, limit: u64 },
    #[error("Invalid proof of work for {0}")]
    InvalidPoW(Hash),
    #[error("Invalid merkle root")]
    InvalidMerkleRoot,
    #[error("Block too large: {size} bytes, max {max}")]
    BlockTooLarge { size: u64, max: u64 },
    #[error("Genesis-only transaction outside genesis")]
    GenesisPayloadOutsideGenesis,
    #[error("Missing ancestor of {hash} at height {height}")]
    MissingAncestor { hash: Hash, height: u64 },
    #[error("Unknown block {0}")]
    UnknownBlock(Hash),
}

impl ChainError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ChainError::OrphanHeader { .. } => ErrorClass::Orphan,
            ChainError::MissingAncestor { .. } | ChainError::UnknownBlock(_) => ErrorClass::Fatal,
            _ => ErrorClass::ConsensusRejected,
        }
    }
}

/// Validate merkle root matches transactions
pub fn validate_merkle_root(block: &Block) -> Result<(), ChainError> {
    if block.compute_merkle_root() != block.header.merkle_root {
        return Err(ChainError::InvalidMerkleRoot);
    }
    Ok(())
}

/// Structural checks on a block body
///
/// Merkle root, serialized size against `max_block_size_bytes`, and seed
/// payloads appearing only in the genesis block.
pub fn validate_block_body(block: &Block, params: &ParameterSet) -> Result<(), ChainError> {
    validate_merkle_root(block)?;

    let size = block.size_bytes();
    if size > params.max_block_size_bytes {
        return Err(ChainError::BlockTooLarge {
            size,
            max: params.max_block_size_bytes,
        });
    }

    if !block.is_genesis()
        && block
            .transactions
            .iter()
            .any(|tx| matches!(tx.payload, TxPayload::SeedBalances(_)))
    {
        return Err(ChainError::GenesisPayloadOutsideGenesis);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::BlockHeader;
    use crate::crypto::{hash_bytes, PrivateKey};
    use crate::validation::{SeedOutput, Transaction};

    fn block_with(transactions: Vec<Transaction>, height: u64) -> Block {
        let mut block = Block::new(
            BlockHeader::new(1, hash_bytes(b"parent"), Hash::zero(), 0, height, 0),
            transactions,
        );
        block.header.merkle_root = block.compute_merkle_root();
        block
    }

    fn seed_tx() -> Transaction {
        Transaction::seed_balances(vec![SeedOutput {
            public_key: PrivateKey::generate().public_key(),
            amount_nanos: 5,
        }])
    }

    #[test]
    fn test_merkle_validation() {
        let block = block_with(vec![seed_tx()], 0);
        assert!(validate_merkle_root(&block).is_ok());
    }

    #[test]
    fn test_invalid_merkle_root() {
        let mut block = block_with(vec![seed_tx()], 0);
        block.header.merkle_root = hash_bytes(b"wrong");
        assert!(matches!(
            validate_merkle_root(&block),
            Err(ChainError::InvalidMerkleRoot)
        ));
    }

    #[test]
    fn test_seed_payload_rejected_outside_genesis() {
        let params = ParameterSet::testnet();
        let block = block_with(vec![seed_tx()], 5);
        assert!(matches!(
            validate_block_body(&block, &params),
            Err(ChainError::GenesisPayloadOutsideGenesis)
        ));
    }

    #[test]
    fn test_oversized_block_rejected() {
        let mut params = (*ParameterSet::testnet()).clone();
        params.max_block_size_bytes = 10;
        let block = block_with(vec![], 5);
        assert!(matches!(
            validate_block_body(&block, &params),
            Err(ChainError::BlockTooLarge { .. })
        ));
    }

    #[test]
    fn test_genesis_block_body_is_valid() {
        let params = ParameterSet::mainnet();
        assert!(validate_block_body(&params.genesis_block, &params).is_ok());
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(ChainError::InvalidPoW(Hash::zero()).class(), ErrorClass::ConsensusRejected);
        assert_eq!(
            ChainError::MissingAncestor { hash: Hash::zero(), height: 3 }.class(),
            ErrorClass::Fatal
        );
    }
}
