//! Error classification shared by every module
//!
//! Each module keeps its own `thiserror` enum; `class()` maps a variant onto
//! the action the caller must take.

use thiserror::Error;

use crate::bridge::ForeignChainError;
use crate::config::ConfigError;
use crate::consensus::ChainError;
use crate::storage::{LedgerError, StoreError};

/// What the caller does with a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Discard the object and penalize its sender
    ConsensusRejected,
    /// Hold until the parent arrives
    Orphan,
    /// Foreign view not current; retry later
    Deferred,
    /// The transaction fails, its block stays valid
    TransactionRejected,
    /// Halt activation and surface the error
    Fatal,
}

/// Errors that can occur in the node.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("foreign chain error: {0}")]
    Foreign(#[from] ForeignChainError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("unknown block {0}")]
    UnknownBlock(crate::crypto::Hash),

    #[error("no undo journal for main-chain block {0}")]
    MissingUndo(crate::crypto::Hash),

    #[error("node halted after a fatal error")]
    Halted,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            NodeError::Chain(e) => e.class(),
            NodeError::Ledger(e) => e.class(),
            NodeError::Foreign(e) => e.class(),
            NodeError::Store(e) => e.class(),
            NodeError::Config(_)
            | NodeError::Io(_)
            | NodeError::MissingUndo(_)
            | NodeError::Halted => ErrorClass::Fatal,
            NodeError::UnknownBlock(_) => ErrorClass::Orphan,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Hash;

    #[test]
    fn test_orphan_header_class_propagates() {
        let err: NodeError = ChainError::OrphanHeader {
            hash: Hash::zero(),
            parent: Hash::zero(),
        }
        .into();
        assert_eq!(err.class(), ErrorClass::Orphan);
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let node_err: NodeError = io_err.into();
        assert!(matches!(node_err, NodeError::Io(_)));
        assert_eq!(node_err.class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_display_includes_source() {
        let err: NodeError = ChainError::InvalidPoW(Hash::zero()).into();
        assert!(err.to_string().contains("proof of work"));
    }
}
