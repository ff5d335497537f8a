//! Block structure for the Kindle chain
//!
//! Headers carry their height and come in two encodings. Version 0 is the
//! launch layout: little-endian, 32-bit timestamp/height/nonce, no extra nonce,
//! double SHA-256. Version 1 widens those fields to 64 bits, adds an extra
//! nonce, encodes big-endian and hashes with BLAKE3.

use serde::{Deserialize, Serialize};

use crate::constants::{HEADER_VERSION_0, HEADER_VERSION_1};
use crate::crypto::{compute_merkle_root, hash_bytes, sha256d, Hash};
use crate::validation::Transaction;

/// Block header containing all metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    /// Header encoding version
    pub version: u32,
    /// Hash of the previous block
    pub prev_hash: Hash,
    /// Merkle root of all transactions
    pub merkle_root: Hash,
    /// Block timestamp (seconds since Unix epoch)
    pub timestamp: u64,
    /// Height of this block, genesis is 0
    pub height: u64,
    /// Nonce used for PoW
    pub nonce: u64,
    /// Second nonce, version 1 only
    pub extra_nonce: u64,
}

impl BlockHeader {
    /// Create a new block header
    pub fn new(
        version: u32,
        prev_hash: Hash,
        merkle_root: Hash,
        timestamp: u64,
        height: u64,
        nonce: u64,
    ) -> Self {
        Self {
            version,
            prev_hash,
            merkle_root,
            timestamp,
            height,
            nonce,
            extra_nonce: 0,
        }
    }

    /// Whether the header version is one this node understands
    pub fn is_known_version(&self) -> bool {
        self.version == HEADER_VERSION_0 || self.version == HEADER_VERSION_1
    }

    /// Whether every field fits the width of its version's encoding
    pub fn fits_encoding(&self) -> bool {
        if self.version != HEADER_VERSION_0 {
            return true;
        }
        self.timestamp <= u64::from(u32::MAX)
            && self.height <= u64::from(u32::MAX)
            && self.nonce <= u64::from(u32::MAX)
            && self.extra_nonce == 0
    }

    /// Serialize the header for hashing
    ///
    /// Version-0 fields are truncated to 32 bits; callers check
    /// [`BlockHeader::fits_encoding`] first.
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.version == HEADER_VERSION_0 {
            let mut bytes = Vec::with_capacity(80);
            bytes.extend_from_slice(&self.version.to_le_bytes());
            bytes.extend_from_slice(&self.prev_hash.0);
            bytes.extend_from_slice(&self.merkle_root.0);
            bytes.extend_from_slice(&(self.timestamp as u32).to_le_bytes());
            bytes.extend_from_slice(&(self.height as u32).to_le_bytes());
            bytes.extend_from_slice(&(self.nonce as u32).to_le_bytes());
            bytes
        } else {
            let mut bytes = Vec::with_capacity(100);
            bytes.extend_from_slice(&self.version.to_be_bytes());
            bytes.extend_from_slice(&self.prev_hash.0);
            bytes.extend_from_slice(&self.merkle_root.0);
            bytes.extend_from_slice(&self.timestamp.to_be_bytes());
            bytes.extend_from_slice(&self.height.to_be_bytes());
            bytes.extend_from_slice(&self.nonce.to_be_bytes());
            bytes.extend_from_slice(&self.extra_nonce.to_be_bytes());
            bytes
        }
    }

    /// Calculate the hash of this header
    pub fn hash(&self) -> Hash {
        let bytes = self.to_bytes();
        if self.version == HEADER_VERSION_0 {
            sha256d(&bytes)
        } else {
            hash_bytes(&bytes)
        }
    }
}

/// A complete block containing header and transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block header
    pub header: BlockHeader,
    /// List of transactions in this block
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create a new block
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self { header, transactions }
    }

    /// Get the block hash
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn prev_hash(&self) -> &Hash {
        &self.header.prev_hash
    }

    /// Check if this is the genesis block
    pub fn is_genesis(&self) -> bool {
        self.header.height == 0 && self.header.prev_hash == Hash::zero()
    }

    /// Merkle root over the witness ids, so the header commits to every signature
    pub fn compute_merkle_root(&self) -> Hash {
        let tx_hashes: Vec<Hash> = self
            .transactions
            .iter()
            .map(|tx| tx.witness_hash())
            .collect();
        compute_merkle_root(&tx_hashes)
    }

    /// Serialized size in bytes
    pub fn size_bytes(&self) -> u64 {
        bincode::serialized_size(self).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(version: u32) -> BlockHeader {
        BlockHeader::new(version, Hash::zero(), Hash::zero(), 1_610_948_544, 7, 42)
    }

    #[test]
    fn test_v0_serialization_length() {
        assert_eq!(header(0).to_bytes().len(), 4 + 32 + 32 + 4 + 4 + 4); // 80 bytes
    }

    #[test]
    fn test_v1_serialization_length() {
        assert_eq!(header(1).to_bytes().len(), 4 + 32 + 32 + 8 + 8 + 8 + 8); // 100 bytes
    }

    #[test]
    fn test_v0_is_little_endian() {
        let bytes = header(0).to_bytes();
        // height sits after version, two hashes and the timestamp
        assert_eq!(&bytes[72..76], &7u32.to_le_bytes());
    }

    #[test]
    fn test_v1_is_big_endian() {
        let bytes = header(1).to_bytes();
        assert_eq!(&bytes[76..84], &7u64.to_be_bytes());
    }

    #[test]
    fn test_hash_function_follows_version() {
        let v0 = header(0);
        assert_eq!(v0.hash(), sha256d(&v0.to_bytes()));

        let v1 = header(1);
        assert_eq!(v1.hash(), hash_bytes(&v1.to_bytes()));
    }

    #[test]
    fn test_v0_field_overflow_detected() {
        let mut h = header(0);
        assert!(h.fits_encoding());
        h.timestamp = u64::from(u32::MAX) + 1;
        assert!(!h.fits_encoding());

        let mut h = header(0);
        h.extra_nonce = 1;
        assert!(!h.fits_encoding());

        let mut h = header(1);
        h.timestamp = u64::MAX;
        assert!(h.fits_encoding());
    }

    #[test]
    fn test_extra_nonce_changes_v1_hash() {
        let a = header(1);
        let mut b = header(1);
        b.extra_nonce = 1;
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_genesis_block_detection() {
        let block = Block::new(BlockHeader::new(0, Hash::zero(), Hash::zero(), 0, 0, 0), vec![]);
        assert!(block.is_genesis());

        let child = Block::new(header(1), vec![]);
        assert!(!child.is_genesis());
    }
}
