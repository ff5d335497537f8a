//! Cryptography module - BLAKE3/SHA-256 hashing, Schnorr keys, Merkle roots

mod hash;
mod merkle;
mod schnorr;

pub use hash::*;
pub use merkle::*;
pub use schnorr::*;
