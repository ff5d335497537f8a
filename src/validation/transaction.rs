//! Transaction structure and signatures
//!
//! Account-based transactions. Each carries the sender key, an account nonce
//! for replay protection, a network fee and one payload. The transaction id is
//! the BLAKE3 hash of the bincode encoding with the signature left out, so it
//! doubles as the signing hash. The witness id covers the signature too and is
//! what block merkle roots commit to.

use serde::{Deserialize, Serialize};

use crate::bridge::BurnTransaction;
use crate::crypto::{hash_encoded, Hash, PrivateKey, PublicKey, SchnorrSignature, SignatureError};
use crate::governance::ParamUpdate;

/// Current transaction version
pub const TX_VERSION: u32 = 1;

/// A genesis allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedOutput {
    pub public_key: PublicKey,
    pub amount_nanos: u64,
}

/// What a transaction does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxPayload {
    /// Initial balances, genesis block only
    SeedBalances(Vec<SeedOutput>),
    /// Credit for coins burned on the foreign chain; authorized by the burn itself
    BitcoinExchange(BurnTransaction),
    /// Spend `reserve_nanos` on `creator`'s coin
    BuyCreatorCoin { creator: PublicKey, reserve_nanos: u64 },
    /// Redeem `coins_nanos` of `creator`'s coin
    SellCreatorCoin { creator: PublicKey, coins_nanos: u64 },
    UpdateGlobalParams(ParamUpdate),
}

/// A complete transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction version
    pub version: u32,
    /// Sender (or burn destination for exchanges)
    pub public_key: PublicKey,
    /// Sender's account nonce
    pub nonce: u64,
    /// Network fee, burned
    pub fee_nanos: u64,
    pub payload: TxPayload,
    pub signature: Option<SchnorrSignature>,
}

/// Everything but the signature
#[derive(Serialize)]
struct SigningBody<'a> {
    version: u32,
    public_key: &'a PublicKey,
    nonce: u64,
    fee_nanos: u64,
    payload: &'a TxPayload,
}

impl Transaction {
    /// Create a new unsigned transaction
    pub fn new(public_key: PublicKey, nonce: u64, fee_nanos: u64, payload: TxPayload) -> Self {
        Self {
            version: TX_VERSION,
            public_key,
            nonce,
            fee_nanos,
            payload,
            signature: None,
        }
    }

    /// Genesis allocation transaction
    pub fn seed_balances(outputs: Vec<SeedOutput>) -> Self {
        Self::new(PublicKey([0u8; 32]), 0, 0, TxPayload::SeedBalances(outputs))
    }

    /// Exchange transaction for a foreign burn
    pub fn bitcoin_exchange(burn: BurnTransaction) -> Self {
        Self::new(burn.destination, 0, 0, TxPayload::BitcoinExchange(burn))
    }

    /// Whether the payload must carry the sender's signature
    pub fn requires_signature(&self) -> bool {
        !matches!(
            self.payload,
            TxPayload::SeedBalances(_) | TxPayload::BitcoinExchange(_)
        )
    }

    /// Transaction id; also the message that gets signed
    pub fn hash(&self) -> Hash {
        let body = SigningBody {
            version: self.version,
            public_key: &self.public_key,
            nonce: self.nonce,
            fee_nanos: self.fee_nanos,
            payload: &self.payload,
        };
        hash_encoded(&body)
    }

    /// Id over the whole transaction, signature included
    pub fn witness_hash(&self) -> Hash {
        hash_encoded(self)
    }

    /// Sign with the sender's key
    pub fn sign(&mut self, key: &PrivateKey) -> Result<(), SignatureError> {
        if key.public_key() != self.public_key {
            return Err(SignatureError::InvalidPrivateKey);
        }
        self.signature = Some(key.sign(&self.hash())?);
        Ok(())
    }

    /// Builder form of [`Transaction::sign`]
    pub fn signed(mut self, key: &PrivateKey) -> Result<Self, SignatureError> {
        self.sign(key)?;
        Ok(self)
    }

    /// Check the signature where one is required
    pub fn verify_signature(&self) -> bool {
        if !self.requires_signature() {
            return true;
        }
        match &self.signature {
            Some(sig) => self.public_key.verify(&self.hash(), sig),
            None => false,
        }
    }

    /// Serialized size in bytes
    pub fn size_bytes(&self) -> u64 {
        bincode::serialized_size(self).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buy(key: &PrivateKey, nonce: u64) -> Transaction {
        Transaction::new(
            key.public_key(),
            nonce,
            1_000,
            TxPayload::BuyCreatorCoin {
                creator: PrivateKey::generate().public_key(),
                reserve_nanos: 5_000,
            },
        )
    }

    #[test]
    fn test_signed_transaction_verifies() {
        let key = PrivateKey::generate();
        let tx = buy(&key, 0).signed(&key).unwrap();
        assert!(tx.verify_signature());
    }

    #[test]
    fn test_unsigned_trade_fails_verification() {
        let key = PrivateKey::generate();
        assert!(!buy(&key, 0).verify_signature());
    }

    #[test]
    fn test_tampered_fee_breaks_signature() {
        let key = PrivateKey::generate();
        let mut tx = buy(&key, 0).signed(&key).unwrap();
        tx.fee_nanos += 1;
        assert!(!tx.verify_signature());
    }

    #[test]
    fn test_signing_with_wrong_key_refused() {
        let key = PrivateKey::generate();
        let other = PrivateKey::generate();
        let mut tx = buy(&key, 0);
        assert!(tx.sign(&other).is_err());
    }

    #[test]
    fn test_hash_excludes_signature() {
        let key = PrivateKey::generate();
        let unsigned = buy(&key, 3);
        let signed = unsigned.clone().signed(&key).unwrap();
        assert_eq!(unsigned.hash(), signed.hash());
    }

    #[test]
    fn test_witness_hash_covers_signature() {
        let key = PrivateKey::generate();
        let unsigned = buy(&key, 3);
        let signed = unsigned.clone().signed(&key).unwrap();
        assert_ne!(unsigned.witness_hash(), signed.witness_hash());

        let mut forged = signed.clone();
        forged.signature = Some(SchnorrSignature::from_bytes(&[1u8; 64]));
        assert_eq!(forged.hash(), signed.hash());
        assert_ne!(forged.witness_hash(), signed.witness_hash());
    }

    #[test]
    fn test_nonce_changes_hash() {
        let key = PrivateKey::generate();
        let a = buy(&key, 0);
        let mut b = a.clone();
        b.nonce = 1;
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_seed_needs_no_signature() {
        let tx = Transaction::seed_balances(vec![SeedOutput {
            public_key: PrivateKey::generate().public_key(),
            amount_nanos: 1,
        }]);
        assert!(!tx.requires_signature());
        assert!(tx.verify_signature());
    }

    #[test]
    fn test_size_grows_with_signature() {
        let key = PrivateKey::generate();
        let unsigned = buy(&key, 0);
        let signed = unsigned.clone().signed(&key).unwrap();
        assert!(signed.size_bytes() > unsigned.size_bytes());
    }
}
