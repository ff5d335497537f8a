//! Versioned global parameter log
//!
//! An append-only list of [`GlobalParamsEntry`] values, each effective from
//! the height of the block that carried its update. Readers ask for the entry
//! in force at a height; a reorg truncates entries above the fork point.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::crypto::PublicKey;
use crate::error::ErrorClass;
use crate::params::ParameterSet;

/// Network parameters adjustable by the authorized updaters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalParamsEntry {
    pub effective_height: u64,
    /// Zero means the genesis exchange rate applies
    pub usd_cents_per_bitcoin: u64,
    pub min_network_fee_nanos_per_kb: u64,
    pub create_profile_fee_nanos: u64,
    pub forbidden_block_signature_pubkey: Option<PublicKey>,
}

/// Partial update; absent fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamUpdate {
    pub usd_cents_per_bitcoin: Option<u64>,
    pub min_network_fee_nanos_per_kb: Option<u64>,
    pub create_profile_fee_nanos: Option<u64>,
    pub forbidden_block_signature_pubkey: Option<PublicKey>,
}

impl ParamUpdate {
    pub fn is_empty(&self) -> bool {
        self.usd_cents_per_bitcoin.is_none()
            && self.min_network_fee_nanos_per_kb.is_none()
            && self.create_profile_fee_nanos.is_none()
            && self.forbidden_block_signature_pubkey.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GovernanceError {
    #[error("signer {0} may not update global params")]
    UnauthorizedSigner(PublicKey),
    #[error("update sets no fields")]
    EmptyUpdate,
    #[error("{field} = {value} exceeds maximum {max}")]
    ValueOutOfRange {
        field: &'static str,
        value: u64,
        max: u64,
    },
    #[error("update at height {height} precedes latest entry at {latest}")]
    NonMonotonicHeight { height: u64, latest: u64 },
}

impl GovernanceError {
    pub fn class(&self) -> ErrorClass {
        match self {
            GovernanceError::NonMonotonicHeight { .. } => ErrorClass::Fatal,
            _ => ErrorClass::TransactionRejected,
        }
    }
}

/// Append-only log of global params
#[derive(Debug, Clone)]
pub struct GovernanceParamStore {
    params: Arc<ParameterSet>,
    history: Vec<GlobalParamsEntry>,
}

impl GovernanceParamStore {
    /// Store holding only the neutral genesis entry
    pub fn new(params: Arc<ParameterSet>) -> Self {
        Self {
            params,
            history: vec![GlobalParamsEntry::default()],
        }
    }

    /// Apply a signed update effective from `height`
    pub fn apply_update(
        &mut self,
        update: &ParamUpdate,
        signer: &PublicKey,
        height: u64,
    ) -> Result<&GlobalParamsEntry, GovernanceError> {
        if !self.params.is_param_updater(signer) {
            return Err(GovernanceError::UnauthorizedSigner(*signer));
        }
        if update.is_empty() {
            return Err(GovernanceError::EmptyUpdate);
        }
        if let Some(value) = update.min_network_fee_nanos_per_kb {
            check_max("min_network_fee_nanos_per_kb", value, self.params.max_network_fee_nanos_per_kb)?;
        }
        if let Some(value) = update.create_profile_fee_nanos {
            check_max("create_profile_fee_nanos", value, self.params.max_create_profile_fee_nanos)?;
        }

        let current = self.current();
        if height < current.effective_height {
            return Err(GovernanceError::NonMonotonicHeight {
                height,
                latest: current.effective_height,
            });
        }

        let mut entry = current.clone();
        entry.effective_height = height;
        if let Some(v) = update.usd_cents_per_bitcoin {
            entry.usd_cents_per_bitcoin = v;
        }
        if let Some(v) = update.min_network_fee_nanos_per_kb {
            entry.min_network_fee_nanos_per_kb = v;
        }
        if let Some(v) = update.create_profile_fee_nanos {
            entry.create_profile_fee_nanos = v;
        }
        if let Some(key) = update.forbidden_block_signature_pubkey {
            entry.forbidden_block_signature_pubkey = Some(key);
        }

        debug!(
            height,
            signer = %signer,
            usd_cents_per_bitcoin = entry.usd_cents_per_bitcoin,
            min_fee_per_kb = entry.min_network_fee_nanos_per_kb,
            "global params updated"
        );

        self.history.push(entry);
        Ok(self.current())
    }

    /// Latest entry
    pub fn current(&self) -> &GlobalParamsEntry {
        // history always holds the genesis entry
        &self.history[self.history.len() - 1]
    }

    /// Latest entry with `effective_height <= height`
    pub fn at_height(&self, height: u64) -> &GlobalParamsEntry {
        self.history
            .iter()
            .rev()
            .find(|e| e.effective_height <= height)
            .unwrap_or(&self.history[0])
    }

    pub fn history(&self) -> &[GlobalParamsEntry] {
        &self.history
    }

    /// Drop entries effective above `height`; the genesis entry always stays
    pub fn truncate_to(&mut self, height: u64) {
        while self.history.len() > 1 && self.current().effective_height > height {
            self.history.pop();
        }
    }

    /// Remove the most recent entry (undo of a single update)
    pub(crate) fn pop_latest(&mut self) -> Option<GlobalParamsEntry> {
        if self.history.len() > 1 {
            self.history.pop()
        } else {
            None
        }
    }

    /// Exchange rate in force, falling back to the genesis rate while unset
    pub fn usd_cents_per_bitcoin(&self) -> u64 {
        match self.current().usd_cents_per_bitcoin {
            0 => self.params.bridge.genesis_usd_cents_per_bitcoin,
            rate => rate,
        }
    }
}

fn check_max(field: &'static str, value: u64, max: u64) -> Result<(), GovernanceError> {
    if value > max {
        return Err(GovernanceError::ValueOutOfRange { field, value, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::NANOS_PER_UNIT;
    use crate::crypto::PrivateKey;

    /// Secret scalar 1 is an updater on testnet
    fn updater() -> PublicKey {
        let mut secret = [0u8; 32];
        secret[31] = 1;
        PrivateKey::from_bytes(&secret).unwrap().public_key()
    }

    fn store() -> GovernanceParamStore {
        GovernanceParamStore::new(ParameterSet::testnet())
    }

    fn rate(cents: u64) -> ParamUpdate {
        ParamUpdate {
            usd_cents_per_bitcoin: Some(cents),
            ..Default::default()
        }
    }

    #[test]
    fn test_genesis_entry_is_neutral() {
        let store = store();
        assert_eq!(store.current(), &GlobalParamsEntry::default());
        assert_eq!(store.history().len(), 1);
    }

    #[test]
    fn test_unauthorized_signer_leaves_history_unchanged() {
        let mut store = store();
        let outsider = PrivateKey::generate().public_key();
        let result = store.apply_update(&rate(5_000_000), &outsider, 10);
        assert!(matches!(result, Err(GovernanceError::UnauthorizedSigner(_))));
        assert_eq!(store.history().len(), 1);
    }

    #[test]
    fn test_partial_update_keeps_other_fields() {
        let mut store = store();
        store
            .apply_update(
                &ParamUpdate {
                    min_network_fee_nanos_per_kb: Some(1_000),
                    ..Default::default()
                },
                &updater(),
                5,
            )
            .unwrap();
        let entry = store.apply_update(&rate(4_000_000), &updater(), 9).unwrap();

        assert_eq!(entry.effective_height, 9);
        assert_eq!(entry.usd_cents_per_bitcoin, 4_000_000);
        assert_eq!(entry.min_network_fee_nanos_per_kb, 1_000);
    }

    #[test]
    fn test_empty_update_rejected() {
        let mut store = store();
        assert!(matches!(
            store.apply_update(&ParamUpdate::default(), &updater(), 1),
            Err(GovernanceError::EmptyUpdate)
        ));
    }

    #[test]
    fn test_fee_above_bound_rejected() {
        let mut store = store();
        let update = ParamUpdate {
            create_profile_fee_nanos: Some(100 * NANOS_PER_UNIT + 1),
            ..Default::default()
        };
        let err = store.apply_update(&update, &updater(), 1).unwrap_err();
        assert!(matches!(err, GovernanceError::ValueOutOfRange { .. }));
        assert_eq!(err.class(), ErrorClass::TransactionRejected);
    }

    #[test]
    fn test_at_height_and_truncate() {
        let mut store = store();
        store.apply_update(&rate(1), &updater(), 10).unwrap();
        store.apply_update(&rate(2), &updater(), 20).unwrap();

        assert_eq!(store.at_height(5).usd_cents_per_bitcoin, 0);
        assert_eq!(store.at_height(15).usd_cents_per_bitcoin, 1);
        assert_eq!(store.at_height(20).usd_cents_per_bitcoin, 2);

        store.truncate_to(15);
        assert_eq!(store.current().usd_cents_per_bitcoin, 1);
        store.truncate_to(0);
        assert_eq!(store.history().len(), 1);
    }

    #[test]
    fn test_exchange_rate_falls_back_to_genesis() {
        let mut store = store();
        let genesis_rate = ParameterSet::testnet().bridge.genesis_usd_cents_per_bitcoin;
        assert_eq!(store.usd_cents_per_bitcoin(), genesis_rate);

        store.apply_update(&rate(3_000_000), &updater(), 1).unwrap();
        assert_eq!(store.usd_cents_per_bitcoin(), 3_000_000);
    }

    #[test]
    fn test_height_regression_is_fatal() {
        let mut store = store();
        store.apply_update(&rate(1), &updater(), 10).unwrap();
        let err = store.apply_update(&rate(2), &updater(), 9).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Fatal);
    }
}
