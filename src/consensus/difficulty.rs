//! Difficulty adjustment algorithm
//!
//! Targets are full 256-bit integers (`BigUint`); a header satisfies its
//! target when its hash, read big-endian, is at or below it. Retargeting runs
//! once per epoch and is clamped twice: the timespan ratio to
//! `[1/F, F]`, then the result to `[min_target, max_target]`.

use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::{One, Zero};
use tracing::debug;

use crate::consensus::BlockHeader;
use crate::crypto::Hash;
use crate::params::ParameterSet;

/// Interpret a hash as a big-endian 256-bit integer
pub fn hash_to_big(hash: &Hash) -> BigUint {
    BigUint::from_bytes_be(&hash.0)
}

/// Expected number of hashes to find a block at this target
///
/// Work = 2^256 / (target + 1)
pub fn work_for_target(target: &BigUint) -> BigUint {
    (BigUint::one() << 256usize) / (target + 1u32)
}

/// Whether the hash satisfies the target
pub fn meets_target(hash: &Hash, target: &BigUint) -> bool {
    hash_to_big(hash) <= *target
}

/// Convert compact `bits` to a full target (Bitcoin encoding)
///
/// Negative encodings decode to zero, which no hash can meet.
pub fn compact_to_target(bits: u32) -> BigUint {
    let exponent = bits >> 24;
    let mantissa = bits & 0x007f_ffff;

    if bits & 0x0080_0000 != 0 {
        return BigUint::zero();
    }

    if exponent <= 3 {
        BigUint::from(mantissa >> (8 * (3 - exponent)))
    } else {
        BigUint::from(mantissa) << (8 * (exponent as usize - 3))
    }
}

/// Convert a full target to compact `bits`
pub fn target_to_compact(target: &BigUint) -> u32 {
    if target.is_zero() {
        return 0;
    }

    let mut size = ((target.bits() + 7) / 8) as u32;
    let mut compact: u32 = if size <= 3 {
        let low = target.iter_u32_digits().next().unwrap_or(0);
        low << (8 * (3 - size))
    } else {
        let shifted: BigUint = target >> (8 * (size as usize - 3));
        shifted.iter_u32_digits().next().unwrap_or(0)
    };

    // Keep the sign bit clear
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }

    compact | (size << 24)
}

/// Computes the target each new block must meet
#[derive(Debug, Clone)]
pub struct DifficultyRetargeter {
    params: Arc<ParameterSet>,
}

impl DifficultyRetargeter {
    pub fn new(params: Arc<ParameterSet>) -> Self {
        Self { params }
    }

    pub fn epoch_length(&self) -> u64 {
        self.params.epoch_length()
    }

    /// Check if a block at this height opens a new epoch
    pub fn is_retarget_height(&self, height: u64) -> bool {
        height > 0 && height % self.epoch_length() == 0
    }

    /// Target for the first block of a new epoch
    ///
    /// `epoch_start` is the ancestor at `height - epoch_length`, `epoch_end`
    /// the parent. A header version change against `epoch_end` is applied
    /// before the timespan factor.
    pub fn next_target(
        &self,
        epoch_start: &BlockHeader,
        epoch_end: &BlockHeader,
        previous_target: &BigUint,
        header_version: u32,
    ) -> BigUint {
        let base = self.version_adjusted(previous_target, epoch_end.version, header_version);

        let actual = epoch_end.timestamp.saturating_sub(epoch_start.timestamp);
        let span = self.params.time_between_difficulty_retargets.max(1);
        let factor = self.params.max_difficulty_retarget_factor.max(1);

        let (num, den) = clamp_ratio(actual, span, factor);
        let adjusted = base * num / den;
        let new_target = self.clamp(adjusted);

        debug!(
            height = epoch_end.height + 1,
            actual_timespan = actual,
            target_timespan = span,
            bits = %format!("{:08x}", target_to_compact(&new_target)),
            "retargeted difficulty"
        );

        new_target
    }

    /// Target for a header whose version differs from its parent off an epoch boundary
    pub fn transition_target(
        &self,
        previous_target: &BigUint,
        parent_version: u32,
        header_version: u32,
    ) -> BigUint {
        let adjusted = self.version_adjusted(previous_target, parent_version, header_version);
        self.clamp(adjusted)
    }

    /// Clamp into `[min_target, max_target]`
    pub fn clamp(&self, target: BigUint) -> BigUint {
        if target > self.params.max_target {
            self.params.max_target.clone()
        } else if target < self.params.min_target {
            self.params.min_target.clone()
        } else {
            target
        }
    }

    fn version_adjusted(&self, target: &BigUint, from_version: u32, to_version: u32) -> BigUint {
        let factor = self.params.v1_difficulty_adjustment_factor.max(1);
        if to_version > from_version {
            target / factor
        } else if to_version < from_version {
            target * factor
        } else {
            target.clone()
        }
    }
}

/// Ratio `actual / span` clamped to `[1/factor, factor]`
fn clamp_ratio(actual: u64, span: u64, factor: u64) -> (u128, u128) {
    let (actual, span, factor) = (actual as u128, span as u128, factor as u128);
    if actual * factor < span {
        (1, factor)
    } else if actual > span * factor {
        (factor, 1)
    } else {
        (actual, span)
    }
}
