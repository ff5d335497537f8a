//! Bancor bonding curve for creator coins
//!
//! Price follows `slope * supply^(1/rr - 1)` where `rr` is the reserve ratio.
//! With the ratio written `p/q` every operation reduces to integer powers and
//! a single integer root, evaluated on `BigUint`:
//!
//! - first purchase: `s'^q = N^q * (R*b*q)^p / (N*a*p)^p` (slope `a/b`)
//! - later purchases: `s'^q = s^q * (R + d)^p / R^p`
//! - sales: `R'^p = s'^q * R^p / s^q`
//!
//! Issuance rounds down and the remaining reserve after a sale rounds up, so
//! neither direction can be used to drain the reserve through rounding.

use num_bigint::BigUint;
use num_rational::Ratio;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::math::{ceil_div, ceil_nth_root, floor_nth_root, to_u64};
use crate::constants::{BASIS_POINTS_DENOMINATOR, NANOS_PER_UNIT};
use crate::error::ErrorClass;
use crate::params::CurveParams;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CurveError {
    #[error("amount must be positive")]
    InvalidAmount,
    #[error("selling {requested} but only {available} in circulation")]
    InsufficientHoldings { requested: u64, available: u64 },
    #[error("purchase would issue {issued} nanos, minimum is {minimum}")]
    BelowMinimumPurchase { issued: u64, minimum: u64 },
    #[error("coin state inconsistent: {coins} coins against {reserve} reserve")]
    InconsistentState { coins: u64, reserve: u64 },
    #[error("arithmetic overflow")]
    Overflow,
    #[error("invalid curve parameters: {0}")]
    InvalidParameters(String),
}

impl CurveError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CurveError::InconsistentState { .. }
            | CurveError::Overflow
            | CurveError::InvalidParameters(_) => ErrorClass::Fatal,
            _ => ErrorClass::TransactionRejected,
        }
    }
}

/// Supply and reserve of one creator coin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorCoinState {
    pub coins_in_circulation_nanos: u64,
    pub reserve_balance_nanos: u64,
}

impl CreatorCoinState {
    pub fn new(coins_in_circulation_nanos: u64, reserve_balance_nanos: u64) -> Self {
        Self {
            coins_in_circulation_nanos,
            reserve_balance_nanos,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.coins_in_circulation_nanos == 0 && self.reserve_balance_nanos == 0
    }

    /// Both zero or both positive
    fn check(&self) -> Result<(), CurveError> {
        if (self.coins_in_circulation_nanos == 0) != (self.reserve_balance_nanos == 0) {
            return Err(CurveError::InconsistentState {
                coins: self.coins_in_circulation_nanos,
                reserve: self.reserve_balance_nanos,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyOutcome {
    pub state: CreatorCoinState,
    pub coins_issued: u64,
    /// Reserve actually locked, after the fee
    pub reserve_added: u64,
    pub fee_nanos: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellOutcome {
    pub state: CreatorCoinState,
    pub coins_burned: u64,
    /// Paid to the seller, after the fee
    pub reserve_returned: u64,
    pub fee_nanos: u64,
    /// The whole supply was liquidated
    pub auto_sold: bool,
}

/// Pure pricing engine; holds only the curve constants
#[derive(Debug, Clone)]
pub struct BondingCurveEngine {
    slope_num: u32,
    slope_den: u32,
    rr_num: u32,
    rr_den: u32,
    trade_fee_basis_points: u64,
    auto_sell_threshold_nanos: u64,
}

impl BondingCurveEngine {
    pub fn new(
        slope: Ratio<u64>,
        reserve_ratio: Ratio<u64>,
        trade_fee_basis_points: u64,
        auto_sell_threshold_nanos: u64,
    ) -> Result<Self, CurveError> {
        let narrow = |v: u64| {
            v.to_u32()
                .ok_or_else(|| CurveError::InvalidParameters(format!("{v} does not fit 32 bits")))
        };
        if *slope.numer() == 0 {
            return Err(CurveError::InvalidParameters("slope must be positive".into()));
        }
        if *reserve_ratio.numer() == 0 || reserve_ratio > Ratio::from_integer(1) {
            return Err(CurveError::InvalidParameters(
                "reserve ratio must be in (0, 1]".into(),
            ));
        }
        if trade_fee_basis_points > BASIS_POINTS_DENOMINATOR {
            return Err(CurveError::InvalidParameters("fee above 100%".into()));
        }

        Ok(Self {
            slope_num: narrow(*slope.numer())?,
            slope_den: narrow(*slope.denom())?,
            rr_num: narrow(*reserve_ratio.numer())?,
            rr_den: narrow(*reserve_ratio.denom())?,
            trade_fee_basis_points,
            auto_sell_threshold_nanos,
        })
    }

    pub fn from_params(params: &CurveParams) -> Result<Self, CurveError> {
        Self::new(
            params.creator_coin_slope,
            params.creator_coin_reserve_ratio,
            params.creator_coin_trade_fee_basis_points,
            params.auto_sell_threshold_nanos,
        )
    }

    pub fn auto_sell_threshold_nanos(&self) -> u64 {
        self.auto_sell_threshold_nanos
    }

    /// Spend `reserve_delta_nanos` (fee included) on new coins
    pub fn buy(
        &self,
        state: CreatorCoinState,
        reserve_delta_nanos: u64,
    ) -> Result<BuyOutcome, CurveError> {
        if reserve_delta_nanos == 0 {
            return Err(CurveError::InvalidAmount);
        }
        state.check()?;

        let fee_nanos = self.fee(reserve_delta_nanos);
        let reserve_added = reserve_delta_nanos - fee_nanos;
        if reserve_added == 0 {
            return Err(CurveError::InvalidAmount);
        }

        let new_supply = if state.is_empty() {
            self.bootstrap_supply(reserve_added)
        } else {
            self.bancor_supply(&state, reserve_added)?
        };

        let new_supply = to_u64(&new_supply)?;
        let coins_issued = new_supply
            .checked_sub(state.coins_in_circulation_nanos)
            .ok_or(CurveError::Overflow)?;
        if coins_issued < self.auto_sell_threshold_nanos || coins_issued == 0 {
            return Err(CurveError::BelowMinimumPurchase {
                issued: coins_issued,
                minimum: self.auto_sell_threshold_nanos,
            });
        }

        let new_reserve = state
            .reserve_balance_nanos
            .checked_add(reserve_added)
            .ok_or(CurveError::Overflow)?;

        Ok(BuyOutcome {
            state: CreatorCoinState::new(new_supply, new_reserve),
            coins_issued,
            reserve_added,
            fee_nanos,
        })
    }

    /// Redeem `coins_to_sell` against the reserve
    pub fn sell(
        &self,
        state: CreatorCoinState,
        coins_to_sell: u64,
    ) -> Result<SellOutcome, CurveError> {
        if coins_to_sell == 0 {
            return Err(CurveError::InvalidAmount);
        }
        state.check()?;

        let supply = state.coins_in_circulation_nanos;
        let reserve = state.reserve_balance_nanos;
        if coins_to_sell > supply {
            return Err(CurveError::InsufficientHoldings {
                requested: coins_to_sell,
                available: supply,
            });
        }

        let remaining = supply - coins_to_sell;
        if remaining < self.auto_sell_threshold_nanos {
            let fee_nanos = self.fee(reserve);
            return Ok(SellOutcome {
                state: CreatorCoinState::default(),
                coins_burned: supply,
                reserve_returned: reserve - fee_nanos,
                fee_nanos,
                auto_sold: true,
            });
        }

        // R'^p = ceil(R^p * s'^q / s^q)
        let numerator = BigUint::from(reserve).pow(self.rr_num)
            * BigUint::from(remaining).pow(self.rr_den);
        let denominator = BigUint::from(supply).pow(self.rr_den);
        let remaining_reserve = ceil_nth_root(&ceil_div(&numerator, &denominator), self.rr_num);
        let remaining_reserve = to_u64(&remaining_reserve)?.min(reserve);

        let gross = reserve - remaining_reserve;
        let fee_nanos = self.fee(gross);

        Ok(SellOutcome {
            state: CreatorCoinState::new(remaining, remaining_reserve),
            coins_burned: coins_to_sell,
            reserve_returned: gross - fee_nanos,
            fee_nanos,
            auto_sold: false,
        })
    }

    /// Marginal price in nanos per whole coin, `R / (rr * s)`
    pub fn spot_price_nanos(&self, state: &CreatorCoinState) -> Result<u64, CurveError> {
        state.check()?;
        if state.is_empty() {
            return Ok(0);
        }
        let price = BigUint::from(state.reserve_balance_nanos)
            * self.rr_den
            * NANOS_PER_UNIT
            / (BigUint::from(state.coins_in_circulation_nanos) * self.rr_num);
        to_u64(&price)
    }

    fn fee(&self, amount: u64) -> u64 {
        let fee = u128::from(amount) * u128::from(self.trade_fee_basis_points)
            / u128::from(BASIS_POINTS_DENOMINATOR);
        // fee <= amount since the rate is capped at 100%
        fee as u64
    }

    /// `s'^q = N^q * (R*b*q)^p / (N*a*p)^p`
    fn bootstrap_supply(&self, reserve: u64) -> BigUint {
        let nanos = BigUint::from(NANOS_PER_UNIT);
        let numerator = nanos.pow(self.rr_den)
            * (BigUint::from(reserve) * self.slope_den * self.rr_den).pow(self.rr_num);
        let denominator = (nanos * self.slope_num * self.rr_num).pow(self.rr_num);
        floor_nth_root(&(numerator / denominator), self.rr_den)
    }

    /// `s'^q = s^q * (R + d)^p / R^p`
    fn bancor_supply(&self, state: &CreatorCoinState, added: u64) -> Result<BigUint, CurveError> {
        let reserve = BigUint::from(state.reserve_balance_nanos);
        let new_reserve = &reserve + added;
        let numerator = BigUint::from(state.coins_in_circulation_nanos).pow(self.rr_den)
            * new_reserve.pow(self.rr_num);
        let denominator = reserve.pow(self.rr_num);
        if denominator == BigUint::from(0u8) {
            return Err(CurveError::InconsistentState {
                coins: state.coins_in_circulation_nanos,
                reserve: state.reserve_balance_nanos,
            });
        }
        Ok(floor_nth_root(&(numerator / denominator), self.rr_den))
    }
}
