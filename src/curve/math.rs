//! Integer helpers for the bonding curve

use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};

use super::CurveError;

/// Largest `r` with `r^n <= x`
pub fn floor_nth_root(x: &BigUint, n: u32) -> BigUint {
    x.nth_root(n)
}

/// Smallest `r` with `r^n >= x`
pub fn ceil_nth_root(x: &BigUint, n: u32) -> BigUint {
    let root = x.nth_root(n);
    if root.pow(n) < *x {
        root + 1u32
    } else {
        root
    }
}

/// `ceil(a / b)`; `b` must be non-zero
pub fn ceil_div(a: &BigUint, b: &BigUint) -> BigUint {
    if a.is_zero() {
        return BigUint::zero();
    }
    (a - BigUint::one()) / b + BigUint::one()
}

pub fn to_u64(value: &BigUint) -> Result<u64, CurveError> {
    value.to_u64().ok_or(CurveError::Overflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(n: u64) -> BigUint {
        BigUint::from(n)
    }

    #[test]
    fn test_exact_roots() {
        assert_eq!(floor_nth_root(&big(1_000_000_000), 3), big(1_000));
        assert_eq!(ceil_nth_root(&big(1_000_000_000), 3), big(1_000));
    }

    #[test]
    fn test_inexact_roots_bracket() {
        assert_eq!(floor_nth_root(&big(26), 3), big(2));
        assert_eq!(ceil_nth_root(&big(26), 3), big(3));
        assert_eq!(ceil_nth_root(&big(0), 3), big(0));
    }

    #[test]
    fn test_ceil_div() {
        assert_eq!(ceil_div(&big(10), &big(5)), big(2));
        assert_eq!(ceil_div(&big(11), &big(5)), big(3));
        assert_eq!(ceil_div(&big(0), &big(5)), big(0));
    }

    #[test]
    fn test_to_u64_overflow() {
        assert!(to_u64(&(big(u64::MAX) + 1u32)).is_err());
        assert_eq!(to_u64(&big(7)).unwrap(), 7);
    }
}
