//! Validation module - transaction structure and signature checks

mod transaction;

pub use transaction::*;
