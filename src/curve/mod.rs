//! Creator coin market - bonding curve pricing with exact integer math

mod engine;
pub mod math;

pub use engine::*;
