//! Consensus module - Block structure, header tree, difficulty, and validation

mod block;
mod chain;
mod difficulty;
mod validation;

pub use block::*;
pub use chain::*;
pub use difficulty::*;
pub use validation::*;
