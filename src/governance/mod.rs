//! Governance module - global parameters set by authorized updaters

mod store;

pub use store::*;
