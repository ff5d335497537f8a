//! Storage module - ledger state and block persistence

mod state;
pub mod db;

pub use db::{BlockStore, MemoryBlockStore, SledBlockStore, StoreError};
pub use state::*;
