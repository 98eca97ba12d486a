//! Pending transaction storage
//!
//! The transaction pool is the only shared store besides the chain. Nothing is
//! persisted; a node starts empty.

pub mod memory_pool;

pub use memory_pool::{Reservations, TransactionPool};
