//! Core coin functionality
//!
//! Coins, transactions, blocks, proof-of-work, difficulty convergence and the
//! in-memory chain that records which coin belongs to whom.

pub mod block;
pub mod blockchain;
pub mod coin;
pub mod difficulty;
pub mod proof_of_work;
pub mod transaction;

pub use block::{Block, BlockTemplate, GENESIS_PREV_HASH};
pub use blockchain::Blockchain;
pub use coin::Coin;
pub use difficulty::{converge_step, DifficultyBounds, DifficultyCell, DIFFICULTY_STEP};
pub use proof_of_work::{ProofOfWork, SearchOutcome, SearchReport, MAX_DIFFICULTY_EXPONENT};
pub use transaction::{Transaction, TxOutput};
