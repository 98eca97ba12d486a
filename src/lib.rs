//! # CeroCoin - My Peer-to-Peer Coin Node
//!
//! This is a small classroom coin network I built in Rust. Every node mines
//! coins, trades them with its peers and records the trades in a shared chain.
//! When I come back to this code, here's what I need to remember:
//!
//! ## What I Built
//! - **Coin Mining**: Proof-of-work coins bound to the miner's public key
//! - **Difficulty Convergence**: Each node steps its difficulty toward what its peers mine at
//! - **Transactions**: Signed transfers of whole coins, pooled until a block confirms them
//! - **Blocks**: Exactly `num_transactions_in_block` transactions, mined and signed
//! - **P2P Network**: TCP framing with a handshake, relay of new items and peer-list gossip
//! - **Identity**: Textbook RSA keys; the node id is the SHA-256 of the public key
//!
//! ## How I Organized My Code
//! - `core/`: Coins, transactions, blocks, the chain, proof-of-work and difficulty
//! - `wallet/`: RSA key material and the coins this node owns
//! - `storage/`: The pending transaction pool
//! - `network/`: Wire messages, the server, connections, the scanner and peer registry
//! - `node/`: The workers (miner supervisor, transactor, block assembler) and the orchestrator
//! - `config/`: Node settings from TOML, environment and flags
//! - `utils/`: Hashing, timestamps, bincode helpers and cancellation tokens
//! - `cli/`: Command-line parsing for the `cerocoin` binary
//!
//! ## Key Design Decisions I Made
//! - Every shared structure has its own lock and no code path holds two at once
//! - Workers talk over crossbeam channels instead of polling shared flags
//! - The first valid block at a height wins; there is no reorganisation
//! - Everything lives in memory, a node starts from an empty chain
//!
//! ## When I Need to Understand Something
//! 1. Start with `node/mod.rs` to see how the workers are started and stopped
//! 2. Look at `node/miner.rs` for mining cycles and difficulty convergence
//! 3. Check `core/blockchain.rs` for block acceptance and coin ownership
//! 4. Review `network/connection.rs` for how peer messages are applied

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod node;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt, StartArgs};
pub use config::NodeConfig;
pub use core::{
    Block, BlockTemplate, Blockchain, Coin, DifficultyBounds, ProofOfWork, Transaction,
};
pub use error::{BlockchainError, Result};
pub use network::{Hello, Message, PeerRegistry, Server};
pub use node::{initialize_node_and_run, CeroCoinNode, NodeContext, NodeHandle, Transactor};
pub use storage::TransactionPool;
pub use utils::{current_timestamp, sha256_digest, CancelToken};
pub use wallet::{generate_keypair, sign, verify, write_key_files, PrivateKey, PublicKey, Wallet};
