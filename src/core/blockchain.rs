use crate::core::block::GENESIS_PREV_HASH;
use crate::core::difficulty::DifficultyBounds;
use crate::core::{Block, Coin, Transaction};
use crate::error::{BlockchainError, Result};
use crate::wallet::PublicKey;
use log::info;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

#[derive(Default)]
struct ChainState {
    blocks: Vec<Block>,
    index: HashMap<String, usize>,
    consumed_txs: HashSet<String>,
    /// Current owner of every coin that has changed hands in a confirmed block.
    /// Coins missing here are still owned by their miner.
    coin_owners: HashMap<String, PublicKey>,
}

impl ChainState {
    fn owner_of(&self, coin: &Coin) -> PublicKey {
        self.coin_owners
            .get(coin.get_id())
            .cloned()
            .unwrap_or_else(|| coin.get_miner_public_key().clone())
    }

    fn check_spendable(&self, tx: &Transaction) -> Result<()> {
        if self.consumed_txs.contains(tx.get_id()) {
            return Err(BlockchainError::Transaction(format!(
                "Transaction {} is already confirmed",
                tx.short_id()
            )));
        }
        for coin in tx.get_inputs() {
            if &self.owner_of(coin) != tx.get_sender() {
                return Err(BlockchainError::Transaction(format!(
                    "Coin {} is not owned by the sender of {}",
                    coin.short_id(),
                    tx.short_id()
                )));
            }
        }
        Ok(())
    }

    fn head_hash(&self) -> String {
        self.blocks
            .last()
            .map(|b| b.get_hash().to_string())
            .unwrap_or_else(|| GENESIS_PREV_HASH.to_string())
    }
}

/// In-memory chain with a single head.
///
/// Blocks are applied one at a time under the chain guard. A block is accepted
/// only when it extends the current head; the first valid block at a height
/// wins and there is no reorganisation.
pub struct Blockchain {
    inner: RwLock<ChainState>,
    block_size: usize,
    bounds: DifficultyBounds,
}

impl Blockchain {
    pub fn new(num_transactions_in_block: usize, bounds: DifficultyBounds) -> Blockchain {
        Blockchain {
            inner: RwLock::new(ChainState::default()),
            block_size: num_transactions_in_block,
            bounds,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn bounds(&self) -> &DifficultyBounds {
        &self.bounds
    }

    pub fn height(&self) -> u64 {
        match self.inner.read() {
            Ok(state) => state.blocks.len() as u64,
            Err(_) => {
                log::error!("Failed to acquire read lock on blockchain");
                0
            }
        }
    }

    pub fn head_hash(&self) -> String {
        match self.inner.read() {
            Ok(state) => state.head_hash(),
            Err(_) => {
                log::error!("Failed to acquire read lock on blockchain");
                GENESIS_PREV_HASH.to_string()
            }
        }
    }

    /// Head hash and height read under one guard.
    pub fn tip(&self) -> Result<(String, u64)> {
        let state = self
            .inner
            .read()
            .map_err(|e| {
                BlockchainError::InvalidBlock(format!("Failed to acquire chain lock: {e}"))
            })?;
        Ok((state.head_hash(), state.blocks.len() as u64))
    }

    pub fn contains_block(&self, hash: &str) -> bool {
        match self.inner.read() {
            Ok(state) => state.index.contains_key(hash),
            Err(_) => {
                log::error!("Failed to acquire read lock on blockchain");
                false
            }
        }
    }

    pub fn get_block(&self, hash: &str) -> Option<Block> {
        match self.inner.read() {
            Ok(state) => state.index.get(hash).map(|&i| state.blocks[i].clone()),
            Err(_) => {
                log::error!("Failed to acquire read lock on blockchain");
                None
            }
        }
    }

    /// Blocks with height >= `from_height`, at most `limit` of them.
    pub fn blocks_from(&self, from_height: u64, limit: usize) -> Vec<Block> {
        match self.inner.read() {
            Ok(state) => state
                .blocks
                .iter()
                .filter(|b| b.get_height() >= from_height)
                .take(limit)
                .cloned()
                .collect(),
            Err(_) => {
                log::error!("Failed to acquire read lock on blockchain");
                Vec::new()
            }
        }
    }

    pub fn is_confirmed(&self, txid: &str) -> bool {
        match self.inner.read() {
            Ok(state) => state.consumed_txs.contains(txid),
            Err(_) => {
                log::error!("Failed to acquire read lock on blockchain");
                false
            }
        }
    }

    pub fn owner_of(&self, coin: &Coin) -> Result<PublicKey> {
        let state = self
            .inner
            .read()
            .map_err(|e| {
                BlockchainError::Transaction(format!("Failed to acquire chain lock: {e}"))
            })?;
        Ok(state.owner_of(coin))
    }

    /// Ownership and double-spend checks against the confirmed chain.
    pub fn check_spendable(&self, tx: &Transaction) -> Result<()> {
        let state = self
            .inner
            .read()
            .map_err(|e| {
                BlockchainError::Transaction(format!("Failed to acquire chain lock: {e}"))
            })?;
        state.check_spendable(tx)
    }

    /// Full validation of a pending transaction: signatures, coins and ownership.
    pub fn validate_transaction(&self, tx: &Transaction) -> Result<()> {
        tx.verify(&self.bounds)?;
        self.check_spendable(tx)
    }

    /// Validate and append a block. `Ok(false)` means the block is already in
    /// the chain.
    pub fn accept_block(&self, block: &Block) -> Result<bool> {
        if self.contains_block(block.get_hash()) {
            return Ok(false);
        }
        if block.get_transactions().len() != self.block_size {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block {} has {} transactions, expected {}",
                block.short_hash(),
                block.get_transactions().len(),
                self.block_size
            )));
        }
        block.verify(&self.bounds)?;

        let mut state = self
            .inner
            .write()
            .map_err(|e| {
                BlockchainError::InvalidBlock(format!("Failed to acquire chain lock: {e}"))
            })?;

        if state.index.contains_key(block.get_hash()) {
            return Ok(false);
        }
        let head = state.head_hash();
        let expected_height = state.blocks.len() as u64 + 1;
        if block.get_prev_hash() != head || block.get_height() != expected_height {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block {} at height {} does not extend head {} at height {}",
                block.short_hash(),
                block.get_height(),
                &head[..12],
                expected_height - 1
            )));
        }

        let mut batch_coins = HashSet::new();
        let mut batch_txs = HashSet::new();
        for tx in block.get_transactions() {
            if !batch_txs.insert(tx.get_id()) {
                return Err(BlockchainError::InvalidBlock(format!(
                    "Block {} repeats transaction {}",
                    block.short_hash(),
                    tx.short_id()
                )));
            }
            state.check_spendable(tx)?;
            for coin_id in tx.input_ids() {
                if !batch_coins.insert(coin_id) {
                    return Err(BlockchainError::InvalidBlock(format!(
                        "Block {} spends coin {} more than once",
                        block.short_hash(),
                        &coin_id[..coin_id.len().min(12)]
                    )));
                }
            }
        }

        for tx in block.get_transactions() {
            state.consumed_txs.insert(tx.get_id().to_string());
            for coin in tx.get_inputs() {
                state
                    .coin_owners
                    .insert(coin.get_id().to_string(), tx.get_recipient().clone());
            }
        }
        let position = state.blocks.len();
        state.index.insert(block.get_hash().to_string(), position);
        state.blocks.push(block.clone());

        info!(
            "Accepted block {} at height {} ({} transactions, difficulty {})",
            block.short_hash(),
            block.get_height(),
            block.get_transactions().len(),
            block.get_pow_difficulty()
        );
        Ok(true)
    }
}
