use crate::core::{Block, Transaction};
use crate::error::{BlockchainError, Result};
use crossbeam::channel::{bounded, Receiver, Sender};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

#[derive(Default)]
struct PoolState {
    /// txid -> (arrival sequence, transaction)
    txs: HashMap<String, (u64, Transaction)>,
    /// arrival sequence -> txid, oldest first
    order: BTreeMap<u64, String>,
    /// coin id -> txid of the pending transaction spending it
    reserved: HashMap<String, String>,
    next_seq: u64,
}

impl PoolState {
    fn insert(&mut self, tx: Transaction) -> Result<bool> {
        if self.txs.contains_key(tx.get_id()) {
            return Ok(false);
        }
        for coin_id in tx.input_ids() {
            if let Some(other) = self.reserved.get(coin_id) {
                return Err(BlockchainError::Transaction(format!(
                    "Coin {} is already spent by pending transaction {}",
                    &coin_id[..coin_id.len().min(12)],
                    &other[..other.len().min(12)]
                )));
            }
        }
        let txid = tx.get_id().to_string();
        for coin_id in tx.input_ids() {
            self.reserved.insert(coin_id.to_string(), txid.clone());
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, txid.clone());
        self.txs.insert(txid, (seq, tx));
        Ok(true)
    }

    fn remove(&mut self, txid: &str) -> Option<Transaction> {
        let (seq, tx) = self.txs.remove(txid)?;
        self.order.remove(&seq);
        for coin_id in tx.input_ids() {
            self.reserved.remove(coin_id);
        }
        Some(tx)
    }
}

/// View of the coins reserved by pending transactions, handed to the builder
/// closure of [`TransactionPool::insert_with`].
pub struct Reservations<'a> {
    reserved: &'a HashMap<String, String>,
}

impl Reservations<'_> {
    pub fn contains(&self, coin_id: &str) -> bool {
        self.reserved.contains_key(coin_id)
    }
}

/// Pending transactions, ordered by arrival.
///
/// A coin may back at most one pending transaction. Every successful insert
/// posts a change notification that the block assembler waits on.
pub struct TransactionPool {
    inner: RwLock<PoolState>,
    notify_tx: Sender<()>,
    notify_rx: Receiver<()>,
}

impl Default for TransactionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionPool {
    pub fn new() -> TransactionPool {
        let (notify_tx, notify_rx) = bounded(1);
        TransactionPool {
            inner: RwLock::new(PoolState::default()),
            notify_tx,
            notify_rx,
        }
    }

    /// Change notifications. Bursts of inserts collapse into one pending signal.
    pub fn changes(&self) -> Receiver<()> {
        self.notify_rx.clone()
    }

    fn notify(&self) {
        let _ = self.notify_tx.try_send(());
    }

    /// Insert a transaction. `Ok(false)` when the same transaction is already
    /// pending; an error when one of its coins backs a different pending
    /// transaction.
    pub fn insert(&self, tx: Transaction) -> Result<bool> {
        let inserted = {
            let mut pool = self.inner.write().map_err(|e| {
                BlockchainError::Transaction(format!("Failed to acquire pool lock: {e}"))
            })?;
            pool.insert(tx)?
        };
        if inserted {
            self.notify();
        }
        Ok(inserted)
    }

    /// Build and insert a transaction as one step under the pool guard, so the
    /// coins the builder picks cannot be reserved concurrently.
    pub fn insert_with<F>(&self, build: F) -> Result<Transaction>
    where
        F: FnOnce(&Reservations<'_>) -> Result<Transaction>,
    {
        let tx = {
            let mut pool = self.inner.write().map_err(|e| {
                BlockchainError::Transaction(format!("Failed to acquire pool lock: {e}"))
            })?;
            let tx = build(&Reservations {
                reserved: &pool.reserved,
            })?;
            pool.insert(tx.clone())?;
            tx
        };
        self.notify();
        Ok(tx)
    }

    pub fn get(&self, txid: &str) -> Option<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool.txs.get(txid).map(|(_, tx)| tx.clone()),
            Err(_) => {
                log::error!("Failed to acquire read lock on transaction pool");
                None
            }
        }
    }

    pub fn contains(&self, txid: &str) -> bool {
        match self.inner.read() {
            Ok(pool) => pool.txs.contains_key(txid),
            Err(_) => {
                log::error!("Failed to acquire read lock on transaction pool");
                false
            }
        }
    }

    pub fn is_reserved(&self, coin_id: &str) -> bool {
        match self.inner.read() {
            Ok(pool) => pool.reserved.contains_key(coin_id),
            Err(_) => {
                log::error!("Failed to acquire read lock on transaction pool");
                false
            }
        }
    }

    /// Pending transactions oldest first, at most `limit`.
    pub fn oldest(&self, limit: usize) -> Vec<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool
                .order
                .values()
                .take(limit)
                .filter_map(|txid| pool.txs.get(txid).map(|(_, tx)| tx.clone()))
                .collect(),
            Err(_) => {
                log::error!("Failed to acquire read lock on transaction pool");
                Vec::new()
            }
        }
    }

    pub fn remove(&self, txid: &str) -> Option<Transaction> {
        match self.inner.write() {
            Ok(mut pool) => pool.remove(txid),
            Err(_) => {
                log::error!("Failed to acquire write lock on transaction pool");
                None
            }
        }
    }

    /// Drop everything a confirmed block made obsolete: its own transactions and
    /// any pending transaction spending a coin the block moved. Returns the
    /// number of transactions removed.
    pub fn remove_confirmed(&self, block: &Block) -> usize {
        let block_coins: HashSet<&str> = block
            .get_transactions()
            .iter()
            .flat_map(|tx| tx.input_ids())
            .collect();
        match self.inner.write() {
            Ok(mut pool) => {
                let mut stale: Vec<String> = block
                    .get_transactions()
                    .iter()
                    .map(|tx| tx.get_id().to_string())
                    .collect();
                for coin_id in &block_coins {
                    if let Some(txid) = pool.reserved.get(*coin_id) {
                        stale.push(txid.clone());
                    }
                }
                stale
                    .iter()
                    .filter(|txid| pool.remove(txid).is_some())
                    .count()
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on transaction pool");
                0
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(pool) => pool.txs.len(),
            Err(_) => {
                log::error!("Failed to acquire read lock on transaction pool");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
