use crate::core::Transaction;
use crate::error::{BlockchainError, Result};
use crate::network::Message;
use crate::node::NodeContext;
use crate::wallet::PublicKey;
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use std::sync::Arc;

/// Packages transfers of owned coins into signed transactions.
#[derive(Clone)]
pub struct Transactor {
    ctx: Arc<NodeContext>,
}

impl Transactor {
    pub fn new(ctx: Arc<NodeContext>) -> Transactor {
        Transactor { ctx }
    }

    /// Send `amount` coins to `recipient`.
    ///
    /// Coins are picked oldest first among those owned and not already
    /// reserved by a pending transaction. Selection and pool insertion happen
    /// under the pool guard, so two concurrent submits never pick the same coin.
    pub fn submit(&self, recipient: &PublicKey, amount: u64) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::Transaction(
                "Amount must be at least one coin".to_string(),
            ));
        }
        let wallet = &self.ctx.wallet;
        let owned = wallet.coins();

        let tx = self.ctx.pool.insert_with(|reserved| {
            let inputs: Vec<_> = owned
                .iter()
                .filter(|coin| !reserved.contains(coin.get_id()))
                .take(amount as usize)
                .cloned()
                .collect();
            if (inputs.len() as u64) < amount {
                return Err(BlockchainError::InsufficientFunds {
                    required: amount,
                    available: inputs.len() as u64,
                });
            }
            Transaction::new_signed(
                inputs,
                wallet.public_key(),
                wallet.private_key(),
                recipient.clone(),
            )
        })?;

        info!(
            "Submitted transaction {}: {amount} coin(s) to {}",
            tx.short_id(),
            &recipient.node_id()[..12]
        );
        self.ctx.hub.broadcast(&Message::Transaction(tx.clone()), None);
        Ok(tx)
    }

    /// Offer one coin to a randomly chosen connected peer.
    pub fn trade_once(&self) -> Option<Transaction> {
        let links = self.ctx.hub.links();
        let link = links.choose(&mut rand::thread_rng())?;
        match self.submit(link.public_key(), 1) {
            Ok(tx) => Some(tx),
            Err(BlockchainError::InsufficientFunds { .. }) => {
                debug!("No spare coin to trade with {}", link.peer_addr());
                None
            }
            Err(e) => {
                warn!("Trade with {} failed: {e}", link.peer_addr());
                None
            }
        }
    }

    /// Automatic trading loop, one offer per trade interval until shutdown.
    pub fn run(self) {
        info!("Transactor started");
        while !self.ctx.shutdown.wait_timeout(self.ctx.config.trade_interval()) {
            self.trade_once();
        }
        info!("Transactor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::testnet::{mint_test_coin, other_test_keys, test_keys};
    use crate::wallet::Wallet;
    use crossbeam::channel::unbounded;

    fn transactor_with_coins(count: usize) -> Transactor {
        let (public, private) = test_keys();
        let wallet = Wallet::from_keys(public.clone(), private.clone());
        for _ in 0..count {
            wallet.add_coin(mint_test_coin(&public, &private, 255));
        }
        let (tx, _rx) = unbounded();
        let ctx = NodeContext::new(
            NodeConfig::default(),
            wallet,
            "127.0.0.1:1".to_string(),
            tx,
        );
        Transactor::new(Arc::new(ctx))
    }

    #[test]
    fn test_submit_reserves_coins() {
        let transactor = transactor_with_coins(3);
        let (buyer, _) = other_test_keys();

        let tx = transactor.submit(&buyer, 2).unwrap();
        assert_eq!(tx.get_amount(), 2);
        assert!(transactor.ctx.pool.contains(tx.get_id()));
        for id in tx.input_ids() {
            assert!(transactor.ctx.pool.is_reserved(id));
        }

        // one unreserved coin left
        let second = transactor.submit(&buyer, 1).unwrap();
        assert!(second.input_ids().all(|id| !tx.input_ids().any(|x| x == id)));
    }

    #[test]
    fn test_insufficient_funds() {
        let transactor = transactor_with_coins(1);
        let (buyer, _) = other_test_keys();
        let err = transactor.submit(&buyer, 2).unwrap_err();
        assert_eq!(
            err,
            BlockchainError::InsufficientFunds {
                required: 2,
                available: 1
            }
        );
        assert!(transactor.ctx.pool.is_empty());
    }

    #[test]
    fn test_reserved_coins_do_not_count() {
        let transactor = transactor_with_coins(1);
        let (buyer, _) = other_test_keys();
        transactor.submit(&buyer, 1).unwrap();
        assert!(matches!(
            transactor.submit(&buyer, 1),
            Err(BlockchainError::InsufficientFunds { available: 0, .. })
        ));
    }

    #[test]
    fn test_zero_amount_rejected() {
        let transactor = transactor_with_coins(1);
        let (buyer, _) = other_test_keys();
        assert!(matches!(
            transactor.submit(&buyer, 0),
            Err(BlockchainError::Transaction(_))
        ));
    }

    #[test]
    fn test_trade_without_peers_does_nothing() {
        let transactor = transactor_with_coins(1);
        assert!(transactor.trade_once().is_none());
        assert!(transactor.ctx.pool.is_empty());
    }
}
