use crate::core::{Block, Coin};
use crate::error::Result;
use crate::wallet::keys::{self, PrivateKey, PublicKey};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// The node's identity and the coins it currently owns.
///
/// Owned coins are keyed by coin id. Coins enter through mining or through a
/// confirmed block that transfers them here, and leave when a confirmed block
/// transfers them away.
pub struct Wallet {
    public_key: PublicKey,
    private_key: PrivateKey,
    node_id: String,
    coins: RwLock<BTreeMap<String, Coin>>,
}

impl Wallet {
    pub fn generate(modulus_size: usize) -> Result<Wallet> {
        let (public_key, private_key) = keys::generate_keypair(modulus_size)?;
        Ok(Wallet::from_keys(public_key, private_key))
    }

    pub fn from_keys(public_key: PublicKey, private_key: PrivateKey) -> Wallet {
        Wallet {
            node_id: public_key.node_id(),
            public_key,
            private_key,
            coins: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub fn node_id(&self) -> &str {
        self.node_id.as_str()
    }

    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        keys::sign(data, &self.private_key)
    }

    pub fn add_coin(&self, coin: Coin) {
        match self.coins.write() {
            Ok(mut coins) => {
                coins.insert(coin.get_id().to_string(), coin);
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on wallet");
            }
        }
    }

    /// Snapshot of owned coins, oldest first.
    pub fn coins(&self) -> Vec<Coin> {
        match self.coins.read() {
            Ok(coins) => {
                let mut owned: Vec<Coin> = coins.values().cloned().collect();
                owned.sort_by_key(|c| c.get_timestamp());
                owned
            }
            Err(_) => {
                log::error!("Failed to acquire read lock on wallet");
                Vec::new()
            }
        }
    }

    pub fn balance(&self) -> u64 {
        match self.coins.read() {
            Ok(coins) => coins.len() as u64,
            Err(_) => {
                log::error!("Failed to acquire read lock on wallet");
                0
            }
        }
    }

    pub fn owns(&self, coin_id: &str) -> bool {
        match self.coins.read() {
            Ok(coins) => coins.contains_key(coin_id),
            Err(_) => {
                log::error!("Failed to acquire read lock on wallet");
                false
            }
        }
    }

    /// Update ownership from a confirmed block. Returns (received, sent) coin counts.
    pub fn apply_block(&self, block: &Block) -> (usize, usize) {
        let mut received = 0;
        let mut sent = 0;
        match self.coins.write() {
            Ok(mut coins) => {
                for tx in block.get_transactions() {
                    if tx.get_sender() == &self.public_key {
                        for coin in tx.get_inputs() {
                            if coins.remove(coin.get_id()).is_some() {
                                sent += 1;
                            }
                        }
                    }
                    if tx.get_recipient() == &self.public_key {
                        for coin in tx.get_inputs() {
                            coins.insert(coin.get_id().to_string(), coin.clone());
                            received += 1;
                        }
                    }
                }
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on wallet");
            }
        }
        (received, sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Transaction, GENESIS_PREV_HASH};
    use crate::testnet::{mine_test_block, mint_test_coin, other_test_keys, test_keys};

    #[test]
    fn test_mined_coins_are_owned() {
        let (public, private) = test_keys();
        let wallet = Wallet::from_keys(public.clone(), private.clone());
        let coin = mint_test_coin(&public, &private, 252);
        wallet.add_coin(coin.clone());
        wallet.add_coin(coin.clone());
        assert_eq!(wallet.balance(), 1);
        assert!(wallet.owns(coin.get_id()));
        assert_eq!(wallet.node_id(), public.node_id());
    }

    #[test]
    fn test_apply_block_moves_coins() {
        let (seller, seller_key) = test_keys();
        let (buyer, buyer_key) = other_test_keys();
        let seller_wallet = Wallet::from_keys(seller.clone(), seller_key.clone());
        let buyer_wallet = Wallet::from_keys(buyer.clone(), buyer_key);

        let sold = mint_test_coin(&seller, &seller_key, 252);
        let kept = mint_test_coin(&seller, &seller_key, 252);
        seller_wallet.add_coin(sold.clone());
        seller_wallet.add_coin(kept.clone());

        let tx = Transaction::new_signed(vec![sold.clone()], &seller, &seller_key, buyer).unwrap();
        let block = mine_test_block(GENESIS_PREV_HASH, 1, vec![tx], 250, &seller, &seller_key);

        assert_eq!(seller_wallet.apply_block(&block), (0, 1));
        assert_eq!(buyer_wallet.apply_block(&block), (1, 0));
        assert!(!seller_wallet.owns(sold.get_id()));
        assert!(seller_wallet.owns(kept.get_id()));
        assert!(buyer_wallet.owns(sold.get_id()));
    }
}
