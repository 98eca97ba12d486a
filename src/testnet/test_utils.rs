//! Test utilities: cached key pairs and helpers that mine coins and blocks

use crate::config::NodeConfig;
use crate::core::{
    Block, BlockTemplate, Coin, DifficultyBounds, ProofOfWork, SearchOutcome, Transaction,
    GENESIS_PREV_HASH,
};
use crate::utils::{random_hex, CancelToken};
use crate::wallet::{generate_keypair, PrivateKey, PublicKey};
use std::sync::OnceLock;

/// Smallest accepted modulus, to keep key generation fast.
pub const TEST_MODULUS_SIZE: usize = 384;

static TEST_KEYS: OnceLock<(PublicKey, PrivateKey)> = OnceLock::new();
static OTHER_TEST_KEYS: OnceLock<(PublicKey, PrivateKey)> = OnceLock::new();

/// Key pair shared by every test in the crate.
pub fn test_keys() -> (PublicKey, PrivateKey) {
    TEST_KEYS
        .get_or_init(|| generate_keypair(TEST_MODULUS_SIZE).unwrap())
        .clone()
}

/// A second identity, for transfers and foreign signatures.
pub fn other_test_keys() -> (PublicKey, PrivateKey) {
    OTHER_TEST_KEYS
        .get_or_init(|| generate_keypair(TEST_MODULUS_SIZE).unwrap())
        .clone()
}

/// Bounds wide enough for every difficulty the tests mine at.
pub fn test_bounds() -> DifficultyBounds {
    DifficultyBounds::new(224, 256)
}

/// Config for in-process nodes: ephemeral localhost port, short intervals.
pub fn test_config() -> NodeConfig {
    NodeConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        modulus_size: TEST_MODULUS_SIZE,
        scan_interval_ms: 200,
        probe_timeout_ms: 500,
        trade_interval_ms: 200,
        mining_pause_ms: 50,
        assembler_poll_ms: 50,
        ..NodeConfig::default()
    }
}

fn solve(preimage: Vec<u8>, difficulty: u32) -> (u64, Vec<u8>) {
    let pow = ProofOfWork::new(preimage, difficulty);
    match pow.search(0, None, &CancelToken::new()).outcome {
        SearchOutcome::Found { nonce, hash } => (nonce, hash),
        other => panic!("search ended with {other:?}"),
    }
}

/// Mine a coin on a random genesis string. Keep `difficulty` high (250+).
pub fn mint_test_coin(public: &PublicKey, private: &PrivateKey, difficulty: u32) -> Coin {
    let genesis = random_hex(32);
    let (nonce, hash) = solve(Coin::pow_preimage(&genesis, public), difficulty);
    Coin::mint(public, private, genesis, nonce, difficulty, &hash).unwrap()
}

/// A fresh coin mined by [`test_keys`] and sent to [`other_test_keys`].
pub fn signed_transfer(difficulty: u32) -> Transaction {
    let (public, private) = test_keys();
    let (buyer, _) = other_test_keys();
    let coin = mint_test_coin(&public, &private, difficulty);
    Transaction::new_signed(vec![coin], &public, &private, buyer).unwrap()
}

pub fn mine_test_block(
    prev_hash: &str,
    height: u64,
    transactions: Vec<Transaction>,
    difficulty: u32,
    creator: &PublicKey,
    creator_key: &PrivateKey,
) -> Block {
    let template =
        BlockTemplate::new(prev_hash.to_string(), height, transactions, creator.clone()).unwrap();
    let (nonce, hash) = solve(template.pow_preimage(difficulty), difficulty);
    Block::seal(template, difficulty, nonce, &hash, creator_key).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identities_differ() {
        let (a, _) = test_keys();
        let (b, _) = other_test_keys();
        assert_ne!(a.node_id(), b.node_id());
        assert_eq!(test_keys().0, a);
    }

    #[test]
    fn test_mined_items_verify() {
        let (public, private) = test_keys();
        let tx = signed_transfer(252);
        assert!(tx.verify(&test_bounds()).is_ok());
        let block = mine_test_block(GENESIS_PREV_HASH, 1, vec![tx], 250, &public, &private);
        assert!(block.verify(&test_bounds()).is_ok());
    }
}
