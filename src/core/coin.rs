use crate::core::difficulty::DifficultyBounds;
use crate::core::ProofOfWork;
use crate::error::{BlockchainError, Result};
use crate::utils::current_timestamp;
use crate::wallet::{self, PrivateKey, PublicKey};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};

/// A mined coin. The coin id is the hex proof-of-work hash.
///
/// Coins are immutable once mined; a coin changes hands only through a
/// confirmed transaction. Every coin is worth exactly one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Coin {
    id: String,
    miner_id: String,
    miner_public_key: PublicKey,
    genesis: String,
    nonce: u64,
    pow_difficulty: u32,
    timestamp: i64,
    signature: Vec<u8>,
}

impl Coin {
    /// Bytes hashed together with the nonce by the miner.
    pub fn pow_preimage(genesis: &str, miner_public_key: &PublicKey) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend(genesis.as_bytes());
        data.extend(miner_public_key.to_bytes());
        data
    }

    /// Build and sign a coin from a proof-of-work solution.
    pub fn mint(
        miner_public_key: &PublicKey,
        miner_private_key: &PrivateKey,
        genesis: String,
        nonce: u64,
        pow_difficulty: u32,
        hash: &[u8],
    ) -> Result<Coin> {
        if !ProofOfWork::meets_target(hash, pow_difficulty) {
            return Err(BlockchainError::Mining(format!(
                "Hash does not meet difficulty {pow_difficulty}"
            )));
        }
        let mut coin = Coin {
            id: HEXLOWER.encode(hash),
            miner_id: miner_public_key.node_id(),
            miner_public_key: miner_public_key.clone(),
            genesis,
            nonce,
            pow_difficulty,
            timestamp: current_timestamp()?,
            signature: Vec::new(),
        };
        coin.signature = wallet::sign(&coin.signing_bytes(), miner_private_key);
        Ok(coin)
    }

    fn signing_bytes(&self) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend(self.id.as_bytes());
        data.extend(self.miner_id.as_bytes());
        data.extend(self.miner_public_key.to_bytes());
        data.extend(self.genesis.as_bytes());
        data.extend(self.nonce.to_be_bytes());
        data.extend(self.pow_difficulty.to_be_bytes());
        data.extend(self.timestamp.to_be_bytes());
        data
    }

    /// Check the proof-of-work, the miner id and the miner signature.
    pub fn verify(&self, bounds: &DifficultyBounds) -> Result<()> {
        if !bounds.contains(self.pow_difficulty) {
            return Err(BlockchainError::InvalidCoin(format!(
                "Coin {} difficulty {} outside {bounds}",
                self.short_id(),
                self.pow_difficulty
            )));
        }
        if self.miner_id != self.miner_public_key.node_id() {
            return Err(BlockchainError::InvalidCoin(format!(
                "Coin {} miner id does not match its key",
                self.short_id()
            )));
        }

        let preimage = Self::pow_preimage(&self.genesis, &self.miner_public_key);
        let pow = ProofOfWork::new(preimage, self.pow_difficulty);
        match pow.validate(self.nonce) {
            Some(hash) if HEXLOWER.encode(&hash) == self.id => {}
            _ => {
                return Err(BlockchainError::InvalidCoin(format!(
                    "Coin {} has an invalid proof-of-work",
                    self.short_id()
                )))
            }
        }

        if !wallet::verify(&self.signing_bytes(), &self.signature, &self.miner_public_key) {
            return Err(BlockchainError::InvalidCoin(format!(
                "Coin {} has a bad miner signature",
                self.short_id()
            )));
        }
        Ok(())
    }

    pub fn get_id(&self) -> &str {
        self.id.as_str()
    }

    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }

    pub fn get_miner_id(&self) -> &str {
        self.miner_id.as_str()
    }

    pub fn get_miner_public_key(&self) -> &PublicKey {
        &self.miner_public_key
    }

    pub fn get_genesis(&self) -> &str {
        self.genesis.as_str()
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_pow_difficulty(&self) -> u32 {
        self.pow_difficulty
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testnet::{mint_test_coin, other_test_keys, test_keys};

    #[test]
    fn test_minted_coin_verifies() {
        let (public, private) = test_keys();
        let coin = mint_test_coin(&public, &private, 250);
        assert!(coin.verify(&DifficultyBounds::new(224, 256)).is_ok());
        assert_eq!(coin.get_miner_id(), public.node_id());
    }

    #[test]
    fn test_difficulty_outside_bounds_rejected() {
        let (public, private) = test_keys();
        let coin = mint_test_coin(&public, &private, 256);
        let err = coin.verify(&DifficultyBounds::new(224, 255)).unwrap_err();
        assert!(matches!(err, BlockchainError::InvalidCoin(_)));
    }

    #[test]
    fn test_tampered_nonce_rejected() {
        let (public, private) = test_keys();
        let mut coin = mint_test_coin(&public, &private, 250);
        coin.nonce = coin.nonce.wrapping_add(1);
        assert!(coin.verify(&DifficultyBounds::new(224, 256)).is_err());
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let (public, private) = test_keys();
        let (_, other_private) = other_test_keys();
        let mut coin = mint_test_coin(&public, &private, 250);
        coin.signature = wallet::sign(&coin.signing_bytes(), &other_private);
        assert!(coin.verify(&DifficultyBounds::new(224, 256)).is_err());
    }

    #[test]
    fn test_mint_rejects_hash_above_target() {
        let (public, private) = test_keys();
        let hash = vec![0xFF; 32];
        assert!(Coin::mint(&public, &private, "g".to_string(), 0, 200, &hash).is_err());
    }
}
