use crate::core::difficulty::DifficultyBounds;
use crate::core::{ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{current_timestamp, sha256_digest};
use crate::wallet::{self, PrivateKey, PublicKey};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};

/// Previous-hash value of the first block.
pub const GENESIS_PREV_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Everything in a block header except the proof-of-work and signature.
/// The block assembler builds one and the miner supervisor solves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTemplate {
    prev_hash: String,
    height: u64,
    transactions: Vec<Transaction>,
    tx_root: Vec<u8>,
    timestamp: i64,
    creator: PublicKey,
}

impl BlockTemplate {
    pub fn new(
        prev_hash: String,
        height: u64,
        transactions: Vec<Transaction>,
        creator: PublicKey,
    ) -> Result<BlockTemplate> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }
        Ok(BlockTemplate {
            tx_root: tx_root(&transactions),
            prev_hash,
            height,
            transactions,
            timestamp: current_timestamp()?,
            creator,
        })
    }

    pub fn pow_preimage(&self, pow_difficulty: u32) -> Vec<u8> {
        header_preimage(
            &self.prev_hash,
            self.height,
            &self.tx_root,
            pow_difficulty,
            self.timestamp,
            &self.creator,
        )
    }

    pub fn get_prev_hash(&self) -> &str {
        self.prev_hash.as_str()
    }

    pub fn get_height(&self) -> u64 {
        self.height
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    hash: String,
    prev_hash: String,
    height: u64,
    transactions: Vec<Transaction>,
    tx_root: Vec<u8>,
    pow_difficulty: u32,
    nonce: u64,
    timestamp: i64,
    creator: PublicKey,
    creator_id: String,
    signature: Vec<u8>,
}

fn tx_root(transactions: &[Transaction]) -> Vec<u8> {
    let mut ids = Vec::new();
    for tx in transactions {
        ids.extend(tx.get_id().as_bytes());
    }
    sha256_digest(&ids)
}

fn header_preimage(
    prev_hash: &str,
    height: u64,
    tx_root: &[u8],
    pow_difficulty: u32,
    timestamp: i64,
    creator: &PublicKey,
) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend(prev_hash.as_bytes());
    data.extend(height.to_be_bytes());
    data.extend(tx_root);
    data.extend(pow_difficulty.to_be_bytes());
    data.extend(timestamp.to_be_bytes());
    data.extend(creator.to_bytes());
    data
}

impl Block {
    /// Seal a solved template: attach the proof-of-work and the creator's signature.
    pub fn seal(
        template: BlockTemplate,
        pow_difficulty: u32,
        nonce: u64,
        hash: &[u8],
        creator_key: &PrivateKey,
    ) -> Result<Block> {
        let pow = ProofOfWork::new(template.pow_preimage(pow_difficulty), pow_difficulty);
        match pow.validate(nonce) {
            Some(expected) if expected == hash => {}
            _ => {
                return Err(BlockchainError::InvalidBlock(format!(
                    "Solution does not satisfy difficulty {pow_difficulty}"
                )))
            }
        }
        let hash = HEXLOWER.encode(hash);
        let signature = wallet::sign(hash.as_bytes(), creator_key);
        Ok(Block {
            hash,
            creator_id: template.creator.node_id(),
            prev_hash: template.prev_hash,
            height: template.height,
            transactions: template.transactions,
            tx_root: template.tx_root,
            pow_difficulty,
            nonce,
            timestamp: template.timestamp,
            creator: template.creator,
            signature,
        })
    }

    /// Header checks that need no chain state: transaction root, proof-of-work,
    /// creator id and signature, and the self-contained validity of every
    /// transaction.
    pub fn verify(&self, bounds: &DifficultyBounds) -> Result<()> {
        if !bounds.contains(self.pow_difficulty) {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block {} difficulty {} outside {bounds}",
                self.short_hash(),
                self.pow_difficulty
            )));
        }
        if tx_root(&self.transactions) != self.tx_root {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block {} transaction root mismatch",
                self.short_hash()
            )));
        }
        let preimage = header_preimage(
            &self.prev_hash,
            self.height,
            &self.tx_root,
            self.pow_difficulty,
            self.timestamp,
            &self.creator,
        );
        let pow = ProofOfWork::new(preimage, self.pow_difficulty);
        match pow.validate(self.nonce) {
            Some(hash) if HEXLOWER.encode(&hash) == self.hash => {}
            _ => {
                return Err(BlockchainError::InvalidBlock(format!(
                    "Block {} has an invalid proof-of-work",
                    self.short_hash()
                )))
            }
        }
        if self.creator_id != self.creator.node_id() {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block {} creator id does not match its key",
                self.short_hash()
            )));
        }
        if !wallet::verify(self.hash.as_bytes(), &self.signature, &self.creator) {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block {} has a bad creator signature",
                self.short_hash()
            )));
        }
        for tx in &self.transactions {
            tx.verify(bounds)?;
        }
        Ok(())
    }

    pub fn get_hash(&self) -> &str {
        self.hash.as_str()
    }

    pub fn short_hash(&self) -> &str {
        &self.hash[..self.hash.len().min(12)]
    }

    pub fn get_prev_hash(&self) -> &str {
        self.prev_hash.as_str()
    }

    pub fn get_height(&self) -> u64 {
        self.height
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_pow_difficulty(&self) -> u32 {
        self.pow_difficulty
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_creator(&self) -> &PublicKey {
        &self.creator
    }

    pub fn get_creator_id(&self) -> &str {
        self.creator_id.as_str()
    }
}
