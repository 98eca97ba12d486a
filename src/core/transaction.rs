use crate::core::difficulty::DifficultyBounds;
use crate::core::Coin;
use crate::error::{BlockchainError, Result};
use crate::utils::{current_timestamp, sha256_hex};
use crate::wallet::{self, PrivateKey, PublicKey};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TxOutput {
    recipient: PublicKey,
    amount: u64,
}

impl TxOutput {
    pub fn get_recipient(&self) -> &PublicKey {
        &self.recipient
    }

    pub fn get_amount(&self) -> u64 {
        self.amount
    }
}

/// Whole-coin transfer from `sender` to the output recipient.
///
/// The input coins travel inside the transaction so a receiver can verify them
/// without having seen them before. The amount always equals the number of
/// inputs. The id is the SHA-256 of everything the sender signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Transaction {
    id: String,
    inputs: Vec<Coin>,
    sender: PublicKey,
    output: TxOutput,
    timestamp: i64,
    signature: Vec<u8>,
}

impl Transaction {
    pub fn new_signed(
        inputs: Vec<Coin>,
        sender: &PublicKey,
        sender_key: &PrivateKey,
        recipient: PublicKey,
    ) -> Result<Transaction> {
        if inputs.is_empty() {
            return Err(BlockchainError::Transaction(
                "Transaction must spend at least one coin".to_string(),
            ));
        }
        let output = TxOutput {
            recipient,
            amount: inputs.len() as u64,
        };
        let timestamp = current_timestamp()?;
        let content = Self::content_bytes(&inputs, sender, &output, timestamp);
        Ok(Transaction {
            id: sha256_hex(&content),
            signature: wallet::sign(&content, sender_key),
            inputs,
            sender: sender.clone(),
            output,
            timestamp,
        })
    }

    fn content_bytes(
        inputs: &[Coin],
        sender: &PublicKey,
        output: &TxOutput,
        timestamp: i64,
    ) -> Vec<u8> {
        let mut data = Vec::new();
        for coin in inputs {
            data.extend(coin.get_id().as_bytes());
        }
        data.extend(sender.to_bytes());
        data.extend(output.recipient.to_bytes());
        data.extend(output.amount.to_be_bytes());
        data.extend(timestamp.to_be_bytes());
        data
    }

    /// Self-contained checks: shape, id, sender signature and every input coin.
    /// Ownership against the chain is checked by the blockchain.
    pub fn verify(&self, bounds: &DifficultyBounds) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(BlockchainError::Transaction(format!(
                "Transaction {} has no inputs",
                self.short_id()
            )));
        }
        if self.output.amount != self.inputs.len() as u64 {
            return Err(BlockchainError::Transaction(format!(
                "Transaction {} amount {} does not match {} inputs",
                self.short_id(),
                self.output.amount,
                self.inputs.len()
            )));
        }
        let mut seen = HashSet::new();
        for coin in &self.inputs {
            if !seen.insert(coin.get_id()) {
                return Err(BlockchainError::Transaction(format!(
                    "Transaction {} spends coin {} twice",
                    self.short_id(),
                    coin.short_id()
                )));
            }
        }

        let content = Self::content_bytes(&self.inputs, &self.sender, &self.output, self.timestamp);
        if sha256_hex(&content) != self.id {
            return Err(BlockchainError::Transaction(format!(
                "Transaction {} id does not match its contents",
                self.short_id()
            )));
        }
        if !wallet::verify(&content, &self.signature, &self.sender) {
            return Err(BlockchainError::Transaction(format!(
                "Transaction {} has a bad sender signature",
                self.short_id()
            )));
        }

        for coin in &self.inputs {
            coin.verify(bounds)?;
        }
        Ok(())
    }

    pub fn get_id(&self) -> &str {
        self.id.as_str()
    }

    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }

    pub fn get_inputs(&self) -> &[Coin] {
        self.inputs.as_slice()
    }

    pub fn input_ids(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|c| c.get_id())
    }

    pub fn get_sender(&self) -> &PublicKey {
        &self.sender
    }

    pub fn get_recipient(&self) -> &PublicKey {
        &self.output.recipient
    }

    pub fn get_amount(&self) -> u64 {
        self.output.amount
    }

    pub fn get_output(&self) -> &TxOutput {
        &self.output
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testnet::{mint_test_coin, other_test_keys, test_bounds, test_keys};

    #[test]
    fn test_signed_transaction_verifies() {
        let (public, private) = test_keys();
        let (buyer, _) = other_test_keys();
        let coin = mint_test_coin(&public, &private, 252);
        let tx = Transaction::new_signed(vec![coin], &public, &private, buyer.clone()).unwrap();
        assert!(tx.verify(&test_bounds()).is_ok());
        assert_eq!(tx.get_amount(), 1);
        assert_eq!(tx.get_recipient(), &buyer);
    }

    #[test]
    fn test_empty_inputs_rejected() {
        let (public, private) = test_keys();
        let (buyer, _) = other_test_keys();
        assert!(Transaction::new_signed(vec![], &public, &private, buyer).is_err());
    }

    #[test]
    fn test_duplicate_input_rejected() {
        let (public, private) = test_keys();
        let (buyer, _) = other_test_keys();
        let coin = mint_test_coin(&public, &private, 252);
        let tx =
            Transaction::new_signed(vec![coin.clone(), coin], &public, &private, buyer).unwrap();
        assert!(tx.verify(&test_bounds()).is_err());
    }

    #[test]
    fn test_tampered_recipient_rejected() {
        let (public, private) = test_keys();
        let (buyer, _) = other_test_keys();
        let coin = mint_test_coin(&public, &private, 252);
        let mut tx = Transaction::new_signed(vec![coin], &public, &private, buyer).unwrap();
        tx.output.recipient = public.clone();
        assert!(tx.verify(&test_bounds()).is_err());
    }

    #[test]
    fn test_signature_by_non_sender_rejected() {
        let (public, private) = test_keys();
        let (buyer, buyer_private) = other_test_keys();
        let coin = mint_test_coin(&public, &private, 252);
        // the buyer signs but claims the miner as sender
        let tx = Transaction::new_signed(vec![coin], &public, &buyer_private, buyer).unwrap();
        assert!(tx.verify(&test_bounds()).is_err());
    }
}
