use crate::utils::{sha256_digest, CancelToken};
use num_bigint::BigUint;
use num_traits::One;

/// Largest meaningful difficulty: every SHA-256 output is below 2^256.
pub const MAX_DIFFICULTY_EXPONENT: u32 = 256;

/// Proof-of-work over an arbitrary preimage.
///
/// A solution is a nonce such that `SHA-256(preimage || nonce)`, read as a
/// big-endian integer, is below `2^difficulty`. Larger difficulty values are
/// easier.
pub struct ProofOfWork {
    preimage: Vec<u8>,
    target: BigUint,
    difficulty: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Found { nonce: u64, hash: Vec<u8> },
    Exhausted,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReport {
    pub outcome: SearchOutcome,
    pub attempts: u64,
}

impl ProofOfWork {
    pub fn new(preimage: Vec<u8>, difficulty: u32) -> ProofOfWork {
        ProofOfWork {
            preimage,
            target: Self::target_for(difficulty),
            difficulty,
        }
    }

    pub fn target_for(difficulty: u32) -> BigUint {
        BigUint::one() << difficulty.min(MAX_DIFFICULTY_EXPONENT)
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    fn prepare_data(&self, nonce: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.preimage.len() + 8);
        data.extend(&self.preimage);
        data.extend(nonce.to_be_bytes());
        data
    }

    pub fn hash_with_nonce(&self, nonce: u64) -> Vec<u8> {
        sha256_digest(&self.prepare_data(nonce))
    }

    pub fn meets_target(hash: &[u8], difficulty: u32) -> bool {
        BigUint::from_bytes_be(hash) < Self::target_for(difficulty)
    }

    /// Recompute the hash for `nonce` and check it against the target.
    pub fn validate(&self, nonce: u64) -> Option<Vec<u8>> {
        let hash = self.hash_with_nonce(nonce);
        if BigUint::from_bytes_be(&hash) < self.target {
            Some(hash)
        } else {
            None
        }
    }

    /// Hash nonces starting at `start_nonce` until a solution is found, the
    /// attempt cap is reached or `cancel` is set. The token is checked before
    /// every attempt.
    pub fn search(
        &self,
        start_nonce: u64,
        max_attempts: Option<u64>,
        cancel: &CancelToken,
    ) -> SearchReport {
        let mut nonce = start_nonce;
        let mut attempts = 0u64;
        loop {
            if cancel.is_cancelled() {
                return SearchReport {
                    outcome: SearchOutcome::Cancelled,
                    attempts,
                };
            }
            if let Some(max) = max_attempts {
                if attempts >= max {
                    return SearchReport {
                        outcome: SearchOutcome::Exhausted,
                        attempts,
                    };
                }
            }

            let hash = self.hash_with_nonce(nonce);
            attempts += 1;
            if BigUint::from_bytes_be(&hash) < self.target {
                return SearchReport {
                    outcome: SearchOutcome::Found { nonce, hash },
                    attempts,
                };
            }
            nonce = nonce.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_larger_difficulty_is_easier() {
        assert!(ProofOfWork::target_for(251) > ProofOfWork::target_for(240));
        assert_eq!(ProofOfWork::target_for(300), ProofOfWork::target_for(256));
    }

    #[test]
    fn test_max_difficulty_accepts_first_nonce() {
        let pow = ProofOfWork::new(b"genesis".to_vec(), MAX_DIFFICULTY_EXPONENT);
        let report = pow.search(42, None, &CancelToken::new());
        assert_eq!(report.attempts, 1);
        match report.outcome {
            SearchOutcome::Found { nonce, hash } => {
                assert_eq!(nonce, 42);
                assert_eq!(pow.validate(nonce), Some(hash));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_search_respects_attempt_cap() {
        // hash < 2 is practically impossible
        let pow = ProofOfWork::new(b"genesis".to_vec(), 1);
        let report = pow.search(0, Some(200), &CancelToken::new());
        assert_eq!(report.outcome, SearchOutcome::Exhausted);
        assert_eq!(report.attempts, 200);
    }

    #[test]
    fn test_cancelled_search_stops_immediately() {
        let pow = ProofOfWork::new(b"genesis".to_vec(), 1);
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = pow.search(0, None, &cancel);
        assert_eq!(report.outcome, SearchOutcome::Cancelled);
        assert_eq!(report.attempts, 0);
    }

    #[test]
    fn test_solution_found_at_moderate_difficulty() {
        let pow = ProofOfWork::new(b"preimage".to_vec(), 248);
        let report = pow.search(0, Some(1_000_000), &CancelToken::new());
        let SearchOutcome::Found { nonce, hash } = report.outcome else {
            panic!("no solution within cap");
        };
        assert!(ProofOfWork::meets_target(&hash, 248));
        assert!(pow.validate(nonce).is_some());
    }

    #[test]
    fn test_nonce_wraps_without_panic() {
        let pow = ProofOfWork::new(b"wrap".to_vec(), 1);
        let report = pow.search(u64::MAX, Some(3), &CancelToken::new());
        assert_eq!(report.attempts, 3);
    }
}
