use crate::core::proof_of_work::MAX_DIFFICULTY_EXPONENT;
use crate::error::{BlockchainError, Result};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// How far the local difficulty moves toward a peer's value per observation.
pub const DIFFICULTY_STEP: u32 = 1;

/// Inclusive range of acceptable difficulty exponents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DifficultyBounds {
    min: u32,
    max: u32,
}

impl DifficultyBounds {
    pub fn new(min: u32, max: u32) -> DifficultyBounds {
        DifficultyBounds { min, max }
    }

    pub fn validate(&self) -> Result<()> {
        if self.min > self.max {
            return Err(BlockchainError::Config(format!(
                "Minimum difficulty {} exceeds maximum {}",
                self.min, self.max
            )));
        }
        if self.max > MAX_DIFFICULTY_EXPONENT {
            return Err(BlockchainError::Config(format!(
                "Maximum difficulty {} exceeds {MAX_DIFFICULTY_EXPONENT}",
                self.max
            )));
        }
        Ok(())
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn contains(&self, difficulty: u32) -> bool {
        (self.min..=self.max).contains(&difficulty)
    }

    pub fn clamp(&self, difficulty: u32) -> u32 {
        difficulty.clamp(self.min, self.max)
    }
}

impl fmt::Display for DifficultyBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Move `local` one step toward `observed`, never overshooting it and never
/// leaving `bounds`.
pub fn converge_step(local: u32, observed: u32, bounds: &DifficultyBounds) -> u32 {
    let local = bounds.clamp(local);
    let observed = bounds.clamp(observed);
    let next = if local < observed {
        local.saturating_add(DIFFICULTY_STEP).min(observed)
    } else if local > observed {
        local.saturating_sub(DIFFICULTY_STEP).max(observed)
    } else {
        local
    };
    bounds.clamp(next)
}

/// The node's current difficulty. Readable by every worker; written only by
/// the miner supervisor.
#[derive(Debug)]
pub struct DifficultyCell {
    value: AtomicU32,
}

impl DifficultyCell {
    pub fn new(initial: u32) -> DifficultyCell {
        DifficultyCell {
            value: AtomicU32::new(initial),
        }
    }

    pub fn get(&self) -> u32 {
        self.value.load(Ordering::SeqCst)
    }

    pub(crate) fn set(&self, value: u32) {
        self.value.store(value, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> DifficultyBounds {
        DifficultyBounds::new(224, 255)
    }

    #[test]
    fn test_step_moves_toward_observed() {
        assert_eq!(converge_step(240, 251, &bounds()), 241);
        assert_eq!(converge_step(251, 240, &bounds()), 250);
        assert_eq!(converge_step(245, 245, &bounds()), 245);
    }

    #[test]
    fn test_step_clamps_observed_value() {
        assert_eq!(converge_step(255, 256, &bounds()), 255);
        assert_eq!(converge_step(224, 10, &bounds()), 224);
        assert_eq!(converge_step(300, 250, &bounds()), 254);
    }

    #[test]
    fn test_distance_never_increases() {
        let b = bounds();
        for local in 224..=255 {
            for observed in 224..=255 {
                let next = converge_step(local, observed, &b);
                assert!(next.abs_diff(observed) <= local.abs_diff(observed));
            }
        }
    }

    #[test]
    fn test_exchange_converges_within_one_step() {
        // two nodes exchanging coins alternately, each coin carrying its miner's difficulty
        let b = bounds();
        let (mut a, mut c) = (251u32, 240u32);
        let mut distance = a.abs_diff(c);
        for round in 0..10 {
            if round % 2 == 0 {
                c = converge_step(c, a, &b);
            } else {
                a = converge_step(a, c, &b);
            }
            assert!(a.abs_diff(c) <= distance);
            distance = a.abs_diff(c);
        }
        assert!(a.abs_diff(c) <= DIFFICULTY_STEP);
    }

    #[test]
    fn test_bounds_validation() {
        assert!(DifficultyBounds::new(250, 240).validate().is_err());
        assert!(DifficultyBounds::new(200, 257).validate().is_err());
        assert!(DifficultyBounds::new(224, 256).validate().is_ok());
    }

    #[test]
    fn test_cell_set_and_get() {
        let cell = DifficultyCell::new(251);
        cell.set(250);
        assert_eq!(cell.get(), 250);
    }
}
