use crate::core::DifficultyBounds;
use crate::error::{BlockchainError, Result};
use crate::wallet::keys::MIN_MODULUS_SIZE;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 6404;
pub const DEFAULT_MODULUS_SIZE: usize = 512;
pub const DEFAULT_POW_DIFFICULTY: u32 = 251;
pub const DEFAULT_DEBUG_ITERATIONS: u64 = 200;

const LISTEN_ADDR_KEY: &str = "CEROCOIN_LISTEN_ADDR";
const NETWORK_KEY: &str = "CEROCOIN_NETWORK";

/// Node configuration.
///
/// Loaded from TOML (every field optional), then overridden by the
/// `CEROCOIN_LISTEN_ADDR` and `CEROCOIN_NETWORK` environment variables, then by
/// command-line flags. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Seed list of peer addresses.
    pub cerocoin_network: Vec<String>,
    pub listen_addr: String,
    /// Address announced to peers. Defaults to the bound listener address.
    pub advertise_addr: Option<String>,
    pub modulus_size: usize,
    pub starting_pow_difficulty: u32,
    pub min_pow_difficulty: u32,
    pub max_pow_difficulty: u32,
    pub num_transactions_in_block: usize,
    /// Hash attempt cap per mining cycle. `None` mines until a solution.
    pub max_iterations_debug_mode: Option<u64>,
    pub mining_enabled: bool,
    pub auto_trade: bool,
    pub scan_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub probe_retry_budget: u32,
    pub trade_interval_ms: u64,
    pub mining_pause_ms: u64,
    pub assembler_poll_ms: u64,
    pub seen_cache_size: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            cerocoin_network: Vec::new(),
            listen_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            advertise_addr: None,
            modulus_size: DEFAULT_MODULUS_SIZE,
            starting_pow_difficulty: DEFAULT_POW_DIFFICULTY,
            min_pow_difficulty: 224,
            max_pow_difficulty: 255,
            num_transactions_in_block: 2,
            max_iterations_debug_mode: None,
            mining_enabled: true,
            auto_trade: true,
            scan_interval_ms: 5_000,
            probe_timeout_ms: 3_000,
            probe_retry_budget: 3,
            trade_interval_ms: 4_000,
            mining_pause_ms: 1_000,
            assembler_poll_ms: 1_000,
            seen_cache_size: 1024,
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> Result<NodeConfig> {
        let text = fs::read_to_string(path).map_err(|e| {
            BlockchainError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config: NodeConfig = toml::from_str(&text)?;
        Ok(config)
    }

    /// Apply environment overrides. `CEROCOIN_NETWORK` is a comma separated
    /// address list.
    pub fn apply_env(&mut self) {
        if let Ok(addr) = env::var(LISTEN_ADDR_KEY) {
            self.listen_addr = addr;
        }
        if let Ok(network) = env::var(NETWORK_KEY) {
            self.cerocoin_network = parse_address_list(&network);
        }
    }

    pub fn bounds(&self) -> DifficultyBounds {
        DifficultyBounds::new(self.min_pow_difficulty, self.max_pow_difficulty)
    }

    pub fn validate(&self) -> Result<()> {
        if self.modulus_size % 2 != 0 || self.modulus_size < MIN_MODULUS_SIZE {
            return Err(BlockchainError::Config(format!(
                "modulus_size must be even and at least {MIN_MODULUS_SIZE}, got {}",
                self.modulus_size
            )));
        }
        if self.num_transactions_in_block == 0 {
            return Err(BlockchainError::Config(
                "num_transactions_in_block must be at least 1".to_string(),
            ));
        }
        self.bounds().validate()?;
        if !self.bounds().contains(self.starting_pow_difficulty) {
            return Err(BlockchainError::Config(format!(
                "starting_pow_difficulty {} outside {}",
                self.starting_pow_difficulty,
                self.bounds()
            )));
        }
        if self.max_iterations_debug_mode == Some(0) {
            return Err(BlockchainError::Config(
                "max_iterations_debug_mode must be positive".to_string(),
            ));
        }
        if self.probe_retry_budget == 0 {
            return Err(BlockchainError::Config(
                "probe_retry_budget must be at least 1".to_string(),
            ));
        }
        if self.seen_cache_size == 0 {
            return Err(BlockchainError::Config(
                "seen_cache_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn trade_interval(&self) -> Duration {
        Duration::from_millis(self.trade_interval_ms)
    }

    pub fn mining_pause(&self) -> Duration {
        Duration::from_millis(self.mining_pause_ms)
    }

    pub fn assembler_poll(&self) -> Duration {
        Duration::from_millis(self.assembler_poll_ms)
    }
}

pub fn parse_address_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
