use crate::config::{parse_address_list, NodeConfig, DEFAULT_DEBUG_ITERATIONS};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "cerocoin", about = "CeroCoin peer-to-peer coin node")]
pub struct Opt {
    #[arg(long, global = true, help = "TOML file with node settings")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "start", about = "Run a node until interrupted")]
    Start(StartArgs),
    #[command(name = "keygen", about = "Generate a key pair")]
    Keygen {
        #[arg(long, help = "RSA modulus size in bits")]
        modulus_size: Option<usize>,
        #[arg(long, help = "Directory to write the key files to")]
        out_dir: Option<PathBuf>,
    },
}

/// Flags for `start`. Each one overrides the file and environment settings.
#[derive(Args, Debug, Default)]
pub struct StartArgs {
    #[arg(long, help = "Address to listen on, e.g. 0.0.0.0:6404")]
    pub listen: Option<String>,
    #[arg(long, help = "Address announced to peers")]
    pub advertise: Option<String>,
    #[arg(long, help = "Comma separated seed peer addresses")]
    pub peers: Option<String>,
    #[arg(long, help = "RSA modulus size in bits")]
    pub modulus_size: Option<usize>,
    #[arg(long, help = "Starting proof-of-work difficulty")]
    pub difficulty: Option<u32>,
    #[arg(long, help = "Transactions per block")]
    pub block_size: Option<usize>,
    #[arg(long, help = "Cap hash attempts per mining cycle at 200")]
    pub debug: bool,
    #[arg(long, help = "Cap hash attempts per mining cycle", conflicts_with = "debug")]
    pub max_iterations: Option<u64>,
    #[arg(long, help = "Do not mine coins")]
    pub no_mining: bool,
    #[arg(long, help = "Do not offer coins to peers automatically")]
    pub no_trade: bool,
}

impl StartArgs {
    pub fn apply(&self, config: &mut NodeConfig) {
        if let Some(listen) = &self.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(advertise) = &self.advertise {
            config.advertise_addr = Some(advertise.clone());
        }
        if let Some(peers) = &self.peers {
            config.cerocoin_network = parse_address_list(peers);
        }
        if let Some(size) = self.modulus_size {
            config.modulus_size = size;
        }
        if let Some(difficulty) = self.difficulty {
            config.starting_pow_difficulty = difficulty;
        }
        if let Some(size) = self.block_size {
            config.num_transactions_in_block = size;
        }
        if self.debug {
            config.max_iterations_debug_mode = Some(DEFAULT_DEBUG_ITERATIONS);
        }
        if let Some(max) = self.max_iterations {
            config.max_iterations_debug_mode = Some(max);
        }
        if self.no_mining {
            config.mining_enabled = false;
        }
        if self.no_trade {
            config.auto_trade = false;
        }
    }
}
