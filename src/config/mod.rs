//! Configuration management
//!
//! Node settings from TOML, environment and command line.

pub mod settings;

pub use settings::{parse_address_list, NodeConfig, DEFAULT_DEBUG_ITERATIONS, DEFAULT_PORT};
