//! Command-line interface
//!
//! Argument parsing for the `cerocoin` binary.

pub mod commands;

pub use commands::{Command, Opt, StartArgs};
