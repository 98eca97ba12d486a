//! Helpers shared by the unit tests: fixed identities, quick mining of coins
//! and blocks, and a node config suited to in-process networks.

pub mod test_utils;

pub use test_utils::*;
