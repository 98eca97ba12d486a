//! Identity and key material
//!
//! RSA key generation, signing and verification, plus the wallet that holds
//! the node's keys and owned coins.

pub mod keys;
#[allow(clippy::module_inception)]
pub mod wallet;

pub use keys::{
    generate_keypair, sign, verify, write_key_files, PrivateKey, PublicKey, PUBLIC_EXPONENT,
};
pub use wallet::Wallet;
