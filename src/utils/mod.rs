//! Utility functions and helpers
//!
//! Hashing, timestamps, bincode helpers and the cancellation token shared by
//! every worker.

pub mod cancel;
pub mod crypto;
pub mod serialization;

pub use cancel::CancelToken;
pub use crypto::{current_timestamp, random_hex, sha256_digest, sha256_hex};
pub use serialization::{deserialize, serialize, MAX_DECODE_SIZE};
