// bincode 2 helpers used by the wire codec
use crate::error::{BlockchainError, Result};
use serde::{Deserialize, Serialize};

/// Most bytes a single decode may claim. Length prefixes inside a payload are
/// checked against this before anything is allocated.
pub const MAX_DECODE_SIZE: usize = 8 * 1024 * 1024;

pub fn serialize<T: Serialize + bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    let config = bincode::config::standard();
    bincode::encode_to_vec(data, config)
        .map_err(|e| BlockchainError::Serialization(format!("Serialization failed: {e}")))
}

/// Decode a value that must occupy the whole slice. Trailing bytes mean the
/// payload was framed wrongly and are rejected.
pub fn deserialize<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    let config = bincode::config::standard().with_limit::<MAX_DECODE_SIZE>();
    let (data, consumed) = bincode::decode_from_slice(bytes, config)
        .map_err(|e| BlockchainError::Serialization(format!("Deserialization failed: {e}")))?;
    if consumed != bytes.len() {
        return Err(BlockchainError::Serialization(format!(
            "Deserialization left {} trailing bytes",
            bytes.len() - consumed
        )));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
    struct Probe {
        addr: String,
        failures: u32,
    }

    #[test]
    fn test_serialize_deserialize() {
        let original = Probe {
            addr: "127.0.0.1:6404".to_string(),
            failures: 2,
        };
        let bytes = serialize(&original).unwrap();
        let decoded: Probe = deserialize(&bytes).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let original = Probe {
            addr: "peer".to_string(),
            failures: 0,
        };
        let mut bytes = serialize(&original).unwrap();
        bytes.push(0);
        let result: Result<Probe> = deserialize(&bytes);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_invalid_data() {
        let invalid_bytes = vec![0xFF, 0xFF, 0xFF, 0xFF];
        let result: Result<Probe> = deserialize(&invalid_bytes);
        assert!(result.is_err());
    }

    #[test]
    fn test_hostile_length_prefix_rejected() {
        // Vec<String> claiming 2^40 elements in a 10-byte payload
        let mut bytes = vec![0xFD];
        bytes.extend((1u64 << 40).to_le_bytes());
        bytes.push(0);
        let result: Result<Vec<String>> = deserialize(&bytes);
        assert!(result.is_err());
    }
}
