use crate::core::{Block, Coin, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize, MAX_DECODE_SIZE};
use crate::wallet::PublicKey;
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Write};
use std::time::Instant;

pub const PROTOCOL_VERSION: u32 = 1;
/// Largest accepted frame payload.
pub const MAX_FRAME_SIZE: usize = MAX_DECODE_SIZE;
const LENGTH_PREFIX: usize = 4;
const READ_CHUNK: usize = 16 * 1024;

/// Handshake sent by both sides before anything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Hello {
    pub version: u32,
    pub node_id: String,
    pub public_key: PublicKey,
    /// Address the sender accepts connections on.
    pub listen_addr: String,
    pub peers: Vec<String>,
    pub pow_difficulty: u32,
    pub chain_height: u64,
}

impl Hello {
    pub fn check(&self) -> Result<()> {
        if self.version != PROTOCOL_VERSION {
            return Err(BlockchainError::Network(format!(
                "Unsupported protocol version {}",
                self.version
            )));
        }
        if self.node_id != self.public_key.node_id() {
            return Err(BlockchainError::Network(
                "Handshake node id does not match its public key".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum Message {
    Hello(Hello),
    Coin(Coin),
    Transaction(Transaction),
    Block(Block),
    PeerListGossip(Vec<String>),
    Ping(i64),
    /// Ask for confirmed blocks starting at a height.
    GetBlocks { from_height: u64 },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Hello(_) => "hello",
            Message::Coin(_) => "coin",
            Message::Transaction(_) => "transaction",
            Message::Block(_) => "block",
            Message::PeerListGossip(_) => "peer-list",
            Message::Ping(_) => "ping",
            Message::GetBlocks { .. } => "get-blocks",
        }
    }

    /// Identity of a relayable item, used by the per-connection seen caches.
    pub fn item_key(&self) -> Option<String> {
        match self {
            Message::Coin(coin) => Some(format!("coin:{}", coin.get_id())),
            Message::Transaction(tx) => Some(format!("tx:{}", tx.get_id())),
            Message::Block(block) => Some(format!("block:{}", block.get_hash())),
            _ => None,
        }
    }
}

/// Encode a message as one frame: 4-byte big-endian length, then bincode.
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let payload = serialize(message)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(BlockchainError::Serialization(format!(
            "Frame of {} bytes exceeds {MAX_FRAME_SIZE}",
            payload.len()
        )));
    }
    let mut frame = Vec::with_capacity(LENGTH_PREFIX + payload.len());
    frame.extend((payload.len() as u32).to_be_bytes());
    frame.extend(payload);
    Ok(frame)
}

/// Decode one frame payload (without the length prefix).
pub fn decode(payload: &[u8]) -> Result<Message> {
    deserialize::<Message>(payload)
}

pub fn write_message<W: Write>(writer: &mut W, message: &Message) -> Result<()> {
    let frame = encode(message)?;
    writer
        .write_all(&frame)
        .map_err(|e| BlockchainError::Network(format!("Failed to send {}: {e}", message.kind())))?;
    writer
        .flush()
        .map_err(|e| BlockchainError::Network(format!("Failed to flush {}: {e}", message.kind())))
}

#[derive(Debug)]
pub enum ReadOutcome {
    Message(Message),
    /// The read timed out with no complete frame buffered.
    Idle,
    Closed,
}

/// Buffered frame reader that tolerates read timeouts.
///
/// The stream is expected to carry a read timeout so the owning thread can
/// look at its shutdown flag between polls. Partial frames stay buffered
/// across timeouts.
pub struct FrameReader<R> {
    inner: R,
    buffer: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> FrameReader<R> {
        FrameReader {
            inner,
            buffer: Vec::new(),
        }
    }

    fn take_frame(&mut self) -> Result<Option<Message>> {
        if self.buffer.len() < LENGTH_PREFIX {
            return Ok(None);
        }
        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&self.buffer[..LENGTH_PREFIX]);
        let len = u32::from_be_bytes(prefix) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(BlockchainError::Serialization(format!(
                "Incoming frame of {len} bytes exceeds {MAX_FRAME_SIZE}"
            )));
        }
        if self.buffer.len() < LENGTH_PREFIX + len {
            return Ok(None);
        }
        let message = decode(&self.buffer[LENGTH_PREFIX..LENGTH_PREFIX + len])?;
        self.buffer.drain(..LENGTH_PREFIX + len);
        Ok(Some(message))
    }

    /// Return the next buffered message or read more. Malformed frames are errors.
    pub fn poll(&mut self) -> Result<ReadOutcome> {
        if let Some(message) = self.take_frame()? {
            return Ok(ReadOutcome::Message(message));
        }
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(0) => return Ok(ReadOutcome::Closed),
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    if let Some(message) = self.take_frame()? {
                        return Ok(ReadOutcome::Message(message));
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(ReadOutcome::Idle)
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(BlockchainError::Network(format!("Read failed: {e}")));
                }
            }
        }
    }

    /// Wait for the next message until `deadline`.
    pub fn next_message(&mut self, deadline: Instant) -> Result<Message> {
        loop {
            match self.poll()? {
                ReadOutcome::Message(message) => return Ok(message),
                ReadOutcome::Closed => {
                    return Err(BlockchainError::Network(
                        "Connection closed by peer".to_string(),
                    ))
                }
                ReadOutcome::Idle => {
                    if Instant::now() >= deadline {
                        return Err(BlockchainError::Network(
                            "Timed out waiting for peer".to_string(),
                        ));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testnet::{signed_transfer, test_keys};
    use std::io::Cursor;
    use std::time::Duration;

    fn hello() -> Hello {
        let (public, _) = test_keys();
        Hello {
            version: PROTOCOL_VERSION,
            node_id: public.node_id(),
            public_key: public,
            listen_addr: "127.0.0.1:6404".to_string(),
            peers: vec!["127.0.0.1:6405".to_string()],
            pow_difficulty: 251,
            chain_height: 0,
        }
    }

    #[test]
    fn test_frame_has_length_prefix() {
        let frame = encode(&Message::Ping(7)).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);
        assert_eq!(decode(&frame[4..]).unwrap(), Message::Ping(7));
    }

    #[test]
    fn test_reader_splits_back_to_back_frames() {
        let tx = signed_transfer(252);
        let mut bytes = encode(&Message::Hello(hello())).unwrap();
        bytes.extend(encode(&Message::Transaction(tx.clone())).unwrap());
        let mut reader = FrameReader::new(Cursor::new(bytes));

        assert!(matches!(reader.poll().unwrap(), ReadOutcome::Message(Message::Hello(_))));
        match reader.poll().unwrap() {
            ReadOutcome::Message(Message::Transaction(got)) => assert_eq!(got, tx),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(reader.poll().unwrap(), ReadOutcome::Closed));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut bytes = ((MAX_FRAME_SIZE + 1) as u32).to_be_bytes().to_vec();
        bytes.extend([0u8; 16]);
        let mut reader = FrameReader::new(Cursor::new(bytes));
        assert!(reader.poll().is_err());
    }

    #[test]
    fn test_hostile_inner_length_closes_only_the_frame() {
        // Message::PeerListGossip claiming 2^40 addresses
        let mut payload = vec![4u8, 0xFD];
        payload.extend((1u64 << 40).to_le_bytes());
        let mut bytes = (payload.len() as u32).to_be_bytes().to_vec();
        bytes.extend(payload);
        let mut reader = FrameReader::new(Cursor::new(bytes));
        assert!(reader.poll().is_err());
    }

    #[test]
    fn test_garbage_payload_rejected() {
        let mut bytes = 4u32.to_be_bytes().to_vec();
        bytes.extend([0xFF, 0xFF, 0xFF, 0xFF]);
        let mut reader = FrameReader::new(Cursor::new(bytes));
        assert!(reader.poll().is_err());
    }

    #[test]
    fn test_truncated_frame_reports_closed() {
        let frame = encode(&Message::Ping(1)).unwrap();
        let mut reader = FrameReader::new(Cursor::new(frame[..frame.len() - 1].to_vec()));
        let deadline = Instant::now() + Duration::from_secs(1);
        assert!(reader.next_message(deadline).is_err());
    }

    #[test]
    fn test_hello_check() {
        let mut h = hello();
        assert!(h.check().is_ok());
        h.node_id = "forged".to_string();
        assert!(h.check().is_err());
        let mut h = hello();
        h.version = PROTOCOL_VERSION + 1;
        assert!(h.check().is_err());
    }

    #[test]
    fn test_item_keys() {
        let tx = signed_transfer(252);
        let key = Message::Transaction(tx.clone()).item_key().unwrap();
        assert!(key.ends_with(tx.get_id()));
        assert!(Message::Ping(0).item_key().is_none());
    }
}
