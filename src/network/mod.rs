//! Peer-to-peer networking
//!
//! Length-prefixed bincode frames over TCP. The server accepts inbound peers,
//! the scanner dials known peers, and every connection runs the same handler
//! once the handshake is done. The hub relays items between connections.

pub mod connection;
pub mod hub;
pub mod message;
pub mod peer_registry;
pub mod scanner;
pub mod server;

pub use hub::{Hub, PeerLink};
pub use message::{decode, encode, FrameReader, Hello, Message, MAX_FRAME_SIZE, PROTOCOL_VERSION};
pub use peer_registry::{Liveness, PeerEntry, PeerRegistry};
pub use scanner::{scan_once, ScanReport};
pub use server::Server;
