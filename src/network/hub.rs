use crate::network::message::Message;
use crate::wallet::PublicKey;
use crossbeam::channel::Sender;
use log::{debug, warn};
use lru::LruCache;
use std::collections::{HashMap, HashSet};
use std::net::{Shutdown, TcpStream};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

/// One live connection as seen by the rest of the node.
pub struct PeerLink {
    conn_id: u64,
    peer_addr: String,
    node_id: String,
    public_key: PublicKey,
    outbound: Sender<Message>,
    stream: TcpStream,
    seen: Mutex<LruCache<String, ()>>,
}

impl PeerLink {
    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// The peer's listening address, as announced in its handshake.
    pub fn peer_addr(&self) -> &str {
        self.peer_addr.as_str()
    }

    pub fn node_id(&self) -> &str {
        self.node_id.as_str()
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Remember that this peer has the item. Returns false if it already did.
    pub fn mark_seen(&self, key: &str) -> bool {
        match self.seen.lock() {
            Ok(mut seen) => seen.put(key.to_string(), ()).is_none(),
            Err(_) => {
                log::error!("Failed to acquire seen cache for {}", self.peer_addr);
                false
            }
        }
    }

    /// Queue a message for the writer thread.
    pub fn send(&self, message: Message) -> bool {
        self.outbound.send(message).is_ok()
    }

    fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Registry of live connections and relay point for broadcasts.
///
/// Each link carries a bounded cache of items the peer is known to have;
/// broadcasts skip those. A node-wide cache of recently handled coins keeps
/// re-deliveries from being processed twice.
pub struct Hub {
    links: RwLock<HashMap<u64, Arc<PeerLink>>>,
    next_id: AtomicU64,
    cache_size: NonZeroUsize,
    recent: Mutex<LruCache<String, ()>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Hub {
    pub fn new(cache_size: usize) -> Hub {
        let cache_size = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Hub {
            links: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            cache_size,
            recent: Mutex::new(LruCache::new(cache_size)),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn register(
        &self,
        peer_addr: &str,
        node_id: &str,
        public_key: PublicKey,
        outbound: Sender<Message>,
        stream: TcpStream,
    ) -> Arc<PeerLink> {
        let link = Arc::new(PeerLink {
            conn_id: self.next_id.fetch_add(1, Ordering::SeqCst),
            peer_addr: peer_addr.to_string(),
            node_id: node_id.to_string(),
            public_key,
            outbound,
            stream,
            seen: Mutex::new(LruCache::new(self.cache_size)),
        });
        match self.links.write() {
            Ok(mut links) => {
                links.insert(link.conn_id, Arc::clone(&link));
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on connection registry");
            }
        }
        link
    }

    pub fn unregister(&self, conn_id: u64) {
        match self.links.write() {
            Ok(mut links) => {
                links.remove(&conn_id);
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on connection registry");
            }
        }
    }

    fn snapshot(&self) -> Vec<Arc<PeerLink>> {
        match self.links.read() {
            Ok(links) => links.values().cloned().collect(),
            Err(_) => {
                log::error!("Failed to acquire read lock on connection registry");
                Vec::new()
            }
        }
    }

    pub fn links(&self) -> Vec<Arc<PeerLink>> {
        self.snapshot()
    }

    pub fn len(&self) -> usize {
        match self.links.read() {
            Ok(links) => links.len(),
            Err(_) => {
                log::error!("Failed to acquire read lock on connection registry");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn connected_addrs(&self) -> HashSet<String> {
        self.snapshot()
            .iter()
            .map(|l| l.peer_addr.clone())
            .collect()
    }

    pub fn is_connected_to_node(&self, node_id: &str) -> bool {
        self.snapshot().iter().any(|l| l.node_id == node_id)
    }

    /// Whether a key was recorded by [`Hub::first_sighting`] and not yet aged out.
    pub fn has_seen(&self, key: &str) -> bool {
        match self.recent.lock() {
            Ok(recent) => recent.contains(key),
            Err(_) => {
                log::error!("Failed to acquire recent-item cache");
                false
            }
        }
    }

    /// True the first time a key is offered. Used to drop re-delivered items.
    pub fn first_sighting(&self, key: &str) -> bool {
        match self.recent.lock() {
            Ok(mut recent) => recent.put(key.to_string(), ()).is_none(),
            Err(_) => {
                log::error!("Failed to acquire recent-item cache");
                false
            }
        }
    }

    /// Send to every connection except `except`. Relayable items are sent only
    /// to peers not already known to have them. Returns the number of peers
    /// the message was queued for.
    pub fn broadcast(&self, message: &Message, except: Option<u64>) -> usize {
        let key = message.item_key();
        let mut sent = 0;
        for link in self.snapshot() {
            if Some(link.conn_id) == except {
                continue;
            }
            if let Some(key) = &key {
                if !link.mark_seen(key) {
                    continue;
                }
            }
            if link.send(message.clone()) {
                sent += 1;
            } else {
                debug!("Writer for {} is gone", link.peer_addr);
            }
        }
        if sent > 0 {
            debug!("Broadcast {} to {sent} peer(s)", message.kind());
        }
        sent
    }

    pub fn track(&self, handle: JoinHandle<()>) {
        match self.handles.lock() {
            Ok(mut handles) => {
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
            }
            Err(_) => {
                log::error!("Failed to track connection thread");
            }
        }
    }

    /// Shut every socket so reader and writer threads unblock.
    pub fn close_all(&self) {
        for link in self.snapshot() {
            link.close();
        }
    }

    pub fn join_all(&self) {
        let handles = match self.handles.lock() {
            Ok(mut handles) => std::mem::take(&mut *handles),
            Err(_) => {
                log::error!("Failed to collect connection threads");
                return;
            }
        };
        for handle in handles {
            if handle.join().is_err() {
                warn!("A connection thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testnet::{signed_transfer, test_keys};
    use crossbeam::channel::{unbounded, Receiver};
    use std::net::TcpListener;

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn link(hub: &Hub, addr: &str) -> (Arc<PeerLink>, Receiver<Message>, TcpStream) {
        let (public, _) = test_keys();
        let (tx, rx) = unbounded();
        let (ours, theirs) = socket_pair();
        let link = hub.register(addr, &public.node_id(), public, tx, ours);
        (link, rx, theirs)
    }

    #[test]
    fn test_broadcast_skips_origin_and_seen_peers() {
        let hub = Hub::new(16);
        let (a, rx_a, _sa) = link(&hub, "127.0.0.1:7001");
        let (_b, rx_b, _sb) = link(&hub, "127.0.0.1:7002");
        let msg = Message::Transaction(signed_transfer(252));

        // a sent it to us
        a.mark_seen(&msg.item_key().unwrap());
        assert_eq!(hub.broadcast(&msg, Some(a.conn_id())), 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());

        // a second broadcast of the same item reaches nobody
        assert_eq!(hub.broadcast(&msg, None), 0);
    }

    #[test]
    fn test_non_item_messages_always_sent() {
        let hub = Hub::new(16);
        let (_a, rx_a, _sa) = link(&hub, "127.0.0.1:7001");
        assert_eq!(hub.broadcast(&Message::Ping(1), None), 1);
        assert_eq!(hub.broadcast(&Message::Ping(2), None), 1);
        assert_eq!(rx_a.len(), 2);
    }

    #[test]
    fn test_unregister() {
        let hub = Hub::new(16);
        let (a, _rx, _s) = link(&hub, "127.0.0.1:7001");
        assert!(hub.connected_addrs().contains("127.0.0.1:7001"));
        hub.unregister(a.conn_id());
        assert!(hub.is_empty());
    }

    #[test]
    fn test_first_sighting_is_bounded() {
        let hub = Hub::new(2);
        assert!(hub.first_sighting("coin:a"));
        assert!(!hub.first_sighting("coin:a"));
        hub.first_sighting("coin:b");
        hub.first_sighting("coin:c");
        // evicted from the bounded cache
        assert!(hub.first_sighting("coin:a"));
    }

    #[test]
    fn test_has_seen_does_not_record() {
        let hub = Hub::new(4);
        assert!(!hub.has_seen("coin:a"));
        assert!(!hub.has_seen("coin:a"));
        assert!(hub.first_sighting("coin:a"));
        assert!(hub.has_seen("coin:a"));
    }
}
