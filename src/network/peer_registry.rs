use crate::error::{BlockchainError, Result};
use crate::network::message::Hello;
use crate::utils::current_timestamp;
use crate::wallet::PublicKey;
use log::{debug, info, warn};
use lru::LruCache;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::RwLock;

/// Peers with at least this many offenses are left out of gossip.
pub const GOSSIP_OFFENSE_LIMIT: u32 = 3;
/// Peer addresses carried by one gossip message. Extra addresses in a
/// received message are ignored.
pub const MAX_GOSSIP_PEERS: usize = 16;
/// Known addresses learned from seeds and gossip.
pub const MAX_KNOWN_PEERS: usize = 256;
/// Evicted peers remembered so gossip cannot bring them straight back.
pub const MAX_EVICTED_PEERS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Unknown,
    Reachable,
    Unreachable,
}

#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub addr: String,
    pub last_seen: Option<i64>,
    pub liveness: Liveness,
    pub failures: u32,
    pub offenses: u32,
    pub node_id: Option<String>,
    pub public_key: Option<PublicKey>,
}

impl PeerEntry {
    fn new(addr: String) -> PeerEntry {
        PeerEntry {
            addr,
            last_seen: None,
            liveness: Liveness::Unknown,
            failures: 0,
            offenses: 0,
            node_id: None,
            public_key: None,
        }
    }
}

struct RegistryState {
    peers: HashMap<String, PeerEntry>,
    /// Peers dropped after exhausting the retry budget. Gossip does not bring
    /// them back; a successful handshake does. The oldest are forgotten first.
    evicted: LruCache<String, PeerEntry>,
}

impl RegistryState {
    fn new() -> RegistryState {
        let evicted_cap = NonZeroUsize::new(MAX_EVICTED_PEERS).unwrap_or(NonZeroUsize::MIN);
        RegistryState {
            peers: HashMap::new(),
            evicted: LruCache::new(evicted_cap),
        }
    }
}

/// Known peer addresses and what the node has learned about each.
///
/// Seeded from the static network list and grown by handshakes and gossip.
/// The node's own address is never stored.
pub struct PeerRegistry {
    inner: RwLock<RegistryState>,
    local_addr: String,
    retry_budget: u32,
}

impl PeerRegistry {
    pub fn new(local_addr: &str, seeds: &[String], retry_budget: u32) -> PeerRegistry {
        let registry = PeerRegistry {
            inner: RwLock::new(RegistryState::new()),
            local_addr: local_addr.to_string(),
            retry_budget,
        };
        registry.merge_up_to(seeds, MAX_KNOWN_PEERS);
        registry
    }

    pub fn local_addr(&self) -> &str {
        self.local_addr.as_str()
    }

    fn lock_err<E: std::fmt::Display>(e: E) -> BlockchainError {
        BlockchainError::Network(format!("Failed to acquire peer registry lock: {e}"))
    }

    /// Add unknown addresses from one gossip list or handshake. Only the
    /// first [`MAX_GOSSIP_PEERS`] are looked at. Returns how many were new.
    pub fn merge(&self, addrs: &[String]) -> usize {
        if addrs.len() > MAX_GOSSIP_PEERS {
            debug!(
                "Ignoring {} address(es) past the gossip limit",
                addrs.len() - MAX_GOSSIP_PEERS
            );
        }
        self.merge_up_to(addrs, MAX_GOSSIP_PEERS)
    }

    fn merge_up_to(&self, addrs: &[String], limit: usize) -> usize {
        match self.inner.write() {
            Ok(mut state) => {
                let mut added = 0;
                for addr in addrs.iter().take(limit) {
                    if state.peers.len() >= MAX_KNOWN_PEERS {
                        debug!("Peer registry full, dropping gossiped addresses");
                        break;
                    }
                    let addr = addr.trim();
                    if addr.is_empty()
                        || addr == self.local_addr
                        || state.peers.contains_key(addr)
                        || state.evicted.contains(addr)
                    {
                        continue;
                    }
                    state
                        .peers
                        .insert(addr.to_string(), PeerEntry::new(addr.to_string()));
                    added += 1;
                }
                if added > 0 {
                    info!("Learned {added} new peer address(es)");
                }
                added
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on peer registry");
                0
            }
        }
    }

    /// Record a completed handshake with the peer listening at `addr`.
    pub fn record_handshake(&self, addr: &str, hello: &Hello) -> Result<()> {
        if addr == self.local_addr {
            return Ok(());
        }
        let now = current_timestamp()?;
        let mut state = self.inner.write().map_err(Self::lock_err)?;
        let mut entry = match state.evicted.pop(addr) {
            Some(entry) => entry,
            None => state
                .peers
                .remove(addr)
                .unwrap_or_else(|| PeerEntry::new(addr.to_string())),
        };
        entry.last_seen = Some(now);
        entry.liveness = Liveness::Reachable;
        entry.failures = 0;
        entry.node_id = Some(hello.node_id.clone());
        entry.public_key = Some(hello.public_key.clone());
        state.peers.insert(addr.to_string(), entry);
        Ok(())
    }

    pub fn record_seen(&self, addr: &str) -> Result<()> {
        let now = current_timestamp()?;
        let mut state = self.inner.write().map_err(Self::lock_err)?;
        if let Some(entry) = state.peers.get_mut(addr) {
            entry.last_seen = Some(now);
        }
        Ok(())
    }

    /// Count a failed probe. Once the retry budget is spent the peer is marked
    /// unreachable and evicted. Returns the resulting liveness.
    pub fn record_failure(&self, addr: &str) -> Result<Liveness> {
        let mut state = self.inner.write().map_err(Self::lock_err)?;
        let Some(entry) = state.peers.get_mut(addr) else {
            return Ok(state
                .evicted
                .peek(addr)
                .map(|e| e.liveness)
                .unwrap_or(Liveness::Unknown));
        };
        entry.failures += 1;
        if entry.failures < self.retry_budget {
            return Ok(entry.liveness);
        }
        entry.liveness = Liveness::Unreachable;
        if let Some(entry) = state.peers.remove(addr) {
            warn!(
                "Peer {addr} unreachable after {} attempts, evicting",
                entry.failures
            );
            state.evicted.put(addr.to_string(), entry);
        }
        Ok(Liveness::Unreachable)
    }

    pub fn record_offense(&self, addr: &str) -> Result<u32> {
        let mut state = self.inner.write().map_err(Self::lock_err)?;
        match state.peers.get_mut(addr) {
            Some(entry) => {
                entry.offenses += 1;
                Ok(entry.offenses)
            }
            None => Ok(0),
        }
    }

    /// Peers to probe this round: not connected, not evicted, fewest offenses first.
    pub fn probe_candidates(&self, connected: &HashSet<String>) -> Vec<String> {
        match self.inner.read() {
            Ok(state) => {
                let mut candidates: Vec<&PeerEntry> = state
                    .peers
                    .values()
                    .filter(|e| !connected.contains(&e.addr))
                    .collect();
                candidates.sort_by(|a, b| a.offenses.cmp(&b.offenses).then(a.addr.cmp(&b.addr)));
                candidates.into_iter().map(|e| e.addr.clone()).collect()
            }
            Err(_) => {
                log::error!("Failed to acquire read lock on peer registry");
                Vec::new()
            }
        }
    }

    /// Addresses worth sharing: not unreachable and below the offense limit.
    pub fn gossip_list(&self, limit: usize) -> Vec<String> {
        match self.inner.read() {
            Ok(state) => {
                let mut entries: Vec<&PeerEntry> = state
                    .peers
                    .values()
                    .filter(|e| {
                        e.liveness != Liveness::Unreachable && e.offenses < GOSSIP_OFFENSE_LIMIT
                    })
                    .collect();
                entries.sort_by(|a, b| a.offenses.cmp(&b.offenses).then(a.addr.cmp(&b.addr)));
                entries
                    .into_iter()
                    .take(limit)
                    .map(|e| e.addr.clone())
                    .collect()
            }
            Err(_) => {
                log::error!("Failed to acquire read lock on peer registry");
                Vec::new()
            }
        }
    }

    pub fn get(&self, addr: &str) -> Option<PeerEntry> {
        match self.inner.read() {
            Ok(state) => state
                .peers
                .get(addr)
                .or_else(|| state.evicted.peek(addr))
                .cloned(),
            Err(_) => {
                log::error!("Failed to acquire read lock on peer registry");
                None
            }
        }
    }

    pub fn liveness(&self, addr: &str) -> Option<Liveness> {
        self.get(addr).map(|e| e.liveness)
    }

    pub fn is_evicted(&self, addr: &str) -> bool {
        match self.inner.read() {
            Ok(state) => state.evicted.contains(addr),
            Err(_) => {
                log::error!("Failed to acquire read lock on peer registry");
                false
            }
        }
    }

    /// Number of live (not evicted) entries.
    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(state) => state.peers.len(),
            Err(_) => {
                log::error!("Failed to acquire read lock on peer registry");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::message::PROTOCOL_VERSION;
    use crate::testnet::test_keys;

    fn seeds() -> Vec<String> {
        vec![
            "127.0.0.1:7001".to_string(),
            "127.0.0.1:7002".to_string(),
            "127.0.0.1:6404".to_string(),
        ]
    }

    fn hello_from(addr: &str) -> Hello {
        let (public, _) = test_keys();
        Hello {
            version: PROTOCOL_VERSION,
            node_id: public.node_id(),
            public_key: public,
            listen_addr: addr.to_string(),
            peers: vec![],
            pow_difficulty: 251,
            chain_height: 0,
        }
    }

    #[test]
    fn test_local_address_is_skipped() {
        let registry = PeerRegistry::new("127.0.0.1:6404", &seeds(), 3);
        assert_eq!(registry.len(), 2);
        assert!(registry.get("127.0.0.1:6404").is_none());
    }

    #[test]
    fn test_merge_deduplicates() {
        let registry = PeerRegistry::new("127.0.0.1:6404", &seeds(), 3);
        let added = registry.merge(&["127.0.0.1:7001".to_string(), "127.0.0.1:7003".to_string()]);
        assert_eq!(added, 1);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_failures_evict_after_budget() {
        let registry = PeerRegistry::new("127.0.0.1:6404", &seeds(), 3);
        let addr = "127.0.0.1:7001";
        assert_eq!(registry.record_failure(addr).unwrap(), Liveness::Unknown);
        assert_eq!(registry.record_failure(addr).unwrap(), Liveness::Unknown);
        assert_eq!(registry.record_failure(addr).unwrap(), Liveness::Unreachable);
        assert!(registry.is_evicted(addr));
        assert_eq!(registry.liveness(addr), Some(Liveness::Unreachable));
        assert_eq!(registry.len(), 1);

        // gossip does not resurrect it
        assert_eq!(registry.merge(&[addr.to_string()]), 0);
        assert!(!registry.probe_candidates(&HashSet::new()).contains(&addr.to_string()));
    }

    #[test]
    fn test_handshake_restores_evicted_peer() {
        let registry = PeerRegistry::new("127.0.0.1:6404", &seeds(), 1);
        let addr = "127.0.0.1:7002";
        registry.record_failure(addr).unwrap();
        assert!(registry.is_evicted(addr));

        registry.record_handshake(addr, &hello_from(addr)).unwrap();
        let entry = registry.get(addr).unwrap();
        assert_eq!(entry.liveness, Liveness::Reachable);
        assert_eq!(entry.failures, 0);
        assert!(entry.public_key.is_some());
        assert!(!registry.is_evicted(addr));
    }

    #[test]
    fn test_offenders_probed_last_and_not_gossiped() {
        let registry = PeerRegistry::new("127.0.0.1:6404", &seeds(), 3);
        for _ in 0..GOSSIP_OFFENSE_LIMIT {
            registry.record_offense("127.0.0.1:7001").unwrap();
        }
        let candidates = registry.probe_candidates(&HashSet::new());
        assert_eq!(candidates, vec!["127.0.0.1:7002", "127.0.0.1:7001"]);
        assert_eq!(registry.gossip_list(10), vec!["127.0.0.1:7002"]);
    }

    #[test]
    fn test_connected_peers_not_probed() {
        let registry = PeerRegistry::new("127.0.0.1:6404", &seeds(), 3);
        let connected: HashSet<String> = ["127.0.0.1:7001".to_string()].into_iter().collect();
        assert_eq!(registry.probe_candidates(&connected), vec!["127.0.0.1:7002"]);
    }

    #[test]
    fn test_oversized_gossip_is_truncated() {
        let registry = PeerRegistry::new("127.0.0.1:6404", &[], 3);
        let flood: Vec<String> = (0..10_000)
            .map(|i| format!("10.0.{}.{}:6404", i / 256, i % 256))
            .collect();
        assert_eq!(registry.merge(&flood), MAX_GOSSIP_PEERS);
        assert_eq!(registry.len(), MAX_GOSSIP_PEERS);
    }

    #[test]
    fn test_registry_size_is_capped() {
        let registry = PeerRegistry::new("127.0.0.1:6404", &[], 3);
        for batch in 0..100 {
            let addrs: Vec<String> = (0..MAX_GOSSIP_PEERS)
                .map(|i| format!("10.1.{batch}.{i}:6404"))
                .collect();
            registry.merge(&addrs);
        }
        assert_eq!(registry.len(), MAX_KNOWN_PEERS);
    }

    #[test]
    fn test_evicted_peers_are_forgotten_oldest_first() {
        let registry = PeerRegistry::new("127.0.0.1:6404", &[], 1);
        let addrs: Vec<String> = (0..MAX_EVICTED_PEERS + 1)
            .map(|i| format!("10.2.{}.{}:6404", i / 256, i % 256))
            .collect();
        for chunk in addrs.chunks(MAX_GOSSIP_PEERS) {
            registry.merge(chunk);
            for addr in chunk {
                registry.record_failure(addr).unwrap();
            }
        }
        assert!(registry.is_empty());
        assert!(!registry.is_evicted(&addrs[0]));
        assert!(registry.is_evicted(&addrs[MAX_EVICTED_PEERS]));
        // forgotten tombstones can be learned again
        assert_eq!(registry.merge(&addrs[..1]), 1);
    }
}
