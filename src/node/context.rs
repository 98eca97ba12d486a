use crate::config::NodeConfig;
use crate::core::{Block, Blockchain, DifficultyCell};
use crate::error::Result;
use crate::network::message::PROTOCOL_VERSION;
use crate::network::peer_registry::MAX_GOSSIP_PEERS;
use crate::network::{Hello, Hub, PeerRegistry};
use crate::node::miner::{MinerEvent, MinerStats};
use crate::storage::TransactionPool;
use crate::utils::CancelToken;
use crate::wallet::Wallet;
use crossbeam::channel::Sender;
use log::{debug, info};

/// Shared state handed to every worker.
///
/// Each structure has its own guard. Nothing here is global; the orchestrator
/// owns the context and workers hold `Arc` handles to it.
pub struct NodeContext {
    pub config: NodeConfig,
    pub wallet: Wallet,
    pub chain: Blockchain,
    pub pool: TransactionPool,
    pub peers: PeerRegistry,
    pub hub: Hub,
    pub difficulty: DifficultyCell,
    pub miner_stats: MinerStats,
    pub shutdown: CancelToken,
    advertised_addr: String,
    miner_events: Sender<MinerEvent>,
}

impl NodeContext {
    pub fn new(
        config: NodeConfig,
        wallet: Wallet,
        advertised_addr: String,
        miner_events: Sender<MinerEvent>,
    ) -> NodeContext {
        NodeContext {
            chain: Blockchain::new(config.num_transactions_in_block, config.bounds()),
            pool: TransactionPool::new(),
            peers: PeerRegistry::new(
                &advertised_addr,
                &config.cerocoin_network,
                config.probe_retry_budget,
            ),
            hub: Hub::new(config.seen_cache_size),
            difficulty: DifficultyCell::new(config.starting_pow_difficulty),
            miner_stats: MinerStats::default(),
            shutdown: CancelToken::new(),
            advertised_addr,
            miner_events,
            wallet,
            config,
        }
    }

    pub fn advertised_addr(&self) -> &str {
        self.advertised_addr.as_str()
    }

    pub fn hello(&self) -> Hello {
        Hello {
            version: PROTOCOL_VERSION,
            node_id: self.wallet.node_id().to_string(),
            public_key: self.wallet.public_key().clone(),
            listen_addr: self.advertised_addr.clone(),
            peers: self.peers.gossip_list(MAX_GOSSIP_PEERS),
            pow_difficulty: self.difficulty.get(),
            chain_height: self.chain.height(),
        }
    }

    pub fn notify_miner(&self, event: MinerEvent) {
        if self.miner_events.send(event).is_err() {
            debug!("Miner supervisor is not running");
        }
    }

    /// Append a block and propagate its effects: confirmed and conflicting
    /// transactions leave the pool, the wallet learns about transferred coins,
    /// and the miner supervisor restarts on the new head.
    pub fn apply_block(&self, block: &Block) -> Result<bool> {
        if !self.chain.accept_block(block)? {
            return Ok(false);
        }
        let removed = self.pool.remove_confirmed(block);
        let (received, sent) = self.wallet.apply_block(block);
        if received > 0 || sent > 0 {
            info!(
                "Block {} moved coins: received {received}, sent {sent}, balance {}",
                block.short_hash(),
                self.wallet.balance()
            );
        }
        debug!("Block {} cleared {removed} pooled transaction(s)", block.short_hash());
        self.notify_miner(MinerEvent::BlockAccepted {
            height: block.get_height(),
        });
        Ok(true)
    }
}
