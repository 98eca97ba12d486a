//! Node orchestration
//!
//! A node is a set of cooperating workers sharing one [`NodeContext`]: the
//! server, the scanner, the miner supervisor, the transactor and the block
//! assembler. [`CeroCoinNode`] performs the fallible setup (identity and
//! listener); [`CeroCoinNode::start`] launches the workers and hands back a
//! [`NodeHandle`] that stops and joins them.

pub mod block_assembler;
pub mod context;
pub mod miner;
pub mod transactor;

pub use block_assembler::BlockAssembler;
pub use context::NodeContext;
pub use miner::{BlockJob, BlockSolution, MinerEvent, MinerStats, MinerSupervisor, SupervisorState};
pub use transactor::Transactor;

use crate::config::NodeConfig;
use crate::error::{BlockchainError, Result};
use crate::network::{scanner, Server};
use crate::wallet::Wallet;
use crossbeam::channel::{unbounded, Receiver};
use log::{debug, info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A node that has its identity and bound listener but no running workers.
pub struct CeroCoinNode {
    ctx: Arc<NodeContext>,
    server: Server,
    miner_events: Receiver<MinerEvent>,
}

impl CeroCoinNode {
    /// Validate the config, generate a fresh identity and bind the listener.
    pub fn new(config: NodeConfig) -> Result<CeroCoinNode> {
        config.validate()?;
        let wallet = Wallet::generate(config.modulus_size)?;
        CeroCoinNode::with_wallet(config, wallet)
    }

    pub fn with_wallet(config: NodeConfig, wallet: Wallet) -> Result<CeroCoinNode> {
        config.validate()?;
        let server = Server::bind(&config.listen_addr)?;
        let advertised = match &config.advertise_addr {
            Some(addr) => addr.clone(),
            None => advertised_addr(server.local_addr(), outbound_ip()),
        };
        let (events_tx, events_rx) = unbounded();
        info!(
            "Node {} listening on {} (advertised as {advertised})",
            &wallet.node_id()[..12],
            server.local_addr()
        );
        let ctx = NodeContext::new(config, wallet, advertised, events_tx);
        Ok(CeroCoinNode {
            ctx: Arc::new(ctx),
            server,
            miner_events: events_rx,
        })
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Launch every worker on its own thread.
    pub fn start(self) -> Result<NodeHandle> {
        let CeroCoinNode {
            ctx,
            server,
            miner_events,
        } = self;
        let mut handle = NodeHandle {
            ctx: Arc::clone(&ctx),
            workers: Vec::new(),
        };

        let ctx_server = Arc::clone(&ctx);
        handle.spawn("server", move || server.run(ctx_server))?;

        let supervisor = MinerSupervisor::new(Arc::clone(&ctx), miner_events);
        handle.spawn("miner", move || supervisor.run())?;

        let assembler = BlockAssembler::new(Arc::clone(&ctx));
        handle.spawn("assembler", move || assembler.run())?;

        if ctx.config.auto_trade {
            let transactor = Transactor::new(Arc::clone(&ctx));
            handle.spawn("transactor", move || transactor.run())?;
        }

        let ctx_scanner = Arc::clone(&ctx);
        handle.spawn("scanner", move || scanner::run(ctx_scanner))?;

        Ok(handle)
    }
}

/// Address used only to pick the outbound interface; nothing is sent to it.
const ROUTE_PROBE_ADDR: &str = "8.8.8.8:80";

/// Listener address as peers should dial it. A wildcard bind is announced on
/// the interface that routes outward, or on loopback when there is none.
fn advertised_addr(bound: SocketAddr, outbound_ip: Option<IpAddr>) -> String {
    if !bound.ip().is_unspecified() {
        return bound.to_string();
    }
    let ip = outbound_ip.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
    SocketAddr::new(ip, bound.port()).to_string()
}

/// Local address of the interface the OS would use to reach the internet.
/// Connecting a UDP socket sends no packets, it only selects a route.
fn outbound_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    if let Err(e) = socket.connect(ROUTE_PROBE_ADDR) {
        debug!("No outbound route, advertising loopback: {e}");
        return None;
    }
    let ip = socket.local_addr().ok()?.ip();
    if ip.is_unspecified() {
        None
    } else {
        Some(ip)
    }
}

/// Running node. Dropping the handle does not stop the workers; call
/// [`NodeHandle::shutdown`] or [`NodeHandle::wait`].
pub struct NodeHandle {
    ctx: Arc<NodeContext>,
    workers: Vec<(String, JoinHandle<()>)>,
}

impl NodeHandle {
    fn spawn<F>(&mut self, name: &str, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let spawned = thread::Builder::new().name(name.to_string()).spawn(work);
        match spawned {
            Ok(worker) => {
                self.workers.push((name.to_string(), worker));
                Ok(())
            }
            Err(e) => {
                // stop whatever already started
                self.stop_workers();
                Err(BlockchainError::Io(format!("Failed to spawn {name} worker: {e}")))
            }
        }
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    pub fn transactor(&self) -> Transactor {
        Transactor::new(Arc::clone(&self.ctx))
    }

    /// Block until the shutdown token is set, then stop the node.
    pub fn wait(self) {
        self.ctx.shutdown.wait();
        self.shutdown();
    }

    /// Cancel every worker, close all connections and join every thread.
    pub fn shutdown(mut self) {
        self.stop_workers();
    }

    fn stop_workers(&mut self) {
        info!("Shutting down node {}", &self.ctx.wallet.node_id()[..12]);
        self.ctx.shutdown.cancel();
        self.ctx.notify_miner(MinerEvent::Shutdown);
        for (name, worker) in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("The {name} worker panicked");
            }
        }
        self.ctx.hub.close_all();
        self.ctx.hub.join_all();
        info!("Node stopped");
    }
}

/// Run a node until SIGINT or SIGTERM.
///
/// Identity generation and the listener bind happen first; if either fails
/// nothing is started and the error is returned.
pub fn initialize_node_and_run(config: NodeConfig) -> Result<()> {
    let node = CeroCoinNode::new(config)?;
    let flag = node.context().shutdown.flag();
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&flag)).map_err(|e| {
            BlockchainError::Io(format!("Failed to register signal handler: {e}"))
        })?;
    }
    let handle = node.start()?;
    info!("Node running, press Ctrl-C to stop");
    handle.wait();
    Ok(())
}
