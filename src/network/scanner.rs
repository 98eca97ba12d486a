use crate::network::connection;
use crate::network::message::Message;
use crate::network::peer_registry::{Liveness, MAX_GOSSIP_PEERS};
use crate::node::NodeContext;
use crate::utils::current_timestamp;
use log::{debug, info, warn};
use std::sync::Arc;
use std::thread;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub probed: usize,
    pub connected: usize,
    pub failed: usize,
    pub evicted: usize,
}

/// Probe every known peer without a live connection, then ping and gossip to
/// the connected ones. Errors are logged per peer and never stop the round.
pub fn scan_once(ctx: &Arc<NodeContext>) -> ScanReport {
    let mut report = ScanReport::default();
    let connected = ctx.hub.connected_addrs();

    for addr in ctx.peers.probe_candidates(&connected) {
        if ctx.shutdown.is_cancelled() {
            break;
        }
        report.probed += 1;
        match connection::dial(ctx, &addr) {
            Ok((stream, reader, hello)) => {
                if ctx.hub.is_connected_to_node(&hello.node_id) {
                    debug!("Already connected to the node behind {addr}");
                    let _ = ctx.peers.record_handshake(&addr, &hello);
                    continue;
                }
                report.connected += 1;
                let ctx_conn = Arc::clone(ctx);
                let spawned = thread::Builder::new()
                    .name(format!("conn-{addr}"))
                    .spawn(move || {
                        let result = connection::run_connection(ctx_conn, stream, reader, hello);
                        if let Err(e) = result {
                            warn!("Connection ended with error: {e}");
                        }
                    });
                match spawned {
                    Ok(handle) => ctx.hub.track(handle),
                    Err(e) => warn!("Failed to spawn connection to {addr}: {e}"),
                }
            }
            Err(e) => {
                report.failed += 1;
                debug!("Probe of {addr} failed: {e}");
                match ctx.peers.record_failure(&addr) {
                    Ok(Liveness::Unreachable) => report.evicted += 1,
                    Ok(_) => {}
                    Err(e) => warn!("Failed to record probe failure for {addr}: {e}"),
                }
            }
        }
    }

    if !ctx.hub.is_empty() {
        match current_timestamp() {
            Ok(now) => {
                ctx.hub.broadcast(&Message::Ping(now), None);
            }
            Err(e) => warn!("Skipping ping: {e}"),
        }
        let mut gossip = ctx.peers.gossip_list(MAX_GOSSIP_PEERS - 1);
        gossip.push(ctx.advertised_addr().to_string());
        ctx.hub.broadcast(&Message::PeerListGossip(gossip), None);
    }

    if report.probed > 0 {
        info!(
            "Scan: probed {}, connected {}, failed {}, evicted {} ({} live connection(s))",
            report.probed,
            report.connected,
            report.failed,
            report.evicted,
            ctx.hub.len()
        );
    }
    report
}

/// Scanner worker: one scan per interval until shutdown.
pub fn run(ctx: Arc<NodeContext>) {
    info!("Scanner started with {} known peer(s)", ctx.peers.len());
    loop {
        scan_once(&ctx);
        if ctx.shutdown.wait_timeout(ctx.config.scan_interval()) {
            break;
        }
    }
    info!("Scanner stopped");
}
