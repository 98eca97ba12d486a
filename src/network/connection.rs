use crate::core::{Block, Coin, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::message::{write_message, FrameReader, Hello, Message, ReadOutcome};
use crate::network::PeerLink;
use crate::node::{MinerEvent, NodeContext};
use crossbeam::channel::{unbounded, Receiver};
use log::{debug, info, warn};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Read timeout on every socket, so reader threads notice shutdown.
pub const READ_POLL: Duration = Duration::from_millis(200);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
/// Most blocks returned for one catch-up request.
pub const MAX_BLOCKS_PER_REPLY: usize = 64;

fn configure(stream: &TcpStream) -> Result<()> {
    stream
        .set_read_timeout(Some(READ_POLL))
        .map_err(|e| BlockchainError::Network(format!("Failed to set read timeout: {e}")))?;
    stream
        .set_write_timeout(Some(WRITE_TIMEOUT))
        .map_err(|e| BlockchainError::Network(format!("Failed to set write timeout: {e}")))?;
    stream
        .set_nodelay(true)
        .map_err(|e| BlockchainError::Network(format!("Failed to set nodelay: {e}")))
}

fn expect_hello(
    ctx: &NodeContext,
    reader: &mut FrameReader<TcpStream>,
    deadline: Instant,
) -> Result<Hello> {
    match reader.next_message(deadline)? {
        Message::Hello(hello) => {
            hello.check()?;
            if hello.node_id == ctx.wallet.node_id() {
                return Err(BlockchainError::Network(
                    "Handshake came from this node".to_string(),
                ));
            }
            Ok(hello)
        }
        other => Err(BlockchainError::Network(format!(
            "Expected handshake, got {}",
            other.kind()
        ))),
    }
}

/// Connect to `addr` and exchange handshakes, all within the probe timeout.
pub fn dial(ctx: &NodeContext, addr: &str) -> Result<(TcpStream, FrameReader<TcpStream>, Hello)> {
    let timeout = ctx.config.probe_timeout();
    let deadline = Instant::now() + timeout;
    let socket_addr = addr
        .to_socket_addrs()
        .map_err(|e| BlockchainError::PeerUnreachable(format!("{addr}: {e}")))?
        .next()
        .ok_or_else(|| BlockchainError::PeerUnreachable(format!("{addr}: no address")))?;

    let stream = TcpStream::connect_timeout(&socket_addr, timeout)
        .map_err(|e| BlockchainError::PeerUnreachable(format!("{addr}: {e}")))?;
    configure(&stream)?;

    let mut writer = stream.try_clone()?;
    write_message(&mut writer, &Message::Hello(ctx.hello()))?;
    let mut reader = FrameReader::new(stream.try_clone()?);
    let hello = expect_hello(ctx, &mut reader, deadline)?;
    Ok((stream, reader, hello))
}

/// Handshake on an accepted socket: read the peer's hello, then answer.
pub fn accept(ctx: &NodeContext, stream: &TcpStream) -> Result<(FrameReader<TcpStream>, Hello)> {
    configure(stream)?;
    let deadline = Instant::now() + ctx.config.probe_timeout();
    let mut reader = FrameReader::new(stream.try_clone()?);
    let hello = expect_hello(ctx, &mut reader, deadline)?;
    let mut writer = stream.try_clone()?;
    write_message(&mut writer, &Message::Hello(ctx.hello()))?;
    Ok((reader, hello))
}

fn write_loop(mut stream: TcpStream, outbound: Receiver<Message>, peer_addr: String) {
    for message in outbound.iter() {
        if let Err(e) = write_message(&mut stream, &message) {
            debug!("Dropping connection to {peer_addr}: {e}");
            let _ = stream.shutdown(Shutdown::Both);
            break;
        }
    }
}

/// Pump messages for one connection after a successful handshake. Blocks
/// until the peer disconnects, sends a malformed frame, or the node shuts down.
pub fn run_connection(
    ctx: Arc<NodeContext>,
    stream: TcpStream,
    mut reader: FrameReader<TcpStream>,
    hello: Hello,
) -> Result<()> {
    let peer_addr = hello.listen_addr.clone();
    if ctx.hub.is_connected_to_node(&hello.node_id) {
        debug!("Dropping duplicate connection to {peer_addr}");
        let _ = stream.shutdown(Shutdown::Both);
        return Ok(());
    }
    ctx.peers.record_handshake(&peer_addr, &hello)?;
    ctx.peers.merge(&hello.peers);

    let (outbound_tx, outbound_rx) = unbounded();
    let link = ctx.hub.register(
        &peer_addr,
        &hello.node_id,
        hello.public_key.clone(),
        outbound_tx,
        stream.try_clone()?,
    );
    let writer_stream = stream.try_clone()?;
    let writer_addr = peer_addr.clone();
    let writer = thread::Builder::new()
        .name(format!("writer-{}", link.conn_id()))
        .spawn(move || write_loop(writer_stream, outbound_rx, writer_addr))
        .map_err(|e| BlockchainError::Network(format!("Failed to spawn writer: {e}")))?;

    info!(
        "Connected to {peer_addr} (node {}, height {}, difficulty {})",
        &hello.node_id[..12],
        hello.chain_height,
        hello.pow_difficulty
    );

    let local_height = ctx.chain.height();
    if hello.chain_height > local_height {
        link.send(Message::GetBlocks {
            from_height: local_height + 1,
        });
    }

    loop {
        if ctx.shutdown.is_cancelled() {
            break;
        }
        match reader.poll() {
            Ok(ReadOutcome::Message(message)) => handle_message(&ctx, &link, message),
            Ok(ReadOutcome::Idle) => continue,
            Ok(ReadOutcome::Closed) => {
                debug!("{peer_addr} closed the connection");
                break;
            }
            Err(e) => {
                warn!("Closing connection to {peer_addr}: {e}");
                record_offense(&ctx, &link);
                break;
            }
        }
    }

    ctx.hub.unregister(link.conn_id());
    let _ = stream.shutdown(Shutdown::Both);
    drop(link);
    if writer.join().is_err() {
        warn!("Writer thread for {peer_addr} panicked");
    }
    info!("Disconnected from {peer_addr}");
    Ok(())
}

fn record_offense(ctx: &NodeContext, link: &PeerLink) {
    match ctx.peers.record_offense(link.peer_addr()) {
        Ok(count) => debug!("{} now has {count} offense(s)", link.peer_addr()),
        Err(e) => warn!("Failed to record offense: {e}"),
    }
}

/// Apply one message from a connected peer.
pub fn handle_message(ctx: &NodeContext, link: &PeerLink, message: Message) {
    if let Some(key) = message.item_key() {
        link.mark_seen(&key);
    }
    debug!("Received {} from {}", message.kind(), link.peer_addr());
    match message {
        Message::Coin(coin) => handle_coin(ctx, link, coin),
        Message::Transaction(tx) => handle_transaction(ctx, link, tx),
        Message::Block(block) => handle_block(ctx, link, block),
        Message::PeerListGossip(addrs) => {
            ctx.peers.merge(&addrs);
        }
        Message::Ping(_) => {
            if let Err(e) = ctx.peers.record_seen(link.peer_addr()) {
                warn!("Failed to update {}: {e}", link.peer_addr());
            }
        }
        Message::GetBlocks { from_height } => {
            for block in ctx.chain.blocks_from(from_height, MAX_BLOCKS_PER_REPLY) {
                link.mark_seen(&format!("block:{}", block.get_hash()));
                link.send(Message::Block(block));
            }
        }
        Message::Hello(_) => {
            warn!("Unexpected handshake from {}", link.peer_addr());
            record_offense(ctx, link);
        }
    }
}

fn handle_coin(ctx: &NodeContext, link: &PeerLink, coin: Coin) {
    let key = format!("coin:{}", coin.get_id());
    if ctx.hub.has_seen(&key) {
        return;
    }
    // A forged copy must not shadow the genuine coin, so only verified coins
    // are recorded as seen.
    if let Err(e) = coin.verify(ctx.chain.bounds()) {
        warn!("Rejected coin from {}: {e}", link.peer_addr());
        record_offense(ctx, link);
        return;
    }
    if !ctx.hub.first_sighting(&key) {
        return;
    }
    info!(
        "Coin {} mined by {} at difficulty {}",
        coin.short_id(),
        &coin.get_miner_id()[..12],
        coin.get_pow_difficulty()
    );
    if coin.get_miner_id() != ctx.wallet.node_id() {
        ctx.notify_miner(MinerEvent::PeerDifficulty(coin.get_pow_difficulty()));
    }
    ctx.hub.broadcast(&Message::Coin(coin), Some(link.conn_id()));
}

fn handle_transaction(ctx: &NodeContext, link: &PeerLink, tx: Transaction) {
    if ctx.pool.contains(tx.get_id()) || ctx.chain.is_confirmed(tx.get_id()) {
        return;
    }
    if let Err(e) = tx.verify(ctx.chain.bounds()) {
        warn!("Rejected transaction from {}: {e}", link.peer_addr());
        record_offense(ctx, link);
        return;
    }
    if let Err(e) = ctx.chain.check_spendable(&tx) {
        debug!("Dropping transaction {}: {e}", tx.short_id());
        return;
    }
    match ctx.pool.insert(tx.clone()) {
        Ok(true) => {
            info!(
                "Pooled transaction {} ({} coin(s)) from {}",
                tx.short_id(),
                tx.get_amount(),
                link.peer_addr()
            );
            ctx.hub
                .broadcast(&Message::Transaction(tx), Some(link.conn_id()));
        }
        Ok(false) => {}
        Err(e) => debug!("Dropping transaction {}: {e}", tx.short_id()),
    }
}

fn handle_block(ctx: &NodeContext, link: &PeerLink, block: Block) {
    match ctx.apply_block(&block) {
        Ok(true) => {
            if block.get_creator_id() != ctx.wallet.node_id() {
                ctx.notify_miner(MinerEvent::PeerDifficulty(block.get_pow_difficulty()));
            }
            ctx.hub.broadcast(&Message::Block(block), Some(link.conn_id()));
        }
        Ok(false) => {}
        Err(e) => {
            let height = ctx.chain.height();
            if block.get_height() > height + 1 {
                debug!(
                    "Block {} at height {} is ahead of ours ({height}), requesting catch-up",
                    block.short_hash(),
                    block.get_height()
                );
                link.send(Message::GetBlocks {
                    from_height: height + 1,
                });
            } else if block.verify(ctx.chain.bounds()).is_err() {
                warn!("Rejected block from {}: {e}", link.peer_addr());
                record_offense(ctx, link);
            } else {
                debug!("Ignoring block {}: {e}", block.short_hash());
            }
        }
    }
}
