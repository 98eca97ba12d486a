use crate::core::{Block, BlockTemplate, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::Message;
use crate::node::miner::{BlockJob, MinerEvent};
use crate::node::NodeContext;
use crossbeam::channel::{bounded, select, RecvTimeoutError};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const REPLY_POLL: Duration = Duration::from_millis(100);

/// Turns pooled transactions into blocks.
pub struct BlockAssembler {
    ctx: Arc<NodeContext>,
}

impl BlockAssembler {
    pub fn new(ctx: Arc<NodeContext>) -> BlockAssembler {
        BlockAssembler { ctx }
    }

    /// Pick the oldest valid batch, dropping invalid transactions from the
    /// pool on the way. Returns fewer than `block_size` when the pool runs out.
    fn select_batch(&self) -> Vec<Transaction> {
        let block_size = self.ctx.chain.block_size();
        let mut batch = Vec::with_capacity(block_size);
        let mut spent = HashSet::new();

        for tx in self.ctx.pool.oldest(self.ctx.pool.len()) {
            if batch.len() == block_size {
                break;
            }
            if let Err(e) = self.ctx.chain.validate_transaction(&tx) {
                warn!("Dropping transaction {} from pool: {e}", tx.short_id());
                self.ctx.pool.remove(tx.get_id());
                continue;
            }
            if tx.input_ids().any(|id| spent.contains(id)) {
                warn!("Dropping transaction {}: coin already in batch", tx.short_id());
                self.ctx.pool.remove(tx.get_id());
                continue;
            }
            spent.extend(tx.input_ids().map(str::to_string));
            batch.push(tx);
        }
        batch
    }

    /// Build, mine and apply one block if enough transactions are pending.
    ///
    /// `Ok(None)` when the pool is short, the job went stale because another
    /// block landed first, or the node is shutting down.
    pub fn assemble_once(&self) -> Result<Option<Block>> {
        let ctx = &self.ctx;
        if ctx.pool.len() < ctx.chain.block_size() {
            return Ok(None);
        }
        let batch = self.select_batch();
        if batch.len() < ctx.chain.block_size() {
            return Ok(None);
        }

        let (head, height) = ctx.chain.tip()?;
        let creator = ctx.wallet.public_key().clone();
        let template = BlockTemplate::new(head, height + 1, batch, creator)?;
        let (reply_tx, reply_rx) = bounded(1);
        ctx.notify_miner(MinerEvent::BlockJob(BlockJob {
            template: template.clone(),
            reply: reply_tx,
        }));

        let solution = loop {
            match reply_rx.recv_timeout(REPLY_POLL) {
                Ok(solution) => break solution,
                Err(RecvTimeoutError::Timeout) => {
                    if ctx.shutdown.is_cancelled() {
                        return Ok(None);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(BlockchainError::Mining(
                        "Miner supervisor dropped the block job".to_string(),
                    ))
                }
            }
        };
        let Some(solution) = solution else {
            debug!("Block job at height {} went stale", template.get_height());
            return Ok(None);
        };

        let block = Block::seal(
            template,
            solution.pow_difficulty,
            solution.nonce,
            &solution.hash,
            ctx.wallet.private_key(),
        )?;
        if !ctx.apply_block(&block)? {
            return Ok(None);
        }
        info!(
            "Assembled block {} at height {} with {} transaction(s)",
            block.short_hash(),
            block.get_height(),
            block.get_transactions().len()
        );
        ctx.hub.broadcast(&Message::Block(block.clone()), None);
        Ok(Some(block))
    }

    /// Assemble whenever the pool changes, or at least once per poll interval.
    pub fn run(self) {
        info!(
            "Block assembler started ({} transaction(s) per block)",
            self.ctx.chain.block_size()
        );
        let changes = self.ctx.pool.changes();
        while !self.ctx.shutdown.is_cancelled() {
            match self.assemble_once() {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => warn!("Block assembly failed: {e}"),
            }
            select! {
                recv(changes) -> _ => {}
                default(self.ctx.config.assembler_poll()) => {}
            }
        }
        info!("Block assembler stopped");
    }
}
