use crate::core::{converge_step, BlockTemplate, Coin, ProofOfWork, SearchOutcome, SearchReport};
use crate::error::{BlockchainError, Result};
use crate::network::Message;
use crate::node::NodeContext;
use crate::utils::{random_hex, CancelToken};
use crossbeam::channel::{select, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const EVENT_POLL: Duration = Duration::from_millis(100);
const GENESIS_RANDOM_BYTES: usize = 32;

/// Inputs that change what the miner should be working on.
#[derive(Debug)]
pub enum MinerEvent {
    BlockAccepted { height: u64 },
    PeerDifficulty(u32),
    BlockJob(BlockJob),
    Shutdown,
}

/// A block header waiting for proof-of-work. The supervisor answers on
/// `reply` with a solution, or `None` if the job went stale.
#[derive(Debug)]
pub struct BlockJob {
    pub template: BlockTemplate,
    pub reply: Sender<Option<BlockSolution>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSolution {
    pub pow_difficulty: u32,
    pub nonce: u64,
    pub hash: Vec<u8>,
}

/// Counters published by the supervisor.
#[derive(Debug, Default)]
pub struct MinerStats {
    cycles: AtomicU64,
    max_cycle_attempts: AtomicU64,
    exhausted_cycles: AtomicU64,
    coins_minted: AtomicU64,
    blocks_solved: AtomicU64,
}

impl MinerStats {
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Most hash attempts made by any single cycle.
    pub fn max_cycle_attempts(&self) -> u64 {
        self.max_cycle_attempts.load(Ordering::SeqCst)
    }

    pub fn exhausted_cycles(&self) -> u64 {
        self.exhausted_cycles.load(Ordering::SeqCst)
    }

    pub fn coins_minted(&self) -> u64 {
        self.coins_minted.load(Ordering::SeqCst)
    }

    pub fn blocks_solved(&self) -> u64 {
        self.blocks_solved.load(Ordering::SeqCst)
    }

    fn record_cycle(&self, attempts: u64) {
        self.max_cycle_attempts.fetch_max(attempts, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Mining,
    Found,
    Superseded,
    Exhausted,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SupervisorState::Idle => "idle",
            SupervisorState::Mining => "mining",
            SupervisorState::Found => "found",
            SupervisorState::Superseded => "superseded",
            SupervisorState::Exhausted => "exhausted",
        };
        f.write_str(name)
    }
}

enum Target {
    Coin { genesis: String },
    Block(BlockJob),
}

struct Cycle {
    id: u64,
    target: Target,
    difficulty: u32,
    head_hash: String,
    cancel: CancelToken,
    worker: JoinHandle<()>,
}

struct WorkerResult {
    cycle_id: u64,
    report: SearchReport,
}

/// Owns the difficulty and the single in-flight proof-of-work search.
///
/// Every cycle runs on a fresh worker thread with its own cancellation token.
/// Block jobs take priority over coin mining; a coin cycle in progress is
/// superseded when a job arrives.
pub struct MinerSupervisor {
    ctx: Arc<NodeContext>,
    events: Receiver<MinerEvent>,
    results_tx: Sender<WorkerResult>,
    results_rx: Receiver<WorkerResult>,
    current: Option<Cycle>,
    pending_job: Option<BlockJob>,
    next_cycle: u64,
    resume_at: Option<Instant>,
    state: SupervisorState,
}

impl MinerSupervisor {
    pub fn new(ctx: Arc<NodeContext>, events: Receiver<MinerEvent>) -> MinerSupervisor {
        let (results_tx, results_rx) = unbounded();
        MinerSupervisor {
            ctx,
            events,
            results_tx,
            results_rx,
            current: None,
            pending_job: None,
            next_cycle: 1,
            resume_at: None,
            state: SupervisorState::Idle,
        }
    }

    pub fn run(mut self) {
        info!(
            "Miner supervisor started at difficulty {} (coin mining {})",
            self.ctx.difficulty.get(),
            if self.ctx.config.mining_enabled { "on" } else { "off" }
        );
        let mut stopping = false;
        while !stopping && !self.ctx.shutdown.is_cancelled() {
            if self.current.is_none() {
                if let Err(e) = self.start_next_cycle() {
                    error!("Failed to start mining cycle: {e}");
                    self.ctx.shutdown.wait_timeout(self.ctx.config.mining_pause());
                    continue;
                }
            }

            let results = self.results_rx.clone();
            let events = self.events.clone();
            select! {
                recv(results) -> msg => {
                    if let Ok(result) = msg {
                        self.on_result(result);
                    }
                }
                recv(events) -> msg => match msg {
                    Ok(MinerEvent::Shutdown) | Err(_) => stopping = true,
                    Ok(event) => self.on_event(event),
                },
                default(EVENT_POLL) => {}
            }
        }

        if let Some(Target::Block(job)) = self.stop_current() {
            let _ = job.reply.send(None);
        }
        if let Some(job) = self.pending_job.take() {
            let _ = job.reply.send(None);
        }
        self.set_state(SupervisorState::Idle);
        info!("Miner supervisor stopped");
    }

    fn set_state(&mut self, state: SupervisorState) {
        if self.state != state {
            debug!("Miner {} -> {}", self.state, state);
            self.state = state;
        }
    }

    fn start_next_cycle(&mut self) -> Result<()> {
        if let Some(job) = self.pending_job.take() {
            return self.spawn_cycle(Target::Block(job));
        }
        if !self.ctx.config.mining_enabled {
            return Ok(());
        }
        if let Some(resume_at) = self.resume_at {
            if Instant::now() < resume_at {
                return Ok(());
            }
            self.resume_at = None;
        }
        let genesis = if self.ctx.chain.height() == 0 {
            random_hex(GENESIS_RANDOM_BYTES)
        } else {
            self.ctx.chain.head_hash()
        };
        self.spawn_cycle(Target::Coin { genesis })
    }

    fn spawn_cycle(&mut self, target: Target) -> Result<()> {
        let difficulty = self.ctx.difficulty.get();
        let preimage = match &target {
            Target::Coin { genesis } => Coin::pow_preimage(genesis, self.ctx.wallet.public_key()),
            Target::Block(job) => job.template.pow_preimage(difficulty),
        };
        let id = self.next_cycle;
        self.next_cycle += 1;
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();
        let results = self.results_tx.clone();
        let max_attempts = self.ctx.config.max_iterations_debug_mode;
        let start_nonce = rand::random::<u64>();

        let worker = thread::Builder::new()
            .name(format!("miner-{id}"))
            .spawn(move || {
                let pow = ProofOfWork::new(preimage, difficulty);
                let report = pow.search(start_nonce, max_attempts, &worker_cancel);
                let _ = results.send(WorkerResult {
                    cycle_id: id,
                    report,
                });
            })
            .map_err(|e| BlockchainError::Mining(format!("Failed to spawn miner worker: {e}")))?;

        match &target {
            Target::Coin { .. } => debug!("Cycle {id}: mining a coin at difficulty {difficulty}"),
            Target::Block(job) => info!(
                "Cycle {id}: mining block {} at difficulty {difficulty}",
                job.template.get_height()
            ),
        }
        self.ctx.miner_stats.cycles.fetch_add(1, Ordering::SeqCst);
        self.current = Some(Cycle {
            id,
            target,
            difficulty,
            head_hash: self.ctx.chain.head_hash(),
            cancel,
            worker,
        });
        self.set_state(SupervisorState::Mining);
        Ok(())
    }

    /// Cancel the running cycle and hand back its target.
    fn stop_current(&mut self) -> Option<Target> {
        let cycle = self.current.take()?;
        cycle.cancel.cancel();
        if cycle.worker.join().is_err() {
            warn!("Miner worker {} panicked", cycle.id);
        }
        Some(cycle.target)
    }

    fn supersede(&mut self, reason: &str) {
        if let Some(target) = self.stop_current() {
            debug!("Mining superseded: {reason}");
            self.set_state(SupervisorState::Superseded);
            if let Target::Block(job) = target {
                self.requeue_job(job);
            }
        }
    }

    /// Keep a block job for the next cycle unless its parent is no longer the head.
    fn requeue_job(&mut self, job: BlockJob) {
        if job.template.get_prev_hash() == self.ctx.chain.head_hash() {
            self.pending_job = Some(job);
        } else {
            debug!(
                "Dropping stale block job at height {}",
                job.template.get_height()
            );
            let _ = job.reply.send(None);
        }
    }

    fn on_event(&mut self, event: MinerEvent) {
        match event {
            MinerEvent::BlockAccepted { height } => {
                debug!("Chain advanced to height {height}");
                if let Some(job) = self.pending_job.take() {
                    self.requeue_job(job);
                }
                self.supersede("new block accepted");
            }
            MinerEvent::PeerDifficulty(observed) => {
                let local = self.ctx.difficulty.get();
                let next = converge_step(local, observed, self.ctx.chain.bounds());
                if next != local {
                    info!("Difficulty {local} -> {next} (peer mined at {observed})");
                    self.ctx.difficulty.set(next);
                    self.supersede("difficulty changed");
                }
            }
            MinerEvent::BlockJob(job) => {
                if let Some(old) = self.pending_job.replace(job) {
                    let _ = old.reply.send(None);
                }
                if matches!(
                    self.current.as_ref().map(|c| &c.target),
                    Some(Target::Coin { .. })
                ) {
                    self.supersede("block job waiting");
                }
            }
            MinerEvent::Shutdown => {}
        }
    }

    fn on_result(&mut self, result: WorkerResult) {
        match &self.current {
            Some(cycle) if cycle.id == result.cycle_id => {}
            _ => return,
        }
        let Some(Cycle {
            id,
            target,
            difficulty,
            head_hash,
            worker,
            ..
        }) = self.current.take()
        else {
            return;
        };
        if worker.join().is_err() {
            warn!("Miner worker {id} panicked");
        }
        self.ctx.miner_stats.record_cycle(result.report.attempts);

        match result.report.outcome {
            SearchOutcome::Found { nonce, hash } => {
                self.set_state(SupervisorState::Found);
                let valid = self.still_current(difficulty, &head_hash, &hash);
                self.on_found(id, target, difficulty, valid, nonce, hash);
            }
            SearchOutcome::Exhausted => {
                info!(
                    "Cycle {id}: no solution found in {} attempts, restarting",
                    result.report.attempts
                );
                self.ctx
                    .miner_stats
                    .exhausted_cycles
                    .fetch_add(1, Ordering::SeqCst);
                self.set_state(SupervisorState::Exhausted);
                if let Target::Block(job) = target {
                    self.requeue_job(job);
                }
            }
            SearchOutcome::Cancelled => {
                if let Target::Block(job) = target {
                    self.requeue_job(job);
                }
            }
        }
    }

    /// A solution only counts if the difficulty and head it was mined on are
    /// still the node's, and the hash still meets that difficulty.
    fn still_current(&self, difficulty: u32, head_hash: &str, hash: &[u8]) -> bool {
        difficulty == self.ctx.difficulty.get()
            && head_hash == self.ctx.chain.head_hash()
            && ProofOfWork::meets_target(hash, difficulty)
    }

    fn on_found(
        &mut self,
        id: u64,
        target: Target,
        difficulty: u32,
        valid: bool,
        nonce: u64,
        hash: Vec<u8>,
    ) {
        match target {
            Target::Coin { genesis } => {
                if !valid {
                    debug!("Cycle {id}: discarding coin mined on stale inputs");
                    self.set_state(SupervisorState::Superseded);
                    return;
                }
                if let Err(e) = self.mint(genesis, nonce, difficulty, &hash) {
                    error!("Failed to mint coin: {e}");
                }
                self.resume_at = Some(Instant::now() + self.ctx.config.mining_pause());
            }
            Target::Block(job) => {
                if !valid {
                    self.set_state(SupervisorState::Superseded);
                    self.requeue_job(job);
                    return;
                }
                self.ctx
                    .miner_stats
                    .blocks_solved
                    .fetch_add(1, Ordering::SeqCst);
                let solution = BlockSolution {
                    pow_difficulty: difficulty,
                    nonce,
                    hash,
                };
                if job.reply.send(Some(solution)).is_err() {
                    warn!("Block assembler stopped waiting for its solution");
                }
            }
        }
    }

    fn mint(&self, genesis: String, nonce: u64, difficulty: u32, hash: &[u8]) -> Result<()> {
        let wallet = &self.ctx.wallet;
        let coin = Coin::mint(
            wallet.public_key(),
            wallet.private_key(),
            genesis,
            nonce,
            difficulty,
            hash,
        )?;
        self.ctx.miner_stats.coins_minted.fetch_add(1, Ordering::SeqCst);
        wallet.add_coin(coin.clone());
        info!(
            "Mined coin {} at difficulty {difficulty}, balance {}",
            coin.short_id(),
            wallet.balance()
        );
        self.ctx.hub.first_sighting(&format!("coin:{}", coin.get_id()));
        self.ctx.hub.broadcast(&Message::Coin(coin), None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::testnet::{signed_transfer, test_keys};
    use crate::wallet::Wallet;

    fn context(config: NodeConfig) -> (Arc<NodeContext>, Receiver<MinerEvent>) {
        let (public, private) = test_keys();
        let (tx, rx) = unbounded();
        let ctx = NodeContext::new(
            config,
            Wallet::from_keys(public, private),
            "127.0.0.1:1".to_string(),
            tx,
        );
        (Arc::new(ctx), rx)
    }

    fn run_until<F>(ctx: &Arc<NodeContext>, rx: Receiver<MinerEvent>, done: F)
    where
        F: Fn(&NodeContext) -> bool,
    {
        let supervisor = MinerSupervisor::new(Arc::clone(ctx), rx);
        let handle = thread::spawn(move || supervisor.run());
        let deadline = Instant::now() + Duration::from_secs(20);
        while !done(ctx) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        ctx.shutdown.cancel();
        ctx.notify_miner(MinerEvent::Shutdown);
        handle.join().unwrap();
    }

    #[test]
    fn test_attempt_cap_restarts_cycle() {
        let config = NodeConfig {
            starting_pow_difficulty: 224,
            max_iterations_debug_mode: Some(200),
            ..NodeConfig::default()
        };
        let (ctx, rx) = context(config);
        run_until(&ctx, rx, |ctx| ctx.miner_stats.exhausted_cycles() >= 3);

        assert!(ctx.miner_stats.exhausted_cycles() >= 3);
        assert!(ctx.miner_stats.cycles() >= 3);
        assert!(ctx.miner_stats.max_cycle_attempts() <= 200);
        assert_eq!(ctx.miner_stats.coins_minted(), 0);
    }

    #[test]
    fn test_mines_coin_into_wallet() {
        let config = NodeConfig {
            starting_pow_difficulty: 255,
            ..NodeConfig::default()
        };
        let (ctx, rx) = context(config);
        run_until(&ctx, rx, |ctx| ctx.wallet.balance() >= 1);

        assert!(ctx.miner_stats.coins_minted() >= 1);
        let coin = &ctx.wallet.coins()[0];
        assert_eq!(coin.get_pow_difficulty(), 255);
        assert!(coin.verify(ctx.chain.bounds()).is_ok());
    }

    #[test]
    fn test_peer_difficulty_moves_one_step() {
        let config = NodeConfig {
            starting_pow_difficulty: 240,
            mining_enabled: false,
            ..NodeConfig::default()
        };
        let (ctx, rx) = context(config);
        ctx.notify_miner(MinerEvent::PeerDifficulty(251));
        ctx.notify_miner(MinerEvent::PeerDifficulty(251));
        run_until(&ctx, rx, |ctx| ctx.difficulty.get() == 242);

        assert_eq!(ctx.difficulty.get(), 242);
    }

    #[test]
    fn test_block_job_is_solved() {
        let config = NodeConfig {
            starting_pow_difficulty: 255,
            max_pow_difficulty: 256,
            mining_enabled: false,
            ..NodeConfig::default()
        };
        let (ctx, rx) = context(config);
        let template = BlockTemplate::new(
            ctx.chain.head_hash(),
            1,
            vec![signed_transfer(255)],
            ctx.wallet.public_key().clone(),
        )
        .unwrap();
        let (reply_tx, reply_rx) = unbounded();
        ctx.notify_miner(MinerEvent::BlockJob(BlockJob {
            template: template.clone(),
            reply: reply_tx,
        }));
        run_until(&ctx, rx, |ctx| ctx.miner_stats.blocks_solved() >= 1);

        let solution = reply_rx.recv_timeout(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(solution.pow_difficulty, 255);
        let pow = ProofOfWork::new(template.pow_preimage(255), 255);
        assert_eq!(pow.validate(solution.nonce), Some(solution.hash));
    }

    #[test]
    fn test_solution_on_stale_difficulty_is_discarded() {
        let config = NodeConfig {
            starting_pow_difficulty: 255,
            mining_enabled: false,
            ..NodeConfig::default()
        };
        let (ctx, rx) = context(config);
        let mut supervisor = MinerSupervisor::new(Arc::clone(&ctx), rx);

        supervisor
            .spawn_cycle(Target::Coin {
                genesis: random_hex(GENESIS_RANDOM_BYTES),
            })
            .unwrap();
        let result = supervisor
            .results_rx
            .recv_timeout(Duration::from_secs(10))
            .unwrap();
        assert!(matches!(result.report.outcome, SearchOutcome::Found { .. }));
        ctx.difficulty.set(254);
        supervisor.on_result(result);

        assert!(supervisor.current.is_none());
        assert_eq!(supervisor.state, SupervisorState::Superseded);
        assert_eq!(ctx.miner_stats.coins_minted(), 0);
        assert_eq!(ctx.wallet.balance(), 0);

        supervisor
            .spawn_cycle(Target::Coin {
                genesis: random_hex(GENESIS_RANDOM_BYTES),
            })
            .unwrap();
        let result = supervisor
            .results_rx
            .recv_timeout(Duration::from_secs(10))
            .unwrap();
        supervisor.on_result(result);

        assert_eq!(ctx.miner_stats.coins_minted(), 1);
        assert_eq!(ctx.wallet.balance(), 1);
    }
}
