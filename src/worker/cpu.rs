//! Thread-parallel CPU miner
//!
//! The nonce range from the header's nonce to `0xFFFFFFFF` is split into
//! contiguous inclusive sub-ranges, one per OS thread. Each thread owns its
//! hasher and hash counter. The first thread to find a passing nonce stores
//! it and raises the shared stop flag; any later match is logged and
//! discarded.

use super::{mining_span, Miner, MinerType, MiningStats};
use crate::crypto::NonceHasher;
use crate::header::BlockHeader;
use crate::types::{MinerState, MiningResult, Outcome, Target, WorkAssignment};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Split `start..=0xFFFFFFFF` into `workers` contiguous inclusive ranges.
///
/// `workers` is clamped to `1..=range size`, with 0 meaning one per core.
/// Every range gets `total / n` nonces and the last one also takes the
/// remainder.
pub fn partition(start: u32, workers: usize) -> Vec<WorkAssignment> {
    let total = u64::from(u32::MAX) - u64::from(start) + 1;
    let workers = if workers == 0 { num_cpus::get() } else { workers };
    let workers = (workers as u64).clamp(1, total);
    let size = total / workers;

    (0..workers)
        .map(|index| {
            let first = u64::from(start) + index * size;
            let last = if index == workers - 1 {
                u64::from(u32::MAX)
            } else {
                first + size - 1
            };
            WorkAssignment {
                start_nonce: first as u32,
                end_nonce: last as u32,
                worker_index: index as usize,
            }
        })
        .collect()
}

#[derive(Debug)]
struct RunSlot {
    result: Option<MiningResult>,
    remaining: usize,
    ended_at: Option<Instant>,
}

/// State shared between the worker threads of one run
#[derive(Debug)]
struct RunState {
    counters: Vec<AtomicU64>,
    stop: AtomicBool,
    cancelled: AtomicBool,
    slot: Mutex<RunSlot>,
    done: Condvar,
    started_at: Instant,
}

impl RunState {
    fn new(workers: usize) -> Self {
        Self {
            counters: (0..workers).map(|_| AtomicU64::new(0)).collect(),
            stop: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            slot: Mutex::new(RunSlot {
                result: None,
                remaining: workers,
                ended_at: None,
            }),
            done: Condvar::new(),
            started_at: Instant::now(),
        }
    }

    /// Offer a match. The first one wins.
    fn submit(&self, result: MiningResult) {
        let mut slot = self.slot.lock();
        match slot.result {
            None => {
                info!("Found nonce {:#010x}", result.nonce);
                slot.result = Some(result);
                self.stop.store(true, Ordering::Release);
            }
            Some(accepted) => {
                let conflict = Error::ResultConflict {
                    accepted: accepted.nonce,
                    rejected: result.nonce,
                };
                warn!(category = conflict.category(), "{}", conflict);
            }
        }
    }

    /// Mark `count` workers as exited
    fn finish_workers(&self, count: usize) {
        let mut slot = self.slot.lock();
        slot.remaining = slot.remaining.saturating_sub(count);
        if slot.remaining == 0 {
            slot.ended_at = Some(Instant::now());
            self.done.notify_all();
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.stop.store(true, Ordering::Release);
    }

    fn outcome(&self, slot: &RunSlot) -> Outcome {
        match slot.result {
            Some(result) => Outcome::Matched(result),
            None if self.cancelled.load(Ordering::Acquire) => Outcome::Cancelled,
            None => Outcome::Exhausted,
        }
    }

    /// Block until every worker has exited. After a match the others
    /// observe the stop flag within one hash.
    fn wait(&self) -> Outcome {
        let mut slot = self.slot.lock();
        while slot.remaining > 0 {
            self.done.wait(&mut slot);
        }
        self.outcome(&slot)
    }

    fn state(&self) -> MinerState {
        let slot = self.slot.lock();
        if slot.remaining > 0 {
            MinerState::Running
        } else {
            self.outcome(&slot).state()
        }
    }

    fn total_hashes(&self) -> u64 {
        self.counters
            .iter()
            .map(|counter| counter.load(Ordering::Relaxed))
            .sum()
    }

    fn elapsed(&self) -> Duration {
        let slot = self.slot.lock();
        slot.ended_at.unwrap_or_else(Instant::now) - self.started_at
    }

    fn matched_nonce(&self) -> Option<u32> {
        self.slot.lock().result.map(|result| result.nonce)
    }
}

/// Counts a worker down on every exit path, including unwinding
struct WorkerExit<'a>(&'a RunState);

impl Drop for WorkerExit<'_> {
    fn drop(&mut self) {
        self.0.finish_workers(1);
    }
}

/// Search one assigned range
fn search(
    run: &RunState,
    assignment: WorkAssignment,
    mut hasher: NonceHasher,
    target: Target,
) {
    let counter = &run.counters[assignment.worker_index];
    let mut nonce = assignment.start_nonce;

    debug!(
        "Worker {} searching {:#010x}..={:#010x}",
        assignment.worker_index, assignment.start_nonce, assignment.end_nonce
    );

    loop {
        if run.stop.load(Ordering::Acquire) {
            break;
        }

        let hash = hasher.hash(nonce);
        counter.fetch_add(1, Ordering::Relaxed);

        if target.test(&hash) {
            run.submit(MiningResult::new(nonce, hash));
            break;
        }

        if nonce == assignment.end_nonce {
            break;
        }
        nonce += 1;
    }

    debug!(
        "Worker {} exiting after {} hashes",
        assignment.worker_index,
        counter.load(Ordering::Relaxed)
    );
}

/// Thread-parallel miner
#[derive(Debug, Default)]
pub struct ThreadMiner {
    header: Mutex<Option<BlockHeader>>,
    run: Mutex<Option<Arc<RunState>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadMiner {
    /// Create an idle miner
    pub fn new() -> Self {
        Self::default()
    }

    fn current_run(&self) -> Result<Arc<RunState>> {
        self.run
            .lock()
            .clone()
            .ok_or_else(|| Error::invalid_state("Thread miner was never started"))
    }

    fn join_workers(&self) {
        for handle in self.handles.lock().drain(..) {
            if handle.join().is_err() {
                warn!("Mining thread panicked");
            }
        }
    }

    /// Launch worker threads without an async runtime.
    ///
    /// `threads` of 0 uses one thread per core.
    pub fn launch(&self, threads: usize) -> Result<()> {
        let header = self
            .header
            .lock()
            .clone()
            .ok_or_else(|| Error::invalid_state("Thread miner has no header configured"))?;

        let mut current = self.run.lock();
        if let Some(run) = current.as_ref() {
            if run.state() == MinerState::Running {
                return Err(Error::already_running(MinerType::Cpu.to_string()));
            }
        }
        self.join_workers();

        let start_nonce = header.nonce();
        let assignments = partition(start_nonce, threads);
        let run = Arc::new(RunState::new(assignments.len()));

        let span = mining_span(MinerType::Cpu, start_nonce);
        let _guard = span.enter();
        info!(
            "Starting thread miner with {} threads from nonce {:#010x}",
            assignments.len(),
            start_nonce
        );

        let mut handles = self.handles.lock();
        for (spawned, assignment) in assignments.iter().copied().enumerate() {
            let worker_run = Arc::clone(&run);
            let hasher = NonceHasher::new(*header.midstate(), header.words());
            let target = *header.target();
            let worker_span = span.clone();

            let spawn_result = thread::Builder::new()
                .name(format!("miner-{}", assignment.worker_index))
                .spawn(move || {
                    let _guard = worker_span.enter();
                    let _exit = WorkerExit(&worker_run);
                    search(&worker_run, assignment, hasher, target);
                });

            match spawn_result {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    run.cancel();
                    run.finish_workers(assignments.len() - spawned);
                    *current = Some(run);
                    return Err(Error::worker(
                        MinerType::Cpu.to_string(),
                        format!("Failed to spawn thread {}: {}", assignment.worker_index, e),
                    ));
                }
            }
        }

        *current = Some(run);
        Ok(())
    }

    /// Block until the current run ends
    pub fn wait(&self) -> Result<Outcome> {
        let outcome = self.current_run()?.wait();
        self.log_outcome(&outcome);
        Ok(outcome)
    }

    /// Cancel without an async runtime
    pub fn cancel_blocking(&self) -> Result<Outcome> {
        self.current_run()?.cancel();
        self.wait()
    }

    fn log_outcome(&self, outcome: &Outcome) {
        let stats = self.stats();
        match outcome {
            Outcome::Matched(result) => info!("Thread miner matched {}: {}", result, stats),
            Outcome::Exhausted => info!("Thread miner exhausted the nonce range: {}", stats),
            Outcome::Cancelled => info!("Thread miner cancelled: {}", stats),
        }
    }
}

impl Drop for ThreadMiner {
    fn drop(&mut self) {
        if let Some(run) = self.run.lock().as_ref() {
            run.cancel();
        }
        self.join_workers();
    }
}

#[async_trait]
impl Miner for ThreadMiner {
    fn miner_type(&self) -> MinerType {
        MinerType::Cpu
    }

    fn configure(&self, header: BlockHeader) -> Result<()> {
        if self.is_running() {
            return Err(Error::already_running(MinerType::Cpu.to_string()));
        }
        *self.header.lock() = Some(header);
        Ok(())
    }

    async fn start(&self, parallelism: usize) -> Result<()> {
        self.launch(parallelism)
    }

    async fn await_result(&self) -> Result<Outcome> {
        let run = self.current_run()?;
        let outcome = tokio::task::spawn_blocking(move || run.wait())
            .await
            .map_err(|e| Error::worker(MinerType::Cpu.to_string(), e.to_string()))?;
        self.log_outcome(&outcome);
        Ok(outcome)
    }

    async fn cancel(&self) -> Result<Outcome> {
        self.current_run()?.cancel();
        self.await_result().await
    }

    fn total_hashes(&self) -> u64 {
        self.run
            .lock()
            .as_ref()
            .map_or(0, |run| run.total_hashes())
    }

    fn matched_nonce(&self) -> Option<u32> {
        self.run.lock().as_ref().and_then(|run| run.matched_nonce())
    }

    fn state(&self) -> MinerState {
        self.run
            .lock()
            .as_ref()
            .map_or(MinerState::Idle, |run| run.state())
    }

    fn stats(&self) -> MiningStats {
        match self.run.lock().as_ref() {
            Some(run) => MiningStats::new(
                run.total_hashes(),
                u64::from(run.matched_nonce().is_some()),
                run.elapsed(),
            ),
            None => MiningStats::default(),
        }
    }
}
