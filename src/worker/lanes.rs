//! Lane miner
//!
//! Searches the nonce range in batches of `width × height` lanes on a
//! [`ComputeBackend`]. A controller task submits one batch at a time,
//! re-verifies a reported nonce with the CPU hasher, and stops on a match,
//! at the end of the nonce space, or on cancellation between batches.
//!
//! Nonce 0 can never be reported: the backend uses 0 as the "no match"
//! lane value.

use super::{mining_span, Miner, MinerType, MiningStats};
use crate::compute::{BatchShape, ComputeBackend, SoftwareBackend};
use crate::header::BlockHeader;
use crate::types::{MinerState, MiningResult, Outcome};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// How a lane run ended
#[derive(Debug, Clone, PartialEq)]
enum RunEnd {
    Done(Outcome),
    Failed { backend: String, message: String },
}

impl RunEnd {
    fn into_result(self) -> Result<Outcome> {
        match self {
            RunEnd::Done(outcome) => Ok(outcome),
            RunEnd::Failed { backend, message } => {
                Err(Error::backend_unavailable(backend, message))
            }
        }
    }

    fn state(&self) -> MinerState {
        match self {
            RunEnd::Done(outcome) => outcome.state(),
            RunEnd::Failed { .. } => MinerState::Cancelled,
        }
    }
}

/// State of one lane run
struct LaneRun {
    cancel: CancellationToken,
    total: AtomicU64,
    end: watch::Sender<Option<RunEnd>>,
    started_at: Instant,
    ended_at: Mutex<Option<Instant>>,
}

impl LaneRun {
    fn new() -> Self {
        let (end, _) = watch::channel(None);
        Self {
            cancel: CancellationToken::new(),
            total: AtomicU64::new(0),
            end,
            started_at: Instant::now(),
            ended_at: Mutex::new(None),
        }
    }

    fn finish(&self, end: RunEnd) {
        *self.ended_at.lock() = Some(Instant::now());
        self.end.send_replace(Some(end));
    }

    fn end(&self) -> Option<RunEnd> {
        self.end.borrow().clone()
    }

    fn state(&self) -> MinerState {
        self.end
            .borrow()
            .as_ref()
            .map_or(MinerState::Running, RunEnd::state)
    }

    fn elapsed(&self) -> Duration {
        self.ended_at.lock().unwrap_or_else(Instant::now) - self.started_at
    }

    async fn wait(&self) -> Result<RunEnd> {
        let mut rx = self.end.subscribe();
        let end = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|e| Error::worker(MinerType::Lanes.to_string(), e.to_string()))?;
        end.clone()
            .ok_or_else(|| Error::invalid_state("Lane run ended without an outcome"))
    }
}

/// Run slot held by `start` while the backend is set up. Dropping it
/// before `commit` puts the previous run back, including when the `start`
/// future itself is dropped mid-setup.
struct Reservation<'a> {
    slot: &'a Mutex<Option<Arc<LaneRun>>>,
    run: Arc<LaneRun>,
    previous: Option<Option<Arc<LaneRun>>>,
}

impl Reservation<'_> {
    fn commit(mut self) {
        self.previous = None;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let Some(previous) = self.previous.take() else {
            return;
        };
        let mut current = self.slot.lock();
        if current.as_ref().is_some_and(|run| Arc::ptr_eq(run, &self.run)) {
            *current = previous;
        }
    }
}

/// Batch loop of one run
async fn drive(
    backend: Arc<dyn ComputeBackend>,
    run: Arc<LaneRun>,
    header: BlockHeader,
    shape: BatchShape,
) -> RunEnd {
    let lanes = shape.lanes();
    let mut base = u64::from(header.nonce());
    let mut batches = 0u64;

    loop {
        if run.cancel.is_cancelled() {
            return RunEnd::Done(Outcome::Cancelled);
        }
        if base > u64::from(u32::MAX) {
            return RunEnd::Done(Outcome::Exhausted);
        }

        let evaluated = (u64::from(u32::MAX) - base + 1).min(lanes);
        let found = match backend.run_batch(base as u32, shape).await {
            Ok(found) => found,
            Err(e) => {
                error!(category = e.category(), "Batch at {:#010x} failed: {}", base, e);
                return match e {
                    Error::BackendUnavailable { backend, message } => {
                        RunEnd::Failed { backend, message }
                    }
                    other => RunEnd::Failed {
                        backend: backend.name().to_string(),
                        message: other.to_string(),
                    },
                };
            }
        };
        run.total.fetch_add(evaluated, Ordering::Relaxed);
        batches += 1;

        if let Some(nonce) = found {
            let in_batch = (base..base + evaluated).contains(&u64::from(nonce));
            let hash = header.hash_with_nonce(nonce);
            if in_batch && header.test_hash(&hash) {
                info!("Found nonce {:#010x} after {} batches", nonce, batches);
                return RunEnd::Done(Outcome::Matched(MiningResult::new(nonce, hash)));
            }
            // OR of several matching lanes
            warn!(
                "Discarding lane value {:#010x} from batch {:#010x}: failed host verification",
                nonce, base
            );
        }

        base += lanes;
    }
}

/// Data-parallel miner over a compute backend
pub struct LaneMiner {
    backend: Arc<dyn ComputeBackend>,
    default_shape: BatchShape,
    header: Mutex<Option<BlockHeader>>,
    run: Mutex<Option<Arc<LaneRun>>>,
}

impl LaneMiner {
    /// Create a miner on `backend`. `default_shape` is used when `start`
    /// is given a parallelism of 0.
    pub fn new(backend: Arc<dyn ComputeBackend>, default_shape: BatchShape) -> Self {
        Self {
            backend,
            default_shape,
            header: Mutex::new(None),
            run: Mutex::new(None),
        }
    }

    /// Create a miner on the software backend
    pub fn software(threads: usize) -> Result<Self> {
        Ok(Self::new(
            Arc::new(SoftwareBackend::new(threads)?),
            BatchShape::default(),
        ))
    }

    /// Name of the compute backend
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn current_run(&self) -> Result<Arc<LaneRun>> {
        self.run
            .lock()
            .clone()
            .ok_or_else(|| Error::invalid_state("Lane miner was never started"))
    }

    fn shape_for(&self, parallelism: usize) -> Result<BatchShape> {
        if parallelism == 0 {
            return Ok(self.default_shape);
        }
        let side = u32::try_from(parallelism)
            .map_err(|_| Error::config(format!("Grid side {} is too large", parallelism)))?;
        BatchShape::square(side)
    }

    fn log_outcome(&self, end: &RunEnd) {
        let stats = self.stats();
        match end {
            RunEnd::Done(Outcome::Matched(result)) => {
                info!("Lane miner matched {}: {}", result, stats)
            }
            RunEnd::Done(Outcome::Exhausted) => {
                info!("Lane miner exhausted the nonce range: {}", stats)
            }
            RunEnd::Done(Outcome::Cancelled) => info!("Lane miner cancelled: {}", stats),
            RunEnd::Failed { backend, .. } => {
                warn!("Lane miner stopped by {} backend failure: {}", backend, stats)
            }
        }
    }
}

#[async_trait]
impl Miner for LaneMiner {
    fn miner_type(&self) -> MinerType {
        MinerType::Lanes
    }

    fn configure(&self, header: BlockHeader) -> Result<()> {
        if self.is_running() {
            return Err(Error::already_running(MinerType::Lanes.to_string()));
        }
        *self.header.lock() = Some(header);
        Ok(())
    }

    async fn start(&self, parallelism: usize) -> Result<()> {
        let header = self
            .header
            .lock()
            .clone()
            .ok_or_else(|| Error::invalid_state("Lane miner has no header configured"))?;
        let shape = self.shape_for(parallelism)?;

        // Reserve the run slot before the backend setup await
        let run = Arc::new(LaneRun::new());
        let reservation = {
            let mut current = self.run.lock();
            if let Some(existing) = current.as_ref() {
                if existing.state() == MinerState::Running {
                    return Err(Error::already_running(MinerType::Lanes.to_string()));
                }
            }
            let previous = current.replace(Arc::clone(&run));
            Reservation {
                slot: &self.run,
                run: Arc::clone(&run),
                previous: Some(previous),
            }
        };

        if let Err(e) = self.backend.setup(&header, shape).await {
            error!(category = e.category(), "Backend setup failed: {}", e);
            return Err(e);
        }
        reservation.commit();

        let span = mining_span(MinerType::Lanes, header.nonce());
        info!(
            parent: &span,
            "Starting lane miner on {} backend with {} batches from nonce {:#010x}",
            self.backend.name(),
            shape,
            header.nonce()
        );

        let backend = Arc::clone(&self.backend);
        tokio::spawn(
            async move {
                let controller =
                    tokio::spawn(drive(backend, Arc::clone(&run), header, shape).in_current_span());
                let end = match controller.await {
                    Ok(end) => end,
                    Err(e) => RunEnd::Failed {
                        backend: MinerType::Lanes.to_string(),
                        message: format!("Controller task failed: {}", e),
                    },
                };
                debug!("Lane run ended: {:?}", end);
                run.finish(end);
            }
            .instrument(span),
        );

        Ok(())
    }

    async fn await_result(&self) -> Result<Outcome> {
        let end = self.current_run()?.wait().await?;
        self.log_outcome(&end);
        end.into_result()
    }

    async fn cancel(&self) -> Result<Outcome> {
        self.current_run()?.cancel.cancel();
        self.await_result().await
    }

    fn total_hashes(&self) -> u64 {
        self.run
            .lock()
            .as_ref()
            .map_or(0, |run| run.total.load(Ordering::Relaxed))
    }

    fn matched_nonce(&self) -> Option<u32> {
        match self.run.lock().as_ref()?.end()? {
            RunEnd::Done(Outcome::Matched(result)) => Some(result.nonce),
            _ => None,
        }
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
                run.total.load(Ordering::Relaxed),
                u64::from(matches!(run.end(), Some(RunEnd::Done(Outcome::Matched(_))))),
                run.elapsed(),
            ),
            None => MiningStats::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::AtomicBool;

    const TEST_HEADER: &str = "020000000affed3fc96851d8c74391c2d9333168fe62165eb228bced7e000000000000004277b65e3bd527f0ceb5298bdb06b4aacbae8a4a808c2c8aa414c20f252db801130dae516461011a3aeb9bb8";
    const EXPECTED_NONCE: u32 = 0xB89BEB3A;
    const EXPECTED_HASH: &str = "5c8ad782c007cc563f8db735180b35dab8c983d172b57e2c2701000000000000";

    fn header_from(nonce: u32) -> BlockHeader {
        let mut header = BlockHeader::from_hex(TEST_HEADER).unwrap();
        header.set_nonce(nonce);
        header
    }

    fn hard_header(nonce: u32) -> BlockHeader {
        let mut words = *header_from(0).words();
        words[18] = 0x01;
        let mut header = BlockHeader::new(words).unwrap();
        header.set_nonce(nonce);
        header
    }

    fn software_miner() -> LaneMiner {
        LaneMiner::new(
            Arc::new(SoftwareBackend::new(2).unwrap()),
            BatchShape::square(8).unwrap(),
        )
    }

    /// Backend with scripted failures
    #[derive(Default)]
    struct ScriptedBackend {
        fail_setup: bool,
        stall_setup: AtomicBool,
        fail_batch: bool,
        report_base: bool,
    }

    #[async_trait]
    impl ComputeBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn setup(&self, _header: &BlockHeader, _shape: BatchShape) -> Result<()> {
            if self.fail_setup {
                return Err(Error::backend_unavailable("scripted", "no device"));
            }
            if self.stall_setup.load(Ordering::Relaxed) {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn run_batch(&self, base_nonce: u32, _shape: BatchShape) -> Result<Option<u32>> {
            if self.fail_batch {
                return Err(Error::backend_unavailable("scripted", "device lost"));
            }
            Ok(self.report_base.then_some(base_nonce))
        }
    }

    #[tokio::test]
    async fn test_known_vector() {
        let miner = software_miner();
        miner.configure(header_from(EXPECTED_NONCE - 1000)).unwrap();
        miner.start(32).await.unwrap();

        let outcome = miner.await_result().await.unwrap();
        let result = outcome.result().unwrap();
        assert_eq!(result.nonce, EXPECTED_NONCE);
        assert_eq!(result.hash_hex(), EXPECTED_HASH);
        assert_eq!(miner.total_hashes(), 1024);
        assert_eq!(miner.matched_nonce(), Some(EXPECTED_NONCE));
        assert_eq!(miner.state(), MinerState::Matched);
        assert_eq!(miner.stats().solutions_found, 1);
    }

    #[tokio::test]
    async fn test_exhausted_counts_only_valid_lanes() {
        let miner = software_miner();
        let outcome = miner.mine(hard_header(u32::MAX - 100), 16).await.unwrap();

        assert_eq!(outcome, Outcome::Exhausted);
        assert_eq!(miner.total_hashes(), 101);
        assert_eq!(miner.state(), MinerState::Exhausted);
    }

    #[tokio::test]
    async fn test_cancel_and_already_running() {
        let miner = software_miner();
        miner.configure(hard_header(0)).unwrap();
        miner.start(0).await.unwrap();
        assert!(miner.is_running());

        assert_matches!(miner.start(0).await, Err(Error::AlreadyRunning { .. }));
        assert_matches!(miner.configure(hard_header(0)), Err(Error::AlreadyRunning { .. }));

        assert_eq!(miner.cancel().await.unwrap(), Outcome::Cancelled);
        assert_eq!(miner.state(), MinerState::Cancelled);
        assert_eq!(miner.total_hashes() % 64, 0);
    }

    #[tokio::test]
    async fn test_await_before_start() {
        let miner = software_miner();
        assert_matches!(miner.await_result().await, Err(Error::InvalidState { .. }));
        assert_matches!(miner.start(4).await, Err(Error::InvalidState { .. }));
        assert_eq!(miner.state(), MinerState::Idle);
    }

    #[tokio::test]
    async fn test_setup_failure() {
        let backend = ScriptedBackend {
            fail_setup: true,
            ..Default::default()
        };
        let miner = LaneMiner::new(Arc::new(backend), BatchShape::square(8).unwrap());
        miner.configure(header_from(0)).unwrap();

        assert_matches!(miner.start(0).await, Err(Error::BackendUnavailable { .. }));
        assert_eq!(miner.state(), MinerState::Idle);
    }

    #[tokio::test]
    async fn test_dropped_start_releases_run_slot() {
        let backend = ScriptedBackend {
            stall_setup: AtomicBool::new(true),
            ..Default::default()
        };
        let miner = LaneMiner::new(Arc::new(backend), BatchShape::square(8).unwrap());
        miner.configure(header_from(0)).unwrap();

        let started = tokio::time::timeout(Duration::from_millis(100), miner.start(0)).await;
        assert!(started.is_err());

        assert_eq!(miner.state(), MinerState::Idle);
        assert!(!miner.is_running());
        miner.configure(header_from(1)).unwrap();

        let waited = tokio::time::timeout(Duration::from_secs(2), miner.await_result()).await;
        assert_matches!(waited, Ok(Err(Error::InvalidState { .. })));
        let cancelled = tokio::time::timeout(Duration::from_secs(2), miner.cancel()).await;
        assert_matches!(cancelled, Ok(Err(Error::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_dropped_start_keeps_previous_run() {
        let backend = Arc::new(ScriptedBackend {
            report_base: true,
            ..Default::default()
        });
        let miner = LaneMiner::new(backend.clone(), BatchShape::square(8).unwrap());
        let first = miner.mine(header_from(EXPECTED_NONCE), 0).await.unwrap();
        assert_eq!(first.result().map(|r| r.nonce), Some(EXPECTED_NONCE));

        backend.stall_setup.store(true, Ordering::Relaxed);
        let started = tokio::time::timeout(Duration::from_millis(100), miner.start(0)).await;
        assert!(started.is_err());

        assert_eq!(miner.state(), MinerState::Matched);
        assert_eq!(miner.matched_nonce(), Some(EXPECTED_NONCE));
        assert_eq!(miner.total_hashes(), 64);
    }

    #[tokio::test]
    async fn test_batch_failure() {
        let backend = ScriptedBackend {
            fail_batch: true,
            ..Default::default()
        };
        let miner = LaneMiner::new(Arc::new(backend), BatchShape::square(8).unwrap());
        miner.configure(header_from(0)).unwrap();
        miner.start(0).await.unwrap();

        assert_matches!(
            miner.await_result().await,
            Err(Error::BackendUnavailable { backend, .. }) if backend == "scripted"
        );
        assert!(!miner.is_running());
    }

    #[tokio::test]
    async fn test_unverified_lane_is_discarded() {
        let backend = ScriptedBackend {
            report_base: true,
            ..Default::default()
        };
        let miner = LaneMiner::new(Arc::new(backend), BatchShape::square(8).unwrap());
        let outcome = miner.mine(hard_header(u32::MAX - 255), 0).await.unwrap();

        assert_eq!(outcome, Outcome::Exhausted);
        assert_eq!(miner.total_hashes(), 256);
        assert_eq!(miner.matched_nonce(), None);
    }
}
