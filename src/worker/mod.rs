//! Miner implementations
//!
//! Two search strategies share the [`Miner`] interface: a thread-parallel
//! miner that splits the nonce range across OS threads, and a lane miner
//! that evaluates batches of nonces on a data-parallel compute backend.

use crate::header::BlockHeader;
use crate::types::{MinerState, Outcome};
use crate::utils::{format_duration, format_hash_rate};
use crate::Result;
use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::Span;

pub mod cpu;
pub mod lanes;

pub use cpu::ThreadMiner;
pub use lanes::LaneMiner;

/// Search strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MinerType {
    /// Thread-parallel search on the CPU
    Cpu,
    /// Batched search on a data-parallel compute backend
    Lanes,
}

impl fmt::Display for MinerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MinerType::Cpu => write!(f, "cpu"),
            MinerType::Lanes => write!(f, "lanes"),
        }
    }
}

/// Mining statistics for a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MiningStats {
    /// Total hashes computed
    pub total_hashes: u64,
    /// Number of solutions found
    pub solutions_found: u64,
    /// Time spent mining
    pub elapsed: Duration,
    /// Average hash rate (hashes per second)
    pub average_hash_rate: f64,
}

impl MiningStats {
    /// Build statistics from counters
    pub fn new(total_hashes: u64, solutions_found: u64, elapsed: Duration) -> Self {
        Self {
            total_hashes,
            solutions_found,
            elapsed,
            average_hash_rate: compute_hash_rate(total_hashes, elapsed),
        }
    }
}

impl fmt::Display for MiningStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} hashes in {} ({})",
            self.total_hashes,
            format_duration(self.elapsed.as_secs()),
            format_hash_rate(self.average_hash_rate)
        )
    }
}

/// Nonce miner.
///
/// A miner runs one search at a time. `configure` sets the header, `start`
/// launches the search from the header's nonce up to `0xFFFFFFFF`, and
/// `await_result` blocks until the run ends. Every method takes `&self` so
/// a miner can be shared between the awaiting task, a progress reporter and
/// a cancel handler.
#[async_trait]
pub trait Miner: Send + Sync {
    /// Strategy of this miner
    fn miner_type(&self) -> MinerType;

    /// Set the header to mine. Fails with `AlreadyRunning` during a run.
    fn configure(&self, header: BlockHeader) -> Result<()>;

    /// Launch a search.
    ///
    /// `parallelism` is the thread count for the thread miner and the grid
    /// side for the lane miner; 0 selects the miner's default.
    async fn start(&self, parallelism: usize) -> Result<()>;

    /// Wait for the current run to end
    async fn await_result(&self) -> Result<Outcome>;

    /// Request cooperative cancellation, then wait for the run to end
    async fn cancel(&self) -> Result<Outcome>;

    /// Hashes computed by the current or last run
    fn total_hashes(&self) -> u64;

    /// Whether a search is in progress
    fn is_running(&self) -> bool {
        self.state() == MinerState::Running
    }

    /// Matched nonce of the current or last run
    fn matched_nonce(&self) -> Option<u32>;

    /// Lifecycle state
    fn state(&self) -> MinerState;

    /// Statistics of the current or last run
    fn stats(&self) -> MiningStats;

    /// Configure, start and wait in one call
    async fn mine(&self, header: BlockHeader, parallelism: usize) -> Result<Outcome> {
        self.configure(header)?;
        self.start(parallelism).await?;
        self.await_result().await
    }
}

/// Factory for the available miners
pub struct MinerFactory;

impl MinerFactory {
    /// Create a thread-parallel miner
    pub fn create_thread_miner() -> Arc<dyn Miner> {
        Arc::new(ThreadMiner::new())
    }

    /// Create a lane miner on the software backend with `backend_threads`
    /// pool threads (0 = all cores)
    pub fn create_lane_miner(backend_threads: usize) -> Result<Arc<dyn Miner>> {
        Ok(Arc::new(LaneMiner::software(backend_threads)?))
    }

    /// Create a miner by strategy
    pub fn create(miner_type: MinerType, backend_threads: usize) -> Result<Arc<dyn Miner>> {
        match miner_type {
            MinerType::Cpu => Ok(Self::create_thread_miner()),
            MinerType::Lanes => Self::create_lane_miner(backend_threads),
        }
    }
}

/// Hash rate over a time period
pub fn compute_hash_rate(hashes: u64, elapsed: Duration) -> f64 {
    if elapsed.as_secs_f64() > 0.0 {
        hashes as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    }
}

/// Create a tracing span for a mining run
pub fn mining_span(miner_type: MinerType, start_nonce: u32) -> Span {
    tracing::info_span!(
        "mining",
        miner_type = %miner_type,
        start_nonce = format_args!("{:#010x}", start_nonce),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mining_stats() {
        let stats = MiningStats::new(1000, 1, Duration::from_secs(10));
        assert_eq!(stats.total_hashes, 1000);
        assert_eq!(stats.average_hash_rate, 100.0);
        assert_eq!(stats.to_string(), "1000 hashes in 10s (100.00 H/s)");

        let idle = MiningStats::default();
        assert_eq!(idle.average_hash_rate, 0.0);
    }

    #[test]
    fn test_compute_hash_rate() {
        assert_eq!(compute_hash_rate(1000, Duration::from_secs(10)), 100.0);
        assert_eq!(compute_hash_rate(0, Duration::from_secs(10)), 0.0);
        assert_eq!(compute_hash_rate(1000, Duration::from_secs(0)), 0.0);
    }

    #[test]
    fn test_miner_type() {
        assert_eq!(MinerType::Cpu.to_string(), "cpu");
        assert_eq!(MinerType::from_str("lanes", true).unwrap(), MinerType::Lanes);
        assert_eq!(serde_json::to_string(&MinerType::Lanes).unwrap(), "\"lanes\"");
    }

    #[tokio::test]
    async fn test_miner_factory() {
        let cpu = MinerFactory::create(MinerType::Cpu, 0).unwrap();
        assert_eq!(cpu.miner_type(), MinerType::Cpu);
        assert_eq!(cpu.state(), MinerState::Idle);

        let lanes = MinerFactory::create(MinerType::Lanes, 1).unwrap();
        assert_eq!(lanes.miner_type(), MinerType::Lanes);
        assert!(!lanes.is_running());
        assert_eq!(lanes.total_hashes(), 0);
    }
}
