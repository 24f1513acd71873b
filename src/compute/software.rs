//! Software compute backend
//!
//! Evaluates every lane of a batch on a rayon thread pool, writes the
//! row-major result grid and reduces it. Lets the lane miner run without a
//! GPU.

use super::reduce::ReducePlan;
use super::{BatchShape, ComputeBackend, KernelParams};
use crate::header::BlockHeader;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;
use tracing::debug;

const BACKEND_NAME: &str = "software";

/// Largest supported grid side, matching common GPU texture limits
pub const MAX_GRID_SIDE: u32 = 8192;

/// Lane evaluation on a CPU thread pool
pub struct SoftwareBackend {
    pool: Arc<ThreadPool>,
    plan: ReducePlan,
    params: RwLock<Option<KernelParams>>,
}

impl SoftwareBackend {
    /// Create a backend with `threads` pool threads (0 = all cores)
    pub fn new(threads: usize) -> Result<Self> {
        Self::with_plan(threads, ReducePlan::default())
    }

    /// Create a backend with a custom reduction plan
    pub fn with_plan(threads: usize, plan: ReducePlan) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("lane-{}", i))
            .build()
            .map_err(|e| Error::backend_unavailable(BACKEND_NAME, e.to_string()))?;

        debug!("Software backend using {} threads", pool.current_num_threads());

        Ok(Self {
            pool: Arc::new(pool),
            plan,
            params: RwLock::new(None),
        })
    }

    /// Number of pool threads
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

/// Evaluate one batch into a result grid.
///
/// Lane `y*width + x` tests nonce `base + lane` and stores it on a match.
/// Lanes past the end of the nonce space stay zero.
fn evaluate_batch(params: &KernelParams, base_nonce: u32, shape: BatchShape) -> Vec<u32> {
    let width = shape.width as usize;
    let mut grid = vec![0u32; shape.lanes() as usize];

    grid.par_chunks_mut(width)
        .enumerate()
        .for_each_init(
            || params.hasher(),
            |hasher, (y, row)| {
                let row_base = u64::from(base_nonce) + (y * width) as u64;
                for (x, cell) in row.iter_mut().enumerate() {
                    let Ok(nonce) = u32::try_from(row_base + x as u64) else {
                        break;
                    };
                    if params.target.test(&hasher.hash(nonce)) {
                        *cell = nonce;
                    }
                }
            },
        );
    grid
}

#[async_trait]
impl ComputeBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn setup(&self, header: &BlockHeader, shape: BatchShape) -> Result<()> {
        if shape.width > MAX_GRID_SIDE || shape.height > MAX_GRID_SIDE {
            return Err(Error::backend_unavailable(
                BACKEND_NAME,
                format!(
                    "Batch shape {} exceeds the maximum side of {}",
                    shape, MAX_GRID_SIDE
                ),
            ));
        }

        *self.params.write() = Some(KernelParams::from_header(header));
        debug!(
            "Software backend ready: shape={}, reduction passes={}",
            shape,
            self.plan.passes(shape).len()
        );
        Ok(())
    }

    async fn run_batch(&self, base_nonce: u32, shape: BatchShape) -> Result<Option<u32>> {
        let params = (*self.params.read()).ok_or_else(|| {
            Error::backend_unavailable(BACKEND_NAME, "run_batch called before setup")
        })?;
        let pool = Arc::clone(&self.pool);
        let plan = self.plan;

        tokio::task::spawn_blocking(move || {
            pool.install(|| plan.reduce(evaluate_batch(&params, base_nonce, shape), shape))
        })
        .await
        .map_err(|e| Error::worker("lanes", format!("Batch task failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const TEST_HEADER: &str = "020000000affed3fc96851d8c74391c2d9333168fe62165eb228bced7e000000000000004277b65e3bd527f0ceb5298bdb06b4aacbae8a4a808c2c8aa414c20f252db801130dae516461011a3aeb9bb8";
    const EXPECTED_NONCE: u32 = 0xB89BEB3A;

    #[tokio::test]
    async fn test_batch_finds_known_nonce() {
        let header = BlockHeader::from_hex(TEST_HEADER).unwrap();
        let backend = SoftwareBackend::new(2).unwrap();
        let shape = BatchShape::square(32).unwrap();

        backend.setup(&header, shape).await.unwrap();

        // Known nonce sits at lane 517 (row 16, column 5)
        let found = backend.run_batch(EXPECTED_NONCE - 517, shape).await.unwrap();
        assert_eq!(found, Some(EXPECTED_NONCE));

        let missed = backend.run_batch(EXPECTED_NONCE + 1, shape).await.unwrap();
        assert_eq!(missed, None);
    }

    #[test]
    fn test_lanes_past_end_stay_zero() {
        // Exponent 0x20: every hash passes
        let mut words = [0u32; 20];
        words[18] = 0x20;
        let header = BlockHeader::new(words).unwrap();
        let params = KernelParams::from_header(&header);
        let shape = BatchShape::new(4, 2).unwrap();

        let grid = evaluate_batch(&params, u32::MAX - 2, shape);
        assert_eq!(
            grid,
            vec![u32::MAX - 2, u32::MAX - 1, u32::MAX, 0, 0, 0, 0, 0]
        );
    }

    #[tokio::test]
    async fn test_run_before_setup() {
        let backend = SoftwareBackend::new(1).unwrap();
        let result = backend.run_batch(0, BatchShape::square(8).unwrap()).await;
        assert_matches!(result, Err(Error::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_oversized_shape() {
        let header = BlockHeader::from_hex(TEST_HEADER).unwrap();
        let backend = SoftwareBackend::new(1).unwrap();
        let shape = BatchShape::new(MAX_GRID_SIDE + 1, 1).unwrap();

        assert_matches!(
            backend.setup(&header, shape).await,
            Err(Error::BackendUnavailable { .. })
        );
        assert_eq!(backend.name(), "software");
    }
}
