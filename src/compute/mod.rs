//! Data-parallel compute backends
//!
//! A compute backend evaluates one batch of nonces, one per lane of a 2-D
//! grid, and returns the batch's matched nonce. The lane miner only talks to
//! backends through [`ComputeBackend`]; device resource management stays
//! inside each backend.

use crate::crypto::{Digest, NonceHasher};
use crate::header::{BlockHeader, BITS_INDEX, MERKLE_TAIL_INDEX, TIME_INDEX};
use crate::types::Target;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod reduce;
pub mod software;

pub use reduce::{reduce_grid, ReducePlan};
pub use software::SoftwareBackend;

/// Shape of one batch: `width × height` lanes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchShape {
    /// Lanes per row
    pub width: u32,
    /// Number of rows
    pub height: u32,
}

impl BatchShape {
    /// Create a shape, rejecting empty grids
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::config(format!(
                "Invalid batch shape {}x{}: dimensions must be non-zero",
                width, height
            )));
        }
        Ok(Self { width, height })
    }

    /// Square grid of `side × side` lanes
    pub fn square(side: u32) -> Result<Self> {
        Self::new(side, side)
    }

    /// Number of lanes, which is the number of nonces per batch
    pub fn lanes(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl Default for BatchShape {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
        }
    }
}

impl fmt::Display for BatchShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Parameters precomputed on the host and uploaded once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelParams {
    /// Merkle root tail, time and bits words
    pub tail: [u32; 3],
    /// Header midstate
    pub midstate: Digest,
    /// Target test parameters
    pub target: Target,
}

impl KernelParams {
    /// Extract kernel parameters from a header
    pub fn from_header(header: &BlockHeader) -> Self {
        let words = header.words();
        Self {
            tail: [
                words[MERKLE_TAIL_INDEX],
                words[TIME_INDEX],
                words[BITS_INDEX],
            ],
            midstate: *header.midstate(),
            target: *header.target(),
        }
    }

    /// Hasher for one lane executor
    pub fn hasher(&self) -> NonceHasher {
        NonceHasher::from_parts(self.midstate, self.tail)
    }
}

/// Data-parallel compute facility
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Upload per-run parameters. Fails with `BackendUnavailable` when the
    /// facility is missing or cannot handle the shape.
    async fn setup(&self, header: &BlockHeader, shape: BatchShape) -> Result<()>;

    /// Evaluate nonces `base_nonce .. base_nonce + shape.lanes()` and return
    /// the first non-zero reduced lane value, if any.
    async fn run_batch(&self, base_nonce: u32, shape: BatchShape) -> Result<Option<u32>>;
}
