//! Block header nonce miner
//!
//! Searches the 32-bit nonce space of an 80-byte block header for a nonce
//! whose double SHA-256 meets the difficulty encoded in the header:
//! - Midstate-optimized SHA-256 with a reusable per-worker hasher
//! - Thread-parallel search over disjoint nonce ranges
//! - Batched lane search with grid OR-reduction on a pluggable compute backend
//! - Header input from hex or block explorer JSON

pub mod codec;
pub mod compute;
pub mod config;
pub mod crypto;
pub mod error;
pub mod header;
pub mod types;
pub mod utils;
pub mod worker;

pub use config::Config;
pub use error::{Error, Result};
pub use header::{BlockHeader, HeaderFields};
pub use types::*;
pub use worker::{Miner, MinerFactory, MinerType, MiningStats};

/// Application information
pub const APP_NAME: &str = "bcminer";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
