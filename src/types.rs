//! Core types for nonce mining
//!
//! Target test, mining results and run outcomes shared by every miner.

use crate::codec::{reverse_hex_bytes, words_to_hex};
use crate::crypto::{Digest, STATE_WORDS};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Acceptance predicate derived from the compact difficulty.
///
/// A digest passes when the masked word at `mask_offset` and every digest
/// word after it are zero. This checks the expected run of zero bytes
/// rather than doing a full 256-bit comparison against the expanded target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    mask_offset: usize,
    mask: u32,
}

impl Target {
    /// Derive the target test from the raw bits word (header word 18).
    ///
    /// The exponent is the low byte of the raw word and must be in `1..=32`.
    pub fn from_bits_word(bits_word: u32) -> Result<Self> {
        let exponent = bits_word & 0xFF;
        if !(1..=32).contains(&exponent) {
            return Err(Error::format(format!(
                "Unsupported difficulty exponent {}: expected 1..=32",
                exponent
            )));
        }

        let leading_zero_bytes = 32 - exponent as usize;
        let mask_offset = STATE_WORDS - leading_zero_bytes / 4 - 1;
        let mask = (0..leading_zero_bytes % 4).fold(0u32, |mask, i| mask | 0xFF << (i * 8));

        Ok(Self { mask_offset, mask })
    }

    /// Create a target test from explicit parameters
    pub fn new(mask_offset: usize, mask: u32) -> Result<Self> {
        if mask_offset >= STATE_WORDS {
            return Err(Error::format(format!(
                "Invalid mask offset {}: expected 0..{}",
                mask_offset, STATE_WORDS
            )));
        }
        Ok(Self { mask_offset, mask })
    }

    /// Index of the partially masked digest word
    pub fn mask_offset(&self) -> usize {
        self.mask_offset
    }

    /// Mask applied to the digest word at `mask_offset`
    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Number of zero bytes expected at the end of the digest words
    pub fn leading_zero_bytes(&self) -> usize {
        (STATE_WORDS - 1 - self.mask_offset) * 4 + (self.mask.count_ones() / 8) as usize
    }

    /// Whether a digest passes the test
    #[inline]
    pub fn test(&self, hash: &Digest) -> bool {
        let tail = hash[self.mask_offset + 1..]
            .iter()
            .fold(0u32, |acc, word| acc | word);
        ((hash[self.mask_offset] & self.mask) | tail) == 0
    }
}

/// A matched nonce with its digest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningResult {
    /// The winning nonce
    pub nonce: u32,
    /// The resulting double hash
    pub hash: Digest,
}

impl MiningResult {
    /// Create a new result
    pub fn new(nonce: u32, hash: Digest) -> Self {
        Self { nonce, hash }
    }

    /// Digest as big-endian word hex
    pub fn hash_hex(&self) -> String {
        words_to_hex(&self.hash)
    }

    /// Digest in block hash display order, as shown by explorers
    pub fn block_hash_hex(&self) -> String {
        // words_to_hex always yields valid even-length hex
        reverse_hex_bytes(&self.hash_hex()).unwrap_or_default()
    }
}

impl fmt::Display for MiningResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nonce={:#010x} hash={}", self.nonce, self.hash_hex())
    }
}

/// Terminal state of one mining run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A valid nonce was found
    Matched(MiningResult),
    /// The nonce range was searched without a match
    Exhausted,
    /// The run was cancelled before finding a match
    Cancelled,
}

impl Outcome {
    /// The result, if matched
    pub fn result(&self) -> Option<&MiningResult> {
        match self {
            Outcome::Matched(result) => Some(result),
            _ => None,
        }
    }

    /// Consume into the result, if matched
    pub fn into_result(self) -> Option<MiningResult> {
        match self {
            Outcome::Matched(result) => Some(result),
            _ => None,
        }
    }

    /// State the miner is left in
    pub fn state(&self) -> MinerState {
        match self {
            Outcome::Matched(_) => MinerState::Matched,
            Outcome::Exhausted => MinerState::Exhausted,
            Outcome::Cancelled => MinerState::Cancelled,
        }
    }
}

/// Miner lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MinerState {
    /// No run started yet
    Idle,
    /// Workers are searching
    Running,
    /// Finished with a match
    Matched,
    /// Finished without a match
    Exhausted,
    /// Stopped by cancellation
    Cancelled,
}

impl fmt::Display for MinerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MinerState::Idle => "idle",
            MinerState::Running => "running",
            MinerState::Matched => "matched",
            MinerState::Exhausted => "exhausted",
            MinerState::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// A contiguous, inclusive nonce sub-range assigned to one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkAssignment {
    /// First nonce
    pub start_nonce: u32,
    /// Last nonce, inclusive
    pub end_nonce: u32,
    /// Index of the worker
    pub worker_index: usize,
}

impl WorkAssignment {
    /// Number of nonces in the range, at least one
    pub fn nonce_count(&self) -> u64 {
        u64::from(self.end_nonce) - u64::from(self.start_nonce) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    #[test]
    fn test_target_from_test_vector_bits() {
        // Exponent 0x1a: 6 zero bytes
        let target = Target::from_bits_word(0x6461011A).unwrap();
        assert_eq!(target.mask_offset(), 6);
        assert_eq!(target.mask(), 0x0000FFFF);
        assert_eq!(target.leading_zero_bytes(), 6);
    }

    #[test]
    fn test_target_bounds() {
        let easiest = Target::from_bits_word(0x00000020).unwrap();
        assert_eq!(easiest.mask_offset(), 7);
        assert_eq!(easiest.mask(), 0);
        assert!(easiest.test(&[0xFFFF_FFFF; 8]));

        let hardest = Target::from_bits_word(0x00000001).unwrap();
        assert_eq!(hardest.mask_offset(), 0);
        assert_eq!(hardest.mask(), 0x00FFFFFF);

        assert_matches!(Target::from_bits_word(0), Err(Error::Format { .. }));
        assert_matches!(Target::from_bits_word(0x21), Err(Error::Format { .. }));
        assert_matches!(Target::new(8, 0), Err(Error::Format { .. }));
    }

    #[test]
    fn test_target_test() {
        let target = Target::from_bits_word(0x1A).unwrap();

        let mut hash = [0x1234_5678; 8];
        hash[6] = 0x2701_0000;
        hash[7] = 0;
        assert!(target.test(&hash));

        hash[6] = 0x2701_0001;
        assert!(!target.test(&hash));

        hash[6] = 0x2701_0000;
        hash[7] = 0x0000_0100;
        assert!(!target.test(&hash));
    }

    #[test]
    fn test_mining_result_display() {
        let mut hash = [0u32; 8];
        hash[0] = 0x5C8AD782;
        let result = MiningResult::new(0xB89BEB3A, hash);

        assert!(result.hash_hex().starts_with("5c8ad782"));
        assert!(result.block_hash_hex().ends_with("82d78a5c"));
        assert!(result.to_string().starts_with("nonce=0xb89beb3a"));
    }

    #[test]
    fn test_outcome_accessors() {
        let result = MiningResult::new(7, [0; 8]);
        let outcome = Outcome::Matched(result);
        assert_eq!(outcome.result(), Some(&result));
        assert_eq!(outcome.state(), MinerState::Matched);
        assert_eq!(Outcome::Exhausted.into_result(), None);
        assert_eq!(Outcome::Cancelled.state().to_string(), "cancelled");
    }

    #[test]
    fn test_work_assignment_nonce_count() {
        let full = WorkAssignment {
            start_nonce: 0,
            end_nonce: u32::MAX,
            worker_index: 0,
        };
        assert_eq!(full.nonce_count(), 1 << 32);
    }

    proptest! {
        #[test]
        fn mask_law(bits_word in any::<u32>(), exp in 1u32..=32) {
            let target = Target::from_bits_word((bits_word & !0xFF) | exp).unwrap();
            prop_assert!(target.mask_offset() < 8);

            let partial_bytes = (32 - exp) % 4;
            let allowed = if partial_bytes == 0 { 0 } else { u32::MAX >> (32 - 8 * partial_bytes) };
            prop_assert_eq!(target.mask() & !allowed, 0);
            prop_assert_eq!(target.mask(), allowed);
            prop_assert_eq!(target.leading_zero_bytes(), (32 - exp) as usize);
        }
    }
}
