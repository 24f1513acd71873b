//! 80-byte block header
//!
//! The header is held as 20 big-endian words in wire byte order. Scalar
//! fields (version, time, bits, nonce) are therefore byte-swapped relative
//! to their protocol values.

use crate::codec::{hex_to_words, reverse_hex_bytes, words_to_hex};
use crate::crypto::{self, Digest};
use crate::types::Target;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of words in a header
pub const HEADER_WORDS: usize = 20;

/// Number of hex characters in a header
pub const HEADER_HEX_LEN: usize = HEADER_WORDS * 8;

/// Word index of the version
pub const VERSION_INDEX: usize = 0;

/// Word index of the first previous-block hash word (8 words)
pub const PREV_BLOCK_INDEX: usize = 1;

/// Word index of the first merkle root word (8 words)
pub const MERKLE_ROOT_INDEX: usize = 9;

/// Word index of the last merkle root word, the first word of the second block
pub const MERKLE_TAIL_INDEX: usize = 16;

/// Word index of the time
pub const TIME_INDEX: usize = 17;

/// Word index of the compact difficulty ("nBits")
pub const BITS_INDEX: usize = 18;

/// Word index of the nonce
pub const NONCE_INDEX: usize = 19;

/// Raw header words
pub type HeaderWords = [u32; HEADER_WORDS];

/// A block header with its derived target test and midstate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    words: HeaderWords,
    target: Target,
    midstate: Digest,
}

impl BlockHeader {
    /// Create a header from its 20 words
    pub fn new(words: HeaderWords) -> Result<Self> {
        let target = Target::from_bits_word(words[BITS_INDEX])?;
        let midstate = crypto::midstate(&words);
        Ok(Self {
            words,
            target,
            midstate,
        })
    }

    /// Create a header from a word slice, which must hold exactly 20 words
    pub fn from_words(words: &[u32]) -> Result<Self> {
        let words: HeaderWords = words.try_into().map_err(|_| {
            Error::format(format!(
                "Invalid header length: expected {} words, got {}",
                HEADER_WORDS,
                words.len()
            ))
        })?;
        Self::new(words)
    }

    /// Parse a header from 160 hex characters
    pub fn from_hex(text: &str) -> Result<Self> {
        if text.len() != HEADER_HEX_LEN {
            return Err(Error::format(format!(
                "Invalid header length: expected {} hex characters, got {}",
                HEADER_HEX_LEN,
                text.len()
            )));
        }
        Self::from_words(&hex_to_words(text)?)
    }

    /// Build a header from block explorer fields
    pub fn from_fields(fields: &HeaderFields) -> Result<Self> {
        let mut words = [0u32; HEADER_WORDS];
        words[VERSION_INDEX] = fields.ver.swap_bytes();
        words[PREV_BLOCK_INDEX..MERKLE_ROOT_INDEX]
            .copy_from_slice(&hash_words(&fields.prev_block, "prev_block")?);
        words[MERKLE_ROOT_INDEX..TIME_INDEX]
            .copy_from_slice(&hash_words(&fields.mrkl_root, "mrkl_root")?);
        words[TIME_INDEX] = fields.time.swap_bytes();
        words[BITS_INDEX] = fields.bits.swap_bytes();
        words[NONCE_INDEX] = fields.nonce.swap_bytes();
        Self::new(words)
    }

    /// Raw header words
    pub fn words(&self) -> &HeaderWords {
        &self.words
    }

    /// Block version
    pub fn version(&self) -> u32 {
        self.words[VERSION_INDEX].swap_bytes()
    }

    /// Previous block hash words, in header order
    pub fn prev_block(&self) -> &[u32] {
        &self.words[PREV_BLOCK_INDEX..MERKLE_ROOT_INDEX]
    }

    /// Merkle root words, in header order
    pub fn merkle_root(&self) -> &[u32] {
        &self.words[MERKLE_ROOT_INDEX..TIME_INDEX]
    }

    /// Block time (unix seconds)
    pub fn time(&self) -> u32 {
        self.words[TIME_INDEX].swap_bytes()
    }

    /// Compact difficulty
    pub fn bits(&self) -> u32 {
        self.words[BITS_INDEX].swap_bytes()
    }

    /// Current nonce, the byte-swapped value of word 19. Searches start
    /// from this value, not from the raw word.
    pub fn nonce(&self) -> u32 {
        self.words[NONCE_INDEX].swap_bytes()
    }

    /// Replace the nonce. The midstate is unaffected.
    pub fn set_nonce(&mut self, nonce: u32) {
        self.words[NONCE_INDEX] = nonce.swap_bytes();
    }

    /// Target test derived from the compact difficulty
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// SHA-256 state after the first 64 header bytes
    pub fn midstate(&self) -> &Digest {
        &self.midstate
    }

    /// Whether a digest passes this header's target test
    #[inline]
    pub fn test_hash(&self, hash: &Digest) -> bool {
        self.target.test(hash)
    }

    /// Double hash of the header with `nonce` substituted
    pub fn hash_with_nonce(&self, nonce: u32) -> Digest {
        crypto::hash_nonce(&self.midstate, &self.words, nonce)
    }

    /// Double hash of the header with its own nonce
    pub fn hash(&self) -> Digest {
        self.hash_with_nonce(self.nonce())
    }

    /// Header as 160 lower-case hex characters
    pub fn to_hex(&self) -> String {
        words_to_hex(&self.words)
    }
}

impl FromStr for BlockHeader {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s.trim())
    }
}

impl fmt::Display for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Header fields as served by a block explorer's raw block endpoint.
///
/// Hashes are in display order (byte-reversed). Extra fields in the
/// payload are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderFields {
    /// Block version
    pub ver: u32,
    /// Previous block hash, display order
    pub prev_block: String,
    /// Merkle root, display order
    pub mrkl_root: String,
    /// Block time
    pub time: u32,
    /// Compact difficulty
    pub bits: u32,
    /// Nonce
    pub nonce: u32,
}

impl HeaderFields {
    /// Parse fields from an explorer JSON payload
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn hash_words(display_hex: &str, field: &str) -> Result<Vec<u32>> {
    if display_hex.len() != 64 {
        return Err(Error::format(format!(
            "Invalid {} length: expected 64 hex characters, got {}",
            field,
            display_hex.len()
        )));
    }
    hex_to_words(&reverse_hex_bytes(display_hex)?)
}
