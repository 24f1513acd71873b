//! SHA-256 primitives for mining
//!
//! The compression function works on raw state words so hashing can resume
//! from a saved midstate.

use crate::header::{HeaderWords, BITS_INDEX, MERKLE_TAIL_INDEX, TIME_INDEX};

/// Number of words in a SHA-256 state or digest
pub const STATE_WORDS: usize = 8;

/// Number of words in one 64-byte message block
pub const BLOCK_WORDS: usize = 16;

/// Number of words in the expanded message schedule
pub const SCRATCH_WORDS: usize = 64;

/// An 8-word SHA-256 state or digest
pub type Digest = [u32; STATE_WORDS];

/// Expanded message schedule buffer
pub type Scratch = [u32; SCRATCH_WORDS];

/// SHA-256 initial hash values
pub const INITIAL_STATE: Digest = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19,
];

const K: [u32; 64] = [
    0x428a2f98, 0x71374491, 0xb5c0fbcf, 0xe9b5dba5, 0x3956c25b, 0x59f111f1, 0x923f82a4, 0xab1c5ed5,
    0xd807aa98, 0x12835b01, 0x243185be, 0x550c7dc3, 0x72be5d74, 0x80deb1fe, 0x9bdc06a7, 0xc19bf174,
    0xe49b69c1, 0xefbe4786, 0x0fc19dc6, 0x240ca1cc, 0x2de92c6f, 0x4a7484aa, 0x5cb0a9dc, 0x76f988da,
    0x983e5152, 0xa831c66d, 0xb00327c8, 0xbf597fc7, 0xc6e00bf3, 0xd5a79147, 0x06ca6351, 0x14292967,
    0x27b70a85, 0x2e1b2138, 0x4d2c6dfc, 0x53380d13, 0x650a7354, 0x766a0abb, 0x81c2c92e, 0x92722c85,
    0xa2bfe8a1, 0xa81a664b, 0xc24b8b70, 0xc76c51a3, 0xd192e819, 0xd6990624, 0xf40e3585, 0x106aa070,
    0x19a4c116, 0x1e376c08, 0x2748774c, 0x34b0bcb5, 0x391c0cb3, 0x4ed8aa4a, 0x5b9cca4f, 0x682e6ff3,
    0x748f82ee, 0x78a5636f, 0x84c87814, 0x8cc70208, 0x90befffa, 0xa4506ceb, 0xbef9a3f7, 0xc67178f2,
];

/// SHA-256 padding bit following the message
const PADDING_BIT: u32 = 0x8000_0000;

/// Bit length of an 80-byte header
const HEADER_BITS: u32 = 640;

/// Bit length of a 32-byte digest
const DIGEST_BITS: u32 = 256;

#[inline(always)]
fn gamma0(x: u32) -> u32 {
    x.rotate_right(7) ^ x.rotate_right(18) ^ (x >> 3)
}

#[inline(always)]
fn gamma1(x: u32) -> u32 {
    x.rotate_right(17) ^ x.rotate_right(19) ^ (x >> 10)
}

#[inline(always)]
fn sigma0(x: u32) -> u32 {
    x.rotate_right(2) ^ x.rotate_right(13) ^ x.rotate_right(22)
}

#[inline(always)]
fn sigma1(x: u32) -> u32 {
    x.rotate_right(6) ^ x.rotate_right(11) ^ x.rotate_right(25)
}

/// SHA-256 compression, in place.
///
/// `scratch[0..16]` must hold the message block on entry. The block is
/// expanded to 64 words in place and the mixed working variables are added
/// into `state` with wrapping arithmetic.
#[inline]
pub fn compress(scratch: &mut Scratch, state: &mut Digest) {
    for i in BLOCK_WORDS..SCRATCH_WORDS {
        scratch[i] = gamma1(scratch[i - 2])
            .wrapping_add(scratch[i - 7])
            .wrapping_add(gamma0(scratch[i - 15]))
            .wrapping_add(scratch[i - 16]);
    }

    let [mut a, mut b, mut c, mut d, mut e, mut f, mut g, mut h] = *state;

    for i in 0..SCRATCH_WORDS {
        let ch = (e & f) ^ (!e & g);
        let maj = (a & b) ^ (a & c) ^ (b & c);
        let t1 = h
            .wrapping_add(sigma1(e))
            .wrapping_add(ch)
            .wrapping_add(K[i])
            .wrapping_add(scratch[i]);
        let t2 = sigma0(a).wrapping_add(maj);

        h = g;
        g = f;
        f = e;
        e = d.wrapping_add(t1);
        d = c;
        c = b;
        b = a;
        a = t1.wrapping_add(t2);
    }

    for (s, v) in state.iter_mut().zip([a, b, c, d, e, f, g, h]) {
        *s = s.wrapping_add(v);
    }
}

/// Compress the first 64 header bytes from the initial state.
///
/// These bytes never change across nonce attempts.
pub fn midstate(words: &HeaderWords) -> Digest {
    let mut scratch = [0u32; SCRATCH_WORDS];
    scratch[..BLOCK_WORDS].copy_from_slice(&words[..BLOCK_WORDS]);
    let mut state = INITIAL_STATE;
    compress(&mut scratch, &mut state);
    state
}

/// Double SHA-256 of a header with `nonce` substituted.
pub fn hash_nonce(midstate: &Digest, words: &HeaderWords, nonce: u32) -> Digest {
    NonceHasher::new(*midstate, words).hash(nonce)
}

/// Reusable double-SHA-256 hasher seeded with a header midstate.
///
/// Each worker owns one; the scratch buffer is never shared.
#[derive(Debug, Clone)]
pub struct NonceHasher {
    midstate: Digest,
    tail: [u32; 3],
    scratch: Scratch,
}

impl NonceHasher {
    /// Create a hasher for the given midstate and header
    pub fn new(midstate: Digest, words: &HeaderWords) -> Self {
        Self::from_parts(
            midstate,
            [words[MERKLE_TAIL_INDEX], words[TIME_INDEX], words[BITS_INDEX]],
        )
    }

    /// Create a hasher from a midstate and the three header words that
    /// precede the nonce (merkle root tail, time, bits)
    pub fn from_parts(midstate: Digest, tail: [u32; 3]) -> Self {
        Self {
            midstate,
            tail,
            scratch: [0u32; SCRATCH_WORDS],
        }
    }

    /// Hash the header with `nonce`
    #[inline]
    pub fn hash(&mut self, nonce: u32) -> Digest {
        let w = &mut self.scratch;

        // Second block of the header: merkle tail, time, bits, nonce
        w[0] = self.tail[0];
        w[1] = self.tail[1];
        w[2] = self.tail[2];
        // The header stores the nonce little-endian
        w[3] = nonce.swap_bytes();
        w[4] = PADDING_BIT;
        w[5..BLOCK_WORDS - 1].fill(0);
        w[BLOCK_WORDS - 1] = HEADER_BITS;

        let mut first = self.midstate;
        compress(w, &mut first);

        w[..STATE_WORDS].copy_from_slice(&first);
        w[STATE_WORDS] = PADDING_BIT;
        w[STATE_WORDS + 1..BLOCK_WORDS - 1].fill(0);
        w[BLOCK_WORDS - 1] = DIGEST_BITS;

        let mut digest = INITIAL_STATE;
        compress(w, &mut digest);
        digest
    }
}
