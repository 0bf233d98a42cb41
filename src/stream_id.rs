//! Stream-ID allocator (§4.3): gives out unique ids in `[1, 32767]`.
//!
//! Backed by a 32768-bit bitset (one bit per candidate id, including the
//! reserved id 0) with a scanning cursor, giving O(1) amortized `alloc`/`free`.
//! Not thread-safe on its own — the enclosing [`crate::connection::Connection`]
//! holds the single mutex that covers the allocator and its handler table
//! together (§3 invariants, §5 shared resources).

use crate::error::{Error, Result};

const DOMAIN_BITS: usize = 1 << 15; // ids 0..=32767
const WORD_BITS: usize = 64;
const WORDS: usize = DOMAIN_BITS / WORD_BITS;

pub const MAX_STREAM_ID: i16 = 32767;

/// Allocates and reclaims 15-bit stream ids.
pub struct StreamIdAllocator {
    /// Bit set means "free". Word 0 bit 0 is id 0, permanently cleared
    /// (reserved for server-initiated EVENT frames).
    free: [u64; WORDS],
    cursor: usize,
    outstanding: usize,
}

impl Default for StreamIdAllocator {
    fn default() -> Self {
        let mut free = [u64::MAX; WORDS];
        free[0] &= !1; // id 0 is reserved, never allocatable
        Self {
            free,
            cursor: 0,
            outstanding: 0,
        }
    }
}

impl StreamIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the smallest free id, or `AllStreamsBusy` if none remain.
    pub fn alloc(&mut self) -> Result<i16> {
        for i in 0..WORDS {
            let idx = (self.cursor + i) % WORDS;
            let word = self.free[idx];
            if word != 0 {
                let bit = word.trailing_zeros() as usize;
                self.free[idx] &= !(1 << bit);
                self.cursor = idx;
                self.outstanding += 1;
                return Ok((idx * WORD_BITS + bit) as i16);
            }
        }
        Err(Error::AllStreamsBusy)
    }

    /// Returns `id` to the free pool. Idempotent: freeing an already-free id
    /// (or id 0) is a no-op, since double-free is a caller bug this allocator
    /// need not punish with a panic.
    pub fn free(&mut self, id: i16) {
        if id == 0 || id < 0 {
            return;
        }
        let id = id as usize;
        let (word, bit) = (id / WORD_BITS, id % WORD_BITS);
        if word >= WORDS {
            return;
        }
        let was_free = self.free[word] & (1 << bit) != 0;
        self.free[word] |= 1 << bit;
        if !was_free {
            self.outstanding = self.outstanding.saturating_sub(1);
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn capacity(&self) -> usize {
        MAX_STREAM_ID as usize
    }
}
