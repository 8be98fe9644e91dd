//! Counter configuration.

use crate::error::{Error, Result};

/// Width of one storage word in a [`BitMap`](crate::bitmap::BitMap).
pub const WORD_BITS: usize = u32::BITS as usize;

/// Fan-out used when no block size is given.
pub const DEFAULT_BLOCK_SIZE: usize = 32;

/// Configuration shared by [`Counter`](crate::Counter) and
/// [`CounterImmutable`](crate::CounterImmutable).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterConfig {
    /// Offset added to every counter handed out. The tree itself always
    /// numbers from zero.
    pub begin: u64,
    /// Bits per bitmap, which is also the fan-out of every node.
    pub block_size: usize,
}

impl CounterConfig {
    pub fn new(begin: u64, block_size: usize) -> Self {
        Self { begin, block_size }
    }

    pub fn with_begin(mut self, begin: u64) -> Self {
        self.begin = begin;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Rejects block sizes that are zero or not a multiple of [`WORD_BITS`].
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.block_size % WORD_BITS != 0 {
            return Err(Error::InvalidBlockSize {
                block_size: self.block_size,
                word_bits: WORD_BITS,
            });
        }
        Ok(())
    }
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            begin: 0,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}
