//! Error types for counter construction and explicit allocation.

use thiserror::Error;

/// Errors surfaced by the counter facades.
///
/// Tree-internal conditions (a full subtree, a counter beyond the current
/// range) are resolved by growing the tree and never show up here. Freeing a
/// free counter or allocating an allocated one is reported as `false`, not as
/// an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The block size is zero or not a multiple of the bitmap word width.
    #[error("block size must be a positive multiple of {word_bits}, got {block_size}")]
    InvalidBlockSize {
        /// The rejected block size.
        block_size: usize,
        /// Word width the block size must be a multiple of.
        word_bits: usize,
    },

    /// An explicit counter lies below the facade's starting offset.
    #[error("counter {counter} is below the starting offset {begin}")]
    BelowBegin {
        /// The rejected counter.
        counter: u64,
        /// Starting offset of the facade.
        begin: u64,
    },

    /// Every counter from the starting offset up to `u64::MAX` is allocated.
    #[error("no free counter left between {begin} and u64::MAX")]
    Exhausted {
        /// Starting offset of the facade.
        begin: u64,
    },
}

/// A specialized Result type for counter operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
