//! Mutable counter facade.

use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::config::CounterConfig;
use crate::error::{Error, Result};
use crate::immutable::CounterImmutable;
use crate::owner::OwnerToken;
use crate::tree::BitMapTree;

/// Allocates the lowest free counter at or above `begin`, reusing freed
/// counters before handing out new ones.
///
/// A `Counter` edits its tree in place. It is also the view passed to
/// [`CounterImmutable::transaction`], where the first edit of each node clones
/// it away from the published version.
///
/// ```rust
/// use resource_counter::Counter;
///
/// let mut c = Counter::new(10, 32).unwrap();
/// assert_eq!(c.allocate().unwrap(), 10);
/// assert_eq!(c.allocate().unwrap(), 11);
/// assert!(c.deallocate(10));
/// assert_eq!(c.allocate().unwrap(), 10);
/// ```
pub struct Counter {
    begin: u64,
    root: Arc<BitMapTree>,
    token: OwnerToken,
}

impl Counter {
    /// Creates a counter starting at `begin` with the given block size.
    ///
    /// Fails with [`Error::InvalidBlockSize`] unless `block_size` is a positive
    /// multiple of 32.
    pub fn new(begin: u64, block_size: usize) -> Result<Self> {
        Self::with_config(CounterConfig::new(begin, block_size))
    }

    pub fn with_config(config: CounterConfig) -> Result<Self> {
        config.validate()?;
        let token = OwnerToken::fresh();
        Ok(Self {
            begin: config.begin,
            root: BitMapTree::empty(config.block_size, token),
            token,
        })
    }

    /// A view over a published tree, editing under a token of its own.
    pub(crate) fn from_root(begin: u64, root: Arc<BitMapTree>) -> Self {
        Self {
            begin,
            root,
            token: OwnerToken::fresh(),
        }
    }

    #[cfg(test)]
    pub(crate) fn root(&self) -> &Arc<BitMapTree> {
        &self.root
    }

    pub(crate) fn into_root(self) -> Arc<BitMapTree> {
        self.root
    }

    #[inline]
    pub fn begin(&self) -> u64 {
        self.begin
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.root.block_size()
    }

    /// Height of the tree; 0 while everything fits in a single leaf.
    #[inline]
    pub fn depth(&self) -> u32 {
        self.root.depth()
    }

    /// Allocates the lowest free counter.
    ///
    /// Fails with [`Error::Exhausted`], leaving the counter unchanged, once
    /// every counter from [`begin`](Self::begin) to `u64::MAX` is allocated.
    pub fn allocate(&mut self) -> Result<u64> {
        let counter = counter_at(self.begin, self.root.lowest_free())?;
        let offset = BitMapTree::allocate(&mut self.root, self.token);
        debug_assert_eq!(self.begin.checked_add(offset), Some(counter));
        Ok(counter)
    }

    /// Allocates a specific counter. Returns `false` if it was already
    /// allocated, and [`Error::BelowBegin`] if it is below [`begin`](Self::begin).
    pub fn allocate_at(&mut self, counter: u64) -> Result<bool> {
        let offset = self.offset(counter)?;
        Ok(BitMapTree::allocate_at(&mut self.root, offset, self.token))
    }

    /// Frees a counter. Returns `false` if it was not allocated.
    pub fn deallocate(&mut self, counter: u64) -> bool {
        match counter.checked_sub(self.begin) {
            Some(offset) => BitMapTree::deallocate(&mut self.root, offset, self.token),
            None => false,
        }
    }

    /// Whether `counter` is currently allocated.
    pub fn check(&self, counter: u64) -> bool {
        counter
            .checked_sub(self.begin)
            .is_some_and(|offset| self.root.check(offset))
    }

    /// Publishes the current state as an immutable counter and keeps going.
    ///
    /// The counter switches to a fresh token, so its next edits clone the
    /// nodes now shared with the snapshot instead of writing through them.
    pub fn snapshot(&mut self) -> CounterImmutable {
        self.token = OwnerToken::fresh();
        debug!("published counter snapshot at depth {}", self.depth());
        CounterImmutable::from_root(self.begin, Arc::clone(&self.root))
    }

    /// Consumes the counter and publishes its state.
    pub fn into_immutable(self) -> CounterImmutable {
        CounterImmutable::from_root(self.begin, self.root)
    }

    fn offset(&self, counter: u64) -> Result<u64> {
        counter.checked_sub(self.begin).ok_or(Error::BelowBegin {
            counter,
            begin: self.begin,
        })
    }
}

/// Maps a tree offset back to a counter, if it is representable.
pub(crate) fn counter_at(begin: u64, offset: u64) -> Result<u64> {
    begin.checked_add(offset).ok_or(Error::Exhausted { begin })
}

impl Default for Counter {
    fn default() -> Self {
        let token = OwnerToken::fresh();
        let config = CounterConfig::default();
        Self {
            begin: config.begin,
            root: BitMapTree::empty(config.block_size, token),
            token,
        }
    }
}

impl Clone for Counter {
    /// Shares the whole tree; the copy gets its own token so the two diverge
    /// by copy-on-write.
    fn clone(&self) -> Self {
        Self::from_root(self.begin, Arc::clone(&self.root))
    }
}

impl From<Counter> for CounterImmutable {
    fn from(counter: Counter) -> Self {
        counter.into_immutable()
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counter")
            .field("begin", &self.begin)
            .field("block_size", &self.block_size())
            .field("depth", &self.depth())
            .finish()
    }
}
