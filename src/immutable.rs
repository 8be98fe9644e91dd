//! Persistent counter facade.
//!
//! Every [`CounterImmutable`] is a frozen version. Mutating operations return a
//! new version next to their result and leave the receiver untouched; versions
//! share every subtree that the operation did not have to change. An operation
//! that changes nothing returns a version that is [`ptr_eq`] to the receiver.
//!
//! Batches go through [`transaction`], which hands a mutable [`Counter`] view
//! to a closure. The view clones each node at most once, on first edit, and
//! edits it in place afterwards; at most one new version is published.
//!
//! [`ptr_eq`]: CounterImmutable::ptr_eq
//! [`transaction`]: CounterImmutable::transaction

use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::config::CounterConfig;
use crate::counter::{counter_at, Counter};
use crate::error::{Error, Result};
use crate::owner::OwnerToken;
use crate::tree::BitMapTree;

/// An immutable, cheaply cloneable counter version.
///
/// ```rust
/// use resource_counter::CounterImmutable;
///
/// let c1 = CounterImmutable::default();
/// let (a0, c2) = c1.allocate().unwrap();
/// let (a1, c3) = c2.allocate().unwrap();
/// assert_eq!((a0, a1), (0, 1));
/// assert!(!c1.check(0));
/// assert!(c2.check(0) && !c2.check(1));
/// assert!(c3.check(1));
///
/// let c4 = c3.transaction(|ct| {
///     ct.deallocate(0);
///     ct.allocate_at(7).unwrap();
/// });
/// assert!(!c4.check(0) && c4.check(7));
/// assert!(c3.check(0) && !c3.check(7));
/// ```
#[derive(Clone)]
pub struct CounterImmutable {
    begin: u64,
    root: Arc<BitMapTree>,
}

impl CounterImmutable {
    /// Creates an empty counter starting at `begin`.
    ///
    /// Fails with [`Error::InvalidBlockSize`] unless `block_size` is a positive
    /// multiple of 32.
    pub fn new(begin: u64, block_size: usize) -> Result<Self> {
        Self::with_config(CounterConfig::new(begin, block_size))
    }

    pub fn with_config(config: CounterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            begin: config.begin,
            root: BitMapTree::empty(config.block_size, OwnerToken::fresh()),
        })
    }

    pub(crate) fn from_root(begin: u64, root: Arc<BitMapTree>) -> Self {
        Self { begin, root }
    }

    #[cfg(test)]
    pub(crate) fn root(&self) -> &Arc<BitMapTree> {
        &self.root
    }

    #[inline]
    pub fn begin(&self) -> u64 {
        self.begin
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.root.block_size()
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.root.depth()
    }

    /// Allocates the lowest free counter, returning it with the new version.
    ///
    /// Fails with [`Error::Exhausted`] once every counter from
    /// [`begin`](Self::begin) to `u64::MAX` is allocated.
    pub fn allocate(&self) -> Result<(u64, Self)> {
        let counter = counter_at(self.begin, self.root.lowest_free())?;
        let mut root = Arc::clone(&self.root);
        BitMapTree::allocate(&mut root, OwnerToken::fresh());
        Ok((counter, self.derive(root)))
    }

    /// Allocates a specific counter. Returns `false` and this same version if
    /// it was already allocated.
    pub fn allocate_at(&self, counter: u64) -> Result<(bool, Self)> {
        let offset = counter.checked_sub(self.begin).ok_or(Error::BelowBegin {
            counter,
            begin: self.begin,
        })?;
        let mut root = Arc::clone(&self.root);
        let changed = BitMapTree::allocate_at(&mut root, offset, OwnerToken::fresh());
        Ok((changed, self.derive(root)))
    }

    /// Frees a counter. Returns `false` and this same version if it was not
    /// allocated.
    pub fn deallocate(&self, counter: u64) -> (bool, Self) {
        let Some(offset) = counter.checked_sub(self.begin) else {
            return (false, self.clone());
        };
        let mut root = Arc::clone(&self.root);
        let changed = BitMapTree::deallocate(&mut root, offset, OwnerToken::fresh());
        (changed, self.derive(root))
    }

    /// Whether `counter` is allocated in this version.
    pub fn check(&self, counter: u64) -> bool {
        counter
            .checked_sub(self.begin)
            .is_some_and(|offset| self.root.check(offset))
    }

    /// Runs `f` against a mutable view and publishes the result.
    ///
    /// Returns a version [`ptr_eq`](Self::ptr_eq) to `self` when `f` changed
    /// nothing. Calling `transaction` again inside `f` (on this or any other
    /// version) opens an independent transaction with its own token.
    pub fn transaction<F>(&self, f: F) -> Self
    where
        F: FnOnce(&mut Counter),
    {
        let mut view = self.transient();
        f(&mut view);
        self.commit(view)
    }

    /// Like [`transaction`](Self::transaction), but publishes nothing if `f`
    /// fails.
    pub fn try_transaction<F, E>(&self, f: F) -> Result<Self, E>
    where
        F: FnOnce(&mut Counter) -> Result<(), E>,
    {
        let mut view = self.transient();
        f(&mut view)?;
        Ok(self.commit(view))
    }

    /// A standalone mutable counter starting from this version.
    ///
    /// Its edits never reach `self` or any version derived from `self`;
    /// publish them with [`Counter::into_immutable`] or [`Counter::snapshot`].
    pub fn transient(&self) -> Counter {
        Counter::from_root(self.begin, Arc::clone(&self.root))
    }

    /// Whether both values are the same published version.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.begin == other.begin && Arc::ptr_eq(&self.root, &other.root)
    }

    /// Publishes whatever `view` holds now, which need not be the counter the
    /// transaction started from.
    fn commit(&self, view: Counter) -> Self {
        let begin = view.begin();
        let root = view.into_root();
        let next = if begin == self.begin {
            self.derive(root)
        } else {
            Self::from_root(begin, root)
        };
        if next.ptr_eq(self) {
            debug!("transaction left the counter unchanged");
        } else {
            debug!("transaction committed at depth {}", next.depth());
        }
        next
    }

    fn derive(&self, root: Arc<BitMapTree>) -> Self {
        if Arc::ptr_eq(&root, &self.root) {
            self.clone()
        } else {
            Self::from_root(self.begin, root)
        }
    }
}

impl Default for CounterImmutable {
    fn default() -> Self {
        Counter::default().into_immutable()
    }
}

impl fmt::Debug for CounterImmutable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterImmutable")
            .field("begin", &self.begin)
            .field("block_size", &self.block_size())
            .field("depth", &self.depth())
            .field("root", &Arc::as_ptr(&self.root))
            .finish()
    }
}
