//! Lazy recursive bitmap tree.
//!
//! A leaf (depth 0) owns `block_size` counters directly. A node at depth `d`
//! owns up to `block_size` children, each covering `block_size^d` counters;
//! bit `j` of a node's bitmap is cleared exactly when child `j` exists and is
//! fully allocated. Searching a node's own bitmap before descending is what
//! makes allocation return the globally lowest free counter.
//!
//! Children are `Arc`s stamped with an [`OwnerToken`]. A mutating walk edits a
//! node in place only when the node carries the walk's token and clones it
//! otherwise, so trees reachable from an earlier version are never written.

use std::sync::Arc;

use log::trace;

use crate::bitmap::BitMap;
use crate::owner::OwnerToken;

/// A child position: `None` is a placeholder for a fully free range that has
/// not been materialized (or was released).
pub(crate) type Child = Option<Arc<BitMapTree>>;

/// Result of a single allocation attempt against one tree, without growth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Allocation {
    /// The counter (tree numbering) that became allocated.
    Allocated(u64),
    /// The explicit counter was already allocated; nothing changed.
    AlreadyAllocated,
    /// Full, or the explicit counter lies past this tree's range.
    NoRoom,
}

#[derive(Clone, Debug)]
pub(crate) struct BitMapTree {
    begin: u64,
    depth: u32,
    bitmap: BitMap,
    owner: Option<OwnerToken>,
    /// Always empty for leaves. Never ends in a placeholder.
    children: Vec<Child>,
}

impl BitMapTree {
    fn new(begin: u64, depth: u32, block_size: usize, owner: OwnerToken) -> Self {
        Self {
            begin,
            depth,
            bitmap: BitMap::new(block_size),
            owner: Some(owner),
            children: Vec::new(),
        }
    }

    /// An empty single-leaf tree numbered from zero.
    pub(crate) fn empty(block_size: usize, owner: OwnerToken) -> Arc<Self> {
        Arc::new(Self::new(0, 0, block_size, owner))
    }

    #[inline]
    pub(crate) fn depth(&self) -> u32 {
        self.depth
    }

    #[inline]
    pub(crate) fn block_size(&self) -> usize {
        self.bitmap.len()
    }

    #[inline]
    fn is_leaf(&self) -> bool {
        self.depth == 0
    }

    /// Counters covered by one bit of this tree's bitmap.
    #[inline]
    fn span(&self) -> u64 {
        (self.block_size() as u64).saturating_pow(self.depth)
    }

    /// Counters addressable by this tree.
    pub(crate) fn capacity(&self) -> u64 {
        (self.block_size() as u64).saturating_pow(self.depth + 1)
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.bitmap.is_fully_allocated()
    }

    /// No counter in range is allocated.
    fn is_vacant(&self) -> bool {
        if self.is_leaf() {
            self.bitmap.is_fully_free()
        } else {
            self.children.is_empty()
        }
    }

    /// Bitmap index responsible for `counter`, if it lies in this tree's range.
    fn index_of(&self, counter: u64) -> Option<usize> {
        let offset = counter.checked_sub(self.begin)?;
        let index = offset / self.span();
        (index < self.block_size() as u64).then_some(index as usize)
    }

    /// Whether `counter` is allocated. Never mutates.
    pub(crate) fn check(&self, counter: u64) -> bool {
        let Some(index) = self.index_of(counter) else {
            return false;
        };
        if self.bitmap.is_allocated(index) {
            return true;
        }
        match self.children.get(index) {
            Some(Some(child)) => child.check(counter),
            _ => false,
        }
    }

    /// The counter the next implicit allocation will return, found without
    /// mutating. A full tree answers its capacity, the first counter of the
    /// level it would grow into.
    pub(crate) fn lowest_free(&self) -> u64 {
        let Some(index) = self.bitmap.lowest_free() else {
            return self.begin.saturating_add(self.capacity());
        };
        match self.children.get(index) {
            Some(Some(child)) => child.lowest_free(),
            _ => self
                .begin
                .saturating_add(self.span().saturating_mul(index as u64)),
        }
    }

    /// Returns a mutable reference to `node`, cloning it first unless it is
    /// owned by `token`.
    fn edit(node: &mut Arc<Self>, token: OwnerToken) -> &mut Self {
        if node.owner != Some(token) {
            let mut copy = Self::clone(&**node);
            copy.owner = Some(token);
            *node = Arc::new(copy);
        }
        // A token-owned node is only reachable from its epoch's tree, so this
        // does not copy again unless someone else still holds the `Arc`.
        let tree = Arc::make_mut(node);
        tree.owner = Some(token);
        tree
    }

    /// Allocates the lowest free counter, growing the tree while it is full.
    pub(crate) fn allocate(root: &mut Arc<Self>, token: OwnerToken) -> u64 {
        loop {
            if let Allocation::Allocated(counter) = Self::try_allocate(root, None, token) {
                return counter;
            }
            Self::grow(root, token);
        }
    }

    /// Allocates `counter`, growing the tree until it is in range. Returns
    /// `false` if it was already allocated.
    pub(crate) fn allocate_at(root: &mut Arc<Self>, counter: u64, token: OwnerToken) -> bool {
        loop {
            match Self::try_allocate(root, Some(counter), token) {
                Allocation::Allocated(_) => return true,
                Allocation::AlreadyAllocated => return false,
                Allocation::NoRoom => Self::grow(root, token),
            }
        }
    }

    /// One allocation attempt. Nothing is cloned unless a bit changes.
    pub(crate) fn try_allocate(
        node: &mut Arc<Self>,
        counter: Option<u64>,
        token: OwnerToken,
    ) -> Allocation {
        match counter {
            None => {
                if node.is_full() {
                    return Allocation::NoRoom;
                }
                match Self::edit(node, token).allocate_lowest(token) {
                    Some(counter) => Allocation::Allocated(counter),
                    None => Allocation::NoRoom,
                }
            }
            Some(counter) => {
                if node.index_of(counter).is_none() {
                    return Allocation::NoRoom;
                }
                if node.check(counter) {
                    return Allocation::AlreadyAllocated;
                }
                Self::edit(node, token).allocate_counter(counter, token);
                Allocation::Allocated(counter)
            }
        }
    }

    /// Frees `counter`. Returns `false` (and clones nothing) if it was not
    /// allocated. The root itself is never removed, only its children.
    pub(crate) fn deallocate(root: &mut Arc<Self>, counter: u64, token: OwnerToken) -> bool {
        if !root.check(counter) {
            return false;
        }
        Self::edit(root, token).deallocate_counter(counter, token);
        true
    }

    /// Replaces `root` with a root one level taller holding the old root as
    /// its first child.
    fn grow(root: &mut Arc<Self>, token: OwnerToken) {
        let mut taller = Self::new(0, root.depth + 1, root.block_size(), token);
        if !root.is_vacant() {
            if root.is_full() {
                taller.bitmap.mark_allocated(0);
            }
            taller.children.push(Some(Arc::clone(root)));
        }
        trace!(
            "grew counter tree to depth {} (capacity {})",
            taller.depth,
            taller.capacity()
        );
        *root = Arc::new(taller);
    }

    fn allocate_lowest(&mut self, token: OwnerToken) -> Option<u64> {
        let index = self.bitmap.lowest_free()?;
        if self.is_leaf() {
            self.bitmap.mark_allocated(index);
            return Some(self.begin + index as u64);
        }
        let child = self.child_mut(index, token)?;
        let counter = child.allocate_lowest(token)?;
        if child.is_full() {
            self.bitmap.mark_allocated(index);
        }
        Some(counter)
    }

    fn allocate_counter(&mut self, counter: u64, token: OwnerToken) {
        let Some(index) = self.index_of(counter) else {
            return;
        };
        if self.is_leaf() {
            self.bitmap.mark_allocated(index);
            return;
        }
        let Some(child) = self.child_mut(index, token) else {
            return;
        };
        child.allocate_counter(counter, token);
        if child.is_full() {
            self.bitmap.mark_allocated(index);
        }
    }

    fn deallocate_counter(&mut self, counter: u64, token: OwnerToken) {
        let Some(index) = self.index_of(counter) else {
            return;
        };
        if self.is_leaf() {
            self.bitmap.mark_free(index);
            return;
        }
        let Some(Some(slot)) = self.children.get_mut(index) else {
            return;
        };
        let child = Self::edit(slot, token);
        child.deallocate_counter(counter, token);
        let vacant = child.is_vacant();
        self.bitmap.mark_free(index);
        if vacant {
            self.release_child(index);
        }
    }

    /// Materializes child `index` if needed and returns it for editing.
    fn child_mut(&mut self, index: usize, token: OwnerToken) -> Option<&mut Self> {
        let child_depth = self.depth.checked_sub(1)?;
        let child_begin = self
            .begin
            .saturating_add(self.span().saturating_mul(index as u64));
        let block_size = self.block_size();
        if self.children.len() <= index {
            self.children.resize(index + 1, None);
        }
        let slot = self.children[index]
            .get_or_insert_with(|| Arc::new(Self::new(child_begin, child_depth, block_size, token)));
        Some(Self::edit(slot, token))
    }

    /// Drops a child that no longer holds any allocated counter. Only the
    /// terminal child shrinks the sequence; interior ones become
    /// placeholders so positions keep mapping to the same ranges.
    fn release_child(&mut self, index: usize) {
        if index + 1 == self.children.len() {
            self.children.pop();
            while matches!(self.children.last(), Some(None)) {
                self.children.pop();
            }
            trace!(
                "released terminal child {} at depth {}, {} positions remain",
                index,
                self.depth,
                self.children.len()
            );
        } else {
            self.children[index] = None;
        }
    }

    #[cfg(test)]
    pub(crate) fn begin(&self) -> u64 {
        self.begin
    }

    #[cfg(test)]
    pub(crate) fn children(&self) -> &[Child] {
        &self.children
    }

    #[cfg(test)]
    pub(crate) fn materialized_children(&self) -> usize {
        self.children.iter().filter(|c| c.is_some()).count()
    }

    #[cfg(test)]
    pub(crate) fn bitmap(&self) -> &BitMap {
        &self.bitmap
    }

    #[cfg(test)]
    pub(crate) fn owner(&self) -> Option<OwnerToken> {
        self.owner
    }
}
