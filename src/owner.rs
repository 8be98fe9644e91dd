//! Ownership tokens for copy-on-write.
//!
//! Every mutating walk carries one token. A node whose stored owner equals the
//! walk's token was created (or already cloned) by that walk's epoch and may
//! be edited in place; any other node is cloned first. Tokens are never
//! reused, so retiring a token publishes every node stamped with it.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier of a transaction epoch.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct OwnerToken(NonZeroU64);

impl OwnerToken {
    /// Returns a token no other live or past epoch has used.
    pub fn fresh() -> Self {
        let id = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        // Starts at 1 and would need 2^64 tokens to wrap.
        Self(NonZeroU64::new(id).unwrap_or(NonZeroU64::MIN))
    }
}
