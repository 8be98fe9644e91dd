//! # resource-counter
//!
//! Dense, reusable integer counters (file descriptors, object handles and the
//! like) without a preallocated table.
//!
//! Allocation always returns the lowest free counter, so freed counters are
//! reused before the counter space grows. Counters live in a lazy recursive
//! bitmap tree: leaves hold `block_size` counters each, interior nodes record
//! which children are full, and the tree gains a level whenever the root
//! fills up. Every operation is `O(log_block_size(max_counter))`.
//!
//! Two facades share that tree:
//!
//! - [`Counter`] mutates in place.
//! - [`CounterImmutable`] is persistent. Each operation returns a new version
//!   that shares all untouched subtrees with the old one, and
//!   [`CounterImmutable::transaction`] batches many operations into one
//!   version.
//!
//! ## Example
//!
//! ```rust
//! use resource_counter::{Counter, CounterImmutable};
//!
//! let mut c = Counter::default();
//! assert_eq!(c.allocate().unwrap(), 0);
//! assert_eq!(c.allocate().unwrap(), 1);
//! assert!(c.deallocate(0));
//! assert_eq!(c.allocate().unwrap(), 0);
//!
//! let v1 = CounterImmutable::default();
//! let (n, v2) = v1.allocate().unwrap();
//! assert_eq!(n, 0);
//! assert!(!v1.check(0));
//! assert!(v2.check(0));
//!
//! let unchanged = v2.transaction(|ct| {
//!     ct.check(5);
//! });
//! assert!(unchanged.ptr_eq(&v2));
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod bitmap;
pub mod config;
pub mod error;

mod counter;
mod immutable;
mod owner;
mod tree;

pub use config::{CounterConfig, DEFAULT_BLOCK_SIZE};
pub use counter::Counter;
pub use error::{Error, Result};
pub use immutable::CounterImmutable;

#[cfg(test)]
mod proptests;
