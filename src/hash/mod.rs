//! # hash
//!
//! The open-addressing k-mer table.
//!
//! [`HashArray`] maps fixed-width keys to saturating counters. Slots are
//! claimed with a compare-and-swap on the key word, so any number of threads
//! can call [`HashArray::add`] on a shared table without a global lock.
//! Collisions are resolved by walking a bounded [`ReprobeSequence`]; a key that
//! finds neither itself nor an empty slot within the limit makes the insert
//! fail with [`HashError::Full`](crate::HashError::Full).

mod array;
mod reprobe;

pub use array::{HashArray, Iter, EMPTY};
pub use reprobe::{mix64, ReprobeSequence};
