//! # kmerhash
//!
//! A disk-backed k-mer counting hash table.
//!
//! The crate stores `(k-mer, count)` pairs in a fixed-width open-addressing
//! table, fills it concurrently from many threads, and persists it in a
//! binary layout made of a JSON header followed by packed little-endian
//! records.
//!
//! The main pieces are:
//!
//! * [`KeyCodec`] packs nucleotide windows into 2-bit keys and computes
//!   reverse complements and canonical forms.
//! * [`HashArray`] is the lock-free table with bounded quadratic reprobing.
//! * [`Counter`] (built from a [`CounterBuilder`]) drives worker threads that
//!   consume [`KmerStream`] partitions into a shared table.
//! * [`HashDumper`] writes a table to disk and [`HashLoader`] reads it back.
//!
//! ```no_run
//! use kmerhash::{CounterBuilder, HashDumper, HashLoader};
//!
//! # fn main() -> kmerhash::Result<()> {
//! let counter = CounterBuilder::new(25)
//!     .canonical(true)
//!     .capacity(1_000_000)
//!     .threads(8)
//!     .build()?;
//! let template = counter.header_template(4);
//! let (ary, stats) = counter.count_sequences(vec![b"ACGT".repeat(100)])?;
//! println!("{} windows, {} distinct", stats.windows, ary.len());
//!
//! HashDumper::new(template).shards(4).dump(&ary, "counts.jf")?;
//! let reloaded = HashLoader::new().load("counts.jf")?;
//! assert_eq!(reloaded.len(), ary.len());
//! # Ok(())
//! # }
//! ```

mod codec;
pub mod counter;
pub mod dumper;
mod error;
pub mod format;
pub mod hash;
pub mod loader;
mod utils;

pub use codec::{KeyCodec, MAX_K, MAX_KEY_LEN};
pub use counter::{Counter, CounterBuilder, CountStats, KmerStream, SequenceWindows, WorkerState};
pub use dumper::{dump, dump_to_writer, HashDumper};
pub use error::{CountError, Error, HashError, HeaderError, KeyError, LoadError, Result};
pub use format::{Header, FORMAT_BINARY, FORMAT_BLOOM, FORMAT_TEXT};
pub use hash::{HashArray, ReprobeSequence};
pub use loader::{load, load_header, HashLoader};
