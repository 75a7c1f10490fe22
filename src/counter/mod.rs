//! # counter
//!
//! Concurrent bulk construction of a [`HashArray`].
//!
//! A [`Counter`] owns a shared table and a fixed pool of worker threads. The
//! input is handed over as independent [`KmerStream`] partitions which are
//! distributed round-robin across the workers. Each worker encodes its
//! windows, optionally canonicalizes them, and adds them to the table with an
//! increment of one. The table's own claim protocol is the only point of
//! synchronization between workers.
//!
//! A [`HashError::Full`](crate::HashError::Full) raised by any worker fails
//! the whole build: the other workers stop at their next window and the
//! table is discarded.
//!
//! ```
//! use kmerhash::CounterBuilder;
//!
//! # fn main() -> kmerhash::Result<()> {
//! let counter = CounterBuilder::new(4).threads(2).canonical(true).build()?;
//! let (ary, stats) = counter.count_sequences(vec![b"ACGTTGCA".to_vec()])?;
//! assert_eq!(stats.windows, 5);
//! assert_eq!(ary.get_kmer(b"ACGT", true)?, 1);
//! # Ok(())
//! # }
//! ```

mod stream;

pub use stream::{KmerStream, SequenceWindows};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::{
    codec::KeyCodec,
    error::{CountError, Error, Result},
    format::Header,
    HashArray,
};

/// Default in-memory counter width in bits
pub const DEFAULT_VAL_LEN: u32 = 32;

/// Default reprobe limit
pub const DEFAULT_REPROBE_LIMIT: usize = 126;

/// Default number of distinct keys the table is sized for
pub const DEFAULT_CAPACITY: usize = 1 << 20;

/// Lifecycle of a counting worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Spawned, no partition assigned yet
    Idle,
    /// Pulling windows from its partitions
    Consuming,
    /// Partitions exhausted or an error raised
    Done,
}

/// Statistics of a counting run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CountStats {
    /// Windows pulled from the streams
    pub windows: usize,
    /// Windows skipped because they hold a non-ACGT symbol
    pub invalid: usize,
    /// Windows added to the table
    pub inserted: usize,
}
impl CountStats {
    /// Accumulates the statistics of another worker
    pub fn merge(&mut self, other: &Self) {
        self.windows += other.windows;
        self.invalid += other.invalid;
        self.inserted += other.inserted;
    }
}

/// Configuration of a [`Counter`]
#[derive(Debug, Clone, Copy)]
pub struct CounterBuilder {
    k: usize,
    threads: usize,
    canonical: bool,
    capacity: usize,
    val_len: u32,
    reprobe_limit: usize,
}
impl CounterBuilder {
    /// Starts a configuration for k-mers of length `k`
    #[must_use]
    pub fn new(k: usize) -> Self {
        Self {
            k,
            threads: 0,
            canonical: false,
            capacity: DEFAULT_CAPACITY,
            val_len: DEFAULT_VAL_LEN,
            reprobe_limit: DEFAULT_REPROBE_LIMIT,
        }
    }

    /// Number of worker threads (0 uses every available CPU)
    #[must_use]
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Stores each k-mer under the smaller of itself and its reverse complement
    #[must_use]
    pub fn canonical(mut self, canonical: bool) -> Self {
        self.canonical = canonical;
        self
    }

    /// Expected number of distinct k-mers
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// In-memory counter width in bits
    #[must_use]
    pub fn val_len(mut self, val_len: u32) -> Self {
        self.val_len = val_len;
        self
    }

    #[must_use]
    pub fn reprobe_limit(mut self, reprobe_limit: usize) -> Self {
        self.reprobe_limit = reprobe_limit;
        self
    }

    /// Allocates the table
    ///
    /// # Errors
    ///
    /// Fails if `k` is not in `1..=31` or if the value width or reprobe limit
    /// is rejected by [`HashArray::new`].
    pub fn build(self) -> Result<Counter> {
        let codec = KeyCodec::new(self.k)?;
        let ary = HashArray::new(
            self.capacity,
            codec.key_bits(),
            self.val_len,
            self.reprobe_limit,
        )?;
        let threads = if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        };
        info!(
            "Allocated hash of {} slots for k={}; approximate memory {} MB",
            ary.capacity(),
            self.k,
            ary.memory_bytes() / 1_000_000 + 1
        );
        Ok(Counter {
            ary: Arc::new(ary),
            codec,
            canonical: self.canonical,
            threads,
        })
    }
}

/// Multi-threaded k-mer counter over a single shared table
#[derive(Debug)]
pub struct Counter {
    ary: Arc<HashArray>,
    codec: KeyCodec,
    canonical: bool,
    threads: usize,
}
impl Counter {
    #[must_use]
    pub fn k(&self) -> usize {
        self.codec.k()
    }

    #[must_use]
    pub fn is_canonical(&self) -> bool {
        self.canonical
    }

    /// Number of worker threads that will be spawned at most
    #[must_use]
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Header describing the table, ready to be used as a dump template
    #[must_use]
    pub fn header_template(&self, counter_len: u32) -> Header {
        Header::for_array(&self.ary, counter_len).with_canonical(self.canonical)
    }

    /// Counts the windows of in-memory sequences
    pub fn count_sequences(self, sequences: Vec<Vec<u8>>) -> Result<(HashArray, CountStats)> {
        let streams = SequenceWindows::partition(sequences, self.codec.k(), self.threads);
        self.count(streams)
    }

    /// Counts every window of every stream and returns the populated table
    ///
    /// Streams are assigned round-robin to `min(threads, streams.len())`
    /// workers. All workers are joined before returning.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a worker (typically
    /// [`HashError::Full`](crate::HashError::Full)) or
    /// [`CountError::WorkerPanicked`] if a worker panicked. The table is
    /// dropped in both cases.
    pub fn count<S>(self, streams: Vec<S>) -> Result<(HashArray, CountStats)>
    where
        S: KmerStream + 'static,
    {
        let num_workers = self.threads.min(streams.len()).max(1);
        let mut partitions: Vec<Vec<S>> = (0..num_workers).map(|_| Vec::new()).collect();
        for (idx, stream) in streams.into_iter().enumerate() {
            partitions[idx % num_workers].push(stream);
        }

        let abort = Arc::new(AtomicBool::new(false));
        let handles: Vec<JoinHandle<Result<CountStats>>> = partitions
            .into_iter()
            .enumerate()
            .map(|(tid, streams)| {
                let mut worker = Worker {
                    tid,
                    ary: Arc::clone(&self.ary),
                    codec: self.codec,
                    canonical: self.canonical,
                    abort: Arc::clone(&abort),
                    state: WorkerState::Idle,
                    stats: CountStats::default(),
                };
                std::thread::spawn(move || worker.run(streams))
            })
            .collect();

        let mut stats = CountStats::default();
        let mut first_error: Option<Error> = None;
        for (tid, handle) in handles.into_iter().enumerate() {
            let outcome = match handle.join() {
                Ok(outcome) => outcome,
                Err(_) => {
                    abort.store(true, Ordering::Relaxed);
                    Err(CountError::WorkerPanicked(tid).into())
                }
            };
            match outcome {
                Ok(worker_stats) => stats.merge(&worker_stats),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            warn!("Counting aborted: {e}");
            return Err(e);
        }

        let ary = Arc::try_unwrap(self.ary).map_err(|_| CountError::TableStillShared)?;
        info!(
            "Counted {} windows ({} invalid skipped) into {} distinct keys using {} threads",
            stats.windows,
            stats.invalid,
            ary.len(),
            num_workers
        );
        Ok((ary, stats))
    }
}

/// A single counting thread
struct Worker {
    tid: usize,
    ary: Arc<HashArray>,
    codec: KeyCodec,
    canonical: bool,
    abort: Arc<AtomicBool>,
    state: WorkerState,
    stats: CountStats,
}
impl Worker {
    fn transition(&mut self, state: WorkerState) {
        debug!("Worker {}: {:?} -> {:?}", self.tid, self.state, state);
        self.state = state;
    }

    fn run<S: KmerStream>(&mut self, streams: Vec<S>) -> Result<CountStats> {
        self.transition(WorkerState::Consuming);
        let outcome = self.consume(streams);
        if outcome.is_err() {
            self.abort.store(true, Ordering::Relaxed);
        }
        self.transition(WorkerState::Done);
        outcome.map(|()| self.stats)
    }

    fn consume<S: KmerStream>(&mut self, streams: Vec<S>) -> Result<()> {
        for mut stream in streams {
            while let Some(window) = stream.next_window() {
                if self.abort.load(Ordering::Relaxed) {
                    return Ok(());
                }
                self.stats.windows += 1;
                let key = match self.codec.encode_with(window, self.canonical) {
                    Ok(key) => key,
                    Err(e) if e.is_recoverable() => {
                        self.stats.invalid += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                self.ary.add(key, 1)?;
                self.stats.inserted += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::HashError;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;

    fn random_sequences(rng: &mut SmallRng, n: usize, len: usize) -> Vec<Vec<u8>> {
        (0..n)
            .map(|_| (0..len).map(|_| b"ACGT"[rng.random_range(0..4)]).collect())
            .collect()
    }

    fn reference_counts(sequences: &[Vec<u8>], codec: KeyCodec, canonical: bool) -> HashMap<u64, u64> {
        let mut counts = HashMap::new();
        for seq in sequences {
            for window in seq.windows(codec.k()) {
                if let Ok(key) = codec.encode_with(window, canonical) {
                    *counts.entry(key).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    #[test]
    fn test_order_independence() -> anyhow::Result<()> {
        let mut rng = SmallRng::seed_from_u64(42);
        let sequences = random_sequences(&mut rng, 24, 150);
        let codec = KeyCodec::new(11)?;
        let expected = reference_counts(&sequences, codec, true);

        for threads in [1, 2, 7] {
            let counter = CounterBuilder::new(11)
                .threads(threads)
                .canonical(true)
                .capacity(8192)
                .build()?;
            let (ary, stats) = counter.count_sequences(sequences.clone())?;
            assert_eq!(stats.windows, 24 * 140);
            assert_eq!(stats.invalid, 0);
            assert_eq!(ary.len(), expected.len());
            for (key, count) in &expected {
                assert_eq!(ary.get(*key), Some(*count), "threads={threads}");
            }
        }
        Ok(())
    }

    #[test]
    fn test_canonical_merges_strands() -> anyhow::Result<()> {
        let counter = CounterBuilder::new(5).threads(2).canonical(true).build()?;
        let (ary, _) = counter.count_sequences(vec![b"AACGT".to_vec(), b"ACGTT".to_vec()])?;
        assert_eq!(ary.len(), 1);
        assert_eq!(ary.get_kmer(b"AACGT", true)?, 2);

        let counter = CounterBuilder::new(5).threads(2).build()?;
        let (ary, _) = counter.count_sequences(vec![b"AACGT".to_vec(), b"ACGTT".to_vec()])?;
        assert_eq!(ary.len(), 2);
        assert_eq!(ary.get_kmer(b"AACGT", false)?, 1);
        Ok(())
    }

    #[test]
    fn test_invalid_windows_skipped() -> anyhow::Result<()> {
        let counter = CounterBuilder::new(3).threads(1).build()?;
        let (ary, stats) = counter.count_sequences(vec![b"ACNGTA".to_vec()])?;
        // ACN, CNG, NGT are invalid; GTA is kept
        assert_eq!(stats.windows, 4);
        assert_eq!(stats.invalid, 3);
        assert_eq!(stats.inserted, 1);
        assert_eq!(ary.get_kmer(b"GTA", false)?, 1);
        Ok(())
    }

    #[test]
    fn test_full_fails_the_build() -> anyhow::Result<()> {
        let mut rng = SmallRng::seed_from_u64(7);
        let sequences = random_sequences(&mut rng, 8, 200);
        let counter = CounterBuilder::new(15)
            .threads(4)
            .capacity(4)
            .reprobe_limit(2)
            .build()?;
        match counter.count_sequences(sequences) {
            Err(Error::HashError(HashError::Full { .. })) => {}
            other => panic!("expected Full, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_boxed_streams() -> anyhow::Result<()> {
        let streams: Vec<Box<dyn KmerStream>> = vec![
            Box::new(SequenceWindows::new(vec![b"AAAA".to_vec()], 2)),
            Box::new(SequenceWindows::new(vec![b"CCC".to_vec()], 2)),
        ];
        let counter = CounterBuilder::new(2).threads(2).build()?;
        let (ary, stats) = counter.count(streams)?;
        assert_eq!(stats.inserted, 5);
        assert_eq!(ary.get_kmer(b"AA", false)?, 3);
        assert_eq!(ary.get_kmer(b"CC", false)?, 2);
        Ok(())
    }

    #[test]
    fn test_invalid_k() {
        assert!(CounterBuilder::new(0).build().is_err());
        assert!(CounterBuilder::new(32).build().is_err());
    }

    #[test]
    fn test_header_template() -> anyhow::Result<()> {
        let counter = CounterBuilder::new(31).capacity(1000).val_len(8).canonical(true).build()?;
        let header = counter.header_template(1);
        assert_eq!(header.key_len, 62);
        assert_eq!(header.val_len, 8);
        assert!(header.canonical);
        Ok(())
    }
}
