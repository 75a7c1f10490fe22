//! Writing k-mer hashes to disk
//!
//! A dump is the header followed by one record per occupied slot, in slot
//! order. Large tables can be serialized by several threads: the slot range
//! is cut into contiguous shards of bounded size, and shards are packed in
//! waves of one shard per thread. Each wave is written in shard order before
//! the next one starts, so the file is identical to a single-threaded dump
//! and at most one wave of packed records is held in memory.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::Path;
use std::thread;

use tracing::{debug, info};

use crate::{
    error::{CountError, Error, Result},
    format::{Header, RecordLayout, RecordWriter, FORMAT_BINARY},
    HashArray,
};

/// Dumps hash tables using a header template
///
/// # Examples
///
/// ```no_run
/// use kmerhash::{CounterBuilder, HashDumper};
///
/// # fn main() -> kmerhash::Result<()> {
/// let counter = CounterBuilder::new(21).canonical(true).build()?;
/// let template = counter.header_template(4);
/// let (ary, _) = counter.count_sequences(vec![b"ACGTACGTACGTACGTACGTACGT".to_vec()])?;
///
/// HashDumper::new(template)
///     .shards(4)
///     .dump(&ary, "counts.jf")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HashDumper {
    template: Header,
    shards: usize,
    shard_slots: usize,
}
impl HashDumper {
    #[must_use]
    pub fn new(template: Header) -> Self {
        Self {
            template,
            shards: 1,
            shard_slots: MAX_SHARD_SLOTS,
        }
    }

    /// Number of threads serializing the records (0 uses every available CPU)
    #[must_use]
    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Largest number of slots packed by a single shard
    ///
    /// Bounds the memory held by a wave to `shards * shard_slots` records.
    #[must_use]
    pub fn shard_slots(mut self, shard_slots: usize) -> Self {
        self.shard_slots = shard_slots.max(1);
        self
    }

    /// Header written for `ary`
    ///
    /// The provenance and `counter_len` of the template are kept; the format,
    /// widths, reprobe parameters, and size come from the table.
    pub fn header_for(&self, ary: &HashArray) -> Result<Header> {
        let mut header = self.template.clone();
        header.format = FORMAT_BINARY.to_string();
        header.key_len = ary.key_len();
        header.val_len = ary.val_len();
        header.max_reprobe = ary.reprobe_limit() as u64;
        header.max_reprobe_offset = ary.reprobes().max_offset();
        header.size = ary.capacity() as u64;
        header.offset = 0;
        header.touch();
        header.validate()?;
        Ok(header)
    }

    /// Writes `ary` to `path`, replacing any existing file
    pub fn dump<P: AsRef<Path>>(&self, ary: &HashArray, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| Error::with_path(path, e))?;
        let mut writer = BufWriter::new(file);
        let records = self.dump_to_writer(ary, &mut writer).map_err(|e| match e {
            Error::IoError(source) => Error::with_path(path, source),
            other => other,
        })?;
        writer.flush().map_err(|e| Error::with_path(path, e))?;
        info!("Dumped {} records to {}", records, path.display());
        Ok(())
    }

    /// Writes `ary` to `writer` and returns the number of records written
    pub fn dump_to_writer<W: Write>(&self, ary: &HashArray, writer: &mut W) -> Result<usize> {
        let header = self.header_for(ary)?;
        let offset = header.write_bytes(writer)?;
        debug!("Wrote header of {} bytes\n{}", offset, header);

        let layout = RecordLayout::from_header(&header);
        let threads = self.num_shards();
        if threads == 1 {
            let mut records = RecordWriter::new(&mut *writer, layout);
            for (key, value) in ary.iter() {
                records.write_record(key, value)?;
            }
            return Ok(records.records_written());
        }

        let shards = shard_ranges(ary.capacity(), threads, self.shard_slots);
        let mut total = 0;
        for (wave, ranges) in shards.chunks(threads).enumerate() {
            for (buffer, count) in pack_shards(ary, layout, ranges, wave * threads)? {
                writer.write_all(&buffer)?;
                total += count;
            }
        }
        debug!("Packed {} shards on {} threads", shards.len(), threads);
        Ok(total)
    }

    fn num_shards(&self) -> usize {
        if self.shards == 0 {
            num_cpus::get()
        } else {
            self.shards
        }
    }
}

/// Writes `ary` to `path` using `template` for the header
pub fn dump<P: AsRef<Path>>(
    ary: &HashArray,
    template: &Header,
    path: P,
    shard_count: usize,
) -> Result<()> {
    HashDumper::new(template.clone())
        .shards(shard_count)
        .dump(ary, path)
}

/// Writes `ary` to `writer` using `template` for the header
pub fn dump_to_writer<W: Write>(
    ary: &HashArray,
    template: &Header,
    writer: &mut W,
    shard_count: usize,
) -> Result<usize> {
    HashDumper::new(template.clone())
        .shards(shard_count)
        .dump_to_writer(ary, writer)
}

/// Default cap on the slots packed by one shard
const MAX_SHARD_SLOTS: usize = 1 << 20;

/// Splits `0..capacity` into contiguous non-empty ranges
///
/// Ranges are sized to give each of `shards` threads an equal part, but never
/// exceed `max_slots` slots.
fn shard_ranges(capacity: usize, shards: usize, max_slots: usize) -> Vec<Range<usize>> {
    let per_shard = capacity.div_ceil(shards.max(1)).clamp(1, max_slots.max(1));
    (0..capacity)
        .step_by(per_shard)
        .map(|start| start..(start + per_shard).min(capacity))
        .collect()
}

/// Packs each shard into its own buffer on its own thread
///
/// `first` is the index of the first shard, used to report panics.
fn pack_shards(
    ary: &HashArray,
    layout: RecordLayout,
    shards: &[Range<usize>],
    first: usize,
) -> Result<Vec<(Vec<u8>, usize)>> {
    thread::scope(|scope| {
        let handles: Vec<_> = shards
            .iter()
            .map(|range| {
                let range = range.clone();
                scope.spawn(move || -> Result<(Vec<u8>, usize)> {
                    let mut records = RecordWriter::new(Vec::new(), layout);
                    for (key, value) in ary.iter_range(range) {
                        records.write_record(key, value)?;
                    }
                    let count = records.records_written();
                    Ok((records.into_inner(), count))
                })
            })
            .collect();

        handles
            .into_iter()
            .enumerate()
            .map(|(idx, handle)| {
                handle
                    .join()
                    .map_err(|_| Error::from(CountError::ShardPanicked(first + idx)))?
            })
            .collect()
    })
}
