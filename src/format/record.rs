//! Packed record layout
//!
//! A record is the key on `ceil(key_len / 8)` little-endian bytes immediately
//! followed by the counter on `counter_len` little-endian bytes. Records are
//! stored back to back without separators, so the data region of a valid file
//! is always a whole multiple of the record length.

use std::io::Write;

use byteorder::{ByteOrder, LittleEndian};

use super::Header;
use crate::error::{LoadError, Result};

/// Byte widths of the two fields of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    key_bytes: usize,
    counter_len: usize,
}
impl RecordLayout {
    /// Layout described by a validated header
    #[must_use]
    pub fn from_header(header: &Header) -> Self {
        Self {
            key_bytes: header.key_bytes(),
            counter_len: header.counter_len as usize,
        }
    }

    #[must_use]
    pub fn key_bytes(&self) -> usize {
        self.key_bytes
    }

    #[must_use]
    pub fn counter_len(&self) -> usize {
        self.counter_len
    }

    /// Total bytes per record
    #[must_use]
    pub fn record_len(&self) -> usize {
        self.key_bytes + self.counter_len
    }

    /// Largest counter that fits in `counter_len` bytes
    #[must_use]
    pub fn counter_max(&self) -> u64 {
        u64::MAX >> (64 - 8 * self.counter_len)
    }
}

/// Total bytes of a file holding `num_records` records under `header`
///
/// The header's `offset` must already be resolved, as it is after parsing or
/// after [`Header::to_bytes`].
#[must_use]
pub fn expected_file_size(header: &Header, num_records: usize) -> usize {
    header.offset as usize + num_records * header.record_len()
}

/// Iterator over the `(key, value)` records of a data region
///
/// Works over any byte slice, a memory-mapped file as well as an in-memory
/// buffer. Every record read is bounds checked.
pub struct RecordReader<'a> {
    data: &'a [u8],
    layout: RecordLayout,
    pos: usize,
}
impl<'a> RecordReader<'a> {
    /// Creates a reader over a data region
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::CorruptFile`] if the region is not a whole number of
    /// records.
    pub fn new(data: &'a [u8], layout: RecordLayout) -> Result<Self> {
        let record_len = layout.record_len();
        if record_len == 0 || data.len() % record_len != 0 {
            return Err(LoadError::CorruptFile {
                data_bytes: data.len(),
                record_len,
            }
            .into());
        }
        Ok(Self {
            data,
            layout,
            pos: 0,
        })
    }

    /// Number of records in the region
    #[must_use]
    pub fn num_records(&self) -> usize {
        self.data.len() / self.layout.record_len()
    }
}
impl Iterator for RecordReader<'_> {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let end = self.pos + self.layout.record_len();
        let record = self.data.get(self.pos..end)?;
        self.pos = end;
        let (key, counter) = record.split_at(self.layout.key_bytes);
        Some((
            LittleEndian::read_uint(key, self.layout.key_bytes),
            LittleEndian::read_uint(counter, self.layout.counter_len),
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.data.len() - self.pos) / self.layout.record_len();
        (remaining, Some(remaining))
    }
}

/// Packs records into a writer
pub struct RecordWriter<W: Write> {
    inner: W,
    layout: RecordLayout,
    /// Reusable buffer for a single record
    buffer: [u8; 16],
    /// Number of records written
    records_written: usize,
}
impl<W: Write> RecordWriter<W> {
    #[must_use]
    pub fn new(inner: W, layout: RecordLayout) -> Self {
        Self {
            inner,
            layout,
            buffer: [0; 16],
            records_written: 0,
        }
    }

    /// Writes a record, saturating the counter at the layout's maximum
    ///
    /// The key must fit in the layout's key bytes.
    pub fn write_record(&mut self, key: u64, value: u64) -> Result<()> {
        let key_bytes = self.layout.key_bytes;
        let counter_len = self.layout.counter_len;
        let record_len = key_bytes + counter_len;
        let value = value.min(self.layout.counter_max());
        LittleEndian::write_uint(&mut self.buffer[..key_bytes], key, key_bytes);
        LittleEndian::write_uint(&mut self.buffer[key_bytes..record_len], value, counter_len);
        self.inner.write_all(&self.buffer[..record_len])?;
        self.records_written += 1;
        Ok(())
    }

    #[must_use]
    pub fn records_written(&self) -> usize {
        self.records_written
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
