//! Loading k-mer hashes from disk
//!
//! The loader reads and validates the header with plain buffered I/O, rejects
//! anything but the binary layout, and only then maps the file to replay its
//! records into a freshly sized [`HashArray`].

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use memmap2::Mmap;
use tracing::{debug, info};

use crate::{
    error::{Error, LoadError, Result},
    format::{Header, RecordLayout, RecordReader},
    HashArray,
};

/// Loads k-mer hashes and remembers the header of the last one
///
/// # Examples
///
/// ```no_run
/// use kmerhash::HashLoader;
///
/// # fn main() -> kmerhash::Result<()> {
/// let mut loader = HashLoader::new();
/// let ary = loader.load("counts.jf")?;
/// let count = ary.get_kmer(b"ACGTACGTACGTACGTACGTACGTACGTACG", true)?;
/// println!("count: {count}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default, Clone)]
pub struct HashLoader {
    /// Header of the last successfully loaded hash
    header: Option<Header>,
}
impl HashLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Header of the last successfully loaded hash
    ///
    /// Useful as a template when dumping the table again.
    #[must_use]
    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    /// Loads the hash stored at `path`
    ///
    /// # Errors
    ///
    /// * [`LoadError::UnsupportedFormat`] for text, bloom, or unknown formats,
    ///   raised before the file is mapped
    /// * [`HeaderError`](crate::HeaderError) variants for malformed headers
    /// * [`LoadError::CorruptFile`] if the data region is not a whole number of records
    /// * [`LoadError::KeyOutOfRange`] if a record's key is wider than `key_len`
    /// * [`HashError::Full`](crate::HashError::Full) if the records do not fit
    ///   within the header's reprobe limit
    /// * [`Error::PathIo`] for I/O failures
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<HashArray> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::with_path(path, e))?;

        // rejects text, bloom, and unknown formats before anything is mapped
        let header = Header::from_reader(&mut BufReader::new(&file)).map_err(|e| attach_path(e, path))?;
        debug!("{header}");

        // Safety: the file is opened read-only and is not written while mapped
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::with_path(path, e))?;
        #[cfg(unix)]
        mmap.advise(memmap2::Advice::Sequential)
            .map_err(|e| Error::with_path(path, e))?;

        info!("Loading hash from {}", path.display());
        let ary = populate(&header, &mmap)?;
        self.header = Some(header);
        Ok(ary)
    }

    /// Loads a hash held entirely in memory, header included
    pub fn load_from_bytes(&mut self, bytes: &[u8]) -> Result<HashArray> {
        let header = Header::from_bytes(bytes)?;
        debug!("{header}");
        let ary = populate(&header, bytes)?;
        self.header = Some(header);
        Ok(ary)
    }
}

/// Loads the hash stored at `path`
pub fn load<P: AsRef<Path>>(path: P) -> Result<HashArray> {
    HashLoader::new().load(path)
}

/// Reads only the header of the hash stored at `path`
///
/// Fails with [`LoadError::UnsupportedFormat`] for headers that are not binary.
pub fn load_header<P: AsRef<Path>>(path: P) -> Result<Header> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::with_path(path, e))?;
    Header::from_reader(&mut BufReader::new(file)).map_err(|e| attach_path(e, path))
}

fn attach_path(err: Error, path: &Path) -> Error {
    match err {
        Error::IoError(source) => Error::with_path(path, source),
        other => other,
    }
}

/// Replays the records of `bytes` (a whole file) into a new table
fn populate(header: &Header, bytes: &[u8]) -> Result<HashArray> {
    let offset = header.offset;
    let data = usize::try_from(offset)
        .ok()
        .and_then(|offset| bytes.get(offset..))
        .ok_or(LoadError::OffsetBeyondEnd {
            offset,
            file_len: bytes.len(),
        })?;

    let layout = RecordLayout::from_header(header);
    let records = RecordReader::new(data, layout)?;
    let num_records = records.num_records();

    // the table must hold any counter the file can store
    let val_len = header.val_len.max(8 * header.counter_len).min(64);
    let ary = HashArray::new(
        num_records,
        header.key_len,
        val_len,
        header.max_reprobe as usize,
    )?;
    info!(
        "Hash holds {} records of {} bytes; approximate memory {} MB",
        num_records,
        layout.record_len(),
        ary.memory_bytes() / 1_000_000 + 1
    );

    for (record, (key, value)) in records.enumerate() {
        if !ary.fits(key) {
            return Err(LoadError::KeyOutOfRange {
                record,
                key,
                key_len: header.key_len,
            }
            .into());
        }
        ary.add(key, value)?;
    }
    debug!("Loaded {} distinct keys into {} slots", ary.len(), ary.capacity());
    Ok(ary)
}
