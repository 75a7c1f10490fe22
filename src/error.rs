use std::path::PathBuf;

/// Custom Result type for kmerhash operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the kmerhash library, encompassing all possible error cases
/// that can occur while counting, loading, or dumping a k-mer hash.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Errors related to encoding k-mer windows into keys
    #[error(transparent)]
    KeyError(#[from] KeyError),
    /// Errors raised by the hash array itself
    #[error(transparent)]
    HashError(#[from] HashError),
    /// Errors related to parsing and validating the file header
    #[error(transparent)]
    HeaderError(#[from] HeaderError),
    /// Errors that occur while loading a hash from disk
    #[error(transparent)]
    LoadError(#[from] LoadError),
    /// Errors raised by the concurrent counter
    #[error(transparent)]
    CountError(#[from] CountError),
    /// I/O errors tied to a specific file on disk
    #[error("I/O error on {}", .path.display())]
    PathIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Standard I/O errors from the Rust standard library
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}
impl Error {
    /// Wraps an I/O error with the path it occurred on
    pub fn with_path<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Self::PathIo {
            path: path.into(),
            source,
        }
    }

    /// Returns true if this error only invalidates a single k-mer window
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::KeyError(KeyError::InvalidBase { .. }))
    }
}

/// Errors raised while turning nucleotide windows into integer keys
#[derive(thiserror::Error, Debug)]
pub enum KeyError {
    /// The window contains a symbol outside of {A, C, G, T}
    ///
    /// # Fields
    /// * `base` - The first offending symbol
    /// * `pos` - Its position within the window
    #[error("Invalid base {:?} at position {pos}", base_char(.base))]
    InvalidBase { base: u8, pos: usize },

    /// The window length does not match the configured k
    #[error("Window length ({got}) does not match k ({expected})")]
    InvalidLength { expected: usize, got: usize },

    /// The requested k cannot be represented in a single key word
    #[error("Unsupported k-mer length: {0} (must be 1-31)")]
    UnsupportedK(usize),
}

fn base_char(base: &u8) -> char {
    char::from(*base)
}

/// Errors raised by the hash array
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The reprobe limit was exhausted without finding the key or an empty slot
    #[error("Hash is full: no slot for key {key:#x} within {reprobes} reprobes (capacity {capacity})")]
    Full {
        key: u64,
        reprobes: usize,
        capacity: usize,
    },

    /// The key width is odd, zero, or too wide for a single key word
    #[error("Invalid key length: {0} bits (must be even and 2-62)")]
    InvalidKeyLen(u32),

    /// The value width is zero or larger than a counter word
    #[error("Invalid value length: {0} bits (must be 1-64)")]
    InvalidValLen(u32),

    /// The reprobe limit must allow at least one reprobe
    #[error("Invalid reprobe limit: {0}")]
    InvalidReprobeLimit(usize),

    /// The key has bits set above the table's key width
    #[error("Key {key:#x} does not fit in {key_len} bits")]
    KeyOutOfRange { key: u64, key_len: u32 },
}

/// Errors specific to parsing and validating the file header
#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    /// The buffer ended before the full header could be read
    ///
    /// # Arguments
    /// * First `usize` - The number of bytes available
    /// * Second `usize` - The number of bytes required
    #[error("Truncated header: {0} bytes available, {1} required")]
    Truncated(usize, usize),

    /// The leading length prefix is not a decimal number
    #[error("Invalid header length prefix: {0:?}")]
    InvalidLengthPrefix(String),

    /// The header document could not be parsed
    #[error("Malformed header document")]
    Json(#[from] serde_json::Error),

    /// The key length is zero, odd, or wider than 62 bits
    #[error("Invalid key length in header: {0} bits")]
    InvalidKeyLen(u32),

    /// The value length is zero or wider than 64 bits
    #[error("Invalid value length in header: {0} bits")]
    InvalidValLen(u32),

    /// The counter length is outside of 1-8 bytes
    #[error("Invalid counter length in header: {0} bytes")]
    InvalidCounterLen(u32),

    /// A hash must have at least one physical sub-table
    #[error("Invalid number of hashes in header: {0}")]
    InvalidNbHashes(u32),

    /// The declared data offset points inside the header itself
    #[error("Invalid data offset ({offset}) - header ends at byte {header_end}")]
    InvalidOffset { offset: u64, header_end: u64 },
}

/// Errors that can occur while loading a hash from disk
#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    /// The file declares a format this engine does not implement
    #[error("Unsupported hash format '{0}': only binary hashes can be loaded")]
    UnsupportedFormat(String),

    /// The data region does not hold a whole number of records
    #[error("Size of database ({data_bytes}) must be a multiple of the length of a record ({record_len})")]
    CorruptFile { data_bytes: usize, record_len: usize },

    /// The declared data offset lies past the end of the file
    #[error("Data offset ({offset}) is beyond the end of the file ({file_len})")]
    OffsetBeyondEnd { offset: u64, file_len: usize },

    /// A record holds a key wider than the declared key length
    #[error("Record {record} holds key {key:#x} wider than the declared {key_len} bits")]
    KeyOutOfRange { record: usize, key: u64, key_len: u32 },
}

/// Errors raised by the worker threads of counting and dumping
#[derive(thiserror::Error, Debug)]
pub enum CountError {
    /// A worker thread panicked before reaching its done state
    #[error("Counting worker {0} panicked")]
    WorkerPanicked(usize),

    /// A thread serializing a shard of the table panicked
    #[error("Dump shard {0} panicked")]
    ShardPanicked(usize),

    /// The table was still referenced after all workers were joined
    #[error("Hash table is still shared after counting finished")]
    TableStillShared,
}
