//! # format
//!
//! The on-disk layout of a k-mer hash:
//!
//! ```text
//! [9 ASCII digits: n][n bytes of JSON header][zero padding to offset][record]*
//! ```
//!
//! ## Header
//!
//! | Field                | Type      | Description                                  |
//! | -------------------- | --------- | -------------------------------------------- |
//! | `format`             | string    | `binary/sorted` (text and bloom are rejected) |
//! | `cmdline`            | [string]  | Provenance                                   |
//! | `key_len`            | u32       | Key width in bits (`2k`)                     |
//! | `val_len`            | u32       | In-memory counter width in bits              |
//! | `counter_len`        | u32       | On-disk counter width in bytes (1-8)         |
//! | `nb_hashes`          | u32       | Number of physical sub-tables                |
//! | `max_reprobe`        | u64       | Reprobe limit                                |
//! | `max_reprobe_offset` | u64       | Offset of the last reprobe                   |
//! | `offset`             | u64       | First byte of the records (8-byte aligned)   |
//! | `size`               | u64       | Number of slots of the table                 |
//! | `canonical`          | bool      | Keys are canonical                           |
//! | `time`               | string    | Creation time (Unix seconds)                 |
//!
//! Any other field is preserved.
//!
//! ## Record
//!
//! `ceil(key_len / 8)` bytes of little-endian key followed by `counter_len`
//! bytes of little-endian counter. Records of empty slots are never written.

mod header;
mod record;

pub use header::{
    Format, Header, ALIGNMENT, FORMAT_BINARY, FORMAT_BLOOM, FORMAT_TEXT, LENGTH_PREFIX,
};
pub use record::{expected_file_size, RecordLayout, RecordReader, RecordWriter};
