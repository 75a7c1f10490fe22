//! Header module for the k-mer hash file format
//!
//! The header is a JSON document preceded by its length as 9 ASCII decimal
//! digits and followed by zero padding up to an 8-byte aligned data offset.
//! The offset itself is stored in the document, so a reader never has to
//! guess where the packed records begin.
//!
//! Readers ignore nothing: fields this crate does not know about are kept in
//! [`Header::extra`] and written back out on dump.

use std::fmt;
use std::io::{Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{
    codec::MAX_KEY_LEN,
    error::{HeaderError, LoadError, Result},
    HashArray,
};

/// Format tag of the binary layout understood by this crate
pub const FORMAT_BINARY: &str = "binary/sorted";

/// Format tag of text dumps
pub const FORMAT_TEXT: &str = "text/sorted";

/// Format tag of bloom-filter backed counters
pub const FORMAT_BLOOM: &str = "bloomcounter";

/// Number of ASCII digits holding the length of the header document
pub const LENGTH_PREFIX: usize = 9;

/// Alignment of the data offset
pub const ALIGNMENT: u64 = 8;

/// Classification of a header's format tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Packed binary records
    Binary,
    /// One record per line of text
    Text,
    /// Bloom-filter backed counter
    Bloom,
    /// Anything else
    Unknown,
}
impl Format {
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            FORMAT_BINARY | "binary" => Self::Binary,
            FORMAT_TEXT | "text" => Self::Text,
            FORMAT_BLOOM | "bloom" => Self::Bloom,
            _ => Self::Unknown,
        }
    }
}

/// The only field read before the format is known
#[derive(Deserialize)]
struct FormatTag {
    format: String,
}

fn one() -> u32 {
    1
}

/// Header of a k-mer hash file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Format tag, see [`Format`]
    pub format: String,

    /// Command line that produced the file
    #[serde(default)]
    pub cmdline: Vec<String>,

    /// Key width in bits (`2k`)
    pub key_len: u32,

    /// In-memory counter width in bits
    pub val_len: u32,

    /// On-disk counter width in bytes
    pub counter_len: u32,

    /// Number of physical hash sub-tables
    #[serde(default = "one")]
    pub nb_hashes: u32,

    /// Reprobe limit of the table
    pub max_reprobe: u64,

    /// Offset of the last allowed reprobe
    #[serde(default)]
    pub max_reprobe_offset: u64,

    /// Byte position of the first record
    #[serde(default)]
    pub offset: u64,

    /// Logical size (number of slots) of the table
    pub size: u64,

    /// Whether keys were canonicalized while counting
    #[serde(default)]
    pub canonical: bool,

    /// Creation time, in seconds since the Unix epoch
    #[serde(default)]
    pub time: String,

    /// Trailing metadata this crate does not interpret
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
impl Header {
    /// Creates a binary header describing `ary`, storing counters on `counter_len` bytes
    #[must_use]
    pub fn for_array(ary: &HashArray, counter_len: u32) -> Self {
        Self {
            format: FORMAT_BINARY.to_string(),
            cmdline: Vec::new(),
            key_len: ary.key_len(),
            val_len: ary.val_len(),
            counter_len,
            nb_hashes: 1,
            max_reprobe: ary.reprobe_limit() as u64,
            max_reprobe_offset: ary.reprobes().max_offset(),
            offset: 0,
            size: ary.capacity() as u64,
            canonical: false,
            time: now(),
            extra: serde_json::Map::new(),
        }
    }

    /// Sets the command line provenance
    #[must_use]
    pub fn with_cmdline<I, S>(mut self, cmdline: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmdline = cmdline.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the keys as canonical
    #[must_use]
    pub fn with_canonical(mut self, canonical: bool) -> Self {
        self.canonical = canonical;
        self
    }

    /// Refreshes the creation time
    pub fn touch(&mut self) {
        self.time = now();
    }

    /// Classifies the format tag
    #[must_use]
    pub fn format_kind(&self) -> Format {
        Format::from_tag(&self.format)
    }

    /// Fails unless the header declares the binary layout
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::UnsupportedFormat`] naming the tag for text dumps,
    /// bloom counters, and unknown tags.
    pub fn check_format(&self) -> Result<()> {
        match self.format_kind() {
            Format::Binary => Ok(()),
            Format::Text | Format::Bloom | Format::Unknown => {
                Err(LoadError::UnsupportedFormat(self.format.clone()).into())
            }
        }
    }

    /// Number of k-mer bases (`key_len / 2`)
    #[must_use]
    pub fn k(&self) -> usize {
        self.key_len as usize / 2
    }

    /// Bytes used by the packed key of a record
    #[must_use]
    pub fn key_bytes(&self) -> usize {
        (self.key_len as usize).div_ceil(8)
    }

    /// Length of a packed record: `counter_len + ceil(key_len / 8)`
    #[must_use]
    pub fn record_len(&self) -> usize {
        self.counter_len as usize + self.key_bytes()
    }

    /// Validates the declared widths
    pub fn validate(&self) -> Result<()> {
        if self.key_len == 0 || self.key_len % 2 != 0 || self.key_len > MAX_KEY_LEN {
            return Err(HeaderError::InvalidKeyLen(self.key_len).into());
        }
        if self.val_len == 0 || self.val_len > 64 {
            return Err(HeaderError::InvalidValLen(self.val_len).into());
        }
        if self.counter_len == 0 || self.counter_len > 8 {
            return Err(HeaderError::InvalidCounterLen(self.counter_len).into());
        }
        if self.nb_hashes == 0 {
            return Err(HeaderError::InvalidNbHashes(self.nb_hashes).into());
        }
        Ok(())
    }

    /// Serializes the header, padding included
    ///
    /// The `offset` field of the written document is recomputed so that it
    /// points right after the padding.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut header = self.clone();
        header.offset = 0;
        let document = loop {
            let document = serde_json::to_vec(&header).map_err(HeaderError::from)?;
            let offset = ((LENGTH_PREFIX + document.len()) as u64).next_multiple_of(ALIGNMENT);
            if header.offset == offset {
                break document;
            }
            header.offset = offset;
        };

        let mut buffer = Vec::with_capacity(header.offset as usize);
        buffer.extend_from_slice(format!("{:0width$}", document.len(), width = LENGTH_PREFIX).as_bytes());
        buffer.extend_from_slice(&document);
        buffer.resize(header.offset as usize, 0);
        Ok(buffer)
    }

    /// Writes the header to a writer and returns the data offset
    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<u64> {
        let buffer = self.to_bytes()?;
        writer.write_all(&buffer)?;
        Ok(buffer.len() as u64)
    }

    /// Parses a header from the start of a buffer
    ///
    /// The buffer may extend past the header; only the prefix and document are
    /// read.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::UnsupportedFormat`] if the document's tag is not
    /// binary, before any other field is looked at. Otherwise returns a
    /// [`HeaderError`] if the buffer is truncated, the length prefix is not a
    /// number, the document is not valid, or the widths are invalid.
    pub fn from_bytes(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < LENGTH_PREFIX {
            return Err(HeaderError::Truncated(buffer.len(), LENGTH_PREFIX).into());
        }
        let doc_len = parse_prefix(&buffer[..LENGTH_PREFIX])?;
        let header_end = LENGTH_PREFIX + doc_len;
        if buffer.len() < header_end {
            return Err(HeaderError::Truncated(buffer.len(), header_end).into());
        }
        Self::from_document(&buffer[LENGTH_PREFIX..header_end])
    }

    /// Reads a header from a reader, leaving it positioned after the document
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let mut prefix = [0u8; LENGTH_PREFIX];
        read_exact_or_truncated(reader, &mut prefix, 0)?;
        let doc_len = parse_prefix(&prefix)?;
        let mut document = vec![0u8; doc_len];
        read_exact_or_truncated(reader, &mut document, LENGTH_PREFIX)?;
        Self::from_document(&document)
    }

    /// Parses the document, rejecting any format but binary first
    ///
    /// Text and bloom headers do not carry the binary widths, so the tag is
    /// checked before the full document is deserialized.
    fn from_document(document: &[u8]) -> Result<Self> {
        let tag: FormatTag = serde_json::from_slice(document).map_err(HeaderError::from)?;
        if Format::from_tag(&tag.format) != Format::Binary {
            return Err(LoadError::UnsupportedFormat(tag.format).into());
        }
        let mut header: Self = serde_json::from_slice(document).map_err(HeaderError::from)?;
        let header_end = (LENGTH_PREFIX + document.len()) as u64;
        if header.offset == 0 {
            header.offset = header_end;
        } else if header.offset < header_end {
            return Err(HeaderError::InvalidOffset {
                offset: header.offset,
                header_end,
            }
            .into());
        }
        header.validate()?;
        Ok(header)
    }
}

fn parse_prefix(prefix: &[u8]) -> Result<usize> {
    let text = String::from_utf8_lossy(prefix);
    text.trim()
        .parse()
        .map_err(|_| HeaderError::InvalidLengthPrefix(text.to_string()).into())
}

fn read_exact_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8], consumed: usize) -> Result<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(HeaderError::Truncated(consumed, consumed + buf.len()).into())
        }
        Err(e) => Err(e.into()),
    }
}

fn now() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
        .to_string()
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Hash header:")?;
        writeln!(f, " - Cmdline: {}", self.cmdline.join(" "))?;
        writeln!(f, " - Format: {}", self.format)?;
        writeln!(f, " - Key length (bits): {}", self.key_len)?;
        writeln!(f, " - Value length (bits): {}", self.val_len)?;
        writeln!(f, " - Counter length (bytes): {}", self.counter_len)?;
        writeln!(f, " - # Hashes: {}", self.nb_hashes)?;
        writeln!(f, " - Max reprobe: {}", self.max_reprobe)?;
        writeln!(f, " - Max reprobe offset: {}", self.max_reprobe_offset)?;
        writeln!(f, " - Canonical: {}", self.canonical)?;
        writeln!(f, " - Offset: {}", self.offset)?;
        write!(f, " - Size: {}", self.size)
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::Error;
    use std::io::Cursor;

    fn build_header() -> Header {
        Header {
            format: FORMAT_BINARY.to_string(),
            cmdline: vec!["count".to_string(), "-m".to_string(), "31".to_string()],
            key_len: 62,
            val_len: 7,
            counter_len: 4,
            nb_hashes: 1,
            max_reprobe: 126,
            max_reprobe_offset: 8001,
            offset: 0,
            size: 1 << 20,
            canonical: true,
            time: "1700000000".to_string(),
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_header_roundtrip() -> anyhow::Result<()> {
        let header = build_header();
        let bytes = header.to_bytes()?;
        assert_eq!(bytes.len() as u64 % ALIGNMENT, 0);

        let parsed = Header::from_bytes(&bytes)?;
        assert_eq!(parsed.offset, bytes.len() as u64);
        assert_eq!(parsed.key_len, 62);
        assert_eq!(parsed.cmdline, header.cmdline);
        assert_eq!(parsed.record_len(), 12);

        let mut cursor = Cursor::new(bytes);
        assert_eq!(Header::from_reader(&mut cursor)?, parsed);
        Ok(())
    }

    #[test]
    fn test_prefix_is_document_length() -> anyhow::Result<()> {
        let bytes = build_header().to_bytes()?;
        let doc_len: usize = std::str::from_utf8(&bytes[..LENGTH_PREFIX])?.parse()?;
        assert_eq!(bytes[LENGTH_PREFIX], b'{');
        assert_eq!(bytes[LENGTH_PREFIX + doc_len - 1], b'}');
        assert!(bytes[LENGTH_PREFIX + doc_len..].iter().all(|&b| b == 0));
        Ok(())
    }

    #[test]
    fn test_unknown_fields_are_kept() -> anyhow::Result<()> {
        let document = br#"{"format":"binary/sorted","key_len":8,"val_len":8,"counter_len":1,"max_reprobe":10,"size":16,"hostname":"node7","fpr":0.01}"#;
        let mut bytes = format!("{:09}", document.len()).into_bytes();
        bytes.extend_from_slice(document);

        let header = Header::from_bytes(&bytes)?;
        assert_eq!(header.nb_hashes, 1);
        assert_eq!(header.offset, bytes.len() as u64);
        assert_eq!(header.extra.get("hostname"), Some(&serde_json::json!("node7")));

        let again = Header::from_bytes(&header.to_bytes()?)?;
        assert_eq!(again.extra, header.extra);
        Ok(())
    }

    #[test]
    fn test_truncated() -> anyhow::Result<()> {
        let bytes = build_header().to_bytes()?;
        assert!(matches!(
            Header::from_bytes(&bytes[..5]),
            Err(Error::HeaderError(HeaderError::Truncated(5, LENGTH_PREFIX)))
        ));
        assert!(matches!(
            Header::from_bytes(&bytes[..20]),
            Err(Error::HeaderError(HeaderError::Truncated(20, _)))
        ));
        let mut cursor = Cursor::new(&bytes[..20]);
        assert!(matches!(
            Header::from_reader(&mut cursor),
            Err(Error::HeaderError(HeaderError::Truncated(..)))
        ));
        Ok(())
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(
            Header::from_bytes(b"abcdefghi{}"),
            Err(Error::HeaderError(HeaderError::InvalidLengthPrefix(_)))
        ));
        assert!(matches!(
            Header::from_bytes(b"000000002{}"),
            Err(Error::HeaderError(HeaderError::Json(_)))
        ));
    }

    #[test]
    fn test_invalid_widths() -> anyhow::Result<()> {
        let mut header = build_header();
        header.counter_len = 0;
        assert!(matches!(
            Header::from_bytes(&header.to_bytes()?),
            Err(Error::HeaderError(HeaderError::InvalidCounterLen(0)))
        ));

        let mut header = build_header();
        header.key_len = 31;
        assert!(matches!(
            Header::from_bytes(&header.to_bytes()?),
            Err(Error::HeaderError(HeaderError::InvalidKeyLen(31)))
        ));

        // k = 32 does not fit beside the empty-slot sentinel
        let mut header = build_header();
        header.key_len = 64;
        assert!(matches!(
            Header::from_bytes(&header.to_bytes()?),
            Err(Error::HeaderError(HeaderError::InvalidKeyLen(64)))
        ));
        Ok(())
    }

    #[test]
    fn test_offset_inside_header() {
        let document = br#"{"format":"binary/sorted","key_len":8,"val_len":8,"counter_len":1,"max_reprobe":10,"size":16,"offset":4}"#;
        let mut bytes = format!("{:09}", document.len()).into_bytes();
        bytes.extend_from_slice(document);
        assert!(matches!(
            Header::from_bytes(&bytes),
            Err(Error::HeaderError(HeaderError::InvalidOffset { offset: 4, .. }))
        ));
    }

    #[test]
    fn test_check_format() {
        let mut header = build_header();
        assert!(header.check_format().is_ok());
        for tag in [FORMAT_BLOOM, FORMAT_TEXT, "mystery"] {
            header.format = tag.to_string();
            match header.check_format() {
                Err(Error::LoadError(LoadError::UnsupportedFormat(found))) => assert_eq!(found, tag),
                other => panic!("expected UnsupportedFormat, got {other:?}"),
            }
        }
    }

    fn with_prefix(document: &[u8]) -> Vec<u8> {
        let mut bytes = format!("{:09}", document.len()).into_bytes();
        bytes.extend_from_slice(document);
        bytes
    }

    #[test]
    fn test_format_checked_before_widths() {
        // bloom headers carry no counter fields at all
        let bloom = with_prefix(
            br#"{"format":"bloomcounter","key_len":62,"size":1048576,"nb_hashes":7,"fpr":0.01}"#,
        );
        match Header::from_bytes(&bloom) {
            Err(Error::LoadError(LoadError::UnsupportedFormat(tag))) => assert_eq!(tag, FORMAT_BLOOM),
            other => panic!("expected UnsupportedFormat, got {other:?}"),
        }

        let text = with_prefix(
            br#"{"format":"text/sorted","key_len":62,"val_len":7,"counter_len":0,"max_reprobe":126,"size":1024}"#,
        );
        match Header::from_reader(&mut Cursor::new(text)) {
            Err(Error::LoadError(LoadError::UnsupportedFormat(tag))) => assert_eq!(tag, FORMAT_TEXT),
            other => panic!("expected UnsupportedFormat, got {other:?}"),
        }

        // a document without a tag is malformed, not unsupported
        assert!(matches!(
            Header::from_bytes(&with_prefix(br#"{"key_len":62}"#)),
            Err(Error::HeaderError(HeaderError::Json(_)))
        ));
    }

    #[test]
    fn test_display() {
        let display = build_header().to_string();
        assert!(display.contains("Key length (bits): 62"));
        assert!(display.contains("count -m 31"));
    }
}
