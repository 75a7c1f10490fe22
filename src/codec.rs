//! K-mer key codec
//!
//! Converts fixed-length nucleotide windows into integer keys and back.
//!
//! Keys use 2 bits per base (A=00, C=01, G=10, T=11) with the first base of the
//! window in the most significant position, so numeric order matches
//! lexicographic order of the windows. The reverse complement of a key is the
//! bitwise complement of its bases read in reverse order.
//!
//! The 2-bit packing itself is delegated to [`bitnuc`], which stores the first
//! base in the least significant bits; the codec reverses base order on the way
//! in and out.

use crate::error::{KeyError, Result};

/// Largest supported k-mer length.
///
/// A 31-mer occupies 62 bits, which keeps the all-ones word free as the hash
/// array's empty-slot sentinel.
pub const MAX_K: usize = 31;

/// Widest supported key in bits (`2 * MAX_K`)
pub const MAX_KEY_LEN: u32 = 2 * MAX_K as u32;

/// Reverses the order of the `k` 2-bit bases held in the low bits of `x`.
#[inline]
fn reverse_bases(x: u64, k: usize) -> u64 {
    // swap adjacent bases, then nibbles, then bytes
    let x = ((x >> 2) & 0x3333_3333_3333_3333) | ((x & 0x3333_3333_3333_3333) << 2);
    let x = ((x >> 4) & 0x0F0F_0F0F_0F0F_0F0F) | ((x & 0x0F0F_0F0F_0F0F_0F0F) << 4);
    x.swap_bytes() >> (64 - 2 * k)
}

/// Encoder/decoder for k-mers of a fixed length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCodec {
    /// Number of bases per k-mer
    k: usize,
    /// Mask covering the `2k` low bits of a key
    mask: u64,
}
impl KeyCodec {
    /// Creates a codec for k-mers of length `k` (1-31)
    pub fn new(k: usize) -> Result<Self> {
        if k == 0 || k > MAX_K {
            return Err(KeyError::UnsupportedK(k).into());
        }
        Ok(Self {
            k,
            mask: (1u64 << (2 * k)) - 1,
        })
    }

    /// Creates a codec matching a key width in bits (`k = key_bits / 2`)
    pub fn from_key_bits(key_bits: u32) -> Result<Self> {
        if key_bits % 2 != 0 {
            return Err(KeyError::UnsupportedK(key_bits as usize).into());
        }
        Self::new(key_bits as usize / 2)
    }

    /// Returns the k-mer length
    #[must_use]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Returns the key width in bits
    #[must_use]
    pub fn key_bits(&self) -> u32 {
        2 * self.k as u32
    }

    /// Encodes a nucleotide window into its forward key
    ///
    /// Both upper and lower case bases are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidLength`] if the window is not exactly `k` bases
    /// long and [`KeyError::InvalidBase`] if it contains anything but A, C, G, T.
    /// Callers counting a stream are expected to skip windows failing with
    /// `InvalidBase`.
    pub fn encode(&self, window: &[u8]) -> Result<u64> {
        if window.len() != self.k {
            return Err(KeyError::InvalidLength {
                expected: self.k,
                got: window.len(),
            }
            .into());
        }
        let mut upper = [0u8; MAX_K];
        for (pos, (&base, slot)) in window.iter().zip(upper.iter_mut()).enumerate() {
            *slot = match base {
                b'A' | b'C' | b'G' | b'T' => base,
                b'a' | b'c' | b'g' | b't' => base.to_ascii_uppercase(),
                _ => return Err(KeyError::InvalidBase { base, pos }.into()),
            };
        }
        let packed = bitnuc::as_2bit(&upper[..self.k])
            .map_err(|_| KeyError::InvalidBase { base: window[0], pos: 0 })?;
        Ok(reverse_bases(packed, self.k))
    }

    /// Decodes a key back into its nucleotide window, appending to `buffer`
    pub fn decode(&self, key: u64, buffer: &mut Vec<u8>) -> Result<()> {
        let packed = reverse_bases(key & self.mask, self.k);
        bitnuc::from_2bit(packed, self.k, buffer)
            .map_err(|_| KeyError::UnsupportedK(self.k))?;
        Ok(())
    }

    /// Decodes a key into a newly allocated window
    pub fn decode_alloc(&self, key: u64) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(self.k);
        self.decode(key, &mut buffer)?;
        Ok(buffer)
    }

    /// Returns the key of the reverse complement strand
    #[must_use]
    pub fn reverse_complement(&self, key: u64) -> u64 {
        reverse_bases(!key & self.mask, self.k)
    }

    /// Returns the canonical key: the smaller of the key and its reverse complement
    #[must_use]
    pub fn canonical(&self, key: u64) -> u64 {
        key.min(self.reverse_complement(key))
    }

    /// Encodes a window and optionally canonicalizes it
    pub fn encode_with(&self, window: &[u8], canonical: bool) -> Result<u64> {
        let key = self.encode(window)?;
        Ok(if canonical { self.canonical(key) } else { key })
    }
}
