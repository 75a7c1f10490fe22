use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::reprobe::ReprobeSequence;
use crate::{
    codec::{KeyCodec, MAX_KEY_LEN},
    error::{HashError, Result},
    utils::table_size,
};

/// Key word marking a slot that has never been claimed
///
/// Keys are at most 62 bits wide so no valid key can collide with it.
pub const EMPTY: u64 = u64::MAX;

/// An open-addressing k-mer counting table
///
/// Keys and counters live in two parallel arrays of atomic words. A slot is
/// claimed by swapping its key word from [`EMPTY`] to the key; the counter is
/// then accumulated with an atomic saturating update. Both operations are
/// lock-free, so the table can be shared between threads behind an `Arc`
/// while counting.
///
/// Counting and lookup are separate phases: `get` does not synchronize with
/// in-flight `add` calls on other threads.
pub struct HashArray {
    /// Key word of each slot
    keys: Box<[AtomicU64]>,
    /// Counter word of each slot
    vals: Box<[AtomicU64]>,
    /// `capacity - 1`, capacity being a power of two
    mask: u64,
    /// Key width in bits
    key_len: u32,
    /// Value width in bits
    val_len: u32,
    /// Largest representable counter
    val_max: u64,
    /// Probe offsets shared by insertion and lookup
    reprobes: ReprobeSequence,
    /// Codec matching the key width
    codec: KeyCodec,
    /// Number of claimed slots
    occupied: AtomicUsize,
}
impl HashArray {
    /// Creates an empty table sized for `capacity_hint` records
    ///
    /// The number of slots is the next power of two at or above
    /// `2 * capacity_hint`.
    ///
    /// # Arguments
    ///
    /// * `capacity_hint` - Expected number of distinct keys
    /// * `key_len` - Key width in bits (even, 2-62)
    /// * `val_len` - Counter width in bits (1-64); counters saturate at `2^val_len - 1`
    /// * `reprobe_limit` - Number of reprobes tried before reporting the table full
    pub fn new(capacity_hint: usize, key_len: u32, val_len: u32, reprobe_limit: usize) -> Result<Self> {
        if key_len == 0 || key_len % 2 != 0 || key_len > MAX_KEY_LEN {
            return Err(HashError::InvalidKeyLen(key_len).into());
        }
        if val_len == 0 || val_len > 64 {
            return Err(HashError::InvalidValLen(val_len).into());
        }
        if reprobe_limit == 0 {
            return Err(HashError::InvalidReprobeLimit(reprobe_limit).into());
        }
        let codec = KeyCodec::from_key_bits(key_len)?;
        let size = table_size(capacity_hint);
        let keys = (0..size).map(|_| AtomicU64::new(EMPTY)).collect();
        let vals = (0..size).map(|_| AtomicU64::new(0)).collect();
        Ok(Self {
            keys,
            vals,
            mask: size as u64 - 1,
            key_len,
            val_len,
            val_max: u64::MAX >> (64 - val_len),
            reprobes: ReprobeSequence::quadratic(reprobe_limit),
            codec,
            occupied: AtomicUsize::new(0),
        })
    }

    /// Adds `increment` to the counter of `key`, inserting it if absent
    ///
    /// Counters saturate at the largest value representable in `val_len` bits.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::Full`] if neither the key nor an empty slot is found
    /// within the reprobe limit, and [`HashError::KeyOutOfRange`] if the key
    /// has bits set above `key_len`. The table is left unchanged for that key.
    pub fn add(&self, key: u64, increment: u64) -> Result<()> {
        if !self.fits(key) {
            return Err(HashError::KeyOutOfRange {
                key,
                key_len: self.key_len,
            }
            .into());
        }
        for slot in self.reprobes.slots(key, self.mask) {
            let cell = &self.keys[slot];
            let mut current = cell.load(Ordering::Acquire);
            if current == EMPTY {
                match cell.compare_exchange(EMPTY, key, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => {
                        self.occupied.fetch_add(1, Ordering::Relaxed);
                        self.accumulate(slot, increment);
                        return Ok(());
                    }
                    // lost the claim: accumulate if the winner holds our key
                    Err(actual) => current = actual,
                }
            }
            if current == key {
                self.accumulate(slot, increment);
                return Ok(());
            }
        }
        Err(HashError::Full {
            key,
            reprobes: self.reprobes.limit(),
            capacity: self.capacity(),
        }
        .into())
    }

    #[inline]
    fn accumulate(&self, slot: usize, increment: u64) {
        let val_max = self.val_max;
        // the closure never declines, so the update always succeeds
        let _ = self.vals[slot].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            Some(v.saturating_add(increment).min(val_max))
        });
    }

    /// Whether `key` fits in `key_len` bits
    #[inline]
    #[must_use]
    pub fn fits(&self, key: u64) -> bool {
        key >> self.key_len == 0
    }

    /// Returns the counter of `key`, or `None` if it is not present
    #[must_use]
    pub fn get(&self, key: u64) -> Option<u64> {
        if !self.fits(key) {
            return None;
        }
        for slot in self.reprobes.slots(key, self.mask) {
            match self.keys[slot].load(Ordering::Acquire) {
                EMPTY => return None,
                current if current == key => {
                    return Some(self.vals[slot].load(Ordering::Relaxed));
                }
                _ => {}
            }
        }
        None
    }

    /// Returns the count of a k-mer given as a nucleotide window
    ///
    /// Absent k-mers count as zero. With `canonical` set the window is looked
    /// up by its canonical key, which is how canonically counted tables store
    /// it.
    pub fn get_kmer(&self, window: &[u8], canonical: bool) -> Result<u64> {
        let key = self.codec.encode_with(window, canonical)?;
        Ok(self.get(key).unwrap_or(0))
    }

    /// Key width in bits
    #[must_use]
    pub fn key_len(&self) -> u32 {
        self.key_len
    }

    /// Counter width in bits
    #[must_use]
    pub fn val_len(&self) -> u32 {
        self.val_len
    }

    /// Largest representable counter
    #[must_use]
    pub fn val_max(&self) -> u64 {
        self.val_max
    }

    /// Number of slots
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.keys.len()
    }

    /// Number of reprobes tried before reporting the table full
    #[must_use]
    pub fn reprobe_limit(&self) -> usize {
        self.reprobes.limit()
    }

    /// The probing function of this table
    #[must_use]
    pub fn reprobes(&self) -> &ReprobeSequence {
        &self.reprobes
    }

    /// The codec matching this table's key width
    #[must_use]
    pub fn codec(&self) -> KeyCodec {
        self.codec
    }

    /// Number of distinct keys stored
    #[must_use]
    pub fn len(&self) -> usize {
        self.occupied.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate memory held by the slot arrays in bytes
    #[must_use]
    pub fn memory_bytes(&self) -> usize {
        Self::estimate_memory(self.capacity())
    }

    /// Approximate memory needed by a table of `slots` slots in bytes
    #[must_use]
    pub fn estimate_memory(slots: usize) -> usize {
        slots * 2 * std::mem::size_of::<AtomicU64>()
    }

    /// Iterates over `(key, value)` pairs in slot order
    #[must_use]
    pub fn iter(&self) -> Iter<'_> {
        self.iter_range(0..self.capacity())
    }

    /// Iterates over `(key, value)` pairs of the occupied slots in `range`
    ///
    /// The range is clamped to the table's capacity.
    #[must_use]
    pub fn iter_range(&self, range: Range<usize>) -> Iter<'_> {
        let end = range.end.min(self.capacity());
        Iter {
            ary: self,
            pos: range.start.min(end),
            end,
        }
    }
}

impl std::fmt::Debug for HashArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashArray")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("key_len", &self.key_len)
            .field("val_len", &self.val_len)
            .field("reprobe_limit", &self.reprobe_limit())
            .finish()
    }
}

/// Iterator over the occupied slots of a [`HashArray`] in slot order
pub struct Iter<'a> {
    ary: &'a HashArray,
    pos: usize,
    end: usize,
}
impl Iterator for Iter<'_> {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.end {
            let slot = self.pos;
            self.pos += 1;
            let key = self.ary.keys[slot].load(Ordering::Acquire);
            if key != EMPTY {
                return Some((key, self.ary.vals[slot].load(Ordering::Relaxed)));
            }
        }
        None
    }
}
