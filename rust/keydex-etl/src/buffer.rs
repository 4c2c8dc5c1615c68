//! Sortable in-memory buffers with pluggable duplicate-handling policies.
//!
//! Three policies exist, each as its own [`Buffer`] implementation selected
//! at construction time:
//!
//! - [`SortableBuffer`] keeps every pair it is given; when replayed into a
//!   key/value destination the last write for a key naturally wins.
//! - [`AppendBuffer`] concatenates all values seen for a key.
//! - [`OldestEntryBuffer`] keeps the first value written for a key and
//!   drops later writes.

use std::cmp::Ordering;
use std::io::Write;
use std::sync::Arc;

use ahash::AHashMap;
use keydex_common::{Result, error::Error};

use crate::provider::write_uvarint;

/// Default flush threshold for collector buffers.
pub const BUFFER_OPTIMAL_SIZE: usize = 256 * 1024 * 1024;

/// Key ordering injected into buffers and the merge heap. When absent,
/// plain lexicographic byte order is used.
pub type Comparator = Arc<dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync>;

#[inline]
pub(crate) fn compare_keys(cmp: &Option<Comparator>, a: &[u8], b: &[u8]) -> Ordering {
    match cmp {
        Some(f) => f(a, b),
        None => a.cmp(b),
    }
}

/// An accumulator of key/value pairs that can be sorted in place and
/// serialized as a spill run.
///
/// `sort` is stable and idempotent; once a buffer has been sorted it is
/// immutable until `reset`.
pub trait Buffer: Send {
    /// Adds a pair to the buffer. The slices are copied. Fails with
    /// `InvalidOperation` if the buffer has been sorted and not yet reset.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Entry at position `i` of the sorted buffer.
    fn get(&self, i: usize) -> (&[u8], &[u8]);

    /// Number of entries currently held.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimated memory footprint in bytes.
    fn size(&self) -> usize;

    /// Whether the buffer has reached its flush threshold.
    fn is_full(&self) -> bool;

    fn set_comparator(&mut self, cmp: Option<Comparator>);

    /// Sorts the entries by key. Stable with respect to insertion order
    /// for equal keys, and a no-op when already sorted.
    fn sort(&mut self);

    /// Clears the buffer and makes it mutable again.
    fn reset(&mut self);

    /// Serializes the sorted entries as `uvarint(len) | bytes` key/value
    /// records, in the buffer's current (sorted) order.
    fn write_to(&self, w: &mut dyn Write) -> std::io::Result<()>;

    /// True when merged runs must drop adjacent repeats of a key, keeping
    /// only the first occurrence. Each individual run of such a buffer
    /// already keeps the oldest entry per key, but separate runs may
    /// overlap in key ranges.
    fn requires_merge_dedup(&self) -> bool {
        false
    }
}

#[derive(Clone, Copy)]
struct EntrySlot {
    key_offset: usize,
    key_len: usize,
    value_offset: usize,
    value_len: usize,
}

/// Plain sortable buffer backed by a single byte arena. Duplicate keys are
/// all retained in insertion order.
pub struct SortableBuffer {
    entries: Vec<EntrySlot>,
    data: Vec<u8>,
    comparator: Option<Comparator>,
    optimal_size: usize,
    sorted: bool,
}

impl SortableBuffer {
    pub fn new(optimal_size: usize) -> SortableBuffer {
        SortableBuffer {
            entries: Vec::new(),
            data: Vec::new(),
            comparator: None,
            optimal_size,
            sorted: false,
        }
    }
}

impl Buffer for SortableBuffer {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.sorted {
            return Err(Error::invalid_operation("put on a sorted buffer"));
        }
        let key_offset = self.data.len();
        self.data.extend_from_slice(key);
        let value_offset = self.data.len();
        self.data.extend_from_slice(value);
        self.entries.push(EntrySlot {
            key_offset,
            key_len: key.len(),
            value_offset,
            value_len: value.len(),
        });
        Ok(())
    }

    fn get(&self, i: usize) -> (&[u8], &[u8]) {
        let e = &self.entries[i];
        (
            &self.data[e.key_offset..e.key_offset + e.key_len],
            &self.data[e.value_offset..e.value_offset + e.value_len],
        )
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn size(&self) -> usize {
        self.data.len() + self.entries.len() * std::mem::size_of::<EntrySlot>()
    }

    fn is_full(&self) -> bool {
        self.size() >= self.optimal_size
    }

    fn set_comparator(&mut self, cmp: Option<Comparator>) {
        self.comparator = cmp;
    }

    fn sort(&mut self) {
        if self.sorted {
            return;
        }
        let data = &self.data;
        let cmp = &self.comparator;
        self.entries.sort_by(|a, b| {
            compare_keys(
                cmp,
                &data[a.key_offset..a.key_offset + a.key_len],
                &data[b.key_offset..b.key_offset + b.key_len],
            )
        });
        self.sorted = true;
    }

    fn reset(&mut self) {
        self.entries.clear();
        self.data.clear();
        self.sorted = false;
    }

    fn write_to(&self, w: &mut dyn Write) -> std::io::Result<()> {
        for e in &self.entries {
            write_uvarint(w, e.key_len as u64)?;
            w.write_all(&self.data[e.key_offset..e.key_offset + e.key_len])?;
            write_uvarint(w, e.value_len as u64)?;
            w.write_all(&self.data[e.value_offset..e.value_offset + e.value_len])?;
        }
        Ok(())
    }
}

/// Buffer that concatenates all values written for the same key.
pub struct AppendBuffer {
    entries: AHashMap<Vec<u8>, Vec<u8>>,
    sorted_buf: Vec<(Vec<u8>, Vec<u8>)>,
    comparator: Option<Comparator>,
    size: usize,
    optimal_size: usize,
    sorted: bool,
}

impl AppendBuffer {
    pub fn new(optimal_size: usize) -> AppendBuffer {
        AppendBuffer {
            entries: AHashMap::new(),
            sorted_buf: Vec::new(),
            comparator: None,
            size: 0,
            optimal_size,
            sorted: false,
        }
    }
}

impl Buffer for AppendBuffer {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.sorted {
            return Err(Error::invalid_operation("put on a sorted buffer"));
        }
        match self.entries.get_mut(key) {
            Some(stored) => stored.extend_from_slice(value),
            None => {
                self.size += key.len();
                self.entries.insert(key.to_vec(), value.to_vec());
            }
        }
        self.size += value.len();
        Ok(())
    }

    fn get(&self, i: usize) -> (&[u8], &[u8]) {
        let (k, v) = &self.sorted_buf[i];
        (k, v)
    }

    fn len(&self) -> usize {
        if self.sorted {
            self.sorted_buf.len()
        } else {
            self.entries.len()
        }
    }

    fn size(&self) -> usize {
        self.size
    }

    fn is_full(&self) -> bool {
        self.size >= self.optimal_size
    }

    fn set_comparator(&mut self, cmp: Option<Comparator>) {
        self.comparator = cmp;
    }

    fn sort(&mut self) {
        if self.sorted {
            return;
        }
        self.sorted_buf.extend(self.entries.drain());
        let cmp = &self.comparator;
        self.sorted_buf.sort_by(|a, b| compare_keys(cmp, &a.0, &b.0));
        self.sorted = true;
    }

    fn reset(&mut self) {
        self.entries.clear();
        self.sorted_buf.clear();
        self.size = 0;
        self.sorted = false;
    }

    fn write_to(&self, w: &mut dyn Write) -> std::io::Result<()> {
        write_sorted_entries(&self.sorted_buf, w)
    }
}

/// Buffer that keeps only the first value written for a key; later writes
/// for the same key are dropped.
pub struct OldestEntryBuffer {
    entries: AHashMap<Vec<u8>, Vec<u8>>,
    sorted_buf: Vec<(Vec<u8>, Vec<u8>)>,
    comparator: Option<Comparator>,
    size: usize,
    optimal_size: usize,
    sorted: bool,
}

impl OldestEntryBuffer {
    pub fn new(optimal_size: usize) -> OldestEntryBuffer {
        OldestEntryBuffer {
            entries: AHashMap::new(),
            sorted_buf: Vec::new(),
            comparator: None,
            size: 0,
            optimal_size,
            sorted: false,
        }
    }
}

impl Buffer for OldestEntryBuffer {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.sorted {
            return Err(Error::invalid_operation("put on a sorted buffer"));
        }
        if self.entries.contains_key(key) {
            // Keep the entry that was already there, ignore the new value.
            return Ok(());
        }
        self.size += key.len() * 2 + value.len();
        self.entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, i: usize) -> (&[u8], &[u8]) {
        let (k, v) = &self.sorted_buf[i];
        (k, v)
    }

    fn len(&self) -> usize {
        if self.sorted {
            self.sorted_buf.len()
        } else {
            self.entries.len()
        }
    }

    fn size(&self) -> usize {
        self.size
    }

    fn is_full(&self) -> bool {
        self.size >= self.optimal_size
    }

    fn set_comparator(&mut self, cmp: Option<Comparator>) {
        self.comparator = cmp;
    }

    fn sort(&mut self) {
        if self.sorted {
            return;
        }
        self.sorted_buf.extend(self.entries.drain());
        let cmp = &self.comparator;
        self.sorted_buf.sort_by(|a, b| compare_keys(cmp, &a.0, &b.0));
        self.sorted = true;
    }

    fn reset(&mut self) {
        self.entries.clear();
        self.sorted_buf.clear();
        self.size = 0;
        self.sorted = false;
    }

    fn write_to(&self, w: &mut dyn Write) -> std::io::Result<()> {
        write_sorted_entries(&self.sorted_buf, w)
    }

    fn requires_merge_dedup(&self) -> bool {
        true
    }
}

fn write_sorted_entries(
    entries: &[(Vec<u8>, Vec<u8>)],
    w: &mut dyn Write,
) -> std::io::Result<()> {
    for (key, value) in entries {
        write_uvarint(w, key.len() as u64)?;
        w.write_all(key)?;
        write_uvarint(w, value.len() as u64)?;
        w.write_all(value)?;
    }
    Ok(())
}
