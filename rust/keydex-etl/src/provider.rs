//! Sources of sorted key/value runs consumed by the merge loop. A run either
//! stays in memory (the last buffer of a collector that never spilled) or is
//! serialized to a temporary file and streamed back.

use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};

use keydex_common::{Result, error::Error};
use keydex_io::temp_file_store::TemporaryFileStore;

use crate::buffer::Buffer;

/// I/O buffer size for spill writers and readers.
pub(crate) const BUF_IO_SIZE: usize = 128 * 4096;

/// A sorted run of key/value pairs, yielded one pair at a time.
pub trait DataProvider: Send {
    /// Returns the next pair of the run, or `None` when exhausted.
    fn next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>>;

    /// Releases the run's backing storage and returns the number of bytes
    /// freed. Subsequent calls return 0.
    fn dispose(&mut self) -> u64;
}

struct MemoryProvider {
    buffer: Box<dyn Buffer>,
    current_index: usize,
}

impl DataProvider for MemoryProvider {
    fn next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if self.current_index >= self.buffer.len() {
            return Ok(None);
        }
        let (key, value) = self.buffer.get(self.current_index);
        self.current_index += 1;
        Ok(Some((key.to_vec(), value.to_vec())))
    }

    fn dispose(&mut self) -> u64 {
        0
    }
}

/// Wraps a sorted buffer as an in-memory run without serializing it.
pub(crate) fn keep_in_ram(buffer: Box<dyn Buffer>) -> Box<dyn DataProvider> {
    Box::new(MemoryProvider {
        buffer,
        current_index: 0,
    })
}

struct FileProvider {
    reader: Option<BufReader<Box<dyn Read + Send>>>,
    size: u64,
    label: String,
}

impl DataProvider for FileProvider {
    fn next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let key_len = match read_uvarint(reader)
            .map_err(|e| Error::io(format!("read key length from {}", self.label), e))?
        {
            Some(len) => len,
            None => return Ok(None),
        };
        let mut key = vec![0u8; checked_len(key_len, "key", &self.label)?];
        reader
            .read_exact(&mut key)
            .map_err(|e| Error::io(format!("read key from {}", self.label), e))?;
        let value_len = read_uvarint(reader)
            .map_err(|e| Error::io(format!("read value length from {}", self.label), e))?
            .ok_or_else(|| {
                Error::invalid_format("spill run", format!("truncated record in {}", self.label))
            })?;
        let mut value = vec![0u8; checked_len(value_len, "value", &self.label)?];
        reader
            .read_exact(&mut value)
            .map_err(|e| Error::io(format!("read value from {}", self.label), e))?;
        Ok(Some((key, value)))
    }

    fn dispose(&mut self) -> u64 {
        // Dropping the reader removes the backing temp file.
        match self.reader.take() {
            Some(_) => self.size,
            None => 0,
        }
    }
}

fn checked_len(len: u64, field: &str, label: &str) -> Result<usize> {
    usize::try_from(len).map_err(|_| {
        Error::invalid_format(
            "spill run",
            format!("{field} length {len} exceeds address space in {label}"),
        )
    })
}

/// Serializes a sorted buffer into the store as a spill run, resets the
/// buffer and returns a provider streaming the run back.
pub(crate) fn flush_to_disk(
    buffer: &mut dyn Buffer,
    store: &dyn TemporaryFileStore,
    sync: bool,
    log_prefix: &str,
) -> Result<Box<dyn DataProvider>> {
    let writable = store
        .allocate_writable(Some(buffer.size()))
        .map_err(|e| Error::io("allocate spill file", e))?;
    let mut writer = BufWriter::with_capacity(BUF_IO_SIZE, writable);
    buffer
        .write_to(&mut writer)
        .map_err(|e| Error::io("write spill run", e))?;
    writer.flush().map_err(|e| Error::io("flush spill run", e))?;
    let mut writable = writer
        .into_inner()
        .map_err(|e| Error::io("flush spill run", e.into_error()))?;
    if sync {
        writable
            .sync_all()
            .map_err(|e| Error::io("sync spill run", e))?;
    }
    let size = writable.current_size();
    let label = writable
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "in-memory spill".to_string());
    let entries = buffer.len();
    let reader = writable
        .into_reader()
        .map_err(|e| Error::io("open spill run for reading", e))?;
    buffer.reset();
    log::debug!("[{log_prefix}] flushed run: {entries} entries, {size} bytes, {label}");
    Ok(Box::new(FileProvider {
        reader: Some(BufReader::with_capacity(BUF_IO_SIZE, reader)),
        size,
        label,
    }))
}

/// Writes `x` in LEB128 unsigned varint form.
pub(crate) fn write_uvarint(w: &mut dyn Write, mut x: u64) -> std::io::Result<()> {
    let mut buf = [0u8; 10];
    let mut i = 0;
    while x >= 0x80 {
        buf[i] = (x as u8) | 0x80;
        x >>= 7;
        i += 1;
    }
    buf[i] = x as u8;
    w.write_all(&buf[..=i])
}

/// Reads a LEB128 unsigned varint. Returns `Ok(None)` only on clean EOF
/// before the first byte; EOF inside a varint is an error.
pub(crate) fn read_uvarint(r: &mut dyn Read) -> std::io::Result<Option<u64>> {
    let mut x = 0u64;
    let mut shift = 0u32;
    for i in 0..10 {
        let mut byte = [0u8; 1];
        match r.read_exact(&mut byte) {
            Ok(()) => (),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof && i == 0 => return Ok(None),
            Err(e) => return Err(e),
        }
        let b = byte[0];
        if b < 0x80 {
            if i == 9 && b > 1 {
                return Err(std::io::Error::new(
                    ErrorKind::InvalidData,
                    "varint overflows u64",
                ));
            }
            return Ok(Some(x | (u64::from(b) << shift)));
        }
        x |= u64::from(b & 0x7f) << shift;
        shift += 7;
    }
    Err(std::io::Error::new(
        ErrorKind::InvalidData,
        "varint longer than 10 bytes",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SortableBuffer;
    use keydex_io::temp_file_store::{create_file_based, create_in_memory};

    #[test]
    fn test_uvarint_round_trip() {
        let values = [0u64, 1, 127, 128, 300, 16383, 16384, u64::MAX];
        let mut out = Vec::new();
        for &v in &values {
            write_uvarint(&mut out, v).unwrap();
        }
        let mut cursor = std::io::Cursor::new(out);
        for &v in &values {
            assert_eq!(read_uvarint(&mut cursor).unwrap(), Some(v));
        }
        assert_eq!(read_uvarint(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_uvarint_truncated() {
        let mut cursor = std::io::Cursor::new(vec![0x80u8]);
        let err = read_uvarint(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    fn check_spill_round_trip(store: &dyn TemporaryFileStore) {
        let mut buffer = SortableBuffer::new(1024);
        buffer.put(b"beta", b"2").unwrap();
        buffer.put(b"alpha", b"1").unwrap();
        buffer.put(b"", b"empty key").unwrap();
        buffer.put(b"gamma", b"").unwrap();
        buffer.sort();
        let mut provider = flush_to_disk(&mut buffer, store, false, "test").unwrap();
        assert!(buffer.is_empty());

        assert_eq!(
            provider.next().unwrap(),
            Some((b"".to_vec(), b"empty key".to_vec()))
        );
        assert_eq!(
            provider.next().unwrap(),
            Some((b"alpha".to_vec(), b"1".to_vec()))
        );
        assert_eq!(
            provider.next().unwrap(),
            Some((b"beta".to_vec(), b"2".to_vec()))
        );
        assert_eq!(
            provider.next().unwrap(),
            Some((b"gamma".to_vec(), b"".to_vec()))
        );
        assert_eq!(provider.next().unwrap(), None);
        assert!(provider.dispose() > 0);
        assert_eq!(provider.dispose(), 0);
    }

    #[test]
    fn test_file_spill_round_trip() {
        let store = create_file_based(None).unwrap();
        check_spill_round_trip(store.as_ref());
    }

    #[test]
    fn test_memory_spill_round_trip() {
        let store = create_in_memory();
        check_spill_round_trip(store.as_ref());
    }

    #[test]
    fn test_memory_provider() {
        let mut buffer = SortableBuffer::new(1024);
        buffer.put(b"b", b"2").unwrap();
        buffer.put(b"a", b"1").unwrap();
        buffer.sort();
        let mut provider = keep_in_ram(Box::new(buffer));
        assert_eq!(
            provider.next().unwrap(),
            Some((b"a".to_vec(), b"1".to_vec()))
        );
        assert_eq!(
            provider.next().unwrap(),
            Some((b"b".to_vec(), b"2".to_vec()))
        );
        assert_eq!(provider.next().unwrap(), None);
        assert_eq!(provider.dispose(), 0);
    }
}
