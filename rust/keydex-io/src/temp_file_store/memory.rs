use std::{io, path::Path};

use crate::temp_file_store::{TemporaryFileStore, TemporaryWritable};

/// A store whose temporary "files" are in-memory byte buffers. Useful for
/// tests and for pipelines whose spilled runs are known to be small.
pub struct InMemoryTempFileStore;

impl TemporaryFileStore for InMemoryTempFileStore {
    fn allocate_writable(
        &self,
        size_hint: Option<usize>,
    ) -> io::Result<Box<dyn TemporaryWritable>> {
        Ok(Box::new(MemoryTempFile {
            data: Vec::with_capacity(size_hint.unwrap_or(0)),
        }))
    }
}

struct MemoryTempFile {
    data: Vec<u8>,
}

impl io::Write for MemoryTempFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TemporaryWritable for MemoryTempFile {
    fn current_size(&self) -> u64 {
        self.data.len() as u64
    }

    fn path(&self) -> Option<&Path> {
        None
    }

    fn sync_all(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn into_reader(self: Box<Self>) -> io::Result<Box<dyn io::Read + Send>> {
        Ok(Box::new(io::Cursor::new(self.data)))
    }
}
