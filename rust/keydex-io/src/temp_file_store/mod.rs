//! Temporary file stores: file-based and in-memory implementations.

use std::{io, path::Path, sync::Arc};

pub mod file;
pub mod memory;
#[cfg(test)]
mod tests;

/// The `TemporaryFileStore` trait provides temporary file-like objects
/// to consumers. Allocated objects are write-only streams that are later
/// converted into readers; the backing storage is released when the reader
/// (or the unconverted writable) is dropped.
pub trait TemporaryFileStore: Send + Sync + 'static {
    /// Allocates a temporary write-only stream that can be appended to
    /// and later converted into a reader.
    ///
    /// # Arguments
    ///
    /// * `size_hint` - An optional hint for the expected size of the stream.
    fn allocate_writable(
        &self,
        size_hint: Option<usize>,
    ) -> io::Result<Box<dyn TemporaryWritable>>;
}

/// A temporary write-only stream that can be appended to and converted
/// into a reader.
pub trait TemporaryWritable: io::Write + Send + 'static {
    /// Returns the current size (i.e., the end position) of the stream.
    fn current_size(&self) -> u64;

    /// Path of the backing file, or `None` when the stream is memory
    /// resident.
    fn path(&self) -> Option<&Path>;

    /// Flushes buffered data and syncs it to stable storage. A no-op for
    /// memory-resident streams.
    fn sync_all(&mut self) -> io::Result<()>;

    /// Converts the stream into `std::io::Read`, positioned at the start.
    /// The allocated storage is released when the returned reader is
    /// dropped.
    fn into_reader(self: Box<Self>) -> io::Result<Box<dyn io::Read + Send>>;
}

/// Creates a file-based store that places its temporary files in a fresh
/// subdirectory of `parent_path` (or of the system temp dir when `None`).
pub fn create_file_based(parent_path: Option<&Path>) -> io::Result<Arc<dyn TemporaryFileStore>> {
    Ok(Arc::new(file::LocalTempFileStore::new(parent_path)?))
}

/// Creates a store whose "files" are plain in-memory buffers.
pub fn create_in_memory() -> Arc<dyn TemporaryFileStore> {
    Arc::new(memory::InMemoryTempFileStore)
}
