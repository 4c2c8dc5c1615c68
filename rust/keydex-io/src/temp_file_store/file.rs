use std::{
    fs::File,
    io::{self, Seek, SeekFrom, Write},
    path::Path,
    sync::Arc,
};

use tempfile::{NamedTempFile, TempPath};

use crate::temp_file_store::{TemporaryFileStore, TemporaryWritable};

/// File-based temporary store. All files live in a dedicated temp
/// subdirectory which is removed once the store and every stream allocated
/// from it are dropped.
#[derive(Clone)]
pub struct LocalTempFileStore(Arc<LocalTempContainer>);

struct LocalTempContainer {
    container: tempfile::TempDir,
}

impl LocalTempFileStore {
    pub fn new(parent_path: Option<&Path>) -> io::Result<LocalTempFileStore> {
        let container = if let Some(parent) = parent_path {
            std::fs::create_dir_all(parent)?;
            tempfile::tempdir_in(parent)?
        } else {
            tempfile::tempdir()?
        };
        Ok(LocalTempFileStore(Arc::new(LocalTempContainer {
            container,
        })))
    }

    pub fn path(&self) -> &Path {
        self.0.container.path()
    }
}

impl TemporaryFileStore for LocalTempFileStore {
    fn allocate_writable(
        &self,
        _size_hint: Option<usize>,
    ) -> io::Result<Box<dyn TemporaryWritable>> {
        let file = tempfile::Builder::new()
            .prefix("keydex-sortable-buf-")
            .tempfile_in(self.path())?;
        Ok(Box::new(LocalTempFile {
            _container: self.0.clone(),
            file,
            size: 0,
        }))
    }
}

struct LocalTempFile {
    _container: Arc<LocalTempContainer>,
    file: NamedTempFile,
    size: u64,
}

impl io::Write for LocalTempFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl TemporaryWritable for LocalTempFile {
    fn current_size(&self) -> u64 {
        self.size
    }

    fn path(&self) -> Option<&Path> {
        Some(self.file.path())
    }

    fn sync_all(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.as_file().sync_all()
    }

    fn into_reader(mut self: Box<Self>) -> io::Result<Box<dyn io::Read + Send>> {
        self.file.flush()?;
        let (mut file, path) = self.file.into_parts();
        file.seek(SeekFrom::Start(0))?;
        Ok(Box::new(LocalTempFileReader {
            _container: self._container,
            file,
            _path: path,
        }))
    }
}

/// Reader over a finished temp file. The file is deleted when the reader
/// is dropped.
struct LocalTempFileReader {
    _container: Arc<LocalTempContainer>,
    file: File,
    _path: TempPath,
}

impl io::Read for LocalTempFileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut self.file, buf)
    }
}
