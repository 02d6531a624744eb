//! Raw random-access byte storage underneath the streaming reader.
//!
//! The reader only needs two primitives from the bytes the engine has written
//! to disk: "read at absolute offset" and "total length". Everything here is
//! synchronous; the playback path performs blocking I/O and never suspends
//! internally.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use parking_lot::Mutex;

/// Errors from raw storage access.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// The source ended before a full window could be fetched. Seen when the
    /// piece table claims more bytes than the backing file holds.
    #[error("storage ended early: wanted {wanted} bytes at offset {offset}")]
    TruncatedRead { offset: u64, wanted: usize },
}

/// Random-access view over the bytes backing one logical file.
///
/// Offsets are file-relative, starting at 0 regardless of where the file sits
/// inside a shared piece space.
pub trait RandomAccess: Send {
    /// Reads up to `dst.len()` bytes at `offset`, returning the count.
    ///
    /// Short reads are allowed; a return of 0 for a non-empty `dst` means
    /// `offset` is at or past the end of the source.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - if the underlying read failed
    fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<usize, StorageError>;

    /// Total length of the source in bytes.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - if the length could not be determined
    fn size(&self) -> Result<u64, StorageError>;
}

/// Reads exactly `dst.len()` bytes at `offset`, looping over short reads.
///
/// # Errors
///
/// - `StorageError::TruncatedRead` - if the source ends before `dst` is full
/// - `StorageError::Io` - if the underlying read failed
pub fn read_exact_at<S: RandomAccess + ?Sized>(
    storage: &S,
    offset: u64,
    dst: &mut [u8],
) -> Result<(), StorageError> {
    let mut filled = 0usize;
    while filled < dst.len() {
        let n = storage.read_at(offset + filled as u64, &mut dst[filled..])?;
        if n == 0 {
            return Err(StorageError::TruncatedRead {
                offset: offset + filled as u64,
                wanted: dst.len() - filled,
            });
        }
        filled += n;
    }
    Ok(())
}

/// `std::fs::File`-backed storage using positioned reads.
///
/// Positioned reads take `&self`, so no lock is needed around the handle.
#[derive(Debug)]
pub struct FileStorage {
    file: File,
}

impl FileStorage {
    /// Opens `path` read-only.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - if the file cannot be opened
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Ok(Self {
            file: File::open(path)?,
        })
    }

    /// Wraps an already-open file handle.
    pub fn from_file(file: File) -> Self {
        Self { file }
    }
}

impl RandomAccess for FileStorage {
    #[cfg(unix)]
    fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<usize, StorageError> {
        use std::os::unix::fs::FileExt;
        Ok(self.file.read_at(dst, offset)?)
    }

    #[cfg(windows)]
    fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<usize, StorageError> {
        use std::os::windows::fs::FileExt;
        Ok(self.file.seek_read(dst, offset)?)
    }

    fn size(&self) -> Result<u64, StorageError> {
        Ok(self.file.metadata()?.len())
    }
}

/// Adapter exposing any `Read + Seek` stream as [`RandomAccess`].
///
/// Positioned reads must seek first, so the stream sits behind a mutex; the
/// total size is captured once at construction.
#[derive(Debug)]
pub struct StreamStorage<R> {
    stream: Mutex<R>,
    size: u64,
}

impl<R: Read + Seek> StreamStorage<R> {
    /// Wraps `stream`, measuring its length with a seek to the end.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - if the stream cannot be seeked
    pub fn new(mut stream: R) -> Result<Self, StorageError> {
        let size = stream.seek(SeekFrom::End(0))?;
        Ok(Self {
            stream: Mutex::new(stream),
            size,
        })
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> R {
        self.stream.into_inner()
    }
}

impl<R: Read + Seek + Send> RandomAccess for StreamStorage<R> {
    fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<usize, StorageError> {
        if offset >= self.size {
            return Ok(0);
        }
        let mut stream = self.stream.lock();
        stream.seek(SeekFrom::Start(offset))?;
        Ok(stream.read(dst)?)
    }

    fn size(&self) -> Result<u64, StorageError> {
        Ok(self.size)
    }
}

/// Fully materialized in-memory bytes.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    bytes: Vec<u8>,
}

impl MemoryStorage {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

impl RandomAccess for MemoryStorage {
    fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<usize, StorageError> {
        if offset >= self.bytes.len() as u64 {
            return Ok(0);
        }
        let available = &self.bytes[offset as usize..];
        let n = dst.len().min(available.len());
        dst[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn size(&self) -> Result<u64, StorageError> {
        Ok(self.bytes.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::io::Write;

    use super::*;

    #[test]
    fn test_file_storage_positioned_reads() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"0123456789").unwrap();
        let storage = FileStorage::from_file(file);

        assert_eq!(storage.size().unwrap(), 10);

        let mut buf = [0u8; 4];
        assert_eq!(storage.read_at(3, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"3456");

        // read past the end is a zero-byte read, not an error
        assert_eq!(storage.read_at(10, &mut buf).unwrap(), 0);
        assert_eq!(storage.read_at(100, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_stream_storage_over_cursor() {
        let storage = StreamStorage::new(Cursor::new(b"abcdefgh".to_vec())).unwrap();
        assert_eq!(storage.size().unwrap(), 8);

        let mut buf = [0u8; 3];
        assert_eq!(storage.read_at(2, &mut buf).unwrap(), 3);
        assert_eq!(&buf, b"cde");
        assert_eq!(storage.read_at(8, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_memory_storage_truncates_at_end() {
        let storage = MemoryStorage::new(b"abcd".to_vec());
        let mut buf = [0u8; 8];
        assert_eq!(storage.read_at(2, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"cd");
    }

    #[test]
    fn test_read_exact_at_loops_and_detects_truncation() {
        let storage = MemoryStorage::new(b"abcdef".to_vec());

        let mut buf = [0u8; 4];
        read_exact_at(&storage, 1, &mut buf).unwrap();
        assert_eq!(&buf, b"bcde");

        let mut buf = [0u8; 4];
        assert!(matches!(
            read_exact_at(&storage, 4, &mut buf),
            Err(StorageError::TruncatedRead { offset: 6, wanted: 2 })
        ));
    }
}
