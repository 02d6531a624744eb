//! `std::io` adapter over the piece-aware reader.
//!
//! Playback pipelines that consume a generic seekable input get one here:
//! EOF maps to `Ok(0)`, an unfinished piece maps to `ErrorKind::WouldBlock`
//! (the poll contract survives the adaptation; nothing blocks), and seeks
//! translate `SeekFrom` arithmetic onto the reader's absolute position.

use std::io;

use super::reader::{BufferedPieceReader, ReadOutcome, ReaderError};
use crate::storage::{RandomAccess, StorageError};

/// Wraps a [`BufferedPieceReader`] in `std::io::Read + Seek`.
pub struct IoAdapter<S: RandomAccess> {
    inner: BufferedPieceReader<S>,
}

impl<S: RandomAccess> IoAdapter<S> {
    pub fn new(inner: BufferedPieceReader<S>) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &BufferedPieceReader<S> {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut BufferedPieceReader<S> {
        &mut self.inner
    }

    pub fn into_inner(self) -> BufferedPieceReader<S> {
        self.inner
    }
}

fn into_io_error(err: ReaderError) -> io::Error {
    match err {
        ReaderError::Storage(StorageError::Io { source }) => source,
        other => io::Error::other(other),
    }
}

impl<S: RandomAccess> io::Read for IoAdapter<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Ok(ReadOutcome::Eof) => Ok(0),
            Ok(ReadOutcome::Read(0)) if !buf.is_empty() => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "piece covering the read position is not yet finished",
            )),
            Ok(ReadOutcome::Read(n)) => Ok(n),
            Err(err) => Err(into_io_error(err)),
        }
    }
}

impl<S: RandomAccess> io::Seek for IoAdapter<S> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let target = match pos {
            io::SeekFrom::Start(offset) => offset,
            io::SeekFrom::Current(delta) => {
                target_or_invalid(self.inner.position().checked_add_signed(delta))?
            }
            io::SeekFrom::End(delta) => {
                target_or_invalid(self.inner.size().checked_add_signed(delta))?
            }
        };
        self.inner.seek(target).map_err(into_io_error)?;
        Ok(target)
    }
}

fn target_or_invalid(target: Option<u64>) -> io::Result<u64> {
    target.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "seek before the start of the stream",
        )
    })
}
