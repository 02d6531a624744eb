//! Buffered, piece-aware reading over partially downloaded files.
//!
//! [`BufferedPieceReader`] gives playback code a plain seek-and-read view of
//! a file whose pieces arrive out of order. On every refill it asks the piece
//! table how far contiguous finished data extends around the read position,
//! reuses whatever of the previous window overlaps the new one, and fetches
//! only the missing head/tail deltas from storage. Reads against unfinished
//! regions report zero bytes instead of blocking; callers poll until the
//! engine finishes the covering piece.

use std::ops::Range;
use std::sync::Arc;

use tracing::{debug, trace};

use super::window::{BufferWindow, plan_refill};
use crate::config::ReaderConfig;
use crate::storage::{RandomAccess, StorageError, read_exact_at};
use crate::torrent::{PieceIndex, PieceTable};

/// Outcome of a single [`BufferedPieceReader::read`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Number of bytes copied into the destination.
    ///
    /// Zero either echoes a zero-length destination or means the piece
    /// covering the current position has not finished downloading yet; poll
    /// again once the engine reports progress.
    Read(usize),
    /// The read position is at or past the end of the file.
    Eof,
}

impl ReadOutcome {
    pub fn is_eof(self) -> bool {
        matches!(self, ReadOutcome::Eof)
    }

    /// Bytes copied, 0 at end of file.
    pub fn bytes_read(self) -> usize {
        match self {
            ReadOutcome::Read(n) => n,
            ReadOutcome::Eof => 0,
        }
    }
}

/// Errors from reader operations.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// Operation on a reader after [`BufferedPieceReader::close`].
    #[error("reader is closed")]
    Closed,

    /// A zero per-direction buffer capacity would make every position
    /// permanently unavailable.
    #[error("buffer size must be non-zero")]
    InvalidBufferSize,

    #[error("logical start {logical_start} outside piece space {start}..{end}")]
    InvalidLogicalStart {
        logical_start: u64,
        start: u64,
        end: u64,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A fixed-size read helper landed on a piece that is not finished.
    #[error("piece {piece} is not yet finished")]
    NotAvailable { piece: PieceIndex },

    /// A fixed-size read helper ran past the end of the file.
    #[error("unexpected end of stream at position {position}")]
    UnexpectedEof { position: u64 },
}

/// Callback invoked with the piece index whenever a read lands on a
/// not-yet-finished piece. Engines typically use it to raise that piece's
/// download priority.
pub type WaitHook = Box<dyn FnMut(PieceIndex) + Send>;

/// Seekable reader over a file backed by an incrementally downloaded piece
/// space.
///
/// Positions are file-relative; `logical_start` maps them into the piece
/// table's absolute offsets for files that occupy a sub-range of a shared
/// piece space. The reader owns a single buffer window that extends at most
/// `buffer_size` bytes on each side of the read position.
///
/// Intended for one sequential caller (a playback pipeline); it is not safe
/// for concurrent `seek`/`read` without external synchronization. Piece
/// states may change concurrently underneath it at any time.
pub struct BufferedPieceReader<S: RandomAccess> {
    storage: Option<S>,
    pieces: Arc<PieceTable>,
    /// Absolute offset of this file's first byte within the piece space.
    logical_start: u64,
    total_length: u64,
    buffer_size: u64,
    position: u64,
    window: BufferWindow,
    wait_hook: Option<WaitHook>,
}

impl<S: RandomAccess> BufferedPieceReader<S> {
    /// Creates a reader whose file starts at the piece table's first byte.
    ///
    /// # Errors
    ///
    /// - `ReaderError::InvalidBufferSize` - if `config.buffer_size` is zero
    /// - `ReaderError::Storage` - if the storage length cannot be read
    pub fn new(
        storage: S,
        pieces: Arc<PieceTable>,
        config: ReaderConfig,
    ) -> Result<Self, ReaderError> {
        let logical_start = pieces.start_offset();
        Self::with_logical_start(storage, pieces, config, logical_start)
    }

    /// Creates a reader for a file occupying a sub-range of a shared piece
    /// space, starting at absolute offset `logical_start`.
    ///
    /// The readable length is the smaller of the storage length and the part
    /// of the piece space at or after `logical_start`.
    ///
    /// # Errors
    ///
    /// - `ReaderError::InvalidBufferSize` - if `config.buffer_size` is zero
    /// - `ReaderError::InvalidLogicalStart` - if `logical_start` is outside
    ///   the piece space
    /// - `ReaderError::Storage` - if the storage length cannot be read
    pub fn with_logical_start(
        storage: S,
        pieces: Arc<PieceTable>,
        config: ReaderConfig,
        logical_start: u64,
    ) -> Result<Self, ReaderError> {
        if config.buffer_size == 0 {
            return Err(ReaderError::InvalidBufferSize);
        }
        if logical_start < pieces.start_offset() || logical_start > pieces.end_offset() {
            return Err(ReaderError::InvalidLogicalStart {
                logical_start,
                start: pieces.start_offset(),
                end: pieces.end_offset(),
            });
        }
        let total_length = storage.size()?.min(pieces.end_offset() - logical_start);
        Ok(Self {
            storage: Some(storage),
            pieces,
            logical_start,
            total_length,
            buffer_size: config.buffer_size,
            position: 0,
            window: BufferWindow::default(),
            wait_hook: None,
        })
    }

    /// Installs a hook observing pieces the reader is waiting on.
    pub fn set_wait_hook(&mut self, hook: impl FnMut(PieceIndex) + Send + 'static) {
        self.wait_hook = Some(Box::new(hook));
    }

    /// Next position a read will start from.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Readable length of the file in bytes.
    pub fn size(&self) -> u64 {
        self.total_length
    }

    /// Absolute file range currently buffered, `None` when nothing is.
    pub fn buffered_range(&self) -> Option<Range<u64>> {
        self.window.range()
    }

    pub fn is_closed(&self) -> bool {
        self.storage.is_none()
    }

    /// Index of the piece covering the file-relative `position`, if any.
    pub fn find_piece_index(&self, position: u64) -> Option<PieceIndex> {
        self.pieces
            .piece_index_at(position + self.logical_start)
            .ok()
    }

    /// Moves the read position to `position`. Performs no I/O.
    ///
    /// Seeking past end-of-file is legal; subsequent reads report EOF.
    ///
    /// # Errors
    ///
    /// - `ReaderError::Closed` - if the reader was closed
    pub fn seek(&mut self, position: u64) -> Result<(), ReaderError> {
        self.ensure_open()?;
        self.position = position;
        Ok(())
    }

    /// Reads up to `dst.len()` bytes at the current position.
    ///
    /// Returns [`ReadOutcome::Eof`] at or past end-of-file, otherwise copies
    /// as many bytes as the window holds from the position onward (bounded by
    /// contiguous finished pieces) and advances the position. A return of
    /// `Read(0)` for a non-empty `dst` means the covering piece is not
    /// finished yet: poll again, the call never blocks.
    ///
    /// # Errors
    ///
    /// - `ReaderError::Closed` - if the reader was closed
    /// - `ReaderError::Storage` - if a window refill failed
    pub fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome, ReaderError> {
        self.ensure_open()?;
        if dst.is_empty() {
            return Ok(ReadOutcome::Read(0));
        }
        if self.position >= self.total_length {
            return Ok(ReadOutcome::Eof);
        }
        self.prepare_buffer()?;
        if !self.window.contains(self.position) || !self.position_finished() {
            return Ok(ReadOutcome::Read(0));
        }
        let chunk = self.window.suffix(self.position);
        let n = dst.len().min(chunk.len());
        dst[..n].copy_from_slice(&chunk[..n]);
        self.position += n as u64;
        Ok(ReadOutcome::Read(n))
    }

    /// Ensures the window covers the current position without consuming
    /// bytes.
    ///
    /// No-op when the position is already inside the window and its piece is
    /// finished, or when the covering piece is not finished at all (the
    /// window is left untouched for later reuse). Idempotent.
    ///
    /// # Errors
    ///
    /// - `ReaderError::Closed` - if the reader was closed
    /// - `ReaderError::Storage` - if fetching window bytes failed
    pub fn prepare_buffer(&mut self) -> Result<(), ReaderError> {
        self.ensure_open()?;
        if self.position >= self.total_length {
            return Ok(());
        }
        if self.window.contains(self.position) && self.position_finished() {
            return Ok(());
        }
        self.fill_window()
    }

    /// Releases the buffer and the storage handle. Idempotent; subsequent
    /// `seek`/`read`/`prepare_buffer` fail with [`ReaderError::Closed`].
    pub fn close(&mut self) {
        if self.storage.is_none() {
            return;
        }
        self.storage = None;
        self.window.clear();
        debug!("reader closed");
    }

    fn ensure_open(&self) -> Result<(), ReaderError> {
        if self.storage.is_none() {
            return Err(ReaderError::Closed);
        }
        Ok(())
    }

    fn position_finished(&self) -> bool {
        let abs = self.position + self.logical_start;
        self.pieces
            .piece_index_at(abs)
            .ok()
            .and_then(|index| self.pieces.piece(index))
            .is_some_and(|piece| piece.state().is_finished())
    }

    /// Rebuilds the window around the current position from contiguous
    /// finished pieces, reusing any overlap with the previous window.
    fn fill_window(&mut self) -> Result<(), ReaderError> {
        let abs = self.position + self.logical_start;
        let forward = self.pieces.max_run_forward(abs, self.buffer_size);
        if forward == 0 {
            self.fire_wait_hook(abs);
            return Ok(());
        }
        // clamp to file bounds: the run is computed in piece space and may
        // extend past this file on either side
        let backward = self
            .pieces
            .max_run_backward(abs, self.buffer_size)
            .min(self.position);
        let new = (self.position - backward)..(self.position + forward).min(self.total_length);

        let plan = plan_refill(self.window.range(), new.clone());
        let mut bytes = vec![0u8; (new.end - new.start) as usize];
        let mut reused = 0usize;
        if let Some(range) = &plan.reuse {
            let src = self.window.slice(range.clone());
            let dst_from = (range.start - new.start) as usize;
            bytes[dst_from..dst_from + src.len()].copy_from_slice(src);
            reused = src.len();
        }
        let storage = self.storage.as_ref().ok_or(ReaderError::Closed)?;
        for range in plan.fetch_head.iter().chain(plan.fetch_tail.iter()) {
            let dst_from = (range.start - new.start) as usize;
            let dst_to = (range.end - new.start) as usize;
            read_exact_at(storage, range.start, &mut bytes[dst_from..dst_to])?;
        }
        trace!(start = new.start, end = new.end, reused, "window refilled");
        self.window.replace(new.start, bytes);
        Ok(())
    }

    fn fire_wait_hook(&mut self, abs_offset: u64) {
        let Ok(index) = self.pieces.piece_index_at(abs_offset) else {
            return;
        };
        debug!(piece = %index, "piece covering read position not finished");
        if let Some(hook) = self.wait_hook.as_mut() {
            hook(index);
        }
    }

    fn unavailable_error(&self) -> ReaderError {
        match self.pieces.piece_index_at(self.position + self.logical_start) {
            Ok(piece) => ReaderError::NotAvailable { piece },
            Err(_) => ReaderError::UnexpectedEof {
                position: self.position,
            },
        }
    }

    /// Reads exactly `length` bytes from the current position.
    ///
    /// # Errors
    ///
    /// - `ReaderError::UnexpectedEof` - if the file ends first
    /// - `ReaderError::NotAvailable` - if an unfinished piece is hit
    /// - `ReaderError::Closed` / `ReaderError::Storage` - as for `read`
    pub fn read_exact_bytes(&mut self, length: usize) -> Result<Vec<u8>, ReaderError> {
        let mut out = vec![0u8; length];
        let mut filled = 0usize;
        while filled < length {
            match self.read(&mut out[filled..])? {
                ReadOutcome::Eof => {
                    return Err(ReaderError::UnexpectedEof {
                        position: self.position,
                    });
                }
                ReadOutcome::Read(0) => return Err(self.unavailable_error()),
                ReadOutcome::Read(n) => filled += n,
            }
        }
        Ok(out)
    }

    /// Reads from the current position to end-of-file.
    ///
    /// # Errors
    ///
    /// - `ReaderError::NotAvailable` - if an unfinished piece is hit
    /// - `ReaderError::Closed` / `ReaderError::Storage` - as for `read`
    pub fn read_all_bytes(&mut self) -> Result<Vec<u8>, ReaderError> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            match self.read(&mut chunk)? {
                ReadOutcome::Eof => return Ok(out),
                ReadOutcome::Read(0) => return Err(self.unavailable_error()),
                ReadOutcome::Read(n) => out.extend_from_slice(&chunk[..n]),
            }
        }
    }
}
