//! Ordered piece descriptors over the logical byte range of a download.
//!
//! A [`PieceTable`] is built once when a download session starts and never
//! changes shape afterwards; only the per-piece download states move. States
//! are written by the engine from its own tasks and observed by the reader
//! through atomic loads, so neither side ever takes a lock the other needs.

use std::pin::pin;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::Notify;
use tracing::trace;

use super::PieceIndex;

/// Download state of a single piece.
///
/// Only `Finished` permits reads; the reader treats everything else as
/// "bytes not yet present".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PieceState {
    /// No data for this piece has been received.
    NotAvailable = 0,
    /// The engine is actively fetching blocks of this piece.
    Downloading = 1,
    /// All blocks received and verified; the bytes are readable.
    Finished = 2,
}

impl PieceState {
    /// Whether this state permits reading the piece's bytes.
    pub fn is_finished(self) -> bool {
        matches!(self, PieceState::Finished)
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => PieceState::Downloading,
            2 => PieceState::Finished,
            _ => PieceState::NotAvailable,
        }
    }
}

/// A single piece descriptor.
///
/// Index, offset, and size are fixed at construction; the state cell is the
/// only mutable part and is written through [`PieceTable::set_state`].
#[derive(Debug)]
pub struct Piece {
    index: PieceIndex,
    offset: u64,
    size: u64,
    state: AtomicU8,
}

impl Piece {
    fn new(index: PieceIndex, offset: u64, size: u64) -> Self {
        Self {
            index,
            offset,
            size,
            state: AtomicU8::new(PieceState::NotAvailable as u8),
        }
    }

    /// Position of this piece in the table.
    pub fn index(&self) -> PieceIndex {
        self.index
    }

    /// Absolute offset of the piece's first byte within the piece space.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Byte length of the piece.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Exclusive end offset of the piece.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// Current download state.
    pub fn state(&self) -> PieceState {
        PieceState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn store_state(&self, state: PieceState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Errors from piece table construction and lookups.
#[derive(Debug, thiserror::Error)]
pub enum PieceTableError {
    #[error("piece size must be non-zero")]
    InvalidPieceSize,

    #[error("{count} pieces do not fit a u32 index")]
    TooManyPieces { count: u64 },

    #[error("offset {offset} outside piece space {start}..{end}")]
    OffsetOutOfRange { offset: u64, start: u64, end: u64 },

    #[error("piece index {index} out of bounds ({count} pieces)")]
    UnknownPiece { index: PieceIndex, count: usize },
}

/// Ordered, contiguous piece descriptors covering
/// `[initial_offset, initial_offset + total_length)`.
///
/// All pieces share one size except the last, which may be shorter. The table
/// is shared between the download engine (which writes states) and readers
/// (which observe them); wrap it in an `Arc` and hand a clone to each side.
#[derive(Debug)]
pub struct PieceTable {
    pieces: Vec<Piece>,
    piece_size: u64,
    start_offset: u64,
    total_length: u64,
    state_changed: Notify,
}

impl PieceTable {
    /// Builds a table covering `[0, total_length)`.
    ///
    /// # Errors
    ///
    /// - `PieceTableError::InvalidPieceSize` - if `piece_size` is zero
    /// - `PieceTableError::TooManyPieces` - if the piece count overflows u32
    pub fn new(total_length: u64, piece_size: u64) -> Result<Self, PieceTableError> {
        Self::with_initial_offset(total_length, piece_size, 0)
    }

    /// Builds a table whose first piece starts at `initial_offset`.
    ///
    /// Used when several logical files share one underlying piece space and
    /// this table describes a region that does not begin at zero.
    ///
    /// # Errors
    ///
    /// - `PieceTableError::InvalidPieceSize` - if `piece_size` is zero
    /// - `PieceTableError::TooManyPieces` - if the piece count overflows u32
    pub fn with_initial_offset(
        total_length: u64,
        piece_size: u64,
        initial_offset: u64,
    ) -> Result<Self, PieceTableError> {
        if piece_size == 0 {
            return Err(PieceTableError::InvalidPieceSize);
        }
        let count = total_length.div_ceil(piece_size);
        if count > u64::from(u32::MAX) {
            return Err(PieceTableError::TooManyPieces { count });
        }

        let end = initial_offset + total_length;
        let mut pieces = Vec::with_capacity(count as usize);
        for i in 0..count {
            let offset = initial_offset + i * piece_size;
            let size = piece_size.min(end - offset);
            pieces.push(Piece::new(PieceIndex::new(i as u32), offset, size));
        }

        Ok(Self {
            pieces,
            piece_size,
            start_offset: initial_offset,
            total_length,
            state_changed: Notify::new(),
        })
    }

    /// Number of pieces in the table.
    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    /// Whether the table covers zero bytes.
    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    /// All piece descriptors in index order.
    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    /// The descriptor for `index`, if it exists.
    pub fn piece(&self, index: PieceIndex) -> Option<&Piece> {
        self.pieces.get(index.as_usize())
    }

    /// Nominal piece size (the last piece may be shorter).
    pub fn piece_size(&self) -> u64 {
        self.piece_size
    }

    /// Total number of bytes covered by the table.
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Absolute offset of the first covered byte.
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Absolute offset one past the last covered byte.
    pub fn end_offset(&self) -> u64 {
        self.start_offset + self.total_length
    }

    /// Finds the piece covering the absolute `offset`.
    ///
    /// Exact and O(1): pieces are contiguous and equally sized apart from the
    /// last, so the index is a division away.
    ///
    /// # Errors
    ///
    /// - `PieceTableError::OffsetOutOfRange` - if `offset` is outside the
    ///   covered span
    pub fn piece_index_at(&self, offset: u64) -> Result<PieceIndex, PieceTableError> {
        if offset < self.start_offset || offset >= self.end_offset() {
            return Err(PieceTableError::OffsetOutOfRange {
                offset,
                start: self.start_offset,
                end: self.end_offset(),
            });
        }
        let index = (offset - self.start_offset) / self.piece_size;
        Ok(PieceIndex::new(index as u32))
    }

    /// Current state of `index`.
    ///
    /// # Errors
    ///
    /// - `PieceTableError::UnknownPiece` - if `index` is out of bounds
    pub fn state(&self, index: PieceIndex) -> Result<PieceState, PieceTableError> {
        Ok(self.require(index)?.state())
    }

    /// Records a state transition reported by the download engine.
    ///
    /// Wakes any task parked in [`PieceTable::wait_finished`].
    ///
    /// # Errors
    ///
    /// - `PieceTableError::UnknownPiece` - if `index` is out of bounds
    pub fn set_state(&self, index: PieceIndex, state: PieceState) -> Result<(), PieceTableError> {
        self.require(index)?.store_state(state);
        trace!(piece = %index, ?state, "piece state updated");
        self.state_changed.notify_waiters();
        Ok(())
    }

    /// Maximal readable run starting at `offset`, going forward.
    ///
    /// Accumulates bytes from `offset` to the end of its piece, then through
    /// subsequent pieces while each is `Finished`, stopping at the first
    /// non-finished piece, the end of the piece space, or `cap`. Returns 0
    /// when the covering piece is not itself `Finished` or `offset` is
    /// outside the table.
    pub fn max_run_forward(&self, offset: u64, cap: u64) -> u64 {
        let Ok(first) = self.piece_index_at(offset) else {
            return 0;
        };
        let mut run = 0u64;
        for piece in &self.pieces[first.as_usize()..] {
            if !piece.state().is_finished() {
                break;
            }
            run += piece.end() - piece.offset().max(offset);
            if run >= cap {
                return cap;
            }
        }
        run
    }

    /// Maximal readable run ending at `offset`, going backward.
    ///
    /// Symmetric to [`PieceTable::max_run_forward`]: bytes from the start of
    /// the covering piece up to `offset`, then preceding `Finished` pieces,
    /// capped at `cap`. An `offset` on an exact piece boundary contributes
    /// zero bytes from its covering piece and continues into the preceding
    /// one.
    pub fn max_run_backward(&self, offset: u64, cap: u64) -> u64 {
        let Ok(first) = self.piece_index_at(offset) else {
            return 0;
        };
        let mut run = 0u64;
        for piece in self.pieces[..=first.as_usize()].iter().rev() {
            if !piece.state().is_finished() {
                break;
            }
            run += piece.end().min(offset) - piece.offset();
            if run >= cap {
                return cap;
            }
        }
        run
    }

    /// Waits until `index` reaches `Finished`.
    ///
    /// Convenience for callers that want to sleep between read polls instead
    /// of spinning; the reader itself never waits.
    ///
    /// # Errors
    ///
    /// - `PieceTableError::UnknownPiece` - if `index` is out of bounds
    pub async fn wait_finished(&self, index: PieceIndex) -> Result<(), PieceTableError> {
        let piece = self.require(index)?;
        let mut notified = pin!(self.state_changed.notified());
        loop {
            if piece.state().is_finished() {
                return Ok(());
            }
            notified.as_mut().enable();
            // re-check: the state may have changed before registration
            if piece.state().is_finished() {
                return Ok(());
            }
            notified.as_mut().await;
            notified.set(self.state_changed.notified());
        }
    }

    fn require(&self, index: PieceIndex) -> Result<&Piece, PieceTableError> {
        self.piece(index).ok_or(PieceTableError::UnknownPiece {
            index,
            count: self.pieces.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn finish(table: &PieceTable, indexes: &[u32]) {
        for &i in indexes {
            table
                .set_state(PieceIndex::new(i), PieceState::Finished)
                .unwrap();
        }
    }

    #[test]
    fn test_build_shapes() {
        // 574 bytes, piece size 16: 35 full pieces plus a 14-byte tail
        let table = PieceTable::new(574, 16).unwrap();
        assert_eq!(table.len(), 36);
        assert_eq!(table.pieces()[0].offset(), 0);
        assert_eq!(table.pieces()[0].size(), 16);
        assert_eq!(table.pieces()[35].offset(), 560);
        assert_eq!(table.pieces()[35].size(), 14);
        assert_eq!(table.end_offset(), 574);

        // exact division leaves no short tail
        let table = PieceTable::new(64, 16).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.pieces()[3].size(), 16);

        let empty = PieceTable::new(0, 16).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_pieces_are_contiguous() {
        let table = PieceTable::with_initial_offset(574, 16, 1000).unwrap();
        assert_eq!(table.start_offset(), 1000);
        for pair in table.pieces().windows(2) {
            assert_eq!(pair[0].end(), pair[1].offset());
        }
        assert_eq!(table.pieces().last().unwrap().end(), 1574);
    }

    #[test]
    fn test_invalid_construction() {
        assert!(matches!(
            PieceTable::new(100, 0),
            Err(PieceTableError::InvalidPieceSize)
        ));
        assert!(matches!(
            PieceTable::new(u64::MAX, 1),
            Err(PieceTableError::TooManyPieces { .. })
        ));
    }

    #[test]
    fn test_piece_index_at() {
        let table = PieceTable::new(574, 16).unwrap();
        assert_eq!(table.piece_index_at(0).unwrap().as_u32(), 0);
        assert_eq!(table.piece_index_at(15).unwrap().as_u32(), 0);
        assert_eq!(table.piece_index_at(16).unwrap().as_u32(), 1);
        assert_eq!(table.piece_index_at(31).unwrap().as_u32(), 1);
        assert_eq!(table.piece_index_at(573).unwrap().as_u32(), 35);
        assert!(matches!(
            table.piece_index_at(574),
            Err(PieceTableError::OffsetOutOfRange { .. })
        ));
    }

    #[test]
    fn test_piece_index_at_with_initial_offset() {
        let table = PieceTable::with_initial_offset(574, 16, 1000).unwrap();
        assert_eq!(table.piece_index_at(1000).unwrap().as_u32(), 0);
        assert_eq!(table.piece_index_at(1016).unwrap().as_u32(), 1);
        assert!(table.piece_index_at(999).is_err());
        assert!(table.piece_index_at(1574).is_err());
    }

    #[test]
    fn test_forward_run_single_finished_piece() {
        let table = PieceTable::new(574, 16).unwrap();
        finish(&table, &[0]);
        assert_eq!(table.max_run_forward(0, 100_000), 16);
        assert_eq!(table.max_run_forward(10, 100_000), 6);
        assert_eq!(table.max_run_backward(0, 100_000), 0);
        assert_eq!(table.max_run_backward(10, 100_000), 10);
    }

    #[test]
    fn test_forward_run_multiple_finished_pieces() {
        let table = PieceTable::new(574, 16).unwrap();
        finish(&table, &[0, 1]);
        assert_eq!(table.max_run_forward(0, 100_000), 32);
        assert_eq!(table.max_run_forward(10, 100_000), 22);
        assert_eq!(table.max_run_backward(10, 100_000), 10);
    }

    #[test]
    fn test_forward_run_respects_cap() {
        let table = PieceTable::new(574, 16).unwrap();
        finish(&table, &[0, 1, 2, 3]);
        assert_eq!(table.max_run_forward(0, 20), 20);
        assert_eq!(table.max_run_backward(40, 20), 20);
    }

    #[test]
    fn test_zero_length_run_at_boundary() {
        let table = PieceTable::new(574, 16).unwrap();
        finish(&table, &[0]);
        // offset 16 is covered by piece 1, which is not finished
        assert_eq!(table.max_run_forward(16, 100_000), 0);
    }

    #[test]
    fn test_run_zero_when_covering_piece_not_finished() {
        let table = PieceTable::new(574, 16).unwrap();
        assert_eq!(table.max_run_forward(0, 100_000), 0);
        assert_eq!(table.max_run_backward(100, 100_000), 0);
    }

    #[test]
    fn test_backward_run_stops_at_unfinished_piece() {
        let table = PieceTable::new(574, 16).unwrap();
        finish(&table, &[1]);
        assert_eq!(table.max_run_backward(18, 100_000), 2);
    }

    #[test]
    fn test_backward_run_crosses_boundary() {
        let table = PieceTable::new(574, 16).unwrap();
        finish(&table, &[0, 1]);
        // offset 16 contributes nothing from piece 1 and all of piece 0
        assert_eq!(table.max_run_backward(16, 100_000), 16);
        // offset 32 is covered by piece 2, which is not finished
        assert_eq!(table.max_run_backward(32, 100_000), 0);
    }

    #[test]
    fn test_run_outside_table_is_zero() {
        let table = PieceTable::new(574, 16).unwrap();
        finish(&table, &[0]);
        assert_eq!(table.max_run_forward(574, 100_000), 0);
        assert_eq!(table.max_run_backward(574, 100_000), 0);
    }

    #[test]
    fn test_set_state_unknown_piece() {
        let table = PieceTable::new(64, 16).unwrap();
        assert!(matches!(
            table.set_state(PieceIndex::new(4), PieceState::Finished),
            Err(PieceTableError::UnknownPiece { .. })
        ));
    }

    #[tokio::test]
    async fn test_wait_finished_returns_immediately_when_done() {
        let table = PieceTable::new(64, 16).unwrap();
        table
            .set_state(PieceIndex::new(1), PieceState::Finished)
            .unwrap();
        table.wait_finished(PieceIndex::new(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_finished_wakes_on_state_change() {
        let table = Arc::new(PieceTable::new(64, 16).unwrap());
        let waiter = {
            let table = Arc::clone(&table);
            tokio::spawn(async move { table.wait_finished(PieceIndex::new(2)).await })
        };
        tokio::task::yield_now().await;
        table
            .set_state(PieceIndex::new(2), PieceState::Downloading)
            .unwrap();
        table
            .set_state(PieceIndex::new(2), PieceState::Finished)
            .unwrap();
        waiter.await.unwrap().unwrap();
    }
}
