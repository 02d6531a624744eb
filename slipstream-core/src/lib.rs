//! Slipstream Core - piece-aware seekable reading for streaming playback
//!
//! This crate provides the read path that lets a media player treat a file
//! still being downloaded piece-by-piece as a plain seekable byte stream:
//! piece bookkeeping observed from the download engine, raw storage access,
//! and a buffered reader that serves random-access reads while pieces arrive
//! out of order. Reads against not-yet-finished regions never block; callers
//! poll until the engine reports the covering piece as finished.

pub mod config;
pub mod storage;
pub mod streaming;
pub mod torrent;

// Re-export main types for convenient access
pub use config::ReaderConfig;
pub use storage::{FileStorage, MemoryStorage, RandomAccess, StorageError, StreamStorage};
pub use streaming::{BufferedPieceReader, IoAdapter, ReadOutcome, ReaderError};
pub use torrent::{Piece, PieceIndex, PieceState, PieceTable, PieceTableError};

/// Core errors that can bubble up from any slipstream subsystem.
#[derive(Debug, thiserror::Error)]
pub enum SlipstreamError {
    #[error("reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("piece table error: {0}")]
    PieceTable(#[from] PieceTableError),
}

pub type Result<T> = std::result::Result<T, SlipstreamError>;
