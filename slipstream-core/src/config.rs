//! Centralized configuration for slipstream readers.
//!
//! Tunable parameters live here rather than as hard-coded values inside the
//! read path.

/// Default per-direction buffer capacity for readers.
pub const DEFAULT_BUFFER_SIZE: u64 = 65536; // 64 KiB

/// Tuning for [`BufferedPieceReader`](crate::streaming::BufferedPieceReader).
///
/// The buffer capacity is symmetric: on a refill the window may extend up to
/// `buffer_size` bytes on each side of the read position, subject to piece
/// availability and file boundaries.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// How far the window may extend on each side of the read position.
    pub buffer_size: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl ReaderConfig {
    /// Creates a config with the given per-direction buffer capacity.
    pub fn with_buffer_size(buffer_size: u64) -> Self {
        Self { buffer_size }
    }
}
