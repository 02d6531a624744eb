//! Streaming-facing read path over partially downloaded data.
//!
//! The reader turns the chaotic, non-sequential arrival of torrent pieces
//! into a linear seek-and-read interface bounded by piece availability. It
//! never waits for the engine: unfinished regions report zero bytes and the
//! caller polls.

pub mod adapter;
pub mod reader;
mod window;

pub use adapter::IoAdapter;
pub use reader::{BufferedPieceReader, ReadOutcome, ReaderError, WaitHook};
