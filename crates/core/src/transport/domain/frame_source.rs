use thiserror::Error;

use crate::admission::frame_admission::RawFrame;

/// Connection-level failure. Unlike a [`FrameError`](crate::recognition::domain::face_scorer::FrameError),
/// this ends the session.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("video error: {0}")]
    Video(String),
}

/// Transport input: yields raw frames one at a time.
///
/// `Ok(None)` means the peer finished sending (end of clip / stream).
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<RawFrame>, TransportError>;

    /// Releases transport resources. Called on every session exit path;
    /// must be idempotent.
    fn close(&mut self) {}
}
