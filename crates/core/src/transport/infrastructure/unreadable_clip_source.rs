use crate::admission::frame_admission::RawFrame;
use crate::transport::domain::frame_source::{FrameSource, TransportError};

/// Stands in for a clip that could not be opened.
///
/// The first pull fails with [`TransportError::Video`], so the session
/// reports the failure through its sink like any other transport error.
pub struct UnreadableClipSource {
    reason: Option<String>,
}

impl UnreadableClipSource {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
        }
    }
}

impl FrameSource for UnreadableClipSource {
    fn next_frame(&mut self) -> Result<Option<RawFrame>, TransportError> {
        match self.reason.take() {
            Some(reason) => Err(TransportError::Video(reason)),
            None => Ok(None),
        }
    }
}
