use std::io::{ErrorKind, Read};

use crate::admission::frame_admission::RawFrame;
use crate::transport::domain::frame_source::{FrameSource, TransportError};

/// Largest frame accepted by default (32 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 32 * 1024 * 1024;

/// Reads frames framed as `u32` big-endian length followed by that many
/// bytes of encoded image.
///
/// A clean end of stream between frames ends the session; a stream that
/// stops mid-frame or announces an oversized frame is a protocol error.
/// Zero-length frames are passed on as unreadable.
pub struct LengthPrefixedSource<R> {
    reader: Option<R>,
    max_frame_len: usize,
}

impl<R: Read + Send> LengthPrefixedSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }
}

impl<R: Read + Send> FrameSource for LengthPrefixedSource<R> {
    fn next_frame(&mut self) -> Result<Option<RawFrame>, TransportError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        let mut header = [0u8; 4];
        let got = read_fully(reader, &mut header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < header.len() {
            return Err(TransportError::Protocol(format!(
                "stream ended inside a frame header ({got} of 4 bytes)"
            )));
        }

        let len = u32::from_be_bytes(header) as usize;
        if len == 0 {
            return Ok(Some(RawFrame::Unreadable("empty frame".to_string())));
        }
        if len > self.max_frame_len {
            return Err(TransportError::Protocol(format!(
                "frame of {len} bytes exceeds limit of {}",
                self.max_frame_len
            )));
        }

        let mut body = vec![0u8; len];
        let got = read_fully(reader, &mut body)?;
        if got < len {
            return Err(TransportError::Protocol(format!(
                "stream ended inside a frame ({got} of {len} bytes)"
            )));
        }
        Ok(Some(RawFrame::Encoded(body)))
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

/// Reads until `buf` is full or the stream ends; returns bytes read.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, TransportError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
