use std::io::Write;

use crate::session::session_message::SessionMessage;
use crate::transport::domain::frame_source::TransportError;
use crate::transport::domain::result_sink::ResultSink;

/// Writes each message as one JSON document per line and flushes.
pub struct JsonLinesSink<W> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> ResultSink for JsonLinesSink<W> {
    fn emit(&mut self, message: &SessionMessage) -> Result<(), TransportError> {
        serde_json::to_writer(&mut self.writer, message)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}
