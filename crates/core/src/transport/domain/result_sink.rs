use crate::session::session_message::SessionMessage;
use crate::transport::domain::frame_source::TransportError;

/// Transport output: relays session messages to the peer.
pub trait ResultSink: Send {
    fn emit(&mut self, message: &SessionMessage) -> Result<(), TransportError>;
}
