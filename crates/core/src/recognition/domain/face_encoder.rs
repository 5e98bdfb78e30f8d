use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::Frame;

/// Fixed-length face descriptor produced by a [`FaceEncoder`].
pub type Embedding = Vec<f32>;

pub type EncodeError = Box<dyn std::error::Error + Send + Sync>;

/// One face found in a frame, with its descriptor.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectedFace {
    pub bounding_box: BoundingBox,
    pub embedding: Embedding,
}

/// Domain interface for the external detect-and-embed capability.
///
/// Implementations may hold inference sessions that need exclusive
/// access, hence `&mut self`. Faces are returned in detection order.
pub trait FaceEncoder: Send {
    fn detect_and_encode(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, EncodeError>;
}
