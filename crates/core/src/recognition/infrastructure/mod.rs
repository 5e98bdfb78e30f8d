pub mod directory_reference_source;
#[cfg(feature = "onnx")]
pub mod onnx_face_encoder;
pub mod reference_cache;
