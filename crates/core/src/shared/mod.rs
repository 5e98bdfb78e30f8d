pub mod bounding_box;
pub mod constants;
pub mod frame;
pub mod match_config;
#[cfg(feature = "onnx")]
pub mod model_resolver;
