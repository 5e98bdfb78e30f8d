pub const YOLO_MODEL_NAME: &str = "yolo11n-pose_widerface.onnx";
pub const YOLO_MODEL_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/yolo11n-pose_widerface.onnx";

pub const EMBEDDING_MODEL_NAME: &str = "w600k_r50.onnx";
pub const EMBEDDING_MODEL_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/w600k_r50.onnx";

/// Upper bound on frames examined by a one-shot session.
pub const DEFAULT_FRAME_CAP: usize = 30;

/// Inclusive distance tolerance for one-shot "any match" comparison.
pub const DEFAULT_ONE_SHOT_TOLERANCE: f64 = 0.6;

/// Strict distance threshold for continuous, confidence-scored matching.
pub const DEFAULT_CONTINUOUS_THRESHOLD: f64 = 0.65;

/// Linear downscale applied to continuous frames before detection.
pub const DEFAULT_DOWNSCALE_RATIO: f64 = 0.5;

pub const DEFAULT_REFERENCE_DIR: &str = "reference_photos";

/// Enrollment photos and frame images are recognized by these extensions.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub const UNKNOWN_IDENTITY: &str = "unknown";

pub const NO_REFERENCE_PHOTOS: &str = "no reference photos found";
pub const NO_REFERENCES_AVAILABLE: &str = "no references available";
pub const MATCH_FOUND_MESSAGE: &str = "matching face found";
pub const NO_MATCH_MESSAGE: &str = "no matching face found";
