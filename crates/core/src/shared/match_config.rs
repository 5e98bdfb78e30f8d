use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::constants::{
    DEFAULT_CONTINUOUS_THRESHOLD, DEFAULT_DOWNSCALE_RATIO, DEFAULT_FRAME_CAP,
    DEFAULT_ONE_SHOT_TOLERANCE, DEFAULT_REFERENCE_DIR,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

/// Detector speed/accuracy trade-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionModel {
    #[default]
    Fast,
    Accurate,
}

impl std::fmt::Display for DetectionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionModel::Fast => write!(f, "fast"),
            DetectionModel::Accurate => write!(f, "accurate"),
        }
    }
}

impl std::str::FromStr for DetectionModel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(DetectionModel::Fast),
            "accurate" => Ok(DetectionModel::Accurate),
            other => Err(ConfigError::Invalid(format!(
                "Detection model must be 'fast' or 'accurate', got '{other}'"
            ))),
        }
    }
}

/// Options consumed by the verification engine. Every field has a default,
/// so a partial JSON document is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub frame_cap: usize,
    pub one_shot_tolerance: f64,
    pub continuous_threshold: f64,
    pub downscale_ratio: Option<f64>,
    pub detection_model: DetectionModel,
    pub frame_timeout_ms: Option<u64>,
    pub reference_dir: PathBuf,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            frame_cap: DEFAULT_FRAME_CAP,
            one_shot_tolerance: DEFAULT_ONE_SHOT_TOLERANCE,
            continuous_threshold: DEFAULT_CONTINUOUS_THRESHOLD,
            downscale_ratio: Some(DEFAULT_DOWNSCALE_RATIO),
            detection_model: DetectionModel::default(),
            frame_timeout_ms: None,
            reference_dir: PathBuf::from(DEFAULT_REFERENCE_DIR),
        }
    }
}

impl MatchConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: MatchConfig =
            serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_cap == 0 {
            return Err(ConfigError::Invalid(
                "Frame cap must be at least 1".to_string(),
            ));
        }
        if !(self.one_shot_tolerance.is_finite() && self.one_shot_tolerance > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "One-shot tolerance must be a positive number, got {}",
                self.one_shot_tolerance
            )));
        }
        if !(self.continuous_threshold.is_finite() && self.continuous_threshold > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "Continuous threshold must be a positive number, got {}",
                self.continuous_threshold
            )));
        }
        if let Some(ratio) = self.downscale_ratio {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "Downscale ratio must be in (0.0, 1.0], got {ratio}"
                )));
            }
        }
        Ok(())
    }

    pub fn frame_timeout(&self) -> Option<Duration> {
        self.frame_timeout_ms.map(Duration::from_millis)
    }
}
