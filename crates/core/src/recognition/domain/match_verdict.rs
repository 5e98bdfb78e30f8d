use serde::Serialize;

use crate::shared::constants::UNKNOWN_IDENTITY;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Match,
    NoMatch,
}

/// Match decision for a single detected face.
///
/// `identity_name` and `confidence` are present iff `status` is `Match`.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchVerdict {
    pub status: MatchStatus,
    pub identity_name: Option<String>,
    pub confidence: Option<f64>,
    pub distance: f64,
}

impl MatchVerdict {
    pub fn matched(identity_name: impl Into<String>, distance: f64) -> Self {
        Self {
            status: MatchStatus::Match,
            identity_name: Some(identity_name.into()),
            confidence: Some(confidence_for(distance)),
            distance,
        }
    }

    pub fn unmatched(distance: f64) -> Self {
        Self {
            status: MatchStatus::NoMatch,
            identity_name: None,
            confidence: None,
            distance,
        }
    }

    pub fn is_match(&self) -> bool {
        self.status == MatchStatus::Match
    }

    /// Identity name, or `"unknown"` for unmatched faces.
    pub fn display_name(&self) -> &str {
        self.identity_name.as_deref().unwrap_or(UNKNOWN_IDENTITY)
    }
}

/// `1 - distance`, clamped into `[0, 1]`.
pub fn confidence_for(distance: f64) -> f64 {
    (1.0 - distance).clamp(0.0, 1.0)
}
