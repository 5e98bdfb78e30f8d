use serde::Serialize;

use crate::recognition::domain::match_verdict::{MatchStatus, MatchVerdict};
use crate::shared::constants::{MATCH_FOUND_MESSAGE, NO_MATCH_MESSAGE};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Ok,
    NotFound,
    Error,
}

/// Terminal result of a one-shot session.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VerificationResponse {
    pub status: VerificationStatus,
    pub message: String,
}

/// One face in a continuous-mode frame report.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FaceResult {
    pub status: MatchStatus,
    pub name: String,
    pub confidence: f64,
}

impl From<&MatchVerdict> for FaceResult {
    fn from(verdict: &MatchVerdict) -> Self {
        Self {
            status: verdict.status,
            name: verdict.display_name().to_string(),
            confidence: verdict.confidence.unwrap_or(0.0),
        }
    }
}

/// Per-frame result of a continuous session.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameReport {
    pub frame_results: Vec<FaceResult>,
    pub faces_found: usize,
}

impl FrameReport {
    pub fn from_verdicts(verdicts: &[MatchVerdict]) -> Self {
        Self {
            frame_results: verdicts.iter().map(FaceResult::from).collect(),
            faces_found: verdicts.len(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorMessage {
    pub error: String,
}

/// Everything a session sends to its transport. Serializes to the bare
/// payload (`{"status": ..}`, `{"frame_results": ..}` or `{"error": ..}`).
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SessionMessage {
    Verification(VerificationResponse),
    Frame(FrameReport),
    Error(ErrorMessage),
}

impl SessionMessage {
    pub fn found() -> Self {
        Self::verification(VerificationStatus::Ok, MATCH_FOUND_MESSAGE)
    }

    pub fn not_found() -> Self {
        Self::verification(VerificationStatus::NotFound, NO_MATCH_MESSAGE)
    }

    pub fn verification_error(message: impl Into<String>) -> Self {
        Self::verification(VerificationStatus::Error, message)
    }

    pub fn frame(verdicts: &[MatchVerdict]) -> Self {
        SessionMessage::Frame(FrameReport::from_verdicts(verdicts))
    }

    pub fn error(message: impl Into<String>) -> Self {
        SessionMessage::Error(ErrorMessage {
            error: message.into(),
        })
    }

    fn verification(status: VerificationStatus, message: impl Into<String>) -> Self {
        SessionMessage::Verification(VerificationResponse {
            status,
            message: message.into(),
        })
    }
}
