use crate::recognition::domain::face_scorer::ThresholdPolicy;
use crate::shared::match_config::MatchConfig;

/// How a session aggregates verdicts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionMode {
    /// Bounded clip, single terminal result, stops at the first match.
    OneShot,
    /// Open-ended frame stream, one result per accepted frame.
    Continuous,
}

impl SessionMode {
    /// One-shot sessions use the inclusive any-match compare, continuous
    /// sessions the strict confidence threshold.
    pub fn threshold_policy(self, config: &MatchConfig) -> ThresholdPolicy {
        match self {
            SessionMode::OneShot => ThresholdPolicy::AnyMatch {
                tolerance: config.one_shot_tolerance,
            },
            SessionMode::Continuous => ThresholdPolicy::Confidence {
                max_distance: config.continuous_threshold,
            },
        }
    }

    /// Downscaling only applies to continuous sessions.
    pub fn downscale_ratio(self, config: &MatchConfig) -> Option<f64> {
        match self {
            SessionMode::OneShot => None,
            SessionMode::Continuous => config.downscale_ratio,
        }
    }
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionMode::OneShot => write!(f, "one-shot"),
            SessionMode::Continuous => write!(f, "continuous"),
        }
    }
}

/// Lifecycle: `Init -> Ready -> Active -> Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Init,
    Ready,
    Active,
    Closed,
}

/// Snapshot of a session's progress, consulted by frame admission.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionState {
    pub mode: SessionMode,
    pub phase: SessionPhase,
    /// Frames pulled from the source, including skipped ones.
    pub frames_received: usize,
    /// Frames that reached the scorer.
    pub frames_scored: usize,
}

impl SessionState {
    pub fn new(mode: SessionMode) -> Self {
        Self {
            mode,
            phase: SessionPhase::Init,
            frames_received: 0,
            frames_scored: 0,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.phase == SessionPhase::Closed
    }
}
