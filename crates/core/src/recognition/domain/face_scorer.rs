use std::time::Duration;

use thiserror::Error;

use crate::recognition::domain::face_encoder::{DetectedFace, FaceEncoder};
use crate::recognition::domain::match_verdict::MatchVerdict;
use crate::recognition::domain::reference_set::{Identity, ReferenceSet};
use crate::shared::frame::Frame;

/// Failure confined to a single frame. Sessions absorb these and carry on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("frame could not be decoded: {0}")]
    Decode(String),
    #[error("face detection failed: {0}")]
    Detection(String),
    #[error("embedding has {actual} dimensions, references have {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("frame processing exceeded {0:?}")]
    Timeout(Duration),
    #[error("scoring worker stopped")]
    WorkerStopped,
}

/// How a minimum distance is turned into match / no match.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ThresholdPolicy {
    /// Boolean compare: any reference within `tolerance` (inclusive).
    AnyMatch { tolerance: f64 },
    /// Confidence-scored: best reference strictly below `max_distance`.
    Confidence { max_distance: f64 },
}

impl ThresholdPolicy {
    pub fn accepts(&self, distance: f64) -> bool {
        match *self {
            ThresholdPolicy::AnyMatch { tolerance } => distance <= tolerance,
            ThresholdPolicy::Confidence { max_distance } => distance < max_distance,
        }
    }
}

/// Euclidean distance between two equal-length embeddings.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = *x as f64 - *y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Nearest reference to `embedding`; ties go to the earlier reference.
pub fn nearest<'a>(embedding: &[f32], references: &'a ReferenceSet) -> Option<(&'a Identity, f64)> {
    let mut best: Option<(&Identity, f64)> = None;
    for identity in references.iter() {
        let d = euclidean_distance(embedding, identity.embedding());
        match best {
            Some((_, best_d)) if d >= best_d => {}
            _ => best = Some((identity, d)),
        }
    }
    best
}

/// Scores a frame's faces against a reference set.
///
/// Detection runs through the owned [`FaceEncoder`]; classification is
/// a pure function of the detected faces, the references and the policy.
pub struct FaceScorer {
    encoder: Box<dyn FaceEncoder>,
    policy: ThresholdPolicy,
}

impl FaceScorer {
    pub fn new(encoder: Box<dyn FaceEncoder>, policy: ThresholdPolicy) -> Self {
        Self { encoder, policy }
    }

    /// Detects faces in `frame` and returns one verdict per face.
    ///
    /// A frame without faces yields an empty list. Detector failures
    /// are reported as [`FrameError::Detection`].
    pub fn score(
        &mut self,
        frame: &Frame,
        references: &ReferenceSet,
    ) -> Result<Vec<MatchVerdict>, FrameError> {
        let faces = self
            .encoder
            .detect_and_encode(frame)
            .map_err(|e| FrameError::Detection(e.to_string()))?;
        log::debug!("Frame {}: {} faces detected", frame.index(), faces.len());
        self.classify(&faces, references)
    }

    pub fn classify(
        &self,
        faces: &[DetectedFace],
        references: &ReferenceSet,
    ) -> Result<Vec<MatchVerdict>, FrameError> {
        if let Some(expected) = references.embedding_dim() {
            if let Some(face) = faces.iter().find(|f| f.embedding.len() != expected) {
                return Err(FrameError::DimensionMismatch {
                    expected,
                    actual: face.embedding.len(),
                });
            }
        }

        Ok(faces
            .iter()
            .map(|face| self.verdict_for(face, references))
            .collect())
    }

    fn verdict_for(&self, face: &DetectedFace, references: &ReferenceSet) -> MatchVerdict {
        let Some((identity, distance)) = nearest(&face.embedding, references) else {
            return MatchVerdict::unmatched(f64::INFINITY);
        };
        log::debug!(
            "Best distance {distance:.4} with {} at {:?}",
            identity.name(),
            face.bounding_box
        );
        if self.policy.accepts(distance) {
            MatchVerdict::matched(identity.name(), distance)
        } else {
            MatchVerdict::unmatched(distance)
        }
    }
}
