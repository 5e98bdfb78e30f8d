use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::admission::frame_admission::{AdmissionDecision, FrameAdmission, RawFrame};
use crate::recognition::domain::face_encoder::FaceEncoder;
use crate::recognition::domain::face_scorer::{FaceScorer, FrameError, ThresholdPolicy};
use crate::recognition::domain::match_verdict::MatchVerdict;
use crate::recognition::domain::reference_set::ReferenceError;
use crate::recognition::infrastructure::reference_cache::ReferenceCache;
use crate::session::infrastructure::scoring_worker::{ScoringWorker, WaitOutcome};
use crate::session::session_logger::{NullSessionLogger, SessionLogger};
use crate::session::session_message::SessionMessage;
use crate::session::session_state::{SessionMode, SessionPhase, SessionState};
use crate::shared::constants::{NO_REFERENCES_AVAILABLE, NO_REFERENCE_PHOTOS};
use crate::shared::frame::Frame;
use crate::shared::match_config::MatchConfig;
use crate::transport::domain::frame_source::{FrameSource, TransportError};
use crate::transport::domain::result_sink::ResultSink;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no references available")]
    NoReferences,
    #[error("failed to load references: {0}")]
    References(#[from] ReferenceError),
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),
    #[error("session cancelled")]
    Cancelled,
    #[error("session is {actual:?}, expected {expected:?}")]
    InvalidState {
        expected: SessionPhase,
        actual: SessionPhase,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

/// Per-session settings derived from a [`MatchConfig`] and a mode.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub mode: SessionMode,
    pub frame_cap: usize,
    pub policy: ThresholdPolicy,
    pub downscale_ratio: Option<f64>,
    pub frame_timeout: Option<Duration>,
    pub cancelled: Arc<AtomicBool>,
}

impl SessionConfig {
    pub fn new(mode: SessionMode, config: &MatchConfig) -> Self {
        Self {
            mode,
            frame_cap: config.frame_cap,
            policy: mode.threshold_policy(config),
            downscale_ratio: mode.downscale_ratio(config),
            frame_timeout: config.frame_timeout(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_cancel_flag(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }
}

/// What the caller should do after one frame.
#[derive(Debug, PartialEq)]
pub enum FrameOutcome {
    /// Nothing to send; keep feeding frames.
    Pending,
    /// Send this message and keep feeding frames.
    Report(SessionMessage),
    /// Send this message; the session is closed.
    Finished(SessionMessage),
}

/// Drives one connection's session: `Init -> Ready -> Active -> Closed`.
///
/// Frames are processed strictly one at a time. Per-frame failures are
/// absorbed (logged, treated as zero faces); reference and transport
/// failures close the session. Scoring runs on a worker thread so a
/// frame can be bounded by `frame_timeout` and abandoned on cancel.
pub struct SessionEngine {
    config: SessionConfig,
    admission: FrameAdmission,
    state: SessionState,
    references: Arc<ReferenceCache>,
    scorer: Option<FaceScorer>,
    worker: Option<ScoringWorker>,
    logger: Box<dyn SessionLogger>,
}

impl SessionEngine {
    pub fn new(
        config: SessionConfig,
        encoder: Box<dyn FaceEncoder>,
        references: Arc<ReferenceCache>,
    ) -> Self {
        let admission = FrameAdmission::new(config.frame_cap, config.downscale_ratio);
        let state = SessionState::new(config.mode);
        let scorer = FaceScorer::new(encoder, config.policy);
        Self {
            config,
            admission,
            state,
            references,
            scorer: Some(scorer),
            worker: None,
            logger: Box::new(NullSessionLogger),
        }
    }

    pub fn with_logger(mut self, logger: Box<dyn SessionLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Flag that, once set, closes the session at the next check.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.config.cancelled.clone()
    }

    /// Loads the reference set and activates the session.
    ///
    /// An empty set closes the session with [`SessionError::NoReferences`]
    /// before any frame is admitted.
    pub fn start(&mut self) -> Result<(), SessionError> {
        self.expect_phase(SessionPhase::Init)?;

        let references = match self.references.get_or_load() {
            Ok(references) => references,
            Err(e) => {
                log::error!("Failed to load references: {e}");
                self.close();
                return Err(e.into());
            }
        };
        self.state.phase = SessionPhase::Ready;

        if references.is_empty() {
            log::warn!("No reference faces loaded; closing {} session", self.config.mode);
            self.close();
            return Err(SessionError::NoReferences);
        }
        log::info!(
            "Starting {} session with {} references",
            self.config.mode,
            references.len()
        );

        let scorer = self
            .scorer
            .take()
            .ok_or_else(|| SessionError::Internal("scorer already consumed".to_string()))?;
        self.worker = Some(ScoringWorker::spawn(scorer, references));
        self.state.phase = SessionPhase::Active;
        Ok(())
    }

    /// Admits, scores and aggregates one frame.
    pub fn process_frame(&mut self, raw: RawFrame) -> Result<FrameOutcome, SessionError> {
        self.expect_phase(SessionPhase::Active)?;
        if self.is_cancelled() {
            self.close();
            return Err(SessionError::Cancelled);
        }

        let index = self.state.frames_received;
        if let RawFrame::Encoded(bytes) = &raw {
            log::debug!("Received frame {index} ({} bytes)", bytes.len());
        }

        let decode_start = Instant::now();
        let decision = self.admission.admit(raw, &self.state);
        self.logger.timing("decode", elapsed_ms(decode_start));

        let frame = match decision {
            AdmissionDecision::Stop => return Ok(self.finish()),
            AdmissionDecision::Skip(e) => {
                self.record_received(index);
                log::warn!("Skipping frame {index}: {e}");
                return Ok(self.after_unscored_frame());
            }
            AdmissionDecision::Accept(frame) => {
                self.record_received(index);
                frame
            }
        };

        let verdicts = self.score(frame, index)?;
        self.state.frames_scored += 1;
        self.logger.metric("faces_found", verdicts.len() as f64);

        match self.config.mode {
            SessionMode::Continuous => {
                Ok(FrameOutcome::Report(SessionMessage::frame(&verdicts)))
            }
            SessionMode::OneShot => {
                if let Some(hit) = verdicts.iter().find(|v| v.is_match()) {
                    log::info!("Match found in frame {index}: {}", hit.display_name());
                    self.close();
                    return Ok(FrameOutcome::Finished(SessionMessage::found()));
                }
                Ok(self.after_unscored_frame())
            }
        }
    }

    /// Signals that the source has no more frames.
    ///
    /// One-shot sessions report `not_found`; continuous sessions just close.
    pub fn finish_input(&mut self) -> Option<SessionMessage> {
        if self.state.phase != SessionPhase::Active {
            self.close();
            return None;
        }
        match self.finish() {
            FrameOutcome::Finished(message) => Some(message),
            _ => None,
        }
    }

    /// Moves to `Closed` and releases the scoring worker. Idempotent.
    pub fn close(&mut self) {
        if self.state.is_closed() {
            return;
        }
        self.state.phase = SessionPhase::Closed;
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
        log::info!(
            "{} session closed: {} frames received, {} scored",
            self.config.mode,
            self.state.frames_received,
            self.state.frames_scored
        );
        self.logger.summary();
    }

    /// Runs the whole session against a transport.
    ///
    /// The source is closed and the session reaches `Closed` on every
    /// exit path. Fatal errors are reported to the sink (best effort)
    /// before being returned.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn ResultSink,
    ) -> Result<SessionState, SessionError> {
        let result = self.drive(source, sink);
        source.close();
        self.close();
        result.map(|()| self.state.clone())
    }

    fn drive(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn ResultSink,
    ) -> Result<(), SessionError> {
        if let Err(e) = self.start() {
            self.report_fatal(sink, &e);
            return Err(e);
        }

        loop {
            if self.is_cancelled() {
                log::info!("Session cancelled by transport");
                return Err(SessionError::Cancelled);
            }

            let raw = match source.next_frame() {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    if let Some(message) = self.finish_input() {
                        sink.emit(&message)?;
                    }
                    return Ok(());
                }
                Err(e) => {
                    log::error!("Frame source failed: {e}");
                    let e = SessionError::Transport(e);
                    self.report_fatal(sink, &e);
                    return Err(e);
                }
            };

            match self.process_frame(raw) {
                Ok(FrameOutcome::Pending) => {}
                Ok(FrameOutcome::Report(message)) => sink.emit(&message)?,
                Ok(FrameOutcome::Finished(message)) => {
                    sink.emit(&message)?;
                    return Ok(());
                }
                Err(SessionError::Cancelled) => return Err(SessionError::Cancelled),
                Err(e) => {
                    self.report_fatal(sink, &e);
                    return Err(e);
                }
            }
        }
    }

    fn score(&mut self, frame: Frame, index: usize) -> Result<Vec<MatchVerdict>, SessionError> {
        let worker = self
            .worker
            .as_mut()
            .ok_or_else(|| SessionError::Internal("scoring worker not running".to_string()))?;

        let score_start = Instant::now();
        let outcome = worker.score(frame, self.config.frame_timeout, &self.config.cancelled);
        self.logger.timing("score", elapsed_ms(score_start));

        match outcome {
            WaitOutcome::Cancelled => {
                self.close();
                Err(SessionError::Cancelled)
            }
            WaitOutcome::Scored(Ok(verdicts)) => {
                log::debug!("Frame {index}: {} faces", verdicts.len());
                Ok(verdicts)
            }
            WaitOutcome::Scored(Err(FrameError::WorkerStopped)) => {
                self.close();
                Err(SessionError::Internal(FrameError::WorkerStopped.to_string()))
            }
            WaitOutcome::Scored(Err(e)) => {
                log::error!("Frame {index} treated as faceless: {e}");
                Ok(Vec::new())
            }
        }
    }

    /// A one-shot session whose budget is spent ends with `not_found`.
    fn after_unscored_frame(&mut self) -> FrameOutcome {
        if self.admission.budget_exhausted(&self.state) {
            log::info!("No match within {} frames", self.admission.frame_cap());
            return self.finish();
        }
        FrameOutcome::Pending
    }

    fn finish(&mut self) -> FrameOutcome {
        let outcome = match self.config.mode {
            SessionMode::OneShot => FrameOutcome::Finished(SessionMessage::not_found()),
            SessionMode::Continuous => FrameOutcome::Pending,
        };
        self.close();
        outcome
    }

    fn record_received(&mut self, index: usize) {
        self.state.frames_received += 1;
        self.logger.frame(index);
    }

    fn report_fatal(&self, sink: &mut dyn ResultSink, error: &SessionError) {
        let message = match (self.config.mode, error) {
            (SessionMode::OneShot, SessionError::NoReferences) => {
                SessionMessage::error(NO_REFERENCE_PHOTOS)
            }
            (SessionMode::Continuous, SessionError::NoReferences) => {
                SessionMessage::error(NO_REFERENCES_AVAILABLE)
            }
            (SessionMode::OneShot, e) => SessionMessage::verification_error(e.to_string()),
            (SessionMode::Continuous, e) => SessionMessage::error(e.to_string()),
        };
        if let Err(e) = sink.emit(&message) {
            log::warn!("Could not report session error: {e}");
        }
    }

    fn expect_phase(&self, expected: SessionPhase) -> Result<(), SessionError> {
        if self.state.phase == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                expected,
                actual: self.state.phase,
            })
        }
    }

    fn is_cancelled(&self) -> bool {
        self.config.cancelled.load(Ordering::Relaxed)
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::domain::face_encoder::{DetectedFace, Embedding, EncodeError};
    use crate::recognition::domain::reference_set::ReferenceSource;
    use crate::shared::bounding_box::BoundingBox;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct StubSource(Vec<(String, Embedding)>);

    impl ReferenceSource for StubSource {
        fn list_reference_embeddings(&self) -> Result<Vec<(String, Embedding)>, ReferenceError> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    impl ReferenceSource for FailingSource {
        fn list_reference_embeddings(&self) -> Result<Vec<(String, Embedding)>, ReferenceError> {
            Err(ReferenceError::Unavailable("disk gone".to_string()))
        }
    }

    /// Faces are chosen by the frame's first pixel value; unknown values
    /// have no faces and 255 makes detection fail.
    struct StubEncoder {
        scenes: HashMap<u8, Vec<Embedding>>,
    }

    impl FaceEncoder for StubEncoder {
        fn detect_and_encode(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, EncodeError> {
            let key = frame.data()[0];
            if key == 255 {
                return Err("detector exploded".into());
            }
            Ok(self
                .scenes
                .get(&key)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|embedding| DetectedFace {
                    bounding_box: BoundingBox::new(0, 0, 2, 2),
                    embedding,
                })
                .collect())
        }
    }

    /// One face matching alice; sleeps 10 ms per unit of the first pixel.
    struct SleepyEncoder;

    impl FaceEncoder for SleepyEncoder {
        fn detect_and_encode(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, EncodeError> {
            std::thread::sleep(Duration::from_millis(frame.data()[0] as u64 * 10));
            Ok(vec![DetectedFace {
                bounding_box: BoundingBox::new(0, 0, 2, 2),
                embedding: vec![0.0, 0.0],
            }])
        }
    }

    #[derive(Default)]
    struct RecordingSink(Arc<Mutex<Vec<SessionMessage>>>);

    impl ResultSink for RecordingSink {
        fn emit(&mut self, message: &SessionMessage) -> Result<(), TransportError> {
            self.0.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    struct VecSource {
        frames: std::vec::IntoIter<RawFrame>,
        closed: Arc<AtomicBool>,
    }

    impl FrameSource for VecSource {
        fn next_frame(&mut self) -> Result<Option<RawFrame>, TransportError> {
            Ok(self.frames.next())
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn frame(key: u8) -> RawFrame {
        RawFrame::Decoded(Frame::new(vec![key; 4 * 4 * 3], 4, 4, 3, 0))
    }

    fn cache(entries: Vec<(&str, Embedding)>) -> Arc<ReferenceCache> {
        let entries = entries
            .into_iter()
            .map(|(n, e)| (n.to_string(), e))
            .collect();
        Arc::new(ReferenceCache::new(Box::new(StubSource(entries))))
    }

    fn engine(mode: SessionMode, references: Arc<ReferenceCache>) -> SessionEngine {
        let mut scenes = HashMap::new();
        scenes.insert(1, vec![vec![0.0, 0.0]]); // alice, distance 0
        scenes.insert(2, vec![vec![3.0, 0.0]]); // far from everyone
        scenes.insert(3, vec![vec![0.0, 0.4], vec![0.0, 0.9]]); // near alice, far
        let config = SessionConfig::new(mode, &MatchConfig::default());
        SessionEngine::new(config, Box::new(StubEncoder { scenes }), references)
    }

    fn alice() -> Arc<ReferenceCache> {
        cache(vec![("alice", vec![0.0, 0.0])])
    }

    #[test]
    fn test_start_moves_to_active() {
        let mut engine = engine(SessionMode::Continuous, alice());
        assert_eq!(engine.state().phase, SessionPhase::Init);
        engine.start().unwrap();
        assert_eq!(engine.state().phase, SessionPhase::Active);
    }

    #[test]
    fn test_start_with_empty_references_closes() {
        let mut engine = engine(SessionMode::OneShot, cache(vec![]));
        assert!(matches!(engine.start(), Err(SessionError::NoReferences)));
        assert_eq!(engine.state().phase, SessionPhase::Closed);
    }

    #[test]
    fn test_start_with_failing_source_closes() {
        let references = Arc::new(ReferenceCache::new(Box::new(FailingSource)));
        let mut engine = engine(SessionMode::Continuous, references);
        assert!(matches!(engine.start(), Err(SessionError::References(_))));
        assert!(engine.state().is_closed());
    }

    #[test]
    fn test_start_twice_is_invalid() {
        let mut engine = engine(SessionMode::Continuous, alice());
        engine.start().unwrap();
        assert!(matches!(
            engine.start(),
            Err(SessionError::InvalidState {
                expected: SessionPhase::Init,
                actual: SessionPhase::Active
            })
        ));
    }

    #[test]
    fn test_process_frame_before_start_is_invalid() {
        let mut engine = engine(SessionMode::Continuous, alice());
        assert!(matches!(
            engine.process_frame(frame(1)),
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_continuous_reports_every_frame() {
        let mut engine = engine(SessionMode::Continuous, alice());
        engine.start().unwrap();

        let outcome = engine.process_frame(frame(1)).unwrap();
        let FrameOutcome::Report(SessionMessage::Frame(report)) = outcome else {
            panic!("expected frame report, got {outcome:?}");
        };
        assert_eq!(report.faces_found, 1);
        assert_eq!(report.frame_results[0].name, "alice");

        let outcome = engine.process_frame(frame(0)).unwrap();
        assert_eq!(outcome, FrameOutcome::Report(SessionMessage::frame(&[])));
        assert_eq!(engine.state().frames_scored, 2);
    }

    #[test]
    fn test_detection_failure_reports_zero_faces() {
        let mut engine = engine(SessionMode::Continuous, alice());
        engine.start().unwrap();

        let outcome = engine.process_frame(frame(255)).unwrap();
        assert_eq!(outcome, FrameOutcome::Report(SessionMessage::frame(&[])));
        assert_eq!(engine.state().phase, SessionPhase::Active);
    }

    #[test]
    fn test_continuous_decode_failure_is_silent_and_session_stays_open() {
        let mut engine = engine(SessionMode::Continuous, alice());
        engine.start().unwrap();

        let outcome = engine
            .process_frame(RawFrame::Encoded(b"not an image".to_vec()))
            .unwrap();
        assert_eq!(outcome, FrameOutcome::Pending);
        assert_eq!(engine.state().frames_received, 1);
        assert_eq!(engine.state().frames_scored, 0);

        let outcome = engine.process_frame(frame(1)).unwrap();
        assert!(matches!(outcome, FrameOutcome::Report(_)));
    }

    #[test]
    fn test_one_shot_finishes_on_first_match() {
        let mut engine = engine(SessionMode::OneShot, alice());
        engine.start().unwrap();

        assert_eq!(engine.process_frame(frame(2)).unwrap(), FrameOutcome::Pending);
        assert_eq!(
            engine.process_frame(frame(1)).unwrap(),
            FrameOutcome::Finished(SessionMessage::found())
        );
        assert!(engine.state().is_closed());
        assert!(engine.process_frame(frame(1)).is_err());
    }

    #[test]
    fn test_one_shot_reports_not_found_when_budget_spent() {
        let config = MatchConfig {
            frame_cap: 3,
            ..MatchConfig::default()
        };
        let mut scenes = HashMap::new();
        scenes.insert(2, vec![vec![3.0, 0.0]]);
        let mut engine = SessionEngine::new(
            SessionConfig::new(SessionMode::OneShot, &config),
            Box::new(StubEncoder { scenes }),
            alice(),
        );
        engine.start().unwrap();

        assert_eq!(engine.process_frame(frame(2)).unwrap(), FrameOutcome::Pending);
        assert_eq!(engine.process_frame(frame(2)).unwrap(), FrameOutcome::Pending);
        assert_eq!(
            engine.process_frame(frame(2)).unwrap(),
            FrameOutcome::Finished(SessionMessage::not_found())
        );
        assert_eq!(engine.state().frames_scored, 3);
    }

    #[test]
    fn test_finish_input_on_one_shot_reports_not_found() {
        let mut engine = engine(SessionMode::OneShot, alice());
        engine.start().unwrap();
        engine.process_frame(frame(2)).unwrap();
        assert_eq!(engine.finish_input(), Some(SessionMessage::not_found()));
        assert!(engine.state().is_closed());
    }

    #[test]
    fn test_finish_input_on_continuous_is_silent() {
        let mut engine = engine(SessionMode::Continuous, alice());
        engine.start().unwrap();
        assert_eq!(engine.finish_input(), None);
        assert!(engine.state().is_closed());
    }

    #[test]
    fn test_cancelled_session_closes_on_next_frame() {
        let mut engine = engine(SessionMode::Continuous, alice());
        engine.start().unwrap();
        engine.cancel_handle().store(true, Ordering::SeqCst);

        assert!(matches!(
            engine.process_frame(frame(1)),
            Err(SessionError::Cancelled)
        ));
        assert!(engine.state().is_closed());
    }

    #[test]
    fn test_slow_frame_does_not_stall_following_frames() {
        let config = MatchConfig {
            frame_timeout_ms: Some(100),
            ..MatchConfig::default()
        };
        let mut engine = SessionEngine::new(
            SessionConfig::new(SessionMode::Continuous, &config),
            Box::new(SleepyEncoder),
            alice(),
        );
        engine.start().unwrap();

        let faces_found = |outcome: FrameOutcome| match outcome {
            FrameOutcome::Report(SessionMessage::Frame(report)) => report.faces_found,
            other => panic!("expected frame report, got {other:?}"),
        };

        assert_eq!(faces_found(engine.process_frame(frame(15)).unwrap()), 0);
        for _ in 0..5 {
            assert_eq!(faces_found(engine.process_frame(frame(1)).unwrap()), 1);
        }
        assert_eq!(engine.state().frames_scored, 6);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut engine = engine(SessionMode::Continuous, alice());
        engine.start().unwrap();
        engine.close();
        engine.close();
        assert!(engine.state().is_closed());
    }

    #[test]
    fn test_run_closes_source_and_emits_terminal_message() {
        let closed = Arc::new(AtomicBool::new(false));
        let mut source = VecSource {
            frames: vec![frame(2), frame(3)].into_iter(),
            closed: closed.clone(),
        };
        let mut sink = RecordingSink::default();
        let messages = sink.0.clone();

        let mut engine = engine(SessionMode::OneShot, alice());
        let state = engine.run(&mut source, &mut sink).unwrap();

        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(state.frames_scored, 2);
        assert_eq!(*messages.lock().unwrap(), vec![SessionMessage::found()]);
    }

    #[test]
    fn test_run_reports_reference_failure_as_error_status() {
        let references = Arc::new(ReferenceCache::new(Box::new(FailingSource)));
        let closed = Arc::new(AtomicBool::new(false));
        let mut source = VecSource {
            frames: vec![frame(1)].into_iter(),
            closed: closed.clone(),
        };
        let mut sink = RecordingSink::default();
        let messages = sink.0.clone();

        let mut engine = engine(SessionMode::OneShot, references);
        assert!(engine.run(&mut source, &mut sink).is_err());

        assert!(closed.load(Ordering::SeqCst));
        let messages = messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(matches!(
            &messages[0],
            SessionMessage::Verification(r) if r.status == crate::session::session_message::VerificationStatus::Error
        ));
    }
}
