use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::recognition::domain::face_scorer::{FaceScorer, FrameError};
use crate::recognition::domain::match_verdict::MatchVerdict;
use crate::recognition::domain::reference_set::ReferenceSet;
use crate::shared::frame::Frame;

/// How often a waiting caller re-checks the cancellation flag.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

type ScoreResult = Result<Vec<MatchVerdict>, FrameError>;

#[derive(Debug, PartialEq)]
pub enum WaitOutcome {
    Scored(ScoreResult),
    Cancelled,
}

/// Runs a [`FaceScorer`] on its own thread so the session can bound and
/// abandon per-frame work.
///
/// At most one request is ever outstanding. A frame that overruns its
/// deadline keeps the worker busy until it finishes; frames arriving in
/// the meantime wait for it within their own budget and are dropped
/// unsent if it does not finish in time. The late result is discarded.
pub struct ScoringWorker {
    request_tx: Option<Sender<(u64, Frame)>>,
    result_rx: Receiver<(u64, ScoreResult)>,
    next_seq: u64,
    in_flight: Option<u64>,
    handle: Option<std::thread::JoinHandle<()>>,
}

enum Wait {
    Done(u64, ScoreResult),
    Expired,
    Cancelled,
    Stopped,
}

impl ScoringWorker {
    pub fn spawn(mut scorer: FaceScorer, references: Arc<ReferenceSet>) -> Self {
        let (request_tx, request_rx) = crossbeam_channel::bounded::<(u64, Frame)>(1);
        let (result_tx, result_rx) = crossbeam_channel::bounded::<(u64, ScoreResult)>(1);

        let handle = std::thread::spawn(move || {
            for (seq, frame) in request_rx {
                let result = scorer.score(&frame, &references);
                if result_tx.send((seq, result)).is_err() {
                    break;
                }
            }
        });

        Self {
            request_tx: Some(request_tx),
            result_rx,
            next_seq: 0,
            in_flight: None,
            handle: Some(handle),
        }
    }

    /// Scores one frame, waiting at most `timeout` (forever if `None`).
    ///
    /// Returns [`WaitOutcome::Cancelled`] as soon as `cancelled` is set,
    /// leaving the in-flight frame to finish unobserved.
    pub fn score(
        &mut self,
        frame: Frame,
        timeout: Option<Duration>,
        cancelled: &AtomicBool,
    ) -> WaitOutcome {
        let Some(request_tx) = self.request_tx.clone() else {
            return WaitOutcome::Scored(Err(FrameError::WorkerStopped));
        };
        let deadline = timeout.map(|t| Instant::now() + t);
        let timed_out =
            || WaitOutcome::Scored(Err(FrameError::Timeout(timeout.unwrap_or_default())));

        while let Some(stale) = self.in_flight {
            match self.wait(deadline, cancelled) {
                Wait::Done(seq, _) => {
                    log::debug!("Discarding late result for request {seq}");
                    if seq == stale {
                        self.in_flight = None;
                    }
                }
                Wait::Expired => {
                    log::debug!("Worker still busy with request {stale}; dropping frame");
                    return timed_out();
                }
                Wait::Cancelled => return WaitOutcome::Cancelled,
                Wait::Stopped => return WaitOutcome::Scored(Err(FrameError::WorkerStopped)),
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        if request_tx.send((seq, frame)).is_err() {
            return WaitOutcome::Scored(Err(FrameError::WorkerStopped));
        }
        self.in_flight = Some(seq);

        loop {
            match self.wait(deadline, cancelled) {
                Wait::Done(got, result) if got == seq => {
                    self.in_flight = None;
                    return WaitOutcome::Scored(result);
                }
                Wait::Done(stale, _) => log::debug!("Discarding late result for request {stale}"),
                Wait::Expired => return timed_out(),
                Wait::Cancelled => return WaitOutcome::Cancelled,
                Wait::Stopped => return WaitOutcome::Scored(Err(FrameError::WorkerStopped)),
            }
        }
    }

    fn wait(&self, deadline: Option<Instant>, cancelled: &AtomicBool) -> Wait {
        loop {
            if cancelled.load(Ordering::Relaxed) {
                return Wait::Cancelled;
            }
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Wait::Expired;
                    }
                    (deadline - now).min(POLL_INTERVAL)
                }
                None => POLL_INTERVAL,
            };
            match self.result_rx.recv_timeout(wait) {
                Ok((seq, result)) => return Wait::Done(seq, result),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Wait::Stopped,
            }
        }
    }

    /// Stops accepting work. The thread exits once its current frame is
    /// done; it is joined only if it already finished.
    pub fn shutdown(&mut self) {
        self.request_tx = None;
        if let Some(handle) = self.handle.take() {
            if handle.is_finished() && handle.join().is_err() {
                log::error!("Scoring worker panicked");
            }
        }
    }
}

impl Drop for ScoringWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
