use crate::recognition::domain::face_scorer::FrameError;
use crate::session::session_state::{SessionMode, SessionState};
use crate::shared::frame::Frame;

/// A frame as delivered by a transport, before admission.
#[derive(Clone, Debug)]
pub enum RawFrame {
    /// Encoded image bytes (JPEG, PNG, ...).
    Encoded(Vec<u8>),
    /// Pixels already decoded by the transport (e.g. a video decoder).
    Decoded(Frame),
    /// The transport received something it could not read as a frame.
    Unreadable(String),
}

#[derive(Debug)]
pub enum AdmissionDecision {
    Accept(Frame),
    Skip(FrameError),
    Stop,
}

/// Gate between the transport and the scorer.
///
/// Decoding failures are always a skip; only the one-shot frame budget
/// or a closed session produce a stop.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameAdmission {
    frame_cap: usize,
    downscale_ratio: Option<f64>,
}

impl FrameAdmission {
    pub fn new(frame_cap: usize, downscale_ratio: Option<f64>) -> Self {
        Self {
            frame_cap,
            downscale_ratio,
        }
    }

    pub fn frame_cap(&self) -> usize {
        self.frame_cap
    }

    pub fn admit(&self, raw: RawFrame, state: &SessionState) -> AdmissionDecision {
        if state.is_closed() || self.budget_exhausted(state) {
            return AdmissionDecision::Stop;
        }

        let index = state.frames_received;
        match decode(raw) {
            Ok(frame) => AdmissionDecision::Accept(self.prepare(frame.with_index(index), state.mode)),
            Err(e) => AdmissionDecision::Skip(e),
        }
    }

    /// True once a one-shot session has used up its frame budget.
    pub fn budget_exhausted(&self, state: &SessionState) -> bool {
        state.mode == SessionMode::OneShot && state.frames_received >= self.frame_cap
    }

    /// Downscales continuous-mode frames by the configured ratio.
    pub fn prepare(&self, frame: Frame, mode: SessionMode) -> Frame {
        let ratio = match (mode, self.downscale_ratio) {
            (SessionMode::Continuous, Some(r)) if r > 0.0 && r < 1.0 => r,
            _ => return frame,
        };
        match frame.downscale(ratio) {
            Some(scaled) => scaled,
            None => frame,
        }
    }
}

fn decode(raw: RawFrame) -> Result<Frame, FrameError> {
    match raw {
        RawFrame::Encoded(bytes) => {
            if bytes.is_empty() {
                return Err(FrameError::Decode("empty frame".to_string()));
            }
            let image = image::load_from_memory(&bytes)
                .map_err(|e| FrameError::Decode(e.to_string()))?;
            let frame = Frame::from_rgb_image(image.to_rgb8(), 0);
            if frame.is_well_formed() {
                Ok(frame)
            } else {
                Err(FrameError::Decode("image has no pixels".to_string()))
            }
        }
        RawFrame::Decoded(frame) => {
            if frame.is_well_formed() {
                Ok(frame)
            } else {
                Err(FrameError::Decode(format!(
                    "malformed {}x{}x{} frame with {} bytes",
                    frame.width(),
                    frame.height(),
                    frame.channels(),
                    frame.data().len()
                )))
            }
        }
        RawFrame::Unreadable(reason) => Err(FrameError::Decode(reason)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::session_state::SessionPhase;
    use image::{ImageFormat, RgbImage};
    use rstest::rstest;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, image::Rgb([10, 20, 30]));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn active(mode: SessionMode, received: usize) -> SessionState {
        SessionState {
            mode,
            phase: SessionPhase::Active,
            frames_received: received,
            frames_scored: received,
        }
    }

    #[test]
    fn test_accepts_encoded_png() {
        let admission = FrameAdmission::new(30, None);
        match admission.admit(RawFrame::Encoded(png_bytes(8, 6)), &active(SessionMode::OneShot, 3)) {
            AdmissionDecision::Accept(frame) => {
                assert_eq!((frame.width(), frame.height()), (8, 6));
                assert_eq!(frame.index(), 3);
            }
            other => panic!("expected accept, got {other:?}"),
        }
    }

    #[rstest]
    #[case::garbage(RawFrame::Encoded(vec![0xde, 0xad, 0xbe, 0xef]))]
    #[case::empty(RawFrame::Encoded(Vec::new()))]
    #[case::truncated_png(RawFrame::Encoded(png_bytes(8, 8)[..20].to_vec()))]
    #[case::zero_sized(RawFrame::Decoded(Frame::from_rgb_image(RgbImage::new(0, 0), 0)))]
    #[case::grayscale(RawFrame::Decoded(Frame::new(vec![0u8; 4], 2, 2, 1, 0)))]
    #[case::unreadable(RawFrame::Unreadable("socket sent text".to_string()))]
    fn test_malformed_input_is_skipped(#[case] raw: RawFrame) {
        let admission = FrameAdmission::new(30, Some(0.5));
        let decision = admission.admit(raw, &active(SessionMode::Continuous, 0));
        assert!(matches!(decision, AdmissionDecision::Skip(FrameError::Decode(_))));
    }

    #[test]
    fn test_one_shot_stops_at_cap() {
        let admission = FrameAdmission::new(30, None);
        let decision = admission.admit(RawFrame::Encoded(png_bytes(4, 4)), &active(SessionMode::OneShot, 30));
        assert!(matches!(decision, AdmissionDecision::Stop));
    }

    #[test]
    fn test_continuous_has_no_cap() {
        let admission = FrameAdmission::new(30, None);
        let decision = admission.admit(
            RawFrame::Encoded(png_bytes(4, 4)),
            &active(SessionMode::Continuous, 10_000),
        );
        assert!(matches!(decision, AdmissionDecision::Accept(_)));
    }

    #[test]
    fn test_closed_session_stops() {
        let admission = FrameAdmission::new(30, None);
        let mut state = active(SessionMode::Continuous, 0);
        state.phase = SessionPhase::Closed;
        let decision = admission.admit(RawFrame::Encoded(png_bytes(4, 4)), &state);
        assert!(matches!(decision, AdmissionDecision::Stop));
    }

    #[test]
    fn test_continuous_frames_are_downscaled() {
        let admission = FrameAdmission::new(30, Some(0.5));
        match admission.admit(RawFrame::Encoded(png_bytes(40, 20)), &active(SessionMode::Continuous, 0)) {
            AdmissionDecision::Accept(frame) => assert_eq!((frame.width(), frame.height()), (20, 10)),
            other => panic!("expected accept, got {other:?}"),
        }
    }

    #[test]
    fn test_one_shot_frames_keep_full_resolution() {
        let admission = FrameAdmission::new(30, Some(0.5));
        match admission.admit(RawFrame::Encoded(png_bytes(40, 20)), &active(SessionMode::OneShot, 0)) {
            AdmissionDecision::Accept(frame) => assert_eq!((frame.width(), frame.height()), (40, 20)),
            other => panic!("expected accept, got {other:?}"),
        }
    }

    #[rstest]
    #[case(None)]
    #[case(Some(1.0))]
    fn test_prepare_without_effective_ratio_is_identity(#[case] ratio: Option<f64>) {
        let admission = FrameAdmission::new(30, ratio);
        let frame = Frame::new(vec![1u8; 10 * 10 * 3], 10, 10, 3, 7);
        let prepared = admission.prepare(frame, SessionMode::Continuous);
        assert_eq!((prepared.width(), prepared.height(), prepared.index()), (10, 10, 7));
    }
}
