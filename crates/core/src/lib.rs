//! Face verification against a directory of reference photos.
//!
//! A session consumes frames from a [`FrameSource`](transport::domain::frame_source::FrameSource),
//! scores every detected face against a shared reference set, and reports
//! verdicts to a [`ResultSink`](transport::domain::result_sink::ResultSink),
//! either once per clip (one-shot) or once per frame (continuous).

pub mod admission;
pub mod recognition;
pub mod session;
pub mod shared;
pub mod transport;
