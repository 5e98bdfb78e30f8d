use std::path::Path;

use crate::admission::frame_admission::RawFrame;
use crate::shared::frame::Frame;
use crate::transport::domain::frame_source::{FrameSource, TransportError};

/// Decodes a video clip via ffmpeg-next, one RGB frame per `next_frame`.
///
/// Frames are decoded lazily, so a one-shot session that stops early
/// never decodes the rest of the clip.
pub struct FfmpegClipSource {
    decoding: Option<ClipDecoder>,
}

// Safety: FfmpegClipSource is only used from a single thread at a time.
// The raw pointers inside ffmpeg types are not shared across threads.
unsafe impl Send for FfmpegClipSource {}

struct ClipDecoder {
    ictx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    width: u32,
    height: u32,
    video_stream_index: usize,
    frame_index: usize,
    flushing: bool,
}

impl FfmpegClipSource {
    pub fn open(path: &Path) -> Result<Self, TransportError> {
        ffmpeg_next::init().map_err(video_error)?;

        let ictx = ffmpeg_next::format::input(path).map_err(video_error)?;
        let stream = ictx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| TransportError::Video("No video stream found".to_string()))?;
        let video_stream_index = stream.index();
        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
            .map_err(video_error)?;
        let decoder = codec_ctx.decoder().video().map_err(video_error)?;

        let width = decoder.width();
        let height = decoder.height();
        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg_next::format::Pixel::RGB24,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )
        .map_err(video_error)?;

        log::info!("Opened clip {} ({width}x{height})", path.display());

        Ok(Self {
            decoding: Some(ClipDecoder {
                ictx,
                decoder,
                scaler,
                width,
                height,
                video_stream_index,
                frame_index: 0,
                flushing: false,
            }),
        })
    }
}

impl FrameSource for FfmpegClipSource {
    fn next_frame(&mut self) -> Result<Option<RawFrame>, TransportError> {
        let Some(clip) = self.decoding.as_mut() else {
            return Ok(None);
        };
        let next = clip.next_frame();
        if next.is_none() {
            self.decoding = None;
        }
        Ok(next)
    }

    fn close(&mut self) {
        self.decoding = None;
    }
}

impl ClipDecoder {
    fn next_frame(&mut self) -> Option<RawFrame> {
        if let Some(frame) = self.try_receive() {
            return Some(frame);
        }
        if self.flushing {
            return None;
        }

        loop {
            let Some((stream, packet)) = self.ictx.packets().next() else {
                let _ = self.decoder.send_eof();
                self.flushing = true;
                return self.try_receive();
            };
            if stream.index() != self.video_stream_index {
                continue;
            }
            if self.decoder.send_packet(&packet).is_err() {
                continue;
            }
            if let Some(frame) = self.try_receive() {
                return Some(frame);
            }
        }
    }

    fn try_receive(&mut self) -> Option<RawFrame> {
        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        self.decoder.receive_frame(&mut decoded).ok()?;

        let index = self.frame_index;
        self.frame_index += 1;

        let mut rgb_frame = ffmpeg_next::util::frame::video::Video::empty();
        if let Err(e) = self.scaler.run(&decoded, &mut rgb_frame) {
            return Some(RawFrame::Unreadable(format!("frame {index}: {e}")));
        }
        let pixels = extract_rgb_pixels(&rgb_frame, self.width, self.height);
        Some(RawFrame::Decoded(Frame::new(
            pixels,
            self.width,
            self.height,
            3,
            index,
        )))
    }
}

fn extract_rgb_pixels(
    rgb_frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let w = width as usize;
    let h = height as usize;

    let mut pixels = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        let row_start = row * stride;
        pixels.extend_from_slice(&data[row_start..row_start + w * 3]);
    }
    pixels
}

fn video_error(e: ffmpeg_next::Error) -> TransportError {
    TransportError::Video(e.to_string())
}
