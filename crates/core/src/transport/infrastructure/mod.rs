#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_clip_source;
pub mod image_sequence_source;
pub mod json_lines_sink;
pub mod length_prefixed_source;
pub mod unreadable_clip_source;
