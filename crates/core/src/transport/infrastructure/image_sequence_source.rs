use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use crate::admission::frame_admission::RawFrame;
use crate::shared::constants::IMAGE_EXTENSIONS;
use crate::transport::domain::frame_source::{FrameSource, TransportError};

/// Serves the image files of a directory as a clip, in file-name order.
///
/// Files that cannot be read become unreadable frames rather than
/// transport errors, so one bad file only costs one frame.
pub struct ImageSequenceSource {
    pending: VecDeque<PathBuf>,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path) -> Result<Self, TransportError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image(path))
            .collect();
        paths.sort();
        log::info!("Found {} frame images in {}", paths.len(), dir.display());
        Ok(Self {
            pending: paths.into(),
        })
    }

    /// Serves exactly these files, in the given order.
    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            pending: paths.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<RawFrame>, TransportError> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(RawFrame::Encoded(bytes))),
            Err(e) => Ok(Some(RawFrame::Unreadable(format!(
                "{}: {e}",
                path.display()
            )))),
        }
    }

    fn close(&mut self) {
        self.pending.clear();
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
