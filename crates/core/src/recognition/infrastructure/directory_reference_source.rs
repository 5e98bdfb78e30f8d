use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::recognition::domain::face_encoder::{Embedding, FaceEncoder};
use crate::recognition::domain::reference_set::{ReferenceError, ReferenceSource};
use crate::shared::constants::IMAGE_EXTENSIONS;
use crate::shared::frame::Frame;

/// Enrollment photos stored as image files in one directory.
///
/// Each file's stem is the identity name. Files are visited in name order;
/// the first detected face in a photo becomes that identity's reference.
/// Photos that fail to decode or contain no face are logged and skipped.
pub struct DirectoryReferenceSource {
    dir: PathBuf,
    encoder: Mutex<Box<dyn FaceEncoder>>,
}

impl DirectoryReferenceSource {
    pub fn new(dir: impl Into<PathBuf>, encoder: Box<dyn FaceEncoder>) -> Self {
        Self {
            dir: dir.into(),
            encoder: Mutex::new(encoder),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn photo_paths(&self) -> Result<Vec<PathBuf>, ReferenceError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| ReferenceError::ReadDir {
            path: self.dir.clone(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_reference_photo(path))
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn encode_photo(&self, path: &Path) -> Result<Option<Embedding>, Box<dyn std::error::Error>> {
        let image = image::open(path)?.to_rgb8();
        let frame = Frame::from_rgb_image(image, 0);
        let mut encoder = self
            .encoder
            .lock()
            .map_err(|e| format!("Lock poisoned: {e}"))?;
        let faces = encoder
            .detect_and_encode(&frame)
            .map_err(|e| e.to_string())?;
        Ok(faces.into_iter().next().map(|face| face.embedding))
    }
}

impl ReferenceSource for DirectoryReferenceSource {
    fn list_reference_embeddings(&self) -> Result<Vec<(String, Embedding)>, ReferenceError> {
        if !self.dir.exists() {
            log::warn!(
                "Reference directory {} not found, creating it",
                self.dir.display()
            );
            fs::create_dir_all(&self.dir).map_err(|source| ReferenceError::CreateDir {
                path: self.dir.clone(),
                source,
            })?;
            return Ok(Vec::new());
        }

        let paths = self.photo_paths()?;
        log::info!(
            "Found {} reference photos in {}",
            paths.len(),
            self.dir.display()
        );

        let mut references = Vec::new();
        for path in paths {
            let Some(name) = identity_name(&path) else {
                continue;
            };
            log::info!("Processing reference photo {}", path.display());
            match self.encode_photo(&path) {
                Ok(Some(embedding)) => {
                    log::info!("Face found in {}", path.display());
                    references.push((name, embedding));
                }
                Ok(None) => log::warn!("No face found in {}", path.display()),
                Err(e) => log::error!("Failed to process {}: {e}", path.display()),
            }
        }
        Ok(references)
    }
}

fn is_reference_photo(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn identity_name(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::domain::face_encoder::{DetectedFace, EncodeError};
    use crate::recognition::domain::reference_set::ReferenceSet;
    use crate::shared::bounding_box::BoundingBox;

    /// Encodes a photo by its top-left red value; red 0 means "no face",
    /// red 255 makes detection fail, red 200 yields two faces.
    struct ColorEncoder;

    impl FaceEncoder for ColorEncoder {
        fn detect_and_encode(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, EncodeError> {
            let red = frame.data()[0];
            let face = |v: f32| DetectedFace {
                bounding_box: BoundingBox::new(0, 0, 1, 1),
                embedding: vec![v, 0.0],
            };
            match red {
                0 => Ok(vec![]),
                255 => Err("detector failure".into()),
                200 => Ok(vec![face(200.0), face(1.0)]),
                r => Ok(vec![face(r as f32)]),
            }
        }
    }

    fn write_photo(dir: &Path, file: &str, red: u8) {
        let mut img = image::RgbImage::new(4, 4);
        for pixel in img.pixels_mut() {
            *pixel = image::Rgb([red, 0, 0]);
        }
        img.save(dir.join(file)).unwrap();
    }

    fn source(dir: &Path) -> DirectoryReferenceSource {
        DirectoryReferenceSource::new(dir, Box::new(ColorEncoder))
    }

    #[test]
    fn test_missing_directory_is_created_and_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("reference_photos");

        let entries = source(&dir).list_reference_embeddings().unwrap();

        assert!(entries.is_empty());
        assert!(dir.is_dir());
        // idempotent
        assert!(source(&dir).list_reference_embeddings().unwrap().is_empty());
    }

    #[test]
    fn test_names_come_from_file_stems_in_sorted_order() {
        let tmp = tempfile::tempdir().unwrap();
        write_photo(tmp.path(), "bob.png", 20);
        write_photo(tmp.path(), "alice.jpg", 10);

        let entries = source(tmp.path()).list_reference_embeddings().unwrap();

        let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[test]
    fn test_photo_without_face_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        write_photo(tmp.path(), "empty.png", 0);
        write_photo(tmp.path(), "carol.png", 30);

        let entries = source(tmp.path()).list_reference_embeddings().unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "carol");
    }

    #[test]
    fn test_first_face_wins_for_group_photo() {
        let tmp = tempfile::tempdir().unwrap();
        write_photo(tmp.path(), "group.png", 200);

        let entries = source(tmp.path()).list_reference_embeddings().unwrap();

        assert_eq!(entries[0].1, vec![200.0, 0.0]);
    }

    #[test]
    fn test_detection_failure_and_corrupt_files_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        write_photo(tmp.path(), "broken.png", 255);
        fs::write(tmp.path().join("corrupt.jpg"), b"not an image").unwrap();
        write_photo(tmp.path(), "dave.png", 40);

        let entries = source(tmp.path()).list_reference_embeddings().unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "dave");
    }

    #[test]
    fn test_other_extensions_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        write_photo(tmp.path(), "erin.bmp", 50);
        fs::write(tmp.path().join("notes.txt"), b"hello").unwrap();

        let entries = source(tmp.path()).list_reference_embeddings().unwrap();

        assert!(entries.is_empty());
    }

    #[test]
    fn test_loads_into_reference_set() {
        let tmp = tempfile::tempdir().unwrap();
        write_photo(tmp.path(), "alice.png", 10);

        let set = ReferenceSet::load(&source(tmp.path())).unwrap();

        assert_eq!(set.names(), vec!["alice"]);
    }
}
