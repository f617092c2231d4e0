//! Frame source backed by image files, and per-frame recognition.

use facecache_core::cache::IMAGE_EXTENSIONS;
use facecache_core::{FaceExtractor, FaceMatch, FaceMatcher, ReferenceCache};
use image::{imageops, RgbImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("failed to read frame {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to list frames in {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One frame pulled from the source.
pub struct Frame {
    pub path: PathBuf,
    pub image: Result<RgbImage, FrameError>,
}

/// Ordered sequence of frames read from image files.
pub struct FrameSource {
    paths: std::vec::IntoIter<PathBuf>,
}

impl FrameSource {
    /// Build a source from files and directories. Directories contribute
    /// their image files in name order.
    pub fn open(inputs: &[PathBuf]) -> Result<Self, FrameError> {
        let mut paths = Vec::new();
        for input in inputs {
            if input.is_dir() {
                let list_err = |source: std::io::Error| FrameError::List { path: input.clone(), source };
                let mut entries = Vec::new();
                for entry in std::fs::read_dir(input).map_err(list_err)? {
                    let path = entry.map_err(list_err)?.path();
                    if path.is_file() && is_image(&path) {
                        entries.push(path);
                    }
                }
                entries.sort();
                paths.extend(entries);
            } else {
                paths.push(input.clone());
            }
        }
        tracing::debug!(frames = paths.len(), "frame source opened");
        Ok(Self { paths: paths.into_iter() })
    }
}

impl Iterator for FrameSource {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        let path = self.paths.next()?;
        let image = image::open(&path)
            .map(|img| img.to_rgb8())
            .map_err(|source| FrameError::Decode { path: path.clone(), source });
        Some(Frame { path, image })
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext)))
}

/// Resize a frame by `scale` (1.0 leaves it untouched).
pub fn downscale(frame: &RgbImage, scale: f32) -> RgbImage {
    if scale >= 1.0 {
        return frame.clone();
    }
    let w = ((frame.width() as f32 * scale).round() as u32).max(1);
    let h = ((frame.height() as f32 * scale).round() as u32).max(1);
    imageops::resize(frame, w, h, imageops::FilterType::Triangle)
}

/// Detect and match faces on a downscaled copy of `frame`, with boxes mapped
/// back to full-frame coordinates.
pub fn recognize_frame<E: FaceExtractor + ?Sized>(
    matcher: &FaceMatcher,
    extractor: &mut E,
    frame: &RgbImage,
    cache: &ReferenceCache,
    scale: f32,
) -> Vec<FaceMatch> {
    let small = downscale(frame, scale);
    let factor = frame.width() as f32 / small.width() as f32;
    matcher
        .recognize(extractor, &small, cache)
        .into_iter()
        .map(|m| FaceMatch { region: m.region.scaled(factor), ..m })
        .collect()
}
