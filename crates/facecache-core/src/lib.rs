//! facecache-core: reference face cache and per-frame identity matching.
//!
//! Keeps a persisted set of named face embeddings in sync with a folder of
//! reference photos, and resolves faces detected in video frames to those
//! names by nearest Euclidean distance. Embeddings come from SCRFD detection
//! and ArcFace recognition running on ONNX Runtime.

pub mod alignment;
pub mod cache;
pub mod detector;
pub mod extractor;
pub mod matcher;
pub mod recognizer;
pub mod store;
pub mod types;

pub use cache::{CacheError, ReconcileReport, ReferenceCache};
pub use extractor::{ExtractError, FaceExtractor, OnnxExtractor};
pub use matcher::{FaceMatcher, MatchResult, Matcher, DEFAULT_TOLERANCE};
pub use types::{BoundingBox, Detection, Embedding, FaceMatch, Identity, IdentityRecord};

use std::path::PathBuf;

/// Default directory for ONNX model files: `$XDG_DATA_HOME/facecache/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facecache")
        .join("models")
}
