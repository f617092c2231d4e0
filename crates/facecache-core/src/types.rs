use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Rescale coordinates (box and landmarks) by `factor`.
    ///
    /// Used to map detections on a downscaled frame back to full resolution.
    pub fn scaled(&self, factor: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx * factor, ly * factor))),
        }
    }

    /// Integer (top, left, bottom, right) corners, rounded toward the box.
    pub fn corners(&self) -> (i32, i32, i32, i32) {
        (
            self.y.round() as i32,
            self.x.round() as i32,
            (self.y + self.height).round() as i32,
            (self.x + self.width).round() as i32,
        )
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Only meaningful for embeddings of equal dimension; otherwise just the
    /// shared prefix contributes. `FaceMatcher` skips mismatched pairs.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// True if every component is finite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

/// A cached identity: a reference image stem and its face embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityRecord {
    pub name: String,
    pub embedding: Embedding,
}

/// A single face found by the extractor.
#[derive(Debug, Clone)]
pub struct Detection {
    pub region: BoundingBox,
    pub embedding: Embedding,
}

/// Resolved identity of a detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Known(String),
    Unknown,
}

impl Identity {
    pub fn name(&self) -> Option<&str> {
        match self {
            Identity::Known(name) => Some(name),
            Identity::Unknown => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Known(name) => f.write_str(name),
            Identity::Unknown => f.write_str("unknown"),
        }
    }
}

/// Result of resolving one detection against the reference cache.
#[derive(Debug, Clone)]
pub struct FaceMatch {
    pub region: BoundingBox,
    pub identity: Identity,
    /// Distance to the nearest cached embedding, if the cache was non-empty.
    pub distance: Option<f32>,
}

/// Identity name for a reference image: the file name without its extension.
pub fn image_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
}
