//! Nearest-embedding identity matching.

use crate::cache::ReferenceCache;
use crate::extractor::FaceExtractor;
use crate::types::{Detection, Embedding, FaceMatch, IdentityRecord, Identity};
use image::RgbImage;

/// Default acceptance tolerance: Euclidean distance between L2-normalized
/// ArcFace embeddings. 1.1 corresponds to a cosine similarity of about 0.40.
pub const DEFAULT_TOLERANCE: f32 = 1.1;

/// Result of comparing one probe embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the nearest comparable gallery entry, `None` if there is none.
    pub distance: Option<f32>,
    /// Index of the nearest gallery entry.
    pub index: Option<usize>,
}

/// Strategy for comparing a probe embedding against cached identities.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[IdentityRecord]) -> MatchResult;
}

/// Euclidean nearest-neighbour matcher with a single acceptance tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceMatcher {
    /// Maximum distance (inclusive) at which the nearest identity is accepted.
    pub tolerance: f32,
}

impl Default for FaceMatcher {
    fn default() -> Self {
        Self { tolerance: DEFAULT_TOLERANCE }
    }
}

impl Matcher for FaceMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[IdentityRecord]) -> MatchResult {
        let mut best: Option<(usize, f32)> = None;
        for (i, record) in gallery.iter().enumerate() {
            let dim = record.embedding.values.len();
            if dim == 0 || dim != probe.values.len() {
                tracing::debug!(
                    name = %record.name,
                    stored = dim,
                    probe = probe.values.len(),
                    "skipping identity with incomparable embedding"
                );
                continue;
            }
            let distance = probe.euclidean_distance(&record.embedding);
            // Strict comparison: the first of equal minima wins.
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }

        match best {
            Some((index, distance)) => MatchResult {
                matched: distance <= self.tolerance,
                distance: Some(distance),
                index: Some(index),
            },
            None => MatchResult { matched: false, distance: None, index: None },
        }
    }
}

impl FaceMatcher {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }

    /// Resolve each detection to a cached identity or `Unknown`.
    ///
    /// Output has the same length and order as `detections`. Detections are
    /// independent: one identity may be assigned to several faces in a frame.
    pub fn match_detections(&self, detections: &[Detection], cache: &ReferenceCache) -> Vec<FaceMatch> {
        let gallery = cache.records();
        detections
            .iter()
            .map(|detection| {
                let result = self.compare(&detection.embedding, gallery);
                let identity = match result.index {
                    Some(i) if result.matched => Identity::Known(gallery[i].name.clone()),
                    _ => Identity::Unknown,
                };
                FaceMatch {
                    region: detection.region.clone(),
                    identity,
                    distance: result.distance,
                }
            })
            .collect()
    }

    /// Run the extractor on a frame and match its detections.
    ///
    /// An extraction failure degrades to an empty result for this frame.
    pub fn recognize<E: FaceExtractor + ?Sized>(
        &self,
        extractor: &mut E,
        frame: &RgbImage,
        cache: &ReferenceCache,
    ) -> Vec<FaceMatch> {
        match extractor.detect(frame) {
            Ok(detections) => self.match_detections(&detections, cache),
            Err(e) => {
                tracing::warn!(error = %e, "face extraction failed; treating frame as empty");
                Vec::new()
            }
        }
    }
}
