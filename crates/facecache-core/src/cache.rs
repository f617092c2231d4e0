//! Reference cache: named face embeddings kept in sync with a folder of
//! reference photos.
//!
//! Each image's file stem is its identity name. Reconciliation drops records
//! whose image is gone, skips images that are already cached, and encodes the
//! rest; only images showing exactly one face are admitted.

use crate::extractor::FaceExtractor;
use crate::store::{CacheStore, StoreError};
use crate::types::{image_stem, IdentityRecord};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Accepted reference image extensions (compared case-insensitively).
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("failed to read reference folder {path}: {source}")]
    ReadFolder {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to persist cache: {0}")]
    Store(#[from] StoreError),
}

/// Counts produced by one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Cached identities whose image no longer exists.
    pub removed: usize,
    /// Images skipped because their name is already cached (or taken by
    /// another file with the same stem).
    pub excluded: usize,
    /// Newly cached identities.
    pub encoded: usize,
    /// Images rejected because no face was found.
    pub failed_no_face: usize,
    /// Images rejected because more than one face was found.
    pub failed_many_faces: usize,
    /// Images that could not be decoded or run through the extractor, or
    /// whose embedding was empty or non-finite.
    pub failed_unreadable: usize,
}

impl ReconcileReport {
    /// True if any record was added or removed.
    pub fn changed(&self) -> bool {
        self.removed > 0 || self.encoded > 0
    }

    /// Images that were attempted but not cached.
    pub fn rejected(&self) -> usize {
        self.failed_no_face + self.failed_many_faces + self.failed_unreadable
    }
}

/// Ordered set of identity records, unique by name.
#[derive(Debug)]
pub struct ReferenceCache {
    folder: PathBuf,
    store: CacheStore,
    records: Vec<IdentityRecord>,
    /// Loaded state needed repair and must be rewritten.
    dirty: bool,
}

impl ReferenceCache {
    /// Load persisted state for `folder`. Absent state yields an empty cache.
    pub fn load(folder: &Path) -> Self {
        let state = CacheStore::new(folder).load();
        let mut cache = Self::from_records(folder, state.records);
        cache.dirty |= !state.consistent;
        cache
    }

    /// Build a cache from records; later duplicates of a name replace earlier ones.
    pub fn from_records(folder: &Path, records: Vec<IdentityRecord>) -> Self {
        let total = records.len();
        let mut unique: Vec<IdentityRecord> = Vec::with_capacity(total);
        for record in records {
            match unique.iter_mut().find(|r| r.name == record.name) {
                Some(existing) => *existing = record,
                None => unique.push(record),
            }
        }

        let dirty = unique.len() != total;
        if dirty {
            tracing::warn!(
                duplicates = total - unique.len(),
                "cached state contained duplicate names; keeping the last of each"
            );
        }

        Self {
            folder: folder.to_path_buf(),
            store: CacheStore::new(folder),
            records: unique,
            dirty,
        }
    }

    pub fn records(&self) -> &[IdentityRecord] {
        &self.records
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.iter().any(|r| r.name == name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Bring the cache in line with the reference folder and persist any change.
    ///
    /// Individual image failures are counted, never fatal. A failed write of
    /// the updated state is returned as an error.
    pub fn reconcile<E: FaceExtractor + ?Sized>(
        &mut self,
        extractor: &mut E,
    ) -> Result<ReconcileReport, CacheError> {
        let mut report = ReconcileReport::default();
        let (images, duplicates) = reference_images(&self.folder)?;
        report.excluded += duplicates;

        let present: HashSet<&str> = images.iter().map(|(name, _)| name.as_str()).collect();
        let before = self.records.len();
        self.records.retain(|r| present.contains(r.name.as_str()));
        report.removed = before - self.records.len();
        if before > 0 {
            tracing::info!(removed = report.removed, "removed identities with no reference image");
        }

        let pending: Vec<&(String, PathBuf)> = images
            .iter()
            .filter(|(name, _)| !self.contains(name))
            .collect();
        let cached = images.len() - pending.len();
        report.excluded += cached;
        if cached > 0 {
            tracing::info!(excluded = cached, "excluded previously encoded images");
        }

        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "encoding new images");
        }
        for (name, path) in pending {
            self.encode_one(extractor, name, path, &mut report);
        }
        if report.encoded + report.rejected() > 0 {
            tracing::info!(
                encoded = report.encoded,
                attempted = report.encoded + report.rejected(),
                "new images encoded"
            );
        }

        if report.changed() || self.dirty {
            self.store.save(&self.records)?;
            self.dirty = false;
        }

        Ok(report)
    }

    fn encode_one<E: FaceExtractor + ?Sized>(
        &mut self,
        extractor: &mut E,
        name: &str,
        path: &Path,
        report: &mut ReconcileReport,
    ) {
        let image = match image::open(path) {
            Ok(image) => image.to_rgb8(),
            Err(e) => {
                tracing::warn!(name, path = %path.display(), error = %e, "failed: unreadable image");
                report.failed_unreadable += 1;
                return;
            }
        };

        let mut detections = match extractor.detect(&image) {
            Ok(detections) => detections,
            Err(e) => {
                tracing::warn!(name, path = %path.display(), error = %e, "failed: extraction error");
                report.failed_unreadable += 1;
                return;
            }
        };

        match detections.len() {
            0 => {
                tracing::info!(name, "failed: no face found");
                report.failed_no_face += 1;
            }
            1 => {
                let detection = detections.remove(0);
                if detection.embedding.values.is_empty() || !detection.embedding.is_finite() {
                    tracing::warn!(name, path = %path.display(), "failed: invalid embedding");
                    report.failed_unreadable += 1;
                    return;
                }
                self.records.push(IdentityRecord {
                    name: name.to_string(),
                    embedding: detection.embedding,
                });
                tracing::info!(name, "encoded");
                report.encoded += 1;
            }
            n => {
                tracing::info!(name, faces = n, "failed: found more than one face");
                report.failed_many_faces += 1;
            }
        }
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext)))
}

/// List `(name, path)` for reference images in `folder`, sorted by file name.
///
/// When several files share a stem the first in sort order wins; the number
/// of such duplicates is returned alongside.
fn reference_images(folder: &Path) -> Result<(Vec<(String, PathBuf)>, usize), CacheError> {
    let read_err = |source: io::Error| CacheError::ReadFolder { path: folder.to_path_buf(), source };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(folder).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.is_file() && has_image_extension(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut seen = HashSet::new();
    let mut images = Vec::with_capacity(paths.len());
    let mut duplicates = 0;
    for path in paths {
        let Some(name) = image_stem(&path) else {
            tracing::warn!(path = %path.display(), "skipping image with non-UTF-8 name");
            continue;
        };
        if seen.insert(name.clone()) {
            images.push((name, path));
        } else {
            tracing::warn!(name, path = %path.display(), "duplicate reference name; keeping the first file");
            duplicates += 1;
        }
    }

    Ok((images, duplicates))
}
