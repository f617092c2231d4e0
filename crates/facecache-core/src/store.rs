//! Persisted cache state.
//!
//! The cache is stored next to the reference images as two JSON files that
//! are always present together or absent together:
//! `names.json` (array of strings) and `encodings.json` (array of float arrays).

use crate::types::{Embedding, IdentityRecord};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const NAMES_FILE: &str = "names.json";
pub const ENCODINGS_FILE: &str = "encodings.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Records read back from disk.
#[derive(Debug)]
pub struct LoadedState {
    pub records: Vec<IdentityRecord>,
    /// False if the files were half-present, mismatched or unparsable and
    /// should be rewritten on the next save.
    pub consistent: bool,
}

/// Paths of the persisted state for one reference folder.
#[derive(Debug, Clone)]
pub struct CacheStore {
    names_path: PathBuf,
    encodings_path: PathBuf,
}

impl CacheStore {
    pub fn new(folder: &Path) -> Self {
        Self {
            names_path: folder.join(NAMES_FILE),
            encodings_path: folder.join(ENCODINGS_FILE),
        }
    }

    pub fn names_path(&self) -> &Path {
        &self.names_path
    }

    pub fn encodings_path(&self) -> &Path {
        &self.encodings_path
    }

    /// Read persisted records.
    ///
    /// Missing state is an empty cache. Half-present, mismatched or unparsable
    /// state is logged and also treated as empty; the next save rewrites both files.
    /// So is state whose embeddings are empty, non-finite or of differing dimension.
    pub fn load(&self) -> LoadedState {
        let names: Option<Vec<String>> = read_json(&self.names_path);
        let encodings: Option<Vec<Embedding>> = read_json(&self.encodings_path);

        match (names, encodings) {
            (None, None) => {
                tracing::debug!(path = %self.names_path.display(), "no persisted cache state");
                LoadedState { records: Vec::new(), consistent: true }
            }
            (Some(names), Some(encodings)) if names.len() == encodings.len() => {
                if let Err(reason) = check_embeddings(&encodings) {
                    tracing::warn!(
                        path = %self.encodings_path.display(),
                        %reason,
                        "persisted embeddings are invalid; starting from an empty cache"
                    );
                    return LoadedState { records: Vec::new(), consistent: false };
                }
                tracing::info!(
                    count = names.len(),
                    names = %self.names_path.display(),
                    encodings = %self.encodings_path.display(),
                    "loaded cached identities"
                );
                let records = names
                    .into_iter()
                    .zip(encodings)
                    .map(|(name, embedding)| IdentityRecord { name, embedding })
                    .collect();
                LoadedState { records, consistent: true }
            }
            (names, encodings) => {
                tracing::warn!(
                    names = ?names.map(|n| n.len()),
                    encodings = ?encodings.map(|e| e.len()),
                    "persisted cache state is inconsistent; starting from an empty cache"
                );
                LoadedState { records: Vec::new(), consistent: false }
            }
        }
    }

    /// Persist records, or remove both files when there are none.
    pub fn save(&self, records: &[IdentityRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            remove_if_exists(&self.names_path)?;
            remove_if_exists(&self.encodings_path)?;
            tracing::info!(
                names = %self.names_path.display(),
                encodings = %self.encodings_path.display(),
                "cache empty; persisted state removed"
            );
            return Ok(());
        }

        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        let encodings: Vec<&Embedding> = records.iter().map(|r| &r.embedding).collect();

        // Both temp files are complete before either target is replaced.
        let encodings_tmp = write_tmp(&self.encodings_path, &encodings)?;
        let names_tmp = match write_tmp(&self.names_path, &names) {
            Ok(tmp) => tmp,
            Err(e) => {
                let _ = std::fs::remove_file(&encodings_tmp);
                return Err(e);
            }
        };
        if let Err(e) = commit(&encodings_tmp, &self.encodings_path) {
            let _ = std::fs::remove_file(&names_tmp);
            return Err(e);
        }
        commit(&names_tmp, &self.names_path)?;

        tracing::info!(
            count = records.len(),
            names = %self.names_path.display(),
            encodings = %self.encodings_path.display(),
            "cache saved"
        );
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read cache file");
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to parse cache file");
            None
        }
    }
}

/// All embeddings non-empty, finite and of one dimension.
fn check_embeddings(encodings: &[Embedding]) -> Result<(), String> {
    let Some(first) = encodings.first() else {
        return Ok(());
    };
    let dim = first.values.len();
    if dim == 0 {
        return Err("empty embedding".into());
    }
    for (i, embedding) in encodings.iter().enumerate() {
        if embedding.values.len() != dim {
            return Err(format!("embedding {i} has {} values, expected {dim}", embedding.values.len()));
        }
        if !embedding.is_finite() {
            return Err(format!("embedding {i} has non-finite values"));
        }
    }
    Ok(())
}

/// Serialize `value` into a sibling temp file of `path`.
fn write_tmp<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<PathBuf, StoreError> {
    let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes).map_err(|source| {
        let _ = std::fs::remove_file(&tmp);
        StoreError::Write { path: path.to_path_buf(), source }
    })?;
    Ok(tmp)
}

fn commit(tmp: &Path, path: &Path) -> Result<(), StoreError> {
    std::fs::rename(tmp, path).map_err(|source| {
        let _ = std::fs::remove_file(tmp);
        StoreError::Write { path: path.to_path_buf(), source }
    })
}

fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StoreError::Remove { path: path.to_path_buf(), source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, values: &[f32]) -> IdentityRecord {
        IdentityRecord { name: name.into(), embedding: Embedding::new(values.to_vec()) }
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = CacheStore::new(dir.path()).load();
        assert!(state.records.is_empty());
        assert!(state.consistent);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let records = vec![record("alice", &[0.0, 1.0]), record("bob", &[2.0, 3.5])];

        store.save(&records).unwrap();
        assert!(store.names_path().exists());
        assert!(store.encodings_path().exists());
        assert!(!dir.path().join("names.json.tmp").exists());
        assert_eq!(store.load().records, records);

        let raw = std::fs::read_to_string(store.names_path()).unwrap();
        assert_eq!(raw, r#"["alice","bob"]"#);
    }

    #[test]
    fn test_save_empty_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        store.save(&[record("alice", &[1.0])]).unwrap();

        store.save(&[]).unwrap();
        assert!(!store.names_path().exists());
        assert!(!store.encodings_path().exists());

        // Removing absent files is fine.
        store.save(&[]).unwrap();
    }

    #[test]
    fn test_half_present_state_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        std::fs::write(store.names_path(), r#"["alice"]"#).unwrap();
        let state = store.load();
        assert!(state.records.is_empty());
        assert!(!state.consistent);
    }

    #[test]
    fn test_mismatched_lengths_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        std::fs::write(store.names_path(), r#"["alice","bob"]"#).unwrap();
        std::fs::write(store.encodings_path(), "[[1.0,2.0]]").unwrap();
        assert!(!store.load().consistent);
    }

    #[test]
    fn test_corrupt_state_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        std::fs::write(store.names_path(), "not json").unwrap();
        std::fs::write(store.encodings_path(), "[[1.0]]").unwrap();
        let state = store.load();
        assert!(state.records.is_empty());
        assert!(!state.consistent);
    }

    #[test]
    fn test_invalid_embeddings_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        std::fs::write(store.names_path(), r#"["mallory","alice"]"#).unwrap();

        for encodings in ["[[],[5.0,5.0]]", "[[0.0],[0.0,100.0]]", "[[],[]]"] {
            std::fs::write(store.encodings_path(), encodings).unwrap();
            let state = store.load();
            assert!(state.records.is_empty(), "{encodings}");
            assert!(!state.consistent, "{encodings}");
        }
    }

    #[test]
    fn test_non_finite_embedding_is_rejected() {
        let finite = Embedding::new(vec![1.0, 2.0]);
        let nan = Embedding::new(vec![f32::NAN, 0.0]);
        assert!(check_embeddings(&[finite.clone(), nan.clone()]).is_err());
        assert!(check_embeddings(&[finite.clone()]).is_ok());
        assert!(check_embeddings(&[]).is_ok());
        let records = vec![
            IdentityRecord { name: "alice".into(), embedding: finite },
            IdentityRecord { name: "bob".into(), embedding: nan },
        ];

        // NaN serializes as null, which does not load back as a float.
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        store.save(&records).unwrap();
        assert!(!store.load().consistent);
    }

    #[test]
    fn test_failed_save_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let before = vec![record("alice", &[1.0, 2.0])];
        store.save(&before).unwrap();

        // A directory squatting on the names temp path makes the second write fail.
        std::fs::create_dir(dir.path().join("names.json.tmp")).unwrap();
        let err = store.save(&[record("bob", &[3.0, 4.0])]).unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }), "{err}");

        assert!(!dir.path().join("encodings.json.tmp").exists());
        let state = store.load();
        assert!(state.consistent);
        assert_eq!(state.records, before);
    }

    #[test]
    fn test_write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(&dir.path().join("missing-subdir"));
        let err = store.save(&[record("alice", &[1.0])]).unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }), "{err}");
    }
}
