//! In-memory gallery of enrolled embeddings, with a JSON cache on disk.
//!
//! The cache is a single record of two parallel arrays:
//!
//! ```json
//! { "encodings": [[0.1, ...], ...], "names": ["Alice", ...] }
//! ```
//!
//! `names[i]` labels `encodings[i]`. A file where the arrays differ in
//! length, or where embeddings disagree on dimension, is rejected as a whole.

use crate::atomic::write_atomic;
use crate::types::{Embedding, GalleryEntry, GalleryStats};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("cache file not found: {0}")]
    NotFound(PathBuf),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("malformed cache: {0}")]
    Malformed(String),
    #[error("embedding dimension mismatch: gallery has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding for {label:?} contains NaN or infinite values")]
    NonFinite { label: String },
}

/// On-disk shape of the cache.
#[derive(Serialize, Deserialize)]
struct CacheFile {
    encodings: Vec<Vec<f32>>,
    names: Vec<String>,
}

/// Ordered collection of (embedding, label) pairs for one scope.
#[derive(Debug, Clone, Default)]
pub struct GalleryStore {
    entries: Vec<GalleryEntry>,
}

impl GalleryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dimension shared by every entry, or `None` while empty.
    pub fn dimension(&self) -> Option<usize> {
        self.entries.first().map(|e| e.embedding.dim())
    }

    /// Append one entry. The first entry fixes the gallery's dimension.
    ///
    /// Embeddings with NaN or infinite components are rejected: JSON cannot
    /// store them and they never compare closer than anything else.
    pub fn push(&mut self, entry: GalleryEntry) -> Result<(), GalleryError> {
        if !entry.embedding.is_finite() {
            return Err(GalleryError::NonFinite { label: entry.label });
        }
        if let Some(expected) = self.dimension() {
            let actual = entry.embedding.dim();
            if actual != expected {
                return Err(GalleryError::DimensionMismatch { expected, actual });
            }
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Drop every entry from memory. The cache file is left alone.
    pub fn clear(&mut self) {
        self.entries.clear();
        tracing::info!("gallery cleared from memory");
    }

    pub fn stats(&self) -> GalleryStats {
        let labels: HashSet<&str> = self.entries.iter().map(|e| e.label.as_str()).collect();
        GalleryStats {
            total_entries: self.entries.len(),
            unique_labels: labels.len(),
        }
    }

    /// Number of entries per label, sorted by label.
    pub fn label_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.label.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Replace the gallery with the contents of `cache_path`.
    ///
    /// Returns false if the file is absent or invalid; the gallery is then
    /// left exactly as it was.
    pub fn load(&mut self, cache_path: &Path) -> bool {
        match read_cache(cache_path) {
            Ok(entries) => {
                tracing::info!(
                    path = %cache_path.display(),
                    entries = entries.len(),
                    "cache loaded"
                );
                self.entries = entries;
                true
            }
            Err(GalleryError::NotFound(_)) => {
                tracing::info!(path = %cache_path.display(), "no cache file");
                false
            }
            Err(e) => {
                tracing::warn!(path = %cache_path.display(), error = %e, "ignoring unusable cache");
                false
            }
        }
    }

    /// Persist every entry to `cache_path`. Failure is logged and reported, not retried.
    pub fn save(&self, cache_path: &Path) -> bool {
        match write_cache(cache_path, &self.entries) {
            Ok(()) => {
                tracing::info!(
                    path = %cache_path.display(),
                    entries = self.entries.len(),
                    "cache saved"
                );
                true
            }
            Err(e) => {
                tracing::error!(path = %cache_path.display(), error = %e, "failed to save cache");
                false
            }
        }
    }
}

/// Read and validate a cache file.
pub fn read_cache(cache_path: &Path) -> Result<Vec<GalleryEntry>, GalleryError> {
    let bytes = std::fs::read(cache_path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            GalleryError::NotFound(cache_path.to_path_buf())
        } else {
            GalleryError::Io {
                path: cache_path.to_path_buf(),
                source,
            }
        }
    })?;
    decode_cache(&bytes)
}

fn decode_cache(bytes: &[u8]) -> Result<Vec<GalleryEntry>, GalleryError> {
    let cache: CacheFile = serde_json::from_slice(bytes)?;

    if cache.encodings.len() != cache.names.len() {
        return Err(GalleryError::Malformed(format!(
            "{} encodings but {} names",
            cache.encodings.len(),
            cache.names.len()
        )));
    }

    if let Some(first) = cache.encodings.first() {
        let dim = first.len();
        if dim == 0 {
            return Err(GalleryError::Malformed("zero-length encoding".into()));
        }
        if let Some(bad) = cache.encodings.iter().find(|e| e.len() != dim) {
            return Err(GalleryError::Malformed(format!(
                "mixed encoding dimensions: {dim} and {}",
                bad.len()
            )));
        }
    }

    let entries: Vec<GalleryEntry> = cache
        .encodings
        .into_iter()
        .zip(cache.names)
        .map(|(values, label)| GalleryEntry::new(Embedding::new(values), label))
        .collect();
    if let Some(bad) = entries.iter().find(|e| !e.embedding.is_finite()) {
        return Err(GalleryError::NonFinite { label: bad.label.clone() });
    }
    Ok(entries)
}

/// Serialize `entries` and write them atomically to `cache_path`.
pub fn write_cache(cache_path: &Path, entries: &[GalleryEntry]) -> Result<(), GalleryError> {
    let (encodings, names): (Vec<Vec<f32>>, Vec<String>) = entries
        .iter()
        .map(|e| (e.embedding.values.clone(), e.label.clone()))
        .unzip();
    let bytes = serde_json::to_vec(&CacheFile { encodings, names })?;

    write_atomic(cache_path, &bytes).map_err(|source| GalleryError::Io {
        path: cache_path.to_path_buf(),
        source,
    })
}

/// Delete the cache file so the next startup rebuilds from images.
///
/// Returns `Ok(false)` if there was nothing to delete.
pub fn remove_cache(cache_path: &Path) -> Result<bool, GalleryError> {
    match std::fs::remove_file(cache_path) {
        Ok(()) => {
            tracing::info!(path = %cache_path.display(), "cache file deleted");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(GalleryError::Io {
            path: cache_path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(values: &[f32], label: &str) -> GalleryEntry {
        GalleryEntry::new(Embedding::new(values.to_vec()), label)
    }

    fn sample() -> GalleryStore {
        let mut store = GalleryStore::new();
        store.push(entry(&[0.1, 0.2, 0.3], "Alice")).unwrap();
        store.push(entry(&[0.4, 0.5, 0.6], "Alice")).unwrap();
        store.push(entry(&[-0.7, 0.8, 1e-7], "Bob")).unwrap();
        store
    }

    #[test]
    fn test_stats_counts_distinct_labels() {
        let stats = sample().stats();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.unique_labels, 2);
        assert_eq!(GalleryStore::new().stats(), GalleryStats::default());
    }

    #[test]
    fn test_label_counts() {
        let counts = sample().label_counts();
        assert_eq!(counts.get("Alice"), Some(&2));
        assert_eq!(counts.get("Bob"), Some(&1));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn test_push_rejects_other_dimension() {
        let mut store = sample();
        let err = store.push(entry(&[1.0, 2.0], "Carol")).unwrap_err();
        assert!(matches!(err, GalleryError::DimensionMismatch { expected: 3, actual: 2 }));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_push_rejects_non_finite() {
        let mut store = sample();
        let poisoned = [
            [f32::NAN, 0.0, 0.0],
            [0.0, f32::INFINITY, 0.0],
            [0.0, 0.0, f32::NEG_INFINITY],
        ];
        for values in poisoned {
            let err = store.push(entry(&values, "Bad")).unwrap_err();
            assert!(matches!(err, GalleryError::NonFinite { ref label } if label == "Bad"));
        }
        assert_eq!(store.len(), 3);

        let mut empty = GalleryStore::new();
        assert!(empty.push(entry(&[f32::NAN, 0.0], "Bad")).is_err());
        assert_eq!(empty.dimension(), None);
    }

    #[test]
    fn test_saved_gallery_always_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut store = GalleryStore::new();
        let _ = store.push(entry(&[f32::NAN, 0.0], "Bad"));
        store.push(entry(&[0.0, 0.0], "Alice")).unwrap();
        assert!(store.save(&path));

        let body = std::fs::read_to_string(&path).unwrap();
        assert!(!body.contains("null"), "wrote {body}");
        let mut loaded = GalleryStore::new();
        assert!(loaded.load(&path));
        assert_eq!(loaded.entries(), store.entries());
    }

    #[test]
    fn test_load_rejects_null_or_overflowing_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        for body in [
            r#"{"encodings": [[null, 0.0], [0.0, 0.0]], "names": ["Bad", "Alice"]}"#,
            r#"{"encodings": [[1e400, 0.0]], "names": ["Huge"]}"#,
        ] {
            std::fs::write(&path, body).unwrap();
            let mut store = sample();
            assert!(!store.load(&path), "accepted {body}");
            assert_eq!(store.entries(), sample().entries());
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encodings/face_encodings.json");
        let store = sample();
        assert!(store.save(&path));

        let mut loaded = GalleryStore::new();
        assert!(loaded.load(&path));
        assert_eq!(loaded.entries(), store.entries());
    }

    #[test]
    fn test_save_empty_is_distinct_from_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        assert!(GalleryStore::new().save(&path));

        let mut loaded = sample();
        assert!(loaded.load(&path));
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = sample();
        assert!(!store.load(&dir.path().join("absent.json")));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_load_rejects_length_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let body = r#"{"encodings": [[0.1, 0.2]], "names": ["Alice", "Bob"]}"#;
        std::fs::write(&path, body).unwrap();

        let mut store = GalleryStore::new();
        assert!(!store.load(&path));
        assert!(store.is_empty());
        assert!(matches!(read_cache(&path), Err(GalleryError::Malformed(_))));
    }

    #[test]
    fn test_load_rejects_wrong_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        for body in [
            r#"["Alice"]"#,
            r#"{"names": ["Alice"]}"#,
            r#"{"encodings": "nope", "names": []}"#,
            "not json at all",
        ] {
            std::fs::write(&path, body).unwrap();
            let mut store = GalleryStore::new();
            assert!(!store.load(&path), "accepted {body}");
            assert!(store.is_empty());
        }
    }

    #[test]
    fn test_load_rejects_mixed_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let body = r#"{"encodings": [[0.1, 0.2], [0.3]], "names": ["A", "B"]}"#;
        std::fs::write(&path, body).unwrap();
        assert!(matches!(read_cache(&path), Err(GalleryError::Malformed(_))));
    }

    #[test]
    fn test_failed_load_keeps_prior_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, r#"{"encodings": [], "names": ["ghost"]}"#).unwrap();

        let mut store = sample();
        assert!(!store.load(&path));
        assert_eq!(store.entries(), sample().entries());
    }

    #[test]
    fn test_clear_does_not_touch_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut store = sample();
        assert!(store.save(&path));
        store.clear();
        assert!(store.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn test_remove_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        assert!(!remove_cache(&path).unwrap());
        assert!(sample().save(&path));
        assert!(remove_cache(&path).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_save_to_unwritable_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a directory").unwrap();
        assert!(!sample().save(&blocker.join("cache.json")));
    }
}
