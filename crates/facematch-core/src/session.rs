//! Per-session recognition context.
//!
//! A [`RecognitionSession`] owns everything one user's recognition needs:
//! the gallery, its on-disk locations, the matcher and the extractor. The
//! caller constructs one per session and drops it when the session ends.
//! Every operation takes `&mut self`, so a rebuild can never overlap a query
//! on the same session.

use crate::atomic::write_atomic;
use crate::enrollment::{
    self, label_folder_name, normalize_label, person_folders, sanitize_label,
};
use crate::extractor::{EmbeddingExtractor, ExtractError};
use crate::gallery::{self, GalleryStore};
use crate::matcher::{EuclideanMatcher, Matcher, DEFAULT_MATCH_THRESHOLD};
use crate::pixels::PixelBuffer;
use crate::scope::{Scope, ScopePaths, StorageLayout};
use crate::types::{
    BoundingBox, Embedding, FaceMatch, GalleryEntry, GalleryStats, Identity, MatchResult,
    Recognition,
};
use image::ImageFormat;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Padding added around a confirmed face before it is stored, as a fraction of box size.
const CROP_MARGIN: f32 = 0.5;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("cannot initialize storage for {scope} at {path}: {source}")]
    Storage {
        scope: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Extract(#[from] ExtractError),
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Exclusive upper bound on distance for a positive identification.
    pub match_threshold: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

pub struct RecognitionSession<E> {
    scope: Scope,
    /// `None` for a detached session with no backing storage.
    paths: Option<ScopePaths>,
    gallery: GalleryStore,
    matcher: EuclideanMatcher,
    extractor: E,
}

impl<E: EmbeddingExtractor> RecognitionSession<E> {
    /// Open a session for `scope`, creating its storage directories.
    ///
    /// The gallery starts empty; call [`initialize`](Self::initialize) to
    /// load or build it.
    pub fn open(
        layout: &StorageLayout,
        scope: Scope,
        extractor: E,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let paths = prepare_storage(layout, &scope)?;
        Ok(Self::attached(scope, paths, extractor, config))
    }

    /// Like [`open`](Self::open), but falls back to a [`detached`](Self::detached)
    /// session when the storage directories cannot be created.
    pub fn open_or_detached(
        layout: &StorageLayout,
        scope: Scope,
        extractor: E,
        config: SessionConfig,
    ) -> Self {
        match prepare_storage(layout, &scope) {
            Ok(paths) => Self::attached(scope, paths, extractor, config),
            Err(e) => {
                tracing::error!(error = %e, "storage unavailable");
                Self::detached(extractor, config)
            }
        }
    }

    fn attached(scope: Scope, paths: ScopePaths, extractor: E, config: SessionConfig) -> Self {
        tracing::info!(
            %scope,
            people = %paths.people_dir.display(),
            cache = %paths.cache_path.display(),
            threshold = config.match_threshold,
            "recognition session opened"
        );

        Self {
            scope,
            paths: Some(paths),
            gallery: GalleryStore::new(),
            matcher: EuclideanMatcher::new(config.match_threshold),
            extractor,
        }
    }

    /// An explicitly empty session with no storage, for when [`open`](Self::open) fails.
    ///
    /// Matching works (and never identifies anyone); nothing is persisted.
    pub fn detached(extractor: E, config: SessionConfig) -> Self {
        tracing::warn!("recognition session running without storage; gallery is empty");
        Self {
            scope: Scope::Global,
            paths: None,
            gallery: GalleryStore::new(),
            matcher: EuclideanMatcher::new(config.match_threshold),
            extractor,
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn paths(&self) -> Option<&ScopePaths> {
        self.paths.as_ref()
    }

    pub fn gallery(&self) -> &GalleryStore {
        &self.gallery
    }

    /// Load the gallery from cache, building it from images if needed.
    pub fn initialize(&mut self) -> usize {
        let count = self.rebuild(false);
        if count == 0 {
            tracing::warn!(scope = %self.scope, "gallery is empty");
        } else {
            tracing::info!(scope = %self.scope, faces = count, "gallery ready");
        }
        count
    }

    pub fn rebuild(&mut self, force: bool) -> usize {
        let Some(paths) = &self.paths else {
            self.gallery.clear();
            return 0;
        };
        enrollment::rebuild(
            &mut self.gallery,
            &mut self.extractor,
            &paths.people_dir,
            &paths.cache_path,
            force,
        )
    }

    /// Empty the in-memory gallery. The cache file is kept.
    pub fn clear(&mut self) {
        self.gallery.clear();
    }

    /// Delete the cache file so the next startup rebuilds from images.
    ///
    /// Returns false if there was no cache file or it could not be deleted.
    pub fn clear_cache(&mut self) -> bool {
        let Some(paths) = &self.paths else {
            return false;
        };
        match gallery::remove_cache(&paths.cache_path) {
            Ok(removed) => {
                if !removed {
                    tracing::info!(path = %paths.cache_path.display(), "no cache file to delete");
                }
                removed
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to delete cache");
                false
            }
        }
    }

    pub fn stats(&self) -> GalleryStats {
        self.gallery.stats()
    }

    pub fn label_counts(&self) -> BTreeMap<String, usize> {
        self.gallery.label_counts()
    }

    pub fn best_match(&self, query: &Embedding) -> Option<MatchResult> {
        self.matcher.best_match(query, self.gallery.entries())
    }

    pub fn top_n_matches(&self, query: &Embedding, n: usize) -> Vec<MatchResult> {
        self.matcher.top_n(query, self.gallery.entries(), n)
    }

    /// Identify the first detected face only.
    ///
    /// `Ok(None)` means no face was found. Additional faces are ignored; use
    /// [`match_all_faces`](Self::match_all_faces) to label every face.
    pub fn recognize(&mut self, image: &PixelBuffer) -> Result<Option<FaceMatch>, SessionError> {
        Ok(self.recognize_detailed(image, 0)?.map(|r| r.face))
    }

    /// The `n` nearest gallery entries for the first detected face, regardless of threshold.
    pub fn detailed_matches(
        &mut self,
        image: &PixelBuffer,
        n: usize,
    ) -> Result<Vec<MatchResult>, SessionError> {
        Ok(self
            .recognize_detailed(image, n)?
            .map(|r| r.candidates)
            .unwrap_or_default())
    }

    /// [`recognize`](Self::recognize) and [`detailed_matches`](Self::detailed_matches)
    /// from a single detection and encoding pass.
    pub fn recognize_detailed(
        &mut self,
        image: &PixelBuffer,
        n: usize,
    ) -> Result<Option<Recognition>, SessionError> {
        if self.gallery.is_empty() {
            tracing::warn!(scope = %self.scope, "gallery is empty; every face will be unknown");
        }
        let Some((bbox, embedding)) = self.first_face(image)? else {
            tracing::info!("no face found in image");
            return Ok(None);
        };

        let face = FaceMatch::from_result(bbox, self.best_match(&embedding));
        tracing::info!(identity = %face.identity, distance = ?face.distance, "face recognized");
        Ok(Some(Recognition {
            face,
            candidates: self.top_n_matches(&embedding, n),
        }))
    }

    /// Run [`recognize_detailed`](Self::recognize_detailed) over each image in turn.
    ///
    /// One result per image, in input order. A failure on one image does not
    /// stop the rest.
    pub fn recognize_batch(
        &mut self,
        images: &[PixelBuffer],
        n: usize,
    ) -> Vec<Result<Option<Recognition>, SessionError>> {
        tracing::info!(images = images.len(), "batch recognition");
        images
            .iter()
            .enumerate()
            .map(|(i, image)| {
                tracing::debug!(image = i + 1, total = images.len(), "processing");
                let result = self.recognize_detailed(image, n);
                if let Err(e) = &result {
                    tracing::warn!(image = i + 1, error = %e, "recognition failed");
                }
                result
            })
            .collect()
    }

    /// Identify every face in the image, in detection order.
    ///
    /// Each detected face yields exactly one entry; faces with no confident
    /// match are [`Identity::Unidentified`].
    pub fn match_all_faces(&mut self, image: &PixelBuffer) -> Result<Vec<FaceMatch>, SessionError> {
        let faces = self.extractor.extract(image)?;
        tracing::info!(faces = faces.len(), "faces detected");

        Ok(faces
            .into_iter()
            .map(|(bbox, embedding)| {
                let face = FaceMatch::from_result(bbox, self.best_match(&embedding));
                tracing::debug!(?bbox, identity = %face.identity, "face matched");
                face
            })
            .collect())
    }

    /// Enroll faces a human has confirmed.
    ///
    /// Unidentified faces are never enrolled. Labels are normalized the way a
    /// rebuild would read them back from the folder name. For each identified
    /// face the embedding is extracted, a crop is stored in the label's folder, the
    /// entry is appended and the cache is saved right away. Failures skip
    /// only the face they occur on.
    ///
    /// Returns how many faces were enrolled. Zero means the confirmation failed.
    pub fn confirm_and_enroll(
        &mut self,
        image: &PixelBuffer,
        faces: &[(Identity, BoundingBox)],
    ) -> usize {
        let Some(paths) = self.paths.clone() else {
            tracing::warn!("cannot enroll without storage");
            return 0;
        };

        let mut enrolled = 0;
        for (identity, bbox) in faces {
            let Identity::Identified(requested) = identity else {
                continue;
            };
            let label = normalize_label(requested);
            if label.is_empty() {
                tracing::warn!(label = %requested, "label has no usable name, face not enrolled");
                continue;
            }
            let label = label.as_str();
            match self.enroll_one(&paths, image, label, bbox) {
                Ok(stored) => {
                    enrolled += 1;
                    if !self.gallery.save(&paths.cache_path) {
                        tracing::warn!(label, "face enrolled but cache not updated");
                    }
                    tracing::info!(label, path = %stored.display(), "confirmed face enrolled");
                }
                Err(reason) => tracing::warn!(label, %reason, "face not enrolled"),
            }
        }

        if enrolled == 0 {
            tracing::warn!(requested = faces.len(), "confirmation enrolled no faces");
        }
        enrolled
    }

    fn enroll_one(
        &mut self,
        paths: &ScopePaths,
        image: &PixelBuffer,
        label: &str,
        bbox: &BoundingBox,
    ) -> Result<PathBuf, String> {
        let embedding = self
            .extractor
            .encode(image, std::slice::from_ref(bbox))
            .map_err(|e| e.to_string())?
            .into_iter()
            .next()
            .ok_or_else(|| "no embedding for face region".to_string())?;

        if let Some(expected) = self.gallery.dimension() {
            if embedding.dim() != expected {
                let got = embedding.dim();
                return Err(format!("embedding has {got} dims, gallery has {expected}"));
            }
        }

        let folder = label_folder(&paths.people_dir, label)
            .ok_or_else(|| format!("label {label:?} has no usable folder name"))?;
        let stored = store_crop(&folder, image, bbox)?;

        self.gallery
            .push(GalleryEntry::new(embedding, label))
            .map_err(|e| e.to_string())?;
        Ok(stored)
    }

    fn first_face(
        &mut self,
        image: &PixelBuffer,
    ) -> Result<Option<(BoundingBox, Embedding)>, SessionError> {
        let boxes = self.extractor.detect_faces(image)?;
        let Some(first) = boxes.first().copied() else {
            return Ok(None);
        };
        if boxes.len() > 1 {
            tracing::warn!(faces = boxes.len(), "multiple faces found, using the first");
        }

        let embeddings = self.extractor.encode(image, &[first])?;
        match embeddings.into_iter().next() {
            Some(embedding) => Ok(Some((first, embedding))),
            None => Err(ExtractError::CountMismatch { boxes: 1, embeddings: 0 }.into()),
        }
    }
}

/// Resolve `scope` and create its directories.
fn prepare_storage(layout: &StorageLayout, scope: &Scope) -> Result<ScopePaths, SessionError> {
    let paths = layout.paths(scope);
    paths.ensure().map_err(|source| SessionError::Storage {
        scope: scope.to_string(),
        path: paths.people_dir.clone(),
        source,
    })?;
    Ok(paths)
}

/// Folder that holds images for `label`: an existing folder whose name maps
/// to the same label, or a new one derived from it.
fn label_folder(people_dir: &Path, label: &str) -> Option<PathBuf> {
    let existing = person_folders(people_dir).into_iter().find(|folder| {
        folder
            .file_name()
            .map(|n| sanitize_label(&n.to_string_lossy()) == label)
            .unwrap_or(false)
    });
    if existing.is_some() {
        return existing;
    }

    let name = label_folder_name(label);
    if name.is_empty() {
        return None;
    }
    Some(people_dir.join(name))
}

/// Write a padded crop of `bbox` as PNG into `folder`.
fn store_crop(folder: &Path, image: &PixelBuffer, bbox: &BoundingBox) -> Result<PathBuf, String> {
    let (x, y, w, h) = crop_region(bbox, image.width(), image.height())
        .ok_or_else(|| "face region lies outside the image".to_string())?;
    let crop = image::imageops::crop_imm(image, x, y, w, h).to_image();

    let mut png = Vec::new();
    crop.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| format!("encoding crop: {e}"))?;

    let file_name = format!(
        "confirmed_{}_{}.png",
        chrono::Utc::now().format("%Y%m%dT%H%M%S"),
        &uuid::Uuid::new_v4().simple().to_string()[..8]
    );
    let path = folder.join(file_name);
    write_atomic(&path, &png).map_err(|e| format!("writing {}: {e}", path.display()))?;
    Ok(path)
}

/// Pixel rectangle `(x, y, width, height)` around `bbox`, padded and clamped to the image.
fn crop_region(bbox: &BoundingBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let pad_x = bbox.width * CROP_MARGIN;
    let pad_y = bbox.height * CROP_MARGIN;
    let x0 = (bbox.x - pad_x).floor().clamp(0.0, width as f32) as u32;
    let y0 = (bbox.y - pad_y).floor().clamp(0.0, height as f32) as u32;
    let x1 = (bbox.x + bbox.width + pad_x).ceil().clamp(0.0, width as f32) as u32;
    let y1 = (bbox.y + bbox.height + pad_y).ceil().clamp(0.0, height as f32) as u32;

    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0, y0, x1 - x0, y1 - y0))
}
