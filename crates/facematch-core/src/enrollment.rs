//! Bulk enrollment from a directory of labeled images.
//!
//! Layout: one subdirectory per person under the root, images directly
//! inside. Folder names become labels (`john_doe` → `John Doe`).

use crate::extractor::EmbeddingExtractor;
use crate::gallery::GalleryStore;
use crate::pixels::load_pixels;
use crate::types::GalleryEntry;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Image extensions picked up during enrollment (compared case-insensitively).
pub const SUPPORTED_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "gif"];

/// Folders starting with this marker are never enrolled.
const HIDDEN_MARKER: char = '.';

/// Turn a folder name into a display label: underscores become spaces, words are title-cased.
pub fn sanitize_label(folder_name: &str) -> String {
    let mut out = String::with_capacity(folder_name.len());
    let mut prev_is_letter = false;
    for c in folder_name.chars() {
        let c = if c == '_' { ' ' } else { c };
        if c.is_alphabetic() {
            if prev_is_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_is_letter = true;
        } else {
            out.push(c);
            prev_is_letter = false;
        }
    }
    out
}

/// Folder name used to store new images for `label`.
pub fn label_folder_name(label: &str) -> String {
    label
        .trim()
        .chars()
        .map(|c| match c {
            ' ' => '_',
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect::<String>()
        .trim_start_matches(HIDDEN_MARKER)
        .to_string()
}

/// Display label a caller-supplied name would get after a rebuild from its folder.
///
/// `"carol"`, `"Carol"` and `" carol "` all become `"Carol"`.
pub fn normalize_label(label: &str) -> String {
    sanitize_label(&label_folder_name(label))
}

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|s| s.eq_ignore_ascii_case(e))
        })
        .unwrap_or(false)
}

/// Immediate, non-hidden subdirectories of `root`, sorted by name.
///
/// A missing root yields no folders.
pub fn person_folders(root: &Path) -> Vec<PathBuf> {
    if !root.is_dir() {
        return Vec::new();
    }
    WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(readable)
        .filter(|entry| entry.file_type().is_dir())
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with(HIDDEN_MARKER))
        .map(|entry| entry.into_path())
        .collect()
}

/// Supported image files directly inside `folder`, sorted by name.
pub fn image_files(folder: &Path) -> Vec<PathBuf> {
    WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(readable)
        .filter(|entry| entry.file_type().is_file() && is_supported_image(entry.path()))
        .map(|entry| entry.into_path())
        .collect()
}

fn readable(entry: walkdir::Result<DirEntry>) -> Option<DirEntry> {
    match entry {
        Ok(entry) => Some(entry),
        Err(e) => {
            tracing::warn!(error = %e, "skipping unreadable entry");
            None
        }
    }
}

/// Fill `store` from the cache, or from the images under `root_dir`.
///
/// Without `force`, a loadable cache short-circuits the whole scan and the
/// extractor is never called. Otherwise the store is cleared and rebuilt;
/// bad images and empty folders are logged and skipped. The result is
/// always saved, even when empty, so "nothing enrolled" is cached too.
///
/// Returns the number of embeddings now in the store.
pub fn rebuild<E: EmbeddingExtractor + ?Sized>(
    store: &mut GalleryStore,
    extractor: &mut E,
    root_dir: &Path,
    cache_path: &Path,
    force: bool,
) -> usize {
    if !force && store.load(cache_path) {
        return store.len();
    }

    store.clear();

    let folders = person_folders(root_dir);
    if folders.is_empty() {
        tracing::warn!(root = %root_dir.display(), "no person folders found");
    } else {
        tracing::info!(persons = folders.len(), root = %root_dir.display(), "building gallery");
    }

    let mut total = 0usize;
    for folder in &folders {
        let folder_name = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let label = sanitize_label(&folder_name);

        let images = image_files(folder);
        if images.is_empty() {
            tracing::warn!(folder = %folder_name, "no images in folder");
            continue;
        }

        for image in &images {
            total += enroll_image(store, extractor, image, &label);
        }
    }

    let stats = store.stats();
    tracing::info!(
        faces = total,
        persons = stats.unique_labels,
        "gallery built"
    );

    store.save(cache_path);
    total
}

/// Add every face found in one image under `label`. Failures count as zero.
fn enroll_image<E: EmbeddingExtractor + ?Sized>(
    store: &mut GalleryStore,
    extractor: &mut E,
    path: &Path,
    label: &str,
) -> usize {
    let pixels = match load_pixels(path) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping unreadable image");
            return 0;
        }
    };

    let faces = match extractor.extract(&pixels) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping image, extraction failed");
            return 0;
        }
    };

    if faces.is_empty() {
        tracing::debug!(path = %path.display(), "no face found");
        return 0;
    }

    let mut added = 0;
    for (_, embedding) in faces {
        match store.push(GalleryEntry::new(embedding, label)) {
            Ok(()) => added += 1,
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "embedding rejected"),
        }
    }
    tracing::debug!(path = %path.display(), label, faces = added, "processed image");
    added
}
