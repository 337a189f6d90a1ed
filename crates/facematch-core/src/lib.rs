//! facematch-core — Face-embedding gallery and matching engine.
//!
//! Holds enrolled embeddings per user scope, caches them on disk, builds
//! them from labeled image folders, and identifies new faces by exact
//! Euclidean nearest-neighbour search. Face detection and embedding are
//! delegated to an [`EmbeddingExtractor`].

mod atomic;
pub mod enrollment;
pub mod extractor;
pub mod gallery;
pub mod matcher;
pub mod pixels;
pub mod scope;
pub mod session;
pub mod types;

#[cfg(test)]
mod testing;

pub use extractor::{EmbeddingExtractor, ExtractError};
pub use gallery::{GalleryError, GalleryStore};
pub use matcher::{EuclideanMatcher, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use pixels::{load_pixels, ImageError, ImageSource, PixelBuffer};
pub use scope::{Scope, ScopeError, ScopePaths, StorageLayout};
pub use session::{RecognitionSession, SessionConfig, SessionError};
pub use types::{
    BoundingBox, Embedding, FaceMatch, GalleryEntry, GalleryStats, Identity, MatchResult,
    Recognition,
};
