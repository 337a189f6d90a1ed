use crate::types::{Embedding, GalleryEntry, MatchResult};

/// Default maximum distance for a positive identification (exclusive).
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Strategy for comparing a query embedding against a gallery of enrolled faces.
pub trait Matcher {
    /// Closest entry, if it is close enough to count as a positive identification.
    fn best_match(&self, query: &Embedding, gallery: &[GalleryEntry]) -> Option<MatchResult>;

    /// The `n` closest entries regardless of threshold, nearest first.
    ///
    /// Entries at a NaN or infinite distance are left out.
    fn top_n(&self, query: &Embedding, gallery: &[GalleryEntry], n: usize) -> Vec<MatchResult>;
}

/// Exact nearest-neighbour matcher over Euclidean distance.
///
/// Always scans every gallery entry; there is no early exit.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    threshold: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl EuclideanMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Index and distance of the nearest entry. Ties resolve to the earliest entry.
    ///
    /// Entries at a NaN or infinite distance are skipped.
    pub fn nearest(&self, query: &Embedding, gallery: &[GalleryEntry]) -> Option<(usize, f32)> {
        if !comparable(query, gallery) {
            return None;
        }

        let mut best: Option<(usize, f32)> = None;
        for (i, entry) in gallery.iter().enumerate() {
            let d = query.distance(&entry.embedding);
            if !d.is_finite() {
                continue;
            }
            // Strict `<` keeps the first of equal distances.
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((i, d));
            }
        }
        best
    }
}

impl Matcher for EuclideanMatcher {
    fn best_match(&self, query: &Embedding, gallery: &[GalleryEntry]) -> Option<MatchResult> {
        let (idx, distance) = self.nearest(query, gallery)?;

        if distance < self.threshold {
            Some(MatchResult {
                label: gallery[idx].label.clone(),
                distance,
            })
        } else {
            tracing::debug!(distance, threshold = self.threshold, "nearest entry above threshold");
            None
        }
    }

    fn top_n(&self, query: &Embedding, gallery: &[GalleryEntry], n: usize) -> Vec<MatchResult> {
        if n == 0 || !comparable(query, gallery) {
            return Vec::new();
        }

        let mut ranked: Vec<MatchResult> = gallery
            .iter()
            .map(|entry| MatchResult {
                label: entry.label.clone(),
                distance: query.distance(&entry.embedding),
            })
            .filter(|m| m.distance.is_finite())
            .collect();
        // Stable sort: equal distances keep gallery order.
        ranked.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        ranked.truncate(n);
        ranked
    }
}

/// False for an empty gallery or a query of the wrong dimension.
fn comparable(query: &Embedding, gallery: &[GalleryEntry]) -> bool {
    let Some(first) = gallery.first() else {
        return false;
    };
    if first.embedding.dim() != query.dim() {
        tracing::warn!(
            query = query.dim(),
            gallery = first.embedding.dim(),
            "query embedding dimension does not match gallery"
        );
        return false;
    }
    true
}
