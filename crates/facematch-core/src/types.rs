use serde::{Deserialize, Serialize};
use std::fmt;

/// Bounding box for a detected face, in pixel coordinates of the normalized image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point landmarks: left eye, right eye, nose, left mouth, right mouth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// A box without landmarks.
    pub fn new(x: f32, y: f32, width: f32, height: f32, confidence: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
            landmarks: None,
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Face embedding vector (128-dim for dlib-style models, 512-dim for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// False if any component is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Euclidean distance between two embeddings. Lower = more similar.
    ///
    /// Symmetric, and zero iff the vectors are equal. Both sides must have the
    /// same dimension; the gallery enforces this on insert.
    pub fn distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One enrolled face: an embedding and the display name it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub embedding: Embedding,
    pub label: String,
}

impl GalleryEntry {
    pub fn new(embedding: Embedding, label: impl Into<String>) -> Self {
        Self {
            embedding,
            label: label.into(),
        }
    }
}

/// A gallery label together with its distance to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub label: String,
    pub distance: f32,
}

impl MatchResult {
    /// Distance shown as a percentage, `100 - distance * 100`, floored at zero.
    pub fn confidence(&self) -> f32 {
        (100.0 - self.distance * 100.0).max(0.0)
    }
}

/// Outcome of identifying a single face.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "label", rename_all = "snake_case")]
pub enum Identity {
    Identified(String),
    Unidentified,
}

impl Identity {
    pub fn label(&self) -> Option<&str> {
        match self {
            Identity::Identified(label) => Some(label),
            Identity::Unidentified => None,
        }
    }

    pub fn is_identified(&self) -> bool {
        matches!(self, Identity::Identified(_))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Identified(label) => f.write_str(label),
            Identity::Unidentified => f.write_str("Unknown"),
        }
    }
}

/// A detected face and who it was matched to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub identity: Identity,
    pub bbox: BoundingBox,
    /// Distance to the matched entry. Only present when identified.
    pub distance: Option<f32>,
}

impl FaceMatch {
    pub(crate) fn from_result(bbox: BoundingBox, result: Option<MatchResult>) -> Self {
        match result {
            Some(m) => Self {
                identity: Identity::Identified(m.label),
                bbox,
                distance: Some(m.distance),
            },
            None => Self {
                identity: Identity::Unidentified,
                bbox,
                distance: None,
            },
        }
    }
}

/// First-face identification together with its nearest gallery entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    pub face: FaceMatch,
    /// Nearest entries regardless of threshold, closest first.
    pub candidates: Vec<MatchResult>,
}

/// Gallery size summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryStats {
    pub total_entries: usize,
    pub unique_labels: usize,
}
