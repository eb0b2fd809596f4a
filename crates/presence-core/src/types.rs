use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// Wire value reported when a probe matches no enrolled identity.
pub const UNKNOWN_PERSON: &str = "unknown_person";

/// Wire value reported when a probe image contains no detectable face.
pub const NO_PERSONS_FOUND: &str = "no_persons_found";

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    #[serde(default)]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Vectors of different length, or with zero norm, score 0.0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        if self.dim() != other.dim() {
            return 0.0;
        }

        let (dot, norm_a, norm_b) = self
            .values
            .iter()
            .zip(&other.values)
            .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (a, b)| {
                (dot + a * b, na + a * a, nb + b * b)
            });

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    /// Euclidean distance. Vectors of different length are infinitely far apart.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        if self.dim() != other.dim() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Same-person decision rule applied between a stored and a probe embedding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "metric", rename_all = "snake_case")]
pub enum Comparison {
    /// Match when cosine similarity is at least `min_similarity`.
    Cosine { min_similarity: f32 },
    /// Match when Euclidean distance is at most `max_distance`.
    Euclidean { max_distance: f32 },
}

impl Comparison {
    pub const DEFAULT_COSINE: f32 = 0.40;
    pub const DEFAULT_EUCLIDEAN: f32 = 0.60;

    /// Empty vectors and dimension mismatches never match.
    pub fn same_person(&self, known: &Embedding, probe: &Embedding) -> bool {
        if known.is_empty() || known.dim() != probe.dim() {
            return false;
        }
        match *self {
            Comparison::Cosine { min_similarity } => known.similarity(probe) >= min_similarity,
            Comparison::Euclidean { max_distance } => {
                known.euclidean_distance(probe) <= max_distance
            }
        }
    }
}

impl Default for Comparison {
    fn default() -> Self {
        Comparison::Cosine {
            min_similarity: Self::DEFAULT_COSINE,
        }
    }
}

/// One enrolled identity and its stored face embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub identity: Identity,
    pub embedding: Embedding,
    pub enrolled_at: DateTime<Utc>,
}

/// Outcome of matching a probe image against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    Matched(Identity),
    /// A face was found but no enrolled embedding matched it.
    UnknownPerson,
    /// The probe image contained no detectable face.
    NoPersonsFound,
}

impl MatchResult {
    /// The `user` value reported to clients: the identity, or a sentinel.
    pub fn user(&self) -> &str {
        match self {
            MatchResult::Matched(identity) => identity.as_str(),
            MatchResult::UnknownPerson => UNKNOWN_PERSON,
            MatchResult::NoPersonsFound => NO_PERSONS_FOUND,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Matched(_))
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            MatchResult::Matched(identity) => Some(identity),
            _ => None,
        }
    }
}
