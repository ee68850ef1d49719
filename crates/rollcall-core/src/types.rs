use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default acceptance threshold for [`EuclideanMatcher`].
///
/// Euclidean distance between two L2-normalized ArcFace embeddings. For unit
/// vectors `d = sqrt(2 - 2 * cos)`, so 1.10 corresponds to a cosine
/// similarity of roughly 0.395.
pub const DEFAULT_MATCH_TOLERANCE: f32 = 1.10;

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
    pub model_version: Option<String>,
}

impl Embedding {
    /// Wrap raw values with no model version attached.
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Both embeddings must come from the same model and have equal length.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        debug_assert_eq!(
            self.values.len(),
            other.values.len(),
            "embedding dimensions differ"
        );
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A reference face loaded from the known-faces directory.
#[derive(Debug, Clone)]
pub struct KnownIdentity {
    /// File stem of the reference image.
    pub name: String,
    pub embedding: Embedding,
    /// Reference image this identity was derived from.
    pub source: PathBuf,
}

/// In-memory set of known identities, in directory listing order.
///
/// Duplicate names are kept as separate entries.
#[derive(Debug, Clone, Default)]
pub struct IdentityStore {
    identities: Vec<KnownIdentity>,
}

impl IdentityStore {
    pub fn new(identities: Vec<KnownIdentity>) -> Self {
        Self { identities }
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, KnownIdentity> {
        self.identities.iter()
    }

    pub fn as_slice(&self) -> &[KnownIdentity] {
        &self.identities
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.identities.iter().map(|i| i.name.as_str())
    }

    pub(crate) fn push(&mut self, identity: KnownIdentity) {
        self.identities.push(identity);
    }
}

impl<'a> IntoIterator for &'a IdentityStore {
    type Item = &'a KnownIdentity;
    type IntoIter = std::slice::Iter<'a, KnownIdentity>;

    fn into_iter(self) -> Self::IntoIter {
        self.identities.iter()
    }
}

/// Result of matching a probe embedding against the identity store.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the nearest known identity, `f32::INFINITY` for an empty store.
    pub distance: f32,
    /// Index of the matched identity in the store (if any).
    pub index: Option<usize>,
    /// Name of the matched identity (if any).
    pub name: Option<String>,
}

/// Strategy for comparing a probe embedding against the known identities.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, known: &[KnownIdentity], tolerance: f32) -> MatchResult;
}

/// Nearest-neighbour matcher over Euclidean distance.
///
/// A probe matches when the nearest distance is `<= tolerance`. Equal
/// distances resolve to the earlier identity.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, known: &[KnownIdentity], tolerance: f32) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, identity) in known.iter().enumerate() {
            let dist = probe.euclidean_distance(&identity.embedding);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist <= tolerance => MatchResult {
                matched: true,
                distance: best_dist,
                index: Some(idx),
                name: Some(known[idx].name.clone()),
            },
            _ => MatchResult {
                matched: false,
                distance: best_dist,
                index: None,
                name: None,
            },
        }
    }
}
