//! Nearest-neighbour identity matching over a labelled descriptor gallery.
//!
//! Distances are plain Euclidean distances with no normalisation. The
//! gallery is validated once when it is built (session scope) so every
//! per-frame query only has to check the query's own length.

use thiserror::Error;

use crate::types::ReferenceIdentity;

/// Label reported when the nearest reference is not below the maximum
/// acceptable distance.
pub const UNKNOWN_LABEL: &str = "unknown";

#[derive(Error, Debug, PartialEq)]
pub enum MatchError {
    #[error("identity gallery is empty")]
    EmptyGallery,
    #[error("descriptor for '{label}' has length {got} (gallery length {expected})")]
    GalleryLengthMismatch {
        label: String,
        expected: usize,
        got: usize,
    },
    #[error("query descriptor has length {got} (gallery length {expected})")]
    QueryLengthMismatch { expected: usize, got: usize },
    #[error("descriptor lengths differ: {0} vs {1}")]
    LengthMismatch(usize, usize),
}

/// Outcome of matching one query descriptor against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Matched label, or [`UNKNOWN_LABEL`].
    pub label: String,
    /// Distance to the nearest reference, reported even on rejection.
    pub distance: f32,
    /// Label of the nearest reference regardless of the acceptance gate.
    pub nearest: Option<String>,
}

impl MatchResult {
    pub fn is_unknown(&self) -> bool {
        self.label == UNKNOWN_LABEL
    }

    /// A match that needs no gallery lookup (enrollment of a known account).
    pub fn certain(label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            nearest: Some(label.clone()),
            label,
            distance: 0.0,
        }
    }
}

impl std::fmt::Display for MatchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:.2})", self.label, self.distance)
    }
}

/// Euclidean distance between two descriptors of equal length.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Result<f32, MatchError> {
    if a.len() != b.len() {
        return Err(MatchError::LengthMismatch(a.len(), b.len()));
    }
    let sum: f32 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum();
    Ok(sum.sqrt())
}

/// Strategy for comparing a query against gallery references.
pub trait Matcher {
    fn compare(
        &self,
        query: &[f32],
        gallery: &[ReferenceIdentity],
        max_distance: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Exhaustive nearest-neighbour matcher using Euclidean distance.
///
/// Ties resolve to the reference that appears first in the gallery.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        query: &[f32],
        gallery: &[ReferenceIdentity],
        max_distance: f32,
    ) -> Result<MatchResult, MatchError> {
        let mut best: Option<(&ReferenceIdentity, f32)> = None;
        for reference in gallery {
            let distance = euclidean_distance(query, &reference.descriptor)?;
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((reference, distance)),
            }
        }

        let (reference, distance) = best.ok_or(MatchError::EmptyGallery)?;
        let label = if distance < max_distance {
            reference.label.clone()
        } else {
            UNKNOWN_LABEL.to_string()
        };

        Ok(MatchResult {
            label,
            distance,
            nearest: Some(reference.label.clone()),
        })
    }
}

/// Session-scoped gallery: validated once, then queried every frame.
#[derive(Debug, Clone)]
pub struct Gallery {
    references: Vec<ReferenceIdentity>,
    dimension: usize,
    max_distance: f32,
}

impl Gallery {
    /// Build a gallery. Every descriptor must share the first one's length.
    pub fn new(references: Vec<ReferenceIdentity>, max_distance: f32) -> Result<Self, MatchError> {
        let dimension = references
            .first()
            .map(|r| r.descriptor.len())
            .ok_or(MatchError::EmptyGallery)?;

        if let Some(bad) = references.iter().find(|r| r.descriptor.len() != dimension) {
            return Err(MatchError::GalleryLengthMismatch {
                label: bad.label.clone(),
                expected: dimension,
                got: bad.descriptor.len(),
            });
        }

        tracing::debug!(
            references = references.len(),
            dimension,
            max_distance,
            "gallery built"
        );

        Ok(Self {
            references,
            dimension,
            max_distance,
        })
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn max_distance(&self) -> f32 {
        self.max_distance
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.references.iter().map(|r| r.label.as_str())
    }

    pub fn find_best_match(&self, query: &[f32]) -> Result<MatchResult, MatchError> {
        if query.len() != self.dimension {
            return Err(MatchError::QueryLengthMismatch {
                expected: self.dimension,
                got: query.len(),
            });
        }
        EuclideanMatcher.compare(query, &self.references, self.max_distance)
    }
}

/// One-shot form of [`Gallery::find_best_match`] for callers without a
/// cached gallery.
pub fn find_best_match(
    query: &[f32],
    gallery: &[ReferenceIdentity],
    max_distance: f32,
) -> Result<MatchResult, MatchError> {
    EuclideanMatcher.compare(query, gallery, max_distance)
}
