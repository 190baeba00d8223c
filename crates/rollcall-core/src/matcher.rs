//! Nearest-neighbour face matching by Euclidean distance.

use crate::types::{Embedding, Identity, IdentityRecord, MatchError, DEFAULT_EMBEDDING_DIM};
use serde::Serialize;
use std::fmt;

/// Decision for one query embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchResult {
    Matched {
        identity: Identity,
        /// Euclidean distance to the closest catalog entry.
        distance: f64,
        /// Presentation value in [0, 100], derived from distance and threshold.
        confidence: f64,
    },
    Unmatched,
}

impl MatchResult {
    pub fn is_matched(&self) -> bool {
        matches!(self, MatchResult::Matched { .. })
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            MatchResult::Matched { identity, .. } => Some(identity),
            MatchResult::Unmatched => None,
        }
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchResult::Matched {
                identity,
                distance,
                confidence,
            } => write!(
                f,
                "matched {} ({}) distance {distance:.4} confidence {confidence:.1}%",
                identity.name, identity.id
            ),
            MatchResult::Unmatched => f.write_str("unrecognized"),
        }
    }
}

/// Why a catalog entry was left out of the comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The stored descriptor has the wrong length.
    Length(MatchError),
    /// The descriptor holds NaN or infinite values, so no distance can be ranked.
    NonFiniteDistance,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Length(err) => err.fmt(f),
            SkipReason::NonFiniteDistance => f.write_str("distance is not a finite number"),
        }
    }
}

impl Serialize for SkipReason {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

/// A catalog entry left out of the comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedEntry {
    /// Position in the catalog snapshot.
    pub index: usize,
    pub identity_id: String,
    pub reason: SkipReason,
}

/// Match decision plus the catalog entries that could not be compared.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchReport {
    pub result: MatchResult,
    pub skipped: Vec<SkippedEntry>,
}

impl MatchReport {
    fn unmatched(skipped: Vec<SkippedEntry>) -> Self {
        Self {
            result: MatchResult::Unmatched,
            skipped,
        }
    }
}

/// Strategy for comparing a query embedding against a catalog of enrolled faces.
pub trait Matcher {
    fn compare(
        &self,
        query: &Embedding,
        catalog: &[IdentityRecord],
        threshold: f64,
    ) -> Result<MatchReport, MatchError>;
}

/// Exact nearest-neighbour matcher over a linear scan of the catalog.
///
/// A query of the wrong length is an error. Catalog entries of the wrong
/// length, or whose distance to the query is not finite, are skipped and
/// listed in the report so that one corrupt record cannot block recognition
/// of everyone else. The matcher itself never logs; the caller decides what
/// to do with skipped entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EuclideanMatcher {
    dimension: usize,
}

impl EuclideanMatcher {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIM)
    }
}

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        query: &Embedding,
        catalog: &[IdentityRecord],
        threshold: f64,
    ) -> Result<MatchReport, MatchError> {
        if catalog.is_empty() {
            return Ok(MatchReport::unmatched(Vec::new()));
        }
        query.check_len(self.dimension)?;

        let mut skipped = Vec::new();
        let mut best: Option<(usize, f64)> = None;

        // Full scan: a closer entry may appear anywhere in the catalog.
        for (i, record) in catalog.iter().enumerate() {
            let reason = match query.distance(&record.embedding) {
                Ok(d) if d.is_finite() => {
                    // Strict comparison keeps the first of equally distant entries.
                    if best.map_or(true, |(_, best_distance)| d < best_distance) {
                        best = Some((i, d));
                    }
                    continue;
                }
                Ok(_) => SkipReason::NonFiniteDistance,
                Err(error) => SkipReason::Length(error),
            };
            skipped.push(SkippedEntry {
                index: i,
                identity_id: record.identity.id.clone(),
                reason,
            });
        }

        match best {
            Some((idx, distance)) if distance <= threshold => Ok(MatchReport {
                result: MatchResult::Matched {
                    identity: catalog[idx].identity.clone(),
                    distance,
                    confidence: confidence(distance, threshold),
                },
                skipped,
            }),
            _ => Ok(MatchReport::unmatched(skipped)),
        }
    }
}

/// Map a distance to a [0, 100] confidence: 100 at distance 0, 0 at the threshold.
pub fn confidence(distance: f64, threshold: f64) -> f64 {
    if threshold <= 0.0 {
        return if distance <= 0.0 { 100.0 } else { 0.0 };
    }
    ((1.0 - distance / threshold) * 100.0).clamp(0.0, 100.0)
}
