use std::path::PathBuf;

use serde::Serialize;

use crate::error::MatchError;
use crate::gallery::Gallery;
use crate::Embedding;

/// Similarity of one gallery entry to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored {
    pub index: usize,
    pub score: f32,
}

/// Best gallery match for a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub index: usize,
    pub score: f32,
    pub label: String,
    pub path: PathBuf,
}

impl MatchResult {
    /// Score as a percentage, rounded to two decimals.
    pub fn percentage(&self) -> f32 {
        ((self.score as f64 * 100.0 * 100.0).round() / 100.0) as f32
    }
}

// Accumulated in f64 so tiny or huge f32 components neither vanish nor
// overflow before the division.
fn dot(a: &Embedding, b: &Embedding) -> f64 {
    a.vector
        .iter()
        .zip(b.vector.iter())
        .map(|(&x, &y)| x as f64 * y as f64)
        .sum()
}

fn checked_norm(e: &Embedding, index: Option<usize>) -> Result<f64, MatchError> {
    let norm = dot(e, e).sqrt();
    if norm > 0.0 && norm.is_finite() {
        Ok(norm)
    } else {
        Err(MatchError::DegenerateEmbedding { index })
    }
}

fn score(a: &Embedding, b: &Embedding, na: f64, nb: f64) -> f32 {
    (dot(a, b) / (na * nb)).clamp(-1.0, 1.0) as f32
}

/// Cosine similarity, clamped to [-1, 1] against rounding. No gallery is
/// involved, so errors carry no entry index.
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> Result<f32, MatchError> {
    if a.len() != b.len() {
        return Err(MatchError::DimensionMismatch {
            index: None,
            query: a.len(),
            entry: b.len(),
        });
    }
    let na = checked_norm(a, None)?;
    let nb = checked_norm(b, None)?;
    Ok(score(a, b, na, nb))
}

/// Score every gallery entry against the query, best first. The sort is
/// stable over ascending index, so exact ties go to the lower index.
pub fn rank(query: &Embedding, gallery: &Gallery) -> Result<Vec<Scored>, MatchError> {
    if gallery.is_empty() {
        return Err(MatchError::EmptyGallery);
    }
    let qn = checked_norm(query, None)?;

    let mut scored = gallery
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let e = &entry.embedding;
            if e.len() != query.len() {
                return Err(MatchError::DimensionMismatch {
                    index: Some(index),
                    query: query.len(),
                    entry: e.len(),
                });
            }
            let en = checked_norm(e, Some(index))?;
            Ok(Scored {
                index,
                score: score(query, e, qn, en),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(scored)
}

/// Linear scan for the closest gallery entry.
pub fn best_match(query: &Embedding, gallery: &Gallery) -> Result<MatchResult, MatchError> {
    let top = rank(query, gallery)?
        .into_iter()
        .next()
        .ok_or(MatchError::EmptyGallery)?;

    let entry = gallery.get(top.index).ok_or(MatchError::EmptyGallery)?;
    Ok(MatchResult {
        index: top.index,
        score: top.score,
        label: entry.label(),
        path: entry.path.clone(),
    })
}
