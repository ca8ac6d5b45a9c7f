//! Text similarity search over embeddings.

use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::embeddings::{EmbeddingProvider, SentenceEmbeddingsModelType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityParams {
    pub top_k: usize,
    pub model: SentenceEmbeddingsModelType,
}

impl Default for SimilarityParams {
    fn default() -> Self {
        Self {
            top_k: 5,
            model: SentenceEmbeddingsModelType::default(),
        }
    }
}

/// Cosine similarity of two vectors; 0 for mismatched, empty, or zero vectors.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON { 0.0 } else { dot / denom }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarItem {
    /// Position in the caller's original sequence.
    pub row: usize,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingSummary {
    pub total_records: usize,
    pub embedding_dimensions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimilarityOutcome {
    Matches {
        query: String,
        items: Vec<SimilarItem>,
    },
    Summary(EmbeddingSummary),
}

/// Embed every present text and, given a query, rank them against it.
///
/// Missing or blank texts are skipped. Without a query only the size of the
/// embedding is reported.
#[instrument(skip_all, fields(rows = texts.len(), top_k = top_k))]
pub fn similarity_search<P>(
    provider: &P,
    texts: &[Option<String>],
    query: Option<&str>,
    top_k: usize,
) -> Result<SimilarityOutcome>
where
    P: EmbeddingProvider + ?Sized,
{
    ensure!(top_k > 0, "top_k must be at least 1");

    let (rows, kept): (Vec<usize>, Vec<String>) = texts
        .iter()
        .enumerate()
        .filter_map(|(i, t)| {
            t.as_deref()
                .filter(|t| !t.trim().is_empty())
                .map(|t| (i, t.to_owned()))
        })
        .unzip();
    if kept.is_empty() {
        bail!("no text to embed: every row is missing or blank");
    }

    let embeddings = provider
        .embed(&kept)
        .with_context(|| "similarity_search(): embed texts")?;
    ensure!(
        embeddings.len() == kept.len(),
        "provider returned {} embeddings for {} texts",
        embeddings.len(),
        kept.len()
    );

    let Some(query) = query.filter(|q| !q.trim().is_empty()) else {
        return Ok(SimilarityOutcome::Summary(EmbeddingSummary {
            total_records: kept.len(),
            embedding_dimensions: embeddings.dimensions(),
        }));
    };

    let query_embedding = provider
        .embed(&[query.to_owned()])
        .with_context(|| "similarity_search(): embed query")?;
    let query_vector = query_embedding
        .get(0)
        .context("provider returned no embedding for the query")?;

    let mut scored: Vec<(usize, f32)> = (&embeddings)
        .into_iter()
        .map(|e| cosine_similarity(query_vector, e))
        .enumerate()
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    debug!(best = ?scored.first(), "ranked texts");

    let items = scored
        .into_iter()
        .take(top_k)
        .map(|(i, score)| SimilarItem {
            row: rows[i],
            text: kept[i].clone(),
            score,
        })
        .collect();
    Ok(SimilarityOutcome::Matches {
        query: query.to_owned(),
        items,
    })
}
