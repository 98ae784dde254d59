//! Candidate selection shared by the bundled search providers.
//!
//! Providers score every vector in a namespace and hand the raw
//! candidates to [`select`], which applies the request's exclusion set,
//! threshold, and cap, and optionally reranks.
//!
//! # Rerank
//!
//! 1. Widen the pool to [`rerank_pool_size`] candidates by similarity.
//! 2. Min-max normalize similarity scores to `[0, 1]`.
//! 3. Score lexical overlap: fraction of distinct query terms in the text.
//! 4. Blend: `score = (1 - α) × similarity + α × lexical`.
//! 5. Stable sort by blended score, truncate to `top_n`.
//!
//! The original similarity is kept in passage metadata as `similarity`.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde_json::Value;

use crate::embedding::terms;
use crate::models::{SearchResult, SourcePassage};
use crate::provider::SearchRequest;

/// Weight of the lexical signal in the rerank blend.
pub const RERANK_ALPHA: f64 = 0.5;

/// A scored vector hit before selection.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Passage with `score` set to the raw similarity.
    pub passage: SourcePassage,
    /// Text handed to the model as context.
    pub context_text: String,
}

/// How many similarity candidates a rerank pass looks at.
///
/// A tenth of the namespace, kept within `[10, 50]`, and never fewer
/// than `top_n`.
pub fn rerank_pool_size(top_n: usize, namespace_count: usize) -> usize {
    let tenth = (namespace_count as f64 * 0.1).ceil() as usize;
    tenth.clamp(10, 50).max(top_n)
}

/// Min-max normalize scores to `[0, 1]`. Equal scores all map to `1.0`.
pub fn normalize_scores(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }

    let s_min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let s_max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    scores
        .iter()
        .map(|s| {
            if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (s - s_min) / (s_max - s_min)
            }
        })
        .collect()
}

/// Fraction of the distinct query terms that occur in `text`.
pub fn lexical_overlap(query_terms: &HashSet<String>, text: &str) -> f64 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let text_terms: HashSet<String> = terms(text).into_iter().collect();
    let hits = query_terms.intersection(&text_terms).count();
    hits as f64 / query_terms.len() as f64
}

fn by_score_desc(a: &Candidate, b: &Candidate) -> Ordering {
    let sa = a.passage.score.unwrap_or(0.0);
    let sb = b.passage.score.unwrap_or(0.0);
    sb.partial_cmp(&sa).unwrap_or(Ordering::Equal)
}

/// Apply exclusion, threshold, optional rerank, and the `top_n` cap.
pub fn select(
    candidates: Vec<Candidate>,
    request: &SearchRequest<'_>,
    namespace_count: usize,
) -> SearchResult {
    let mut kept: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| !request.filter_identifiers.contains(&c.passage.identifier))
        .filter(|c| c.passage.score.unwrap_or(0.0) >= request.similarity_threshold)
        .collect();

    kept.sort_by(by_score_desc);

    if request.rerank {
        kept.truncate(rerank_pool_size(request.top_n, namespace_count));
        kept = rerank(request.input, kept);
    }

    kept.truncate(request.top_n);

    let mut sources = Vec::with_capacity(kept.len());
    let mut context_texts = Vec::with_capacity(kept.len());
    for c in kept {
        sources.push(c.passage);
        context_texts.push(c.context_text);
    }

    SearchResult::Found {
        sources,
        context_texts,
    }
}

fn rerank(query: &str, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    let query_terms: HashSet<String> = terms(query).into_iter().collect();
    let similarities: Vec<f64> = candidates
        .iter()
        .map(|c| c.passage.score.unwrap_or(0.0))
        .collect();
    let normalized = normalize_scores(&similarities);

    for ((c, raw), norm) in candidates.iter_mut().zip(&similarities).zip(normalized) {
        let lexical = lexical_overlap(&query_terms, &c.context_text);
        let blended = (1.0 - RERANK_ALPHA) * norm + RERANK_ALPHA * lexical;
        c.passage
            .metadata
            .insert("similarity".to_string(), Value::from(*raw));
        c.passage.score = Some(blended.clamp(0.0, 1.0));
    }

    candidates.sort_by(by_score_desc);
    candidates
}
