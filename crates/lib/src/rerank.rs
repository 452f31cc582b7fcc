//! # Hybrid Re-ranking
//!
//! Combines the vector similarity score of each candidate with a
//! graph-overlap score derived from shared tags between candidates. A post
//! that is semantically close *and* sits in a dense tag neighbourhood of
//! the other candidates ranks above an isolated lookalike.

use crate::providers::graph::GraphStore;
use crate::types::SearchHit;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Weight of the vector score in the blended ranking.
const VECTOR_WEIGHT: f64 = 0.7;
/// Weight of the normalised graph-overlap score.
const GRAPH_WEIGHT: f64 = 0.3;

/// Re-ranks candidates by blending vector scores with graph overlap.
///
/// For each candidate, the overlap score sums the shared-tag counts against
/// the other candidates (looked up through the graph), normalised by the
/// maximum observed. Graph failures fall back to the pure vector order.
pub fn graph_rerank(mut hits: Vec<SearchHit>, graph: &dyn GraphStore) -> Vec<SearchHit> {
    if hits.len() < 2 {
        return hits;
    }

    let candidate_ids: HashSet<i64> = hits.iter().map(|h| h.post_id).collect();
    let mut overlaps: HashMap<i64, usize> = HashMap::new();

    for hit in &hits {
        match graph.posts_sharing_tags(hit.post_id) {
            Ok(neighbours) => {
                let overlap: usize = neighbours
                    .iter()
                    .filter(|(id, _)| candidate_ids.contains(id))
                    .map(|(_, shared)| shared)
                    .sum();
                overlaps.insert(hit.post_id, overlap);
            }
            Err(e) => {
                // Degrade to vector-only ordering.
                debug!(error = %e, "graph unavailable during rerank, keeping vector order");
                return hits;
            }
        }
    }

    let max_overlap = overlaps.values().copied().max().unwrap_or(0);
    if max_overlap == 0 {
        return hits;
    }

    for hit in &mut hits {
        let overlap = overlaps.get(&hit.post_id).copied().unwrap_or(0);
        let graph_score = overlap as f64 / max_overlap as f64;
        hit.score = VECTOR_WEIGHT * hit.score + GRAPH_WEIGHT * graph_score;
    }
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::graph::{GraphStore, SharedTagGraph};
    use crate::providers::graph::types::MemoryTagGraph;
    use chrono::Utc;

    fn hit(post_id: i64, score: f64) -> SearchHit {
        SearchHit {
            post_id,
            channel_id: 100,
            text: format!("post {post_id}"),
            tags: vec![],
            posted_at: Utc::now(),
            score,
        }
    }

    #[test]
    fn well_connected_candidate_overtakes_isolated_one() {
        let graph = SharedTagGraph::new(MemoryTagGraph::new_memory());
        // Posts 1 and 2 share two tags; post 3 is isolated.
        graph
            .merge_post(1, 100, 1, &["ai".into(), "ml".into()])
            .unwrap();
        graph
            .merge_post(1, 100, 2, &["ai".into(), "ml".into()])
            .unwrap();
        graph.merge_post(1, 100, 3, &["спорт".into()]).unwrap();

        // Vector order has the isolated post narrowly ahead.
        let hits = vec![hit(3, 0.80), hit(1, 0.78), hit(2, 0.75)];
        let reranked = graph_rerank(hits, &graph);

        assert_eq!(reranked[0].post_id, 1);
    }

    #[test]
    fn no_overlap_keeps_vector_order() {
        let graph = SharedTagGraph::new(MemoryTagGraph::new_memory());
        graph.merge_post(1, 100, 1, &["a".into()]).unwrap();
        graph.merge_post(1, 100, 2, &["b".into()]).unwrap();

        let hits = vec![hit(1, 0.9), hit(2, 0.8)];
        let reranked = graph_rerank(hits.clone(), &graph);
        assert_eq!(reranked[0].post_id, 1);
        assert_eq!(reranked[0].score, 0.9);
    }

    #[test]
    fn single_candidate_is_untouched() {
        let graph = SharedTagGraph::new(MemoryTagGraph::new_memory());
        let hits = vec![hit(1, 0.5)];
        assert_eq!(graph_rerank(hits, &graph)[0].score, 0.5);
    }
}
