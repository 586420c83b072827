//! Hybrid search: keyword, semantic topics, hard filters, and score fusion.
//!
//! Candidate selection follows a strict priority order. A free-text query of
//! at least two characters is authoritative and alone selects candidates.
//! Otherwise topics select semantically through the vector index. Experience
//! filters apply as hard predicates only in the non-free-text paths, and
//! tenant attribute filters always apply last. Pagination metadata reflects
//! the post-filter, pre-pagination count.

pub mod embeddings;
pub mod filters;
pub mod keyword;
pub mod ranking;
pub mod vector;

use std::collections::HashMap;

use itertools::Itertools;

use crate::catalog::{CacheSnapshot, RankedCourse, SearchQuerySpec, SearchResponse};
use crate::config::SearchConfig;
use crate::error::Result;
pub use embeddings::{Embedder, HashEmbedder, TopicEmbeddingCache};
pub use filters::{AttributeFilterSpec, FilterKind, TenantFilterConfig};
use ranking::{ActiveModes, RankInputs};
pub use vector::VectorIndex;

/// Stateless-per-query search pipeline. Holds the embedding collaborator
/// and a small session cache for topic-sentence embeddings.
pub struct SearchEngine<E: Embedder> {
    embedder: E,
    cfg: SearchConfig,
    topic_cache: TopicEmbeddingCache,
}

struct Candidate {
    record_index: usize,
    search_score: Option<f64>,
    vector_score: Option<f64>,
}

impl<E: Embedder> SearchEngine<E> {
    #[must_use]
    pub fn new(embedder: E, cfg: SearchConfig) -> Self {
        Self {
            embedder,
            cfg,
            topic_cache: TopicEmbeddingCache::default(),
        }
    }

    /// Run one search against a snapshot and its index.
    ///
    /// The query spec is sanitized first, so GPA sort arriving together
    /// with experience filters behaves as a filter reset.
    pub async fn search(
        &self,
        snapshot: &CacheSnapshot,
        index: &VectorIndex,
        tenant_filters: &TenantFilterConfig,
        spec: &SearchQuerySpec,
    ) -> Result<SearchResponse> {
        let spec = spec.sanitized();
        let page = spec.page.max(1);
        let limit = if spec.limit == 0 {
            self.cfg.default_limit.max(1)
        } else {
            spec.limit
        };

        let query = spec.query.trim();
        let has_search = query.chars().count() >= self.cfg.min_query_len.max(1);
        let mut has_topics = false;

        let mut candidates: Vec<Candidate> = if has_search {
            keyword::search(&snapshot.records, query)
                .into_iter()
                .map(|hit| Candidate {
                    record_index: hit.record_index,
                    search_score: Some(hit.score),
                    vector_score: None,
                })
                .collect()
        } else if spec.topics.is_empty() {
            (0..snapshot.records.len())
                .map(|record_index| Candidate {
                    record_index,
                    search_score: None,
                    vector_score: None,
                })
                .collect()
        } else {
            has_topics = true;
            self.topic_candidates(snapshot, index, &spec.topics).await?
        };

        // Experience predicates are hard filters only outside the free-text
        // path; free text owns candidate selection entirely.
        let has_experience = !has_search && !spec.experience_filters.is_empty();
        if has_experience {
            candidates.retain(|c| {
                filters::matches_all_experience(
                    &snapshot.records[c.record_index],
                    &spec.experience_filters,
                )
            });
        }

        if !spec.filters.is_empty() {
            candidates.retain(|c| {
                tenant_filters.matches(&snapshot.records[c.record_index], &spec.filters)
            });
        }

        if candidates.is_empty() {
            return Ok(SearchResponse::empty(page));
        }

        let modes = ActiveModes {
            has_search,
            has_topics,
            has_experience,
        };

        let mut ranked: Vec<RankedCourse> = candidates
            .into_iter()
            .map(|c| {
                let record = &snapshot.records[c.record_index];
                let inputs = RankInputs {
                    grade_score: record.grade_count as f64,
                    search_score: c.search_score.unwrap_or(0.0),
                    vector_score: c.vector_score.unwrap_or(0.0),
                    experience_score: ranking::experience_score(record, &spec.experience_filters),
                };
                RankedCourse {
                    course: record.clone(),
                    score: ranking::fused_score(inputs, modes),
                    search_score: c.search_score,
                    vector_score: c.vector_score,
                }
            })
            .collect();

        if spec.gpa_sort {
            // Explicit GPA sort overrides the fused order entirely; courses
            // without a GPA sink to the bottom.
            ranked.sort_by(|a, b| match (b.course.gpa, a.course.gpa) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
                (Some(_), None) => std::cmp::Ordering::Greater,
                (None, Some(_)) => std::cmp::Ordering::Less,
                (None, None) => std::cmp::Ordering::Equal,
            });
        } else {
            ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        }

        let total = ranked.len();
        let total_pages = total.div_ceil(limit);
        let start = (page - 1) * limit;
        let items = if start >= total {
            Vec::new()
        } else {
            ranked[start..(start + limit).min(total)].to_vec()
        };

        Ok(SearchResponse {
            items,
            total,
            page,
            total_pages,
        })
    }

    /// Embed the synthetic topic sentence and query the index. An embedding
    /// failure or a `None` vector degrades to zero semantic candidates.
    async fn topic_candidates(
        &self,
        snapshot: &CacheSnapshot,
        index: &VectorIndex,
        topics: &[String],
    ) -> Result<Vec<Candidate>> {
        let sentence = format!("Class covers {}", topics.iter().join(", "));

        let vector = match self.topic_cache.get(&sentence) {
            Some(cached) => Some(cached),
            None => {
                let embedded = self.embedder.embed(&sentence).await?;
                if let Some(v) = &embedded {
                    self.topic_cache.put(&sentence, v.clone());
                }
                embedded
            }
        };

        let Some(vector) = vector else {
            tracing::debug!(sentence, "embedding unavailable, topic search yields no candidates");
            return Ok(Vec::new());
        };

        let top_k = if self.cfg.topic_top_k == 0 {
            snapshot.records.len()
        } else {
            self.cfg.topic_top_k
        };
        let hits = index.search(&vector, top_k, self.cfg.min_similarity);

        let positions: HashMap<&str, usize> = snapshot
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.class_code.as_str(), i))
            .collect();

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                positions.get(hit.class_code.as_str()).map(|&record_index| Candidate {
                    record_index,
                    search_score: None,
                    vector_score: Some(f64::from(hit.score)),
                })
            })
            .collect())
    }
}
