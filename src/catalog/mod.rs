//! Catalog data model.
//!
//! A tenant is one university's isolated course catalog. The engine holds a
//! tenant's catalog as a [`CacheSnapshot`]: an immutable, timestamped full
//! copy of every [`CourseRecord`]. Snapshots are replaced wholesale on
//! refresh; records are never merged field-by-field.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Credit value for a course: either a single value or a tenant-specific
/// min/max pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Credits {
    Single(f64),
    Range { min: f64, max: f64 },
}

/// One row per course offering, keyed by `class_code` within a tenant.
///
/// `embedding` tolerates backends that store vectors as JSON-encoded strings;
/// malformed vectors decode to `None` and the record simply becomes
/// ineligible for semantic search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseRecord {
    pub class_code: String,
    pub course_name: String,
    #[serde(default)]
    pub course_desc: String,
    #[serde(default)]
    pub credits: Option<Credits>,
    #[serde(default)]
    pub requisites: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_embedding",
        skip_serializing_if = "Option::is_none"
    )]
    pub embedding: Option<Vec<f32>>,
    /// Tenant-specific attribute fields, schema driven.
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub grade_count: u64,
    #[serde(default)]
    pub gpa: Option<f64>,
    #[serde(default)]
    pub indexed_difficulty: Option<f64>,
    #[serde(default)]
    pub indexed_fun: Option<f64>,
    #[serde(default)]
    pub indexed_workload: Option<f64>,
    #[serde(default)]
    pub review_count: u64,
    #[serde(default)]
    pub overall_rating: Option<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEmbedding {
    Vector(Vec<f32>),
    Encoded(String),
}

fn deserialize_embedding<'de, D>(deserializer: D) -> Result<Option<Vec<f32>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawEmbedding>::deserialize(deserializer)?;
    Ok(match raw {
        None => None,
        Some(RawEmbedding::Vector(v)) => Some(v),
        // Malformed string-encoded vectors are dropped, not errors: the
        // record just loses semantic-search eligibility.
        Some(RawEmbedding::Encoded(s)) => serde_json::from_str(&s).ok(),
    })
}

/// A tenant-scoped, timestamped full copy of the catalog.
///
/// Owned by the cache store; the refresh coordinator is the only writer.
/// Everything else receives read-only views.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot {
    pub tenant: String,
    pub records: Vec<CourseRecord>,
    pub total_classes: usize,
    pub last_updated: DateTime<Utc>,
}

impl CacheSnapshot {
    #[must_use]
    pub fn new(tenant: impl Into<String>, records: Vec<CourseRecord>, last_updated: DateTime<Utc>) -> Self {
        let total_classes = records.len();
        Self {
            tenant: tenant.into(),
            records,
            total_classes,
            last_updated,
        }
    }

    /// Age of the snapshot relative to `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_updated
    }
}

/// User-selected qualitative preference mapped to normalized course metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceFilter {
    Easy,
    LightWorkload,
    Fun,
    HighGpa,
}

impl ExperienceFilter {
    pub const ALL: [Self; 4] = [Self::Easy, Self::LightWorkload, Self::Fun, Self::HighGpa];
}

/// Ephemeral per-search input. Constructed per user interaction; never
/// persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchQuerySpec {
    /// Free-text query. Authoritative for candidate selection when it has at
    /// least two characters.
    #[serde(default)]
    pub query: String,
    /// Free-form semantic topics, matched through the vector index.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Tenant-defined attribute filters (key -> value).
    #[serde(default)]
    pub filters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub experience_filters: Vec<ExperienceFilter>,
    /// Sort strictly by GPA descending instead of the fused score.
    #[serde(default)]
    pub gpa_sort: bool,
    /// 1-based page number.
    #[serde(default)]
    pub page: usize,
    /// Page size; 0 falls back to the configured default.
    #[serde(default)]
    pub limit: usize,
}

impl SearchQuerySpec {
    /// Apply product rules that reconcile mutually exclusive UI states.
    ///
    /// Activating GPA sort is a reset of experience-filter state, not an
    /// additive modifier: any active experience filters are cleared.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        let mut spec = self.clone();
        if spec.gpa_sort {
            spec.experience_filters.clear();
        }
        spec
    }
}

/// One scored search result.
#[derive(Debug, Clone, Serialize)]
pub struct RankedCourse {
    pub course: CourseRecord,
    /// Fused ranking score (see the search module's weight table).
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f64>,
}

/// Paginated search output. `total` and `total_pages` reflect the
/// post-filter, pre-pagination candidate count.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub items: Vec<RankedCourse>,
    pub total: usize,
    pub page: usize,
    pub total_pages: usize,
}

impl SearchResponse {
    #[must_use]
    pub fn empty(page: usize) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            page,
            total_pages: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course_json(embedding: serde_json::Value) -> String {
        serde_json::json!({
            "class_code": "CS 101",
            "course_name": "Intro to Programming",
            "course_desc": "Variables, loops, functions",
            "credits": 3.0,
            "embedding": embedding,
            "grade_count": 120,
            "gpa": 3.4
        })
        .to_string()
    }

    #[test]
    fn test_embedding_as_array() {
        let record: CourseRecord =
            serde_json::from_str(&course_json(serde_json::json!([0.1, 0.2, 0.3]))).unwrap();
        assert_eq!(record.embedding, Some(vec![0.1, 0.2, 0.3]));
    }

    #[test]
    fn test_embedding_as_encoded_string() {
        let record: CourseRecord =
            serde_json::from_str(&course_json(serde_json::json!("[0.5, 0.25]"))).unwrap();
        assert_eq!(record.embedding, Some(vec![0.5, 0.25]));
    }

    #[test]
    fn test_malformed_embedding_string_becomes_none() {
        let record: CourseRecord =
            serde_json::from_str(&course_json(serde_json::json!("not a vector"))).unwrap();
        assert!(record.embedding.is_none());
    }

    #[test]
    fn test_missing_embedding_is_none() {
        let raw = serde_json::json!({
            "class_code": "MATH 222",
            "course_name": "Calculus II"
        });
        let record: CourseRecord = serde_json::from_value(raw).unwrap();
        assert!(record.embedding.is_none());
        assert_eq!(record.grade_count, 0);
    }

    #[test]
    fn test_credits_single_and_range() {
        let single: Credits = serde_json::from_value(serde_json::json!(4.0)).unwrap();
        assert_eq!(single, Credits::Single(4.0));

        let range: Credits =
            serde_json::from_value(serde_json::json!({"min": 1.0, "max": 3.0})).unwrap();
        assert_eq!(range, Credits::Range { min: 1.0, max: 3.0 });
    }

    #[test]
    fn test_snapshot_total_and_age() {
        let t0 = Utc::now();
        let snapshot = CacheSnapshot::new("uw", vec![], t0);
        assert_eq!(snapshot.total_classes, 0);
        let age = snapshot.age(t0 + chrono::Duration::minutes(10));
        assert_eq!(age, chrono::Duration::minutes(10));
    }

    #[test]
    fn test_gpa_sort_clears_experience_filters() {
        let spec = SearchQuerySpec {
            gpa_sort: true,
            experience_filters: vec![ExperienceFilter::Easy, ExperienceFilter::HighGpa],
            ..Default::default()
        };
        let sanitized = spec.sanitized();
        assert!(sanitized.experience_filters.is_empty());
        assert!(sanitized.gpa_sort);
    }

    #[test]
    fn test_sanitize_preserves_experience_without_gpa_sort() {
        let spec = SearchQuerySpec {
            experience_filters: vec![ExperienceFilter::Fun],
            ..Default::default()
        };
        assert_eq!(spec.sanitized().experience_filters, vec![ExperienceFilter::Fun]);
    }
}
