//! Hard filters: experience predicates and tenant attribute filters.
//!
//! Experience filters map qualitative preferences to thresholds over the
//! normalized course metrics (difficulty/workload/fun on a 0-5 scale, GPA
//! on 0-4). They apply as boolean predicates only when no free-text query
//! is active; the free-text path owns candidate selection entirely.
//!
//! Attribute filters are capability-style: the tenant's configuration lists
//! (key, predicate kind) pairs and the filter engine iterates that list.
//! No field names are hard-coded, so tenants can extend their schema
//! without client changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::{CourseRecord, ExperienceFilter};

/// Difficulty/workload ceiling for Easy and Light Workload (0-5 scale).
const METRIC_CEILING: f64 = 3.0;
/// Fun floor (0-5 scale).
const FUN_FLOOR: f64 = 3.0;
/// GPA floor for High GPA (0-4 scale).
const GPA_FLOOR: f64 = 3.0;

/// Whether a course satisfies one experience preference.
///
/// Courses missing the underlying metric fail the predicate: a filter is a
/// promise to the user, and an unrated course cannot back it.
#[must_use]
pub fn matches_experience(course: &CourseRecord, filter: ExperienceFilter) -> bool {
    match filter {
        ExperienceFilter::Easy => course
            .indexed_difficulty
            .is_some_and(|d| d <= METRIC_CEILING),
        ExperienceFilter::LightWorkload => course
            .indexed_workload
            .is_some_and(|w| w <= METRIC_CEILING),
        ExperienceFilter::Fun => course.indexed_fun.is_some_and(|f| f >= FUN_FLOOR),
        ExperienceFilter::HighGpa => course.gpa.is_some_and(|g| g >= GPA_FLOOR),
    }
}

/// Whether a course satisfies every active experience preference.
#[must_use]
pub fn matches_all_experience(course: &CourseRecord, filters: &[ExperienceFilter]) -> bool {
    filters.iter().all(|f| matches_experience(course, *f))
}

/// Predicate kind for a tenant-defined attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Scalar equality against the attribute value.
    Equals,
    /// Membership: the query value (or one of a query array) appears in the
    /// attribute, or the attribute appears in a query array.
    OneOf,
    /// Numeric range; the query value is `{"min": .., "max": ..}` with
    /// either bound optional.
    Range,
}

/// One tenant-configured filterable attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeFilterSpec {
    pub key: String,
    pub kind: FilterKind,
}

/// Tenant filter configuration: the list of (key, predicate kind) pairs the
/// filter engine iterates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantFilterConfig {
    #[serde(default)]
    pub attribute_filters: Vec<AttributeFilterSpec>,
}

impl TenantFilterConfig {
    #[must_use]
    pub fn new(attribute_filters: Vec<AttributeFilterSpec>) -> Self {
        Self { attribute_filters }
    }

    /// Whether a course passes every requested attribute filter
    /// (conjunctive). Filter keys with no configured spec are ignored.
    #[must_use]
    pub fn matches(&self, course: &CourseRecord, requested: &BTreeMap<String, Value>) -> bool {
        for (key, wanted) in requested {
            let Some(spec) = self.attribute_filters.iter().find(|s| &s.key == key) else {
                tracing::debug!(key, "ignoring filter with no configured attribute spec");
                continue;
            };
            let actual = course.attributes.get(key);
            if !apply_predicate(spec.kind, actual, wanted) {
                return false;
            }
        }
        true
    }
}

fn apply_predicate(kind: FilterKind, actual: Option<&Value>, wanted: &Value) -> bool {
    let Some(actual) = actual else {
        return false;
    };
    match kind {
        FilterKind::Equals => value_eq(actual, wanted),
        FilterKind::OneOf => one_of(actual, wanted),
        FilterKind::Range => in_range(actual, wanted),
    }
}

/// Scalar equality tolerant of string/number representation differences
/// ("3" vs 3), since query values often arrive as strings.
fn value_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (scalar_text(a), scalar_text(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.to_lowercase()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn one_of(actual: &Value, wanted: &Value) -> bool {
    match (actual, wanted) {
        // Attribute is a list: any requested value present counts.
        (Value::Array(items), Value::Array(targets)) => targets
            .iter()
            .any(|t| items.iter().any(|i| value_eq(i, t))),
        (Value::Array(items), target) => items.iter().any(|i| value_eq(i, target)),
        // Scalar attribute against a requested list.
        (item, Value::Array(targets)) => targets.iter().any(|t| value_eq(item, t)),
        (item, target) => value_eq(item, target),
    }
}

fn in_range(actual: &Value, wanted: &Value) -> bool {
    let Some(value) = as_f64(actual) else {
        return false;
    };
    let min = wanted.get("min").and_then(as_f64);
    let max = wanted.get("max").and_then(as_f64);
    if min.is_none() && max.is_none() {
        return false;
    }
    min.is_none_or(|m| value >= m) && max.is_none_or(|m| value <= m)
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
