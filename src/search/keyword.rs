//! Keyword scorer for free-text queries.
//!
//! When the user typed a query of at least two characters, keyword matching
//! alone determines the candidate set. Scores are normalized to [0, 1] so
//! they can be fused directly with the other ranking signals.

use crate::catalog::CourseRecord;

/// Score ceiling for exact class-code matches.
const EXACT_CODE: f64 = 1.0;
/// Class code starts with the query (e.g. "cs 1" against "CS 101").
const CODE_PREFIX: f64 = 0.9;
/// Course name contains the full query phrase.
const NAME_PHRASE: f64 = 0.8;

/// One keyword match.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    /// Index into the snapshot's record array.
    pub record_index: usize,
    pub score: f64,
}

/// Score every course against the query, returning only matches (score > 0)
/// in catalog order.
#[must_use]
pub fn search(records: &[CourseRecord], query: &str) -> Vec<KeywordHit> {
    let normalized = normalize(query);
    if normalized.is_empty() {
        return Vec::new();
    }
    let tokens = tokenize(&normalized);

    records
        .iter()
        .enumerate()
        .filter_map(|(record_index, record)| {
            let score = score_record(record, &normalized, &tokens);
            (score > 0.0).then_some(KeywordHit {
                record_index,
                score,
            })
        })
        .collect()
}

fn score_record(record: &CourseRecord, query: &str, tokens: &[String]) -> f64 {
    let code = normalize(&record.class_code);
    let name = normalize(&record.course_name);
    let desc = normalize(&record.course_desc);

    if code == query || code.replace(' ', "") == query.replace(' ', "") {
        return EXACT_CODE;
    }
    if code.starts_with(query) {
        return CODE_PREFIX;
    }
    if name.contains(query) {
        return NAME_PHRASE;
    }

    // Token coverage: how much of the query shows up in the code+name versus
    // the description, weighted toward the title fields.
    if tokens.is_empty() {
        return 0.0;
    }
    let title = format!("{code} {name}");
    let title_cov = coverage(&title, tokens);
    let desc_cov = coverage(&desc, tokens);

    0.6 * title_cov + 0.3 * desc_cov
}

fn coverage(haystack: &str, tokens: &[String]) -> f64 {
    if tokens.is_empty() {
        return 0.0;
    }
    let matched = tokens.iter().filter(|t| haystack.contains(t.as_str())).count();
    matched as f64 / tokens.len() as f64
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect()
}
