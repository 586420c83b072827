//! Score fusion for ranked search results.
//!
//! The weight table below is a tuned scoring policy carried over from
//! production behavior. Free-text relevance dominates when present, topic
//! similarity is trusted alone when it is the only signal, and grade count
//! acts as a small popularity prior wherever it is blended.

use crate::catalog::{CourseRecord, ExperienceFilter};

/// Which ranking signals are active for this query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveModes {
    pub has_search: bool,
    pub has_topics: bool,
    pub has_experience: bool,
}

/// Per-candidate signal values feeding the fusion formula.
///
/// `grade_score` is the raw historical grade count, deliberately not
/// normalized: it is a popularity proxy whose small fixed weight keeps it
/// from overriding a strong primary signal. The other scores arrive
/// pre-normalized to [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RankInputs {
    pub grade_score: f64,
    pub search_score: f64,
    pub vector_score: f64,
    pub experience_score: f64,
}

/// Fuse the signals into a single scalar. Pure and deterministic.
#[must_use]
pub fn fused_score(inputs: RankInputs, modes: ActiveModes) -> f64 {
    match (modes.has_search, modes.has_topics, modes.has_experience) {
        (true, _, _) => 0.10 * inputs.grade_score + 0.90 * inputs.search_score,
        (false, true, false) => inputs.vector_score,
        (false, false, true) => 0.50 * inputs.grade_score + 0.50 * inputs.experience_score,
        (false, true, true) => {
            0.10 * inputs.grade_score
                + 0.70 * inputs.vector_score
                + 0.20 * inputs.experience_score
        }
        (false, false, false) => inputs.grade_score,
    }
}

/// Mean of the active normalized experience sub-metrics, each in [0, 1].
///
/// Difficulty and workload are inverted so "lower is better" maps to a
/// higher score. Missing metrics contribute 0 for their filter; with no
/// active filters the score is 0.
#[must_use]
pub fn experience_score(course: &CourseRecord, filters: &[ExperienceFilter]) -> f64 {
    if filters.is_empty() {
        return 0.0;
    }
    let total: f64 = filters
        .iter()
        .map(|filter| match filter {
            ExperienceFilter::Easy => course
                .indexed_difficulty
                .map_or(0.0, |d| 1.0 - (d / 5.0).clamp(0.0, 1.0)),
            ExperienceFilter::LightWorkload => course
                .indexed_workload
                .map_or(0.0, |w| 1.0 - (w / 5.0).clamp(0.0, 1.0)),
            ExperienceFilter::Fun => {
                course.indexed_fun.map_or(0.0, |f| (f / 5.0).clamp(0.0, 1.0))
            }
            ExperienceFilter::HighGpa => {
                course.gpa.map_or(0.0, |g| (g / 4.0).clamp(0.0, 1.0))
            }
        })
        .sum();
    total / filters.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn course(difficulty: Option<f64>, workload: Option<f64>, fun: Option<f64>, gpa: Option<f64>) -> CourseRecord {
        CourseRecord {
            class_code: "CS 101".to_string(),
            course_name: "Test".to_string(),
            course_desc: String::new(),
            credits: None,
            requisites: None,
            embedding: None,
            attributes: BTreeMap::new(),
            grade_count: 0,
            gpa,
            indexed_difficulty: difficulty,
            indexed_fun: fun,
            indexed_workload: workload,
            review_count: 0,
            overall_rating: None,
        }
    }

    #[test]
    fn test_search_only_blend() {
        let inputs = RankInputs {
            grade_score: 5.0,
            search_score: 0.9,
            ..Default::default()
        };
        let modes = ActiveModes {
            has_search: true,
            ..Default::default()
        };
        assert!((fused_score(inputs, modes) - 1.31).abs() < 1e-9);
    }

    #[test]
    fn test_search_wins_over_other_modes() {
        // Once free text is active, topic and experience signals are ignored.
        let inputs = RankInputs {
            grade_score: 2.0,
            search_score: 0.5,
            vector_score: 1.0,
            experience_score: 1.0,
        };
        let modes = ActiveModes {
            has_search: true,
            has_topics: true,
            has_experience: true,
        };
        assert!((fused_score(inputs, modes) - (0.10 * 2.0 + 0.90 * 0.5)).abs() < 1e-9);
    }

    #[test]
    fn test_topics_only_is_raw_vector_score() {
        let inputs = RankInputs {
            grade_score: 100.0,
            vector_score: 0.82,
            ..Default::default()
        };
        let modes = ActiveModes {
            has_topics: true,
            ..Default::default()
        };
        assert!((fused_score(inputs, modes) - 0.82).abs() < 1e-9);
    }

    #[test]
    fn test_experience_only_blend() {
        let inputs = RankInputs {
            grade_score: 1.0,
            experience_score: 0.7375,
            ..Default::default()
        };
        let modes = ActiveModes {
            has_experience: true,
            ..Default::default()
        };
        assert!((fused_score(inputs, modes) - (0.50 + 0.50 * 0.7375)).abs() < 1e-9);
    }

    #[test]
    fn test_topics_and_experience_blend() {
        let inputs = RankInputs {
            grade_score: 3.0,
            vector_score: 0.8,
            experience_score: 0.5,
            ..Default::default()
        };
        let modes = ActiveModes {
            has_topics: true,
            has_experience: true,
            ..Default::default()
        };
        let expected = 0.10 * 3.0 + 0.70 * 0.8 + 0.20 * 0.5;
        assert!((fused_score(inputs, modes) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_no_modes_is_bare_grade_count() {
        // A(grade_count=100, gpa=3.8) vs B(grade_count=10, gpa=3.9): grade
        // count wins, gpa is ignored.
        let a = fused_score(
            RankInputs {
                grade_score: 100.0,
                ..Default::default()
            },
            ActiveModes::default(),
        );
        let b = fused_score(
            RankInputs {
                grade_score: 10.0,
                ..Default::default()
            },
            ActiveModes::default(),
        );
        assert!(a > b);
    }

    #[test]
    fn test_experience_score_inverts_difficulty() {
        // difficulty 2 -> 0.6 after inversion, gpa 3.5 -> 0.875; mean 0.7375.
        let course = course(Some(2.0), None, None, Some(3.5));
        let score = experience_score(
            &course,
            &[ExperienceFilter::Easy, ExperienceFilter::HighGpa],
        );
        assert!((score - 0.7375).abs() < 1e-9);
    }

    #[test]
    fn test_experience_score_missing_metric_contributes_zero() {
        let course = course(None, None, Some(5.0), None);
        let score = experience_score(
            &course,
            &[ExperienceFilter::Fun, ExperienceFilter::HighGpa],
        );
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_experience_score_empty_filters() {
        assert_eq!(experience_score(&course(Some(1.0), None, None, None), &[]), 0.0);
    }

    #[test]
    fn test_fusion_deterministic() {
        let inputs = RankInputs {
            grade_score: 42.0,
            search_score: 0.3,
            vector_score: 0.9,
            experience_score: 0.6,
        };
        for modes in [
            ActiveModes {
                has_search: true,
                has_topics: false,
                has_experience: true,
            },
            ActiveModes {
                has_search: false,
                has_topics: true,
                has_experience: true,
            },
        ] {
            assert_eq!(fused_score(inputs, modes), fused_score(inputs, modes));
        }
    }
}
