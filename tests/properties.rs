//! Property tests for the numeric invariants of the index and ranking.

use std::collections::BTreeMap;

use chrono::Utc;
use classrank::catalog::{CourseRecord, ExperienceFilter};
use classrank::search::ranking::{ActiveModes, RankInputs, experience_score, fused_score};
use classrank::search::vector::VectorIndex;
use proptest::prelude::*;

fn course_with_embedding(code: String, embedding: Vec<f32>) -> CourseRecord {
    CourseRecord {
        class_code: code.clone(),
        course_name: code,
        course_desc: String::new(),
        credits: None,
        requisites: None,
        embedding: Some(embedding),
        attributes: BTreeMap::new(),
        grade_count: 0,
        gpa: None,
        indexed_difficulty: None,
        indexed_fun: None,
        indexed_workload: None,
        review_count: 0,
        overall_rating: None,
    }
}

fn embedding() -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0, 8)
}

proptest! {
    #[test]
    fn index_respects_top_k_and_min_score(
        embeddings in proptest::collection::vec(embedding(), 1..40),
        query in embedding(),
        top_k in 0usize..50,
        min_score in 0.0f32..1.0,
    ) {
        let records: Vec<CourseRecord> = embeddings
            .into_iter()
            .enumerate()
            .map(|(i, e)| course_with_embedding(format!("C {i}"), e))
            .collect();
        let index = VectorIndex::build(&records, Utc::now());

        let hits = index.search(&query, top_k, min_score);
        prop_assert!(hits.len() <= top_k);
        for pair in hits.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
        }
        for hit in &hits {
            prop_assert!(hit.score >= min_score);
            prop_assert!(hit.score <= 1.0 + 1e-5);
        }
    }

    #[test]
    fn fused_score_is_deterministic_and_finite(
        grade in 0.0f64..10_000.0,
        search in 0.0f64..1.0,
        vector in 0.0f64..1.0,
        experience in 0.0f64..1.0,
        has_search in any::<bool>(),
        has_topics in any::<bool>(),
        has_experience in any::<bool>(),
    ) {
        let inputs = RankInputs {
            grade_score: grade,
            search_score: search,
            vector_score: vector,
            experience_score: experience,
        };
        let modes = ActiveModes { has_search, has_topics, has_experience };

        let first = fused_score(inputs, modes);
        prop_assert!(first.is_finite());
        prop_assert!(first >= 0.0);
        prop_assert_eq!(first, fused_score(inputs, modes));
    }

    #[test]
    fn search_only_formula_holds(
        grade in 0.0f64..1000.0,
        search in 0.0f64..1.0,
    ) {
        let inputs = RankInputs {
            grade_score: grade,
            search_score: search,
            ..Default::default()
        };
        let modes = ActiveModes { has_search: true, ..Default::default() };
        let expected = 0.10 * grade + 0.90 * search;
        prop_assert!((fused_score(inputs, modes) - expected).abs() < 1e-12);
    }

    #[test]
    fn experience_score_stays_normalized(
        difficulty in proptest::option::of(0.0f64..5.0),
        workload in proptest::option::of(0.0f64..5.0),
        fun in proptest::option::of(0.0f64..5.0),
        gpa in proptest::option::of(0.0f64..4.0),
    ) {
        let mut course = course_with_embedding("C".to_string(), vec![]);
        course.indexed_difficulty = difficulty;
        course.indexed_workload = workload;
        course.indexed_fun = fun;
        course.gpa = gpa;

        let score = experience_score(&course, &ExperienceFilter::ALL);
        prop_assert!((0.0..=1.0).contains(&score));
    }
}
