// Weight application on synthetic and loaded models.

mod common;

use std::sync::Arc;
use std::thread;

use common::{all_queries, arpa_model, config, lmath};
use liblm_core::{LmConfig, LmError, NGramModel, NgramScore, SyntheticLm};

fn constant_model(score: i32) -> NGramModel {
    NGramModel::synthetic(
        ["one", "two", "three"],
        SyntheticLm::constant(score),
        lmath(),
        &config(),
    )
    .expect("synthetic model")
}

#[test]
fn language_weight_scales_constant_model() {
    let model = constant_model(-19460);
    model.apply_weights(42.0, 1.0, 1.0).unwrap();
    let id = model.word_id("two");
    assert_eq!(model.score(id, &[]), NgramScore::new(-19460 * 42, 1));
    assert_eq!(model.prob(id, &[]), NgramScore::new(-19460, 1));
    assert_eq!(model.weights(), (42.0, 1.0, 1.0));
}

#[test]
fn unigram_weight_applies_to_synthetic_unigrams() {
    let lmath = lmath();
    let model = NGramModel::synthetic(
        ["a", "b", "c"],
        SyntheticLm::uniform(&lmath, 4),
        lmath.clone(),
        &config(),
    )
    .unwrap();
    let raw = model.prob_words("a", &[]).score;
    // mixing a uniform model with a uniform distribution leaves it uniform
    model.apply_weights(1.0, 1.0, 0.3).unwrap();
    let mixed = model.score_words("a", &[]).score;
    assert!((mixed - raw).abs() <= 3, "raw {} mixed {}", raw, mixed);

    model.apply_weights(1.0, 1.0, 0.0).unwrap();
    assert_eq!(model.score_words("a", &[]).score, lmath.to_log(0.25));
}

#[test]
fn initial_weights_come_from_the_config() {
    let cfg = LmConfig {
        language_weight: 9.5,
        word_insertion_penalty: 0.7,
        ..Default::default()
    };
    let lmath = cfg.log_math().unwrap();
    let model = NGramModel::from_arpa_reader(common::TRIGRAM_ARPA.as_bytes(), lmath.clone(), &cfg).unwrap();
    assert_eq!(model.weights(), (9.5, 0.7, 1.0));
    let raw = model.prob(0, &[]).score;
    let expected = (9.5 * raw as f64) as i32 + lmath.to_log(0.7);
    assert_eq!(model.score(0, &[]).score, expected);
}

#[test]
fn invalid_config_weights_refuse_to_load() {
    let cfg = LmConfig {
        unigram_weight: -0.1,
        ..Default::default()
    };
    let err = NGramModel::from_arpa_reader(common::TRIGRAM_ARPA.as_bytes(), lmath(), &cfg).unwrap_err();
    assert!(matches!(err, LmError::Configuration(_)));
}

#[test]
fn unigram_weight_does_not_touch_higher_orders() {
    let model = arpa_model(lmath());
    model.apply_weights(1.0, 1.0, 0.5).unwrap();
    assert_eq!(
        model.score_words("daines", &["huggins", "david"]),
        model.prob_words("daines", &["huggins", "david"])
    );
    // sentence start keeps its own unigram
    assert_eq!(model.score_words("<s>", &[]), model.prob_words("<s>", &[]));
    assert_ne!(model.score_words("david", &[]), model.prob_words("david", &[]));
}

#[test]
fn scoring_is_shared_across_threads() {
    let model = Arc::new(arpa_model(lmath()));
    let expected: Vec<NgramScore> = all_queries()
        .iter()
        .map(|(w, h)| model.prob(*w, h))
        .collect();

    thread::scope(|s| {
        for _ in 0..4 {
            let model = Arc::clone(&model);
            let expected = &expected;
            s.spawn(move || {
                for ((w, h), want) in all_queries().iter().zip(expected) {
                    assert_eq!(model.prob(*w, h), *want);
                    let _ = model.score(*w, h);
                }
            });
        }
        s.spawn(|| {
            for lw in 1..20 {
                model.apply_weights(lw as f64, 1.0, 1.0).unwrap();
            }
        });
    });
    assert_eq!(model.weights(), (19.0, 1.0, 1.0));
}
