//! Emission scoring through the public scorer, for every backend.

use palimpsest::{
    CharacterTemplate, EmissionConfig, EmissionEngine, EmissionScorer, Observation, PalimpsestError, TemplateBank,
};
use std::sync::Arc;

const HEIGHT: usize = 4;
const WIDTH: usize = 3;
const SEQUENCE_LENGTH: usize = 10;

/// A diagonal stroke: column `x` inks row `x`.
fn diagonal_bank() -> Arc<TemplateBank> {
    let mut ink = vec![0.0; WIDTH * HEIGHT];
    for x in 0..WIDTH {
        ink[x * HEIGHT + x] = 1.0;
    }
    let mut template = CharacterTemplate::new("/", HEIGHT, WIDTH, WIDTH).unwrap();
    template.set_pattern(WIDTH, ink, vec![0.0; WIDTH * HEIGHT]).unwrap();
    Arc::new(TemplateBank::compile([&template]).unwrap())
}

/// The same diagonal stroke starting at column `start`.
fn diagonal_observation(start: usize) -> Observation {
    let mut ink = vec![0.0; SEQUENCE_LENGTH * HEIGHT];
    for x in 0..WIDTH {
        ink[(start + x) * HEIGHT + x] = 1.0;
    }
    let background = ink.iter().map(|v| 1.0 - v).collect();
    Observation::new(HEIGHT, SEQUENCE_LENGTH, ink, background).unwrap()
}

fn scorer(engine: EmissionEngine) -> EmissionScorer {
    let config = EmissionConfig {
        engine,
        num_threads: Some(2),
    };
    EmissionScorer::new(&config, diagonal_bank(), SEQUENCE_LENGTH).unwrap()
}

#[test]
fn test_best_score_at_stroke_start() {
    for engine in [EmissionEngine::Default, EmissionEngine::Parallel] {
        let scorer = scorer(engine);
        let scores = scorer.score(&diagonal_observation(2)).unwrap();

        let best = scores.get(WIDTH, 2, 0).unwrap();
        assert_eq!(best, 3.0, "{:?}", engine);
        for t in (0..=SEQUENCE_LENGTH - WIDTH).filter(|&t| t != 2) {
            assert!(scores.get(WIDTH, t, 0).unwrap() < best, "{:?} t={}", engine, t);
        }
    }
}

#[test]
fn test_backends_agree() {
    let default = scorer(EmissionEngine::Default);
    let parallel = scorer(EmissionEngine::Parallel);
    let observation = diagonal_observation(5);

    let a = default.score(&observation).unwrap();
    let b = parallel.score(&observation).unwrap();
    assert_eq!(a.as_slice(), b.as_slice());
}

#[test]
fn test_concurrent_callers_share_scorer() {
    let scorer = scorer(EmissionEngine::Default);

    let results: Vec<f32> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|start| {
                let scorer = &scorer;
                s.spawn(move || scorer.score(&diagonal_observation(start)).unwrap().get(WIDTH, start, 0).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results, vec![3.0; 4]);
}

#[test]
fn test_score_all_keeps_order() {
    let scorer = scorer(EmissionEngine::Default);
    let observations: Vec<Observation> = (0..5).map(diagonal_observation).collect();

    let all = scorer.score_all(&observations);
    for (start, scores) in all.into_iter().enumerate() {
        assert_eq!(scores.unwrap().get(WIDTH, start, 0), Some(3.0));
    }
}

#[test]
fn test_wrong_height_rejected() {
    let scorer = scorer(EmissionEngine::Parallel);
    let observation = Observation::new(2, 3, vec![0.0; 6], vec![1.0; 6]).unwrap();
    assert!(matches!(scorer.score(&observation), Err(PalimpsestError::Validation { .. })));
}

#[test]
fn test_explicit_shutdown_is_idempotent() {
    let mut scorer = scorer(EmissionEngine::Parallel);
    scorer.shutdown().unwrap();
    scorer.shutdown().unwrap();
}
