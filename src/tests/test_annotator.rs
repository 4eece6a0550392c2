use approx::assert_relative_eq;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::annotator::{Annotator, DecoderConfig};
use crate::error::BioJointError;
use crate::lexicon::{Label, Lexicon};
use crate::model::{JointScorer, TrainableModel};
use crate::normalization::{NormalizationConfig, NormalizationDelta};
use crate::recognition::RecognitionDelta;
use crate::tests::init;
use crate::tests::test_data::{
    random_normalization_delta, random_recognition_delta, random_text, Fixture, CHEMICAL, DISEASE,
};
use crate::text::{AnnotatedSegment, MentionName, Segment, StateSequence, TextInstance, Token};

/// Every complete path over the lattice with its score, enumerating each
/// segmentation, each label and, for entity labels, every entity of the type.
/// Returns the best score and all paths reaching it.
fn exhaustive_optimum(
    model: &dyn JointScorer,
    lexicon: &Lexicon,
    instance: &TextInstance,
    max_non_entity_length: usize,
    tolerance: f64,
) -> (f64, Vec<StateSequence>) {
    let mut options: Vec<Vec<(AnnotatedSegment, f64)>> = Vec::new();
    for (s, segment) in instance.segments().iter().enumerate() {
        let mut choices = Vec::new();
        for label in lexicon.labels() {
            let recognition = model.recognition_score(label, &segment.features);
            match label.type_id() {
                None => {
                    if segment.len() <= max_non_entity_length {
                        choices.push((AnnotatedSegment::non_entity(s), recognition));
                    }
                }
                Some(t) => {
                    let normalizer = model.normalizer(t).unwrap();
                    for &e in lexicon.entities_of_type(t) {
                        let normalization = match &segment.mention.vector {
                            Some(mention) => normalizer.score_entity(mention, e),
                            None if e == lexicon.unknown_entity(t).unwrap() => 0.0,
                            None => continue,
                        };
                        let annotated = AnnotatedSegment::new(lexicon, s, label, vec![e]).unwrap();
                        choices.push((annotated, recognition + normalization));
                    }
                }
            }
        }
        options.push(choices);
    }

    fn walk(
        instance: &TextInstance,
        options: &[Vec<(AnnotatedSegment, f64)>],
        position: usize,
        path: &mut StateSequence,
        score: f64,
        out: &mut Vec<(f64, StateSequence)>,
    ) {
        if position == instance.len() {
            out.push((score, path.clone()));
            return;
        }
        for (s, segment) in instance.segments().iter().enumerate() {
            if segment.start != position {
                continue;
            }
            for (annotated, value) in &options[s] {
                path.push(annotated.clone());
                walk(instance, options, segment.end, path, score + value, out);
                path.pop();
            }
        }
    }

    let mut all = Vec::new();
    walk(instance, &options, 0, &mut Vec::new(), 0.0, &mut all);
    let best = all.iter().map(|(score, _)| *score).fold(f64::NEG_INFINITY, f64::max);
    let optimal = all
        .into_iter()
        .filter(|(score, _)| *score >= best - tolerance)
        .map(|(_, path)| path)
        .collect();
    (best, optimal)
}

fn perturb(fixture: &Fixture, model: &mut TrainableModel, rng: &mut ChaCha8Rng) {
    let recognition = random_recognition_delta(rng, fixture.lexicon.state_count(), fixture.features.len());
    let normalization: Vec<NormalizationDelta> = (0..fixture.lexicon.type_count())
        .map(|t| {
            let space = fixture.space(t);
            random_normalization_delta(rng, space.mention_dim(), space.name_dim())
        })
        .collect();
    model.apply(&recognition, &normalization).unwrap();
}

#[test]
fn test_decode_initial_model() {
    init();
    let fixture = Fixture::new();
    let model = fixture.averaged_model(&NormalizationConfig::default());
    let annotator = fixture.annotator(DecoderConfig::verified());

    let instance = fixture.instance("s1", "aspirin relieves pain", 1);
    let (best, stats) = annotator.decode(&model, &instance).unwrap();
    let expected = fixture.target(
        &instance,
        &[(0, 1, CHEMICAL, "MESH:D001241"), (2, 3, DISEASE, "MESH:D010146")],
    );
    assert_eq!(best.path, expected);
    assert_relative_eq!(best.score, 2.2, epsilon = 1e-9);
    assert_eq!(stats.candidates, 9);
    assert_eq!(stats.resolved + stats.pruned, stats.candidates);
    assert!(stats.pruned > 0);
}

#[test]
fn test_decode_prefers_split_under_cosine_prior() {
    init();
    let fixture = Fixture::new();
    let model = fixture.averaged_model(&NormalizationConfig::default());
    let annotator = fixture.annotator(DecoderConfig::verified());

    // with no recognition evidence, two partial matches outscore one full match
    let instance = fixture.instance("s2", "breast cancer", 2);
    let (best, _) = annotator.decode(&model, &instance).unwrap();
    let expected = fixture.target(
        &instance,
        &[(0, 1, DISEASE, "MESH:D001943"), (1, 2, DISEASE, "MESH:D009369")],
    );
    assert_eq!(best.path, expected);
    assert_relative_eq!(best.score, 1.1 + 1.1 / 2f64.sqrt(), epsilon = 1e-9);
    assert_relative_eq!(
        annotator
            .score_state_sequence(&model, &instance, &best.path)
            .unwrap(),
        best.score,
        epsilon = 1e-12
    );

    let full = fixture.target(&instance, &[(0, 2, DISEASE, "MESH:D001943")]);
    assert_relative_eq!(
        annotator.score_state_sequence(&model, &instance, &full).unwrap(),
        1.1,
        epsilon = 1e-12
    );
}

#[test]
fn test_decode_matches_exhaustive_search() {
    init();
    let fixture = Fixture::new();
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut model = fixture.raw_model(&NormalizationConfig::default());
    perturb(&fixture, &mut model, &mut rng);

    for max_non_entity_length in [1, 2] {
        let config = DecoderConfig::verified().with_max_non_entity_length(max_non_entity_length);
        let annotator = fixture.annotator(config);
        for round in 0..25 {
            let len = rng.gen_range(1..=4);
            let text = random_text(&mut rng, len);
            let instance = fixture.instance(&format!("r{}", round), &text, 3);
            let tolerance = 1e-6 * len as f64;

            let (best, _) = annotator.decode(&model, &instance).unwrap();
            let (optimum, optimal_paths) =
                exhaustive_optimum(&model, &fixture.lexicon, &instance, max_non_entity_length, tolerance);
            assert_relative_eq!(best.score, optimum, epsilon = tolerance);
            assert!(
                optimal_paths.contains(&best.path),
                "decoded path of `{}` is not among the {} optimal paths",
                text,
                optimal_paths.len()
            );
            assert!(instance.validate_path(&best.path).is_ok());
            for annotated in &best.path {
                let segment = instance.segment(annotated.segment()).unwrap();
                if annotated.label() == Label::NonEntity {
                    assert!(segment.len() <= max_non_entity_length);
                    assert!(annotated.entities().is_empty());
                } else {
                    assert_eq!(annotated.entities().len(), 1);
                }
            }
        }
    }
}

#[test]
fn test_compiled_model_decodes_identically() {
    init();
    let fixture = Fixture::new();
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let mut model = fixture.raw_model(&NormalizationConfig::default().with_cache_capacity(0));
    perturb(&fixture, &mut model, &mut rng);
    let compiled = model.compile().unwrap();
    let annotator = fixture.annotator(DecoderConfig::verified());

    for round in 0..20 {
        let text = random_text(&mut rng, 4);
        let instance = fixture.instance(&format!("c{}", round), &text, 2);
        let (a, _) = annotator.decode(&model, &instance).unwrap();
        let (b, _) = annotator.decode(&compiled, &instance).unwrap();
        assert_eq!(a.path, b.path);
        assert_relative_eq!(a.score, b.score, epsilon = 1e-9);
    }
}

#[test]
fn test_process_and_state_sequences() {
    let fixture = Fixture::new();
    let model = fixture.averaged_model(&NormalizationConfig::default());
    let annotator = fixture.annotator(DecoderConfig::default());
    let instance = fixture.instance("p", "lung cancer with pain", 2);

    let ranked = annotator.process(&model, &instance).unwrap();
    assert_eq!(ranked.len(), 1);
    let sequences = annotator.predicted_state_sequences(&model, &instance).unwrap();
    assert_eq!(sequences, vec![ranked[0].path.clone()]);
    let (best, _) = annotator.decode(&model, &instance).unwrap();
    assert_eq!(best, ranked[0]);
}

#[test]
fn test_verify_rejects_misreported_score() {
    init();
    let fixture = Fixture::new();
    let mut rng = ChaCha8Rng::seed_from_u64(17);
    let mut model = fixture.raw_model(&NormalizationConfig::default());
    perturb(&fixture, &mut model, &mut rng);
    let annotator = fixture.annotator(DecoderConfig::default());
    let instance = fixture.instance("v", "aspirin relieves lung cancer", 2);

    let (best, _) = annotator.decode(&model, &instance).unwrap();
    annotator.verify(&model, &instance, &best).unwrap();

    let mut skewed = best.clone();
    skewed.score += 1e-3;
    assert!(matches!(
        annotator.verify(&model, &instance, &skewed).unwrap_err(),
        BioJointError::InvariantViolation(_)
    ));

    let mut tight = best;
    tight.score += 1e-7;
    assert!(annotator.verify(&model, &instance, &tight).is_ok());
}

fn sparse_instance(fixture: &Fixture, spans: &[(usize, usize)], len: usize) -> TextInstance {
    let tokens = (0..len).map(|i| Token::new("pain", 5 * i, 5 * i + 4)).collect();
    let segments = spans
        .iter()
        .map(|&(start, end)| {
            let words = vec!["pain"; end - start];
            Segment::new(
                start,
                end,
                fixture.segment_features(&words),
                MentionName::new(words.join(" "), Some(fixture.mention("pain"))),
            )
        })
        .collect();
    TextInstance::new("sparse", tokens, segments).unwrap()
}

#[test]
fn test_unreachable_final_position_is_an_error() {
    init();
    let fixture = Fixture::new();
    let model = fixture.averaged_model(&NormalizationConfig::default());
    let annotator = fixture.annotator(DecoderConfig::default());

    let instance = sparse_instance(&fixture, &[(0, 1), (2, 3)], 3);
    let err = annotator.decode(&model, &instance).unwrap_err();
    assert!(matches!(err, BioJointError::Instance { .. }));
}

#[test]
fn test_intermediate_gaps_are_allowed() {
    let fixture = Fixture::new();
    let model = fixture.averaged_model(&NormalizationConfig::default());
    let annotator = fixture.annotator(DecoderConfig::verified());

    // position 0 is never an end; the two-token segment must be an entity
    let instance = sparse_instance(&fixture, &[(0, 2), (2, 3)], 3);
    let (best, _) = annotator.decode(&model, &instance).unwrap();
    assert_eq!(best.path.len(), 2);
    assert!(best.path[0].label().is_entity());
}

#[test]
fn test_mentions_without_vector_link_unknown() {
    let fixture = Fixture::new();
    let mut model = fixture.raw_model(&NormalizationConfig::default());
    let annotator = fixture.annotator(DecoderConfig::verified());
    let instance = fixture.instance("oov", "the", 1);
    assert!(instance.segments()[0].mention.vector.is_none());

    // push the lone token towards DISEASE through its features
    let unk = fixture.features.index_of("w=<unk>").unwrap();
    let disease = Label::Entity(fixture.type_id(DISEASE));
    let recognition = RecognitionDelta {
        entries: vec![(disease.state(), unk, 2.0)],
    };
    let normalization = vec![NormalizationDelta::default(); fixture.lexicon.type_count()];
    model.apply(&recognition, &normalization).unwrap();

    let (best, _) = annotator.decode(&model, &instance).unwrap();
    assert_eq!(best.path[0].label(), disease);
    assert_eq!(
        best.path[0].entities(),
        &[fixture.lexicon.unknown_entity(fixture.type_id(DISEASE)).unwrap()]
    );
    assert_relative_eq!(best.score, 2.0, epsilon = 1e-12);
}

#[test]
fn test_model_must_cover_lexicon_types() {
    let fixture = Fixture::new();
    let narrow = Lexicon::new([DISEASE]).unwrap();
    let model = TrainableModel::recognition_only(&narrow, fixture.features.len()).unwrap();
    let annotator = fixture.annotator(DecoderConfig::default());
    let instance = fixture.instance("n", "pain", 1);
    assert!(matches!(
        annotator.decode(&model, &instance).unwrap_err(),
        BioJointError::Config(_)
    ));
}

#[test]
fn test_decoder_config_validation() {
    let fixture = Fixture::new();
    let bad = DecoderConfig::default().with_max_non_entity_length(0);
    assert!(bad.validate().is_err());
    assert!(Annotator::new(fixture.lexicon.clone(), bad).is_err());

    let config = DecoderConfig::verified();
    assert!(config.verify_scores);
    assert_eq!(config.max_non_entity_length, 1);
}
