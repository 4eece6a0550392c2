use std::sync::Arc;

use approx::assert_relative_eq;

use crate::annotator::DecoderConfig;
use crate::error::BioJointError;
use crate::lexicon::{EntityName, Lexicon};
use crate::model::TrainableModel;
use crate::normalization::NormalizationConfig;
use crate::pipeline::Pipeline;
use crate::tests::init;
use crate::tests::test_data::{build_lexicon, disease_vocabulary, unit_vector, Fixture, CHEMICAL, DISEASE};
use crate::trainer::{MarginTrainer, TrainerConfig};

/// Pipeline after one epoch over two labelled sentences.
fn trained_pipeline(fixture: &Fixture, decoder: DecoderConfig) -> Pipeline {
    let mut model = fixture.averaged_model(&NormalizationConfig::default());
    let annotator = fixture.annotator(decoder);
    let mut instances = Vec::new();
    for (id, text, gold) in [
        ("t1", "breast cancer", vec![(0, 2, DISEASE, "MESH:D001943")]),
        ("t2", "aspirin with acid", vec![(0, 1, CHEMICAL, "MESH:D001241"), (2, 3, CHEMICAL, "CHEBI:37527")]),
    ] {
        let instance = fixture.instance(id, text, 2);
        let target = fixture.target(&instance, &gold);
        instances.push(instance.with_target(target).unwrap());
    }
    let trainer = MarginTrainer::new(annotator, TrainerConfig::default()).unwrap();
    trainer.train_epoch(&mut model, &instances).unwrap();
    Pipeline::from_training(&model, trainer.annotator()).unwrap()
}

#[test]
fn test_save_and_load_round_trip() {
    init();
    let fixture = Fixture::new();
    let pipeline = trained_pipeline(&fixture, DecoderConfig::default().with_max_non_entity_length(2));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("biojoint.bin");
    pipeline.save(&path).unwrap();
    let loaded = Pipeline::load(&path).unwrap();

    assert_eq!(loaded.decoder(), pipeline.decoder());
    assert_eq!(loaded.lexicon().len(), pipeline.lexicon().len());
    assert_eq!(
        loaded.lexicon().entity_by_identifier("CHEBI:15365").map(|e| e.id),
        Some(fixture.entity("MESH:D001241"))
    );
    assert_eq!(loaded.model().recognition(), pipeline.model().recognition());

    for text in ["breast cancer with pain", "aspirin relieves lung cancer", "the acid"] {
        let instance = fixture.instance("eval", text, 2);
        let before = pipeline.annotate(&instance).unwrap();
        let after = loaded.annotate(&instance).unwrap();
        assert_eq!(before.path, after.path);
        assert_relative_eq!(before.score, after.score, epsilon = 1e-12);
    }
}

#[test]
fn test_bytes_round_trip() {
    let fixture = Fixture::new();
    let pipeline = trained_pipeline(&fixture, DecoderConfig::verified());
    let bytes = pipeline.to_bytes().unwrap();
    let restored = Pipeline::from_bytes(&bytes).unwrap();
    assert!(restored.decoder().verify_scores);

    let instance = fixture.instance("b", "lung cancer", 2);
    assert_eq!(
        restored.annotate(&instance).unwrap(),
        pipeline.annotate(&instance).unwrap()
    );

    // the restored lexicon is sealed like the original
    let mut lexicon = (**restored.lexicon()).clone();
    assert!(lexicon.is_indexed());
    assert!(matches!(
        lexicon
            .add_entity(DISEASE, vec!["D:late".into()], vec![EntityName::new("late", None)])
            .unwrap_err(),
        BioJointError::LexiconSealed
    ));
}

#[test]
fn test_corrupt_input_is_rejected() {
    let err = Pipeline::from_bytes(&[0xff, 0x00, 0x13]).unwrap_err();
    assert!(matches!(err, BioJointError::Serde(_)));

    let dir = tempfile::tempdir().unwrap();
    let err = Pipeline::load(dir.path().join("missing.bin")).unwrap_err();
    assert!(matches!(err, BioJointError::Io(_)));

    let path = dir.path().join("truncated.bin");
    let fixture = Fixture::new();
    let bytes = trained_pipeline(&fixture, DecoderConfig::default()).to_bytes().unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
    assert!(Pipeline::load(&path).is_err());
}

#[test]
fn test_new_validates_parts() {
    let fixture = Fixture::new();
    let model = fixture.averaged_model(&NormalizationConfig::default()).compile().unwrap();

    let unindexed = Arc::new(build_lexicon());
    let err = Pipeline::new(unindexed, model.clone(), DecoderConfig::default()).unwrap_err();
    assert!(matches!(err, BioJointError::NotIndexed));

    let bad_decoder = DecoderConfig::default().with_max_non_entity_length(0);
    assert!(Pipeline::new(Arc::clone(&fixture.lexicon), model.clone(), bad_decoder).is_err());

    // a single-type model does not fit the two-type lexicon
    let mut narrow = Lexicon::new([DISEASE]).unwrap();
    let vocabulary = disease_vocabulary();
    narrow
        .add_entity(
            DISEASE,
            vec!["MESH:D010146".into()],
            vec![EntityName::new("pain", unit_vector(&vocabulary, &["pain"]))],
        )
        .unwrap();
    narrow.create_indexes(vec![vocabulary]).unwrap();
    let narrow_model = TrainableModel::recognition_only(&narrow, fixture.features.len())
        .unwrap()
        .compile()
        .unwrap();
    let err = Pipeline::new(Arc::clone(&fixture.lexicon), narrow_model.clone(), DecoderConfig::default())
        .unwrap_err();
    assert!(matches!(err, BioJointError::Config(_)));

    let fitted = Pipeline::new(Arc::new(narrow), narrow_model, DecoderConfig::default()).unwrap();
    assert_eq!(fitted.lexicon().type_count(), 1);
    assert!(fitted.annotator().is_ok());
}
