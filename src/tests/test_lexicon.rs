use biojoint_core::{Dictionary, SparseVector};

use crate::error::BioJointError;
use crate::index::FrequencyOrdering;
use crate::lexicon::{EntityKind, EntityName, Label, Lexicon, NON_ENTITY_IDENTIFIER};
use crate::normalization::{NormalizationConfig, NormalizationPredictor, RawNormalizationModel};
use crate::tests::init;
use crate::tests::test_data::{
    build_lexicon, chemical_vocabulary, disease_vocabulary, indexed_lexicon, Fixture, CHEMICAL,
    DISEASE,
};
use crate::text::AnnotatedSegment;
use crate::trainer::ner_loss;

#[test]
fn test_lexicon_is_seeded_with_placeholders() {
    init();
    let lexicon = Lexicon::new([DISEASE, CHEMICAL]).unwrap();
    assert_eq!(lexicon.type_count(), 2);
    assert_eq!(lexicon.state_count(), 3);
    assert_eq!(lexicon.len(), 3);

    let non_entity = lexicon.entity(lexicon.non_entity()).unwrap();
    assert_eq!(non_entity.kind, EntityKind::NonEntity);
    assert_eq!(non_entity.primary_identifier(), NON_ENTITY_IDENTIFIER);

    for t in 0..2 {
        let unknown = lexicon.entity(lexicon.unknown_entity(t).unwrap()).unwrap();
        assert_eq!(unknown.kind, EntityKind::Unknown);
        assert_eq!(unknown.label, Label::Entity(t));
        assert!(unknown.names.is_empty());
    }

    let labels: Vec<Label> = lexicon.labels().collect();
    assert_eq!(labels, vec![Label::NonEntity, Label::Entity(0), Label::Entity(1)]);
}

#[test]
fn test_lexicon_rejects_bad_construction() {
    assert!(Lexicon::new(Vec::<String>::new()).is_err());
    assert!(Lexicon::new(["A", "A"]).is_err());
    assert!(Lexicon::new(["A", ""]).is_err());
}

#[test]
fn test_add_entity_validation() {
    let mut lexicon = build_lexicon();
    let name = || vec![EntityName::new("x", None)];

    let err = lexicon.add_entity("GENE", vec!["G:1".into()], name()).unwrap_err();
    assert!(matches!(err, BioJointError::UnknownType(_)));

    assert!(lexicon.add_entity(DISEASE, vec![], name()).is_err());
    assert!(lexicon.add_entity(DISEASE, vec!["D:new".into()], vec![]).is_err());

    // identifiers are unique across the whole lexicon, also across types
    let err = lexicon
        .add_entity(CHEMICAL, vec!["MESH:D009369".into()], name())
        .unwrap_err();
    assert!(matches!(err, BioJointError::Lexicon(_)));
}

#[test]
fn test_secondary_identifier_resolves() {
    let lexicon = build_lexicon();
    let primary = lexicon.entity_by_identifier("MESH:D001241").unwrap();
    let secondary = lexicon.entity_by_identifier("CHEBI:15365").unwrap();
    assert_eq!(primary.id, secondary.id);
    assert_eq!(secondary.primary_identifier(), "MESH:D001241");
    assert_eq!(secondary.primary_name().unwrap().text, "aspirin");
}

#[test]
fn test_indexing_seals_the_lexicon() {
    let mut lexicon = indexed_lexicon(None);
    assert!(lexicon.is_indexed());
    let err = lexicon
        .add_entity(DISEASE, vec!["D:late".into()], vec![EntityName::new("late", None)])
        .unwrap_err();
    assert!(matches!(err, BioJointError::LexiconSealed));

    let err = lexicon
        .create_indexes(vec![disease_vocabulary(), chemical_vocabulary()])
        .unwrap_err();
    assert!(matches!(err, BioJointError::LexiconSealed));
}

#[test]
fn test_indexing_requires_frozen_vocabularies() {
    let mut lexicon = build_lexicon();
    let open = Dictionary::from_elements(["aspirin"]);
    let err = lexicon
        .create_indexes(vec![disease_vocabulary(), open])
        .unwrap_err();
    assert!(matches!(err, BioJointError::VocabularyNotFrozen(_)));
    assert!(!lexicon.is_indexed());

    let err = lexicon.create_indexes(vec![disease_vocabulary()]).unwrap_err();
    assert!(matches!(err, BioJointError::Lexicon(_)));
}

#[test]
fn test_index_rejects_name_vectors_outside_unit_box() {
    let disease = disease_vocabulary();
    let mut lexicon = Lexicon::new([DISEASE]).unwrap();
    let heavy = SparseVector::from_pairs(disease.len(), [(0, 2.0)]).unwrap();
    lexicon
        .add_entity(DISEASE, vec!["D:heavy".into()], vec![EntityName::new("breast", Some(heavy))])
        .unwrap();
    assert!(lexicon.create_indexes(vec![disease]).is_err());
}

#[test]
fn test_ambiguity_class_for_shared_name() {
    init();
    let fixture = Fixture::new();
    let t = fixture.type_id(DISEASE);
    let index = fixture.lexicon.index(t).unwrap();
    let cancer = fixture.name_vector("MESH:D009369", 0);

    let class = index.entities(&cancer);
    assert_eq!(
        class,
        &[fixture.entity("MESH:D009369"), fixture.entity("OMIM:114480")]
    );
    // breast cancer, lung cancer, cancer, pain
    assert_eq!(index.classes().len(), 4);
    let cancer_token = disease_vocabulary().index_of("cancer").unwrap();
    assert_eq!(index.classes_with_token(cancer_token).len(), 3);

    // name vectors never index under other types
    let chemical = fixture.lexicon.index(fixture.type_id(CHEMICAL)).unwrap();
    assert!(chemical.class_id(&cancer).is_none());
    assert!(chemical.entities(&cancer).is_empty());
}

#[test]
fn test_frequency_ordering_breaks_cancer_tie() {
    init();
    let baseline = Fixture::new();
    let d3 = baseline.entity("MESH:D009369");
    let omim = baseline.entity("OMIM:114480");
    let instance = baseline.instance("freq", "cancer", 1);

    // OMIM is annotated twice, MESH once
    let annotations = vec![
        baseline.target(&instance, &[(0, 1, DISEASE, "OMIM:114480")]),
        baseline.target(&instance, &[(0, 1, DISEASE, "OMIM:114480")]),
        baseline.target(&instance, &[(0, 1, DISEASE, "MESH:D009369")]),
    ];
    let ordering = FrequencyOrdering::from_annotations(annotations.iter().flatten());
    assert_eq!(ordering.count(omim), 2);
    assert_eq!(ordering.count(d3), 1);

    let ordered = Fixture::with_lexicon(indexed_lexicon(Some(&ordering)));
    let t = ordered.type_id(DISEASE);
    let cancer = ordered.name_vector("MESH:D009369", 0);
    assert_eq!(ordered.lexicon.index(t).unwrap().entities(&cancer), &[omim, d3]);

    // the decoder-facing ranking follows the installed order deterministically
    let config = NormalizationConfig::default();
    let model = RawNormalizationModel::new(ordered.space(t), &config).unwrap();
    for _ in 0..3 {
        let best = model.find_best(&ordered.mention("cancer"), 1);
        assert_eq!(best.best().map(|(e, _)| *e), Some(omim));
    }
}

#[test]
fn test_install_ordering_fails_once_shared() {
    let fixture = Fixture::new();
    let _space = fixture.space(0);
    let mut lexicon = (*fixture.lexicon).clone();
    // the clone shares index handles with the fixture's lexicon
    let err = lexicon
        .install_ordering(0, &FrequencyOrdering::new())
        .unwrap_err();
    assert!(matches!(err, BioJointError::Lexicon(_)));
}

#[test]
fn test_annotated_segment_validation() {
    let fixture = Fixture::new();
    let disease = Label::Entity(fixture.type_id(DISEASE));
    let aspirin = fixture.entity("MESH:D001241");
    let pain = fixture.entity("MESH:D010146");

    let err = AnnotatedSegment::new(&fixture.lexicon, 0, disease, vec![aspirin]).unwrap_err();
    assert!(matches!(err, BioJointError::Annotation(_)));
    assert!(AnnotatedSegment::new(&fixture.lexicon, 0, disease, vec![]).is_err());
    assert!(AnnotatedSegment::new(&fixture.lexicon, 0, Label::NonEntity, vec![pain]).is_err());

    let ok = AnnotatedSegment::new(&fixture.lexicon, 0, disease, vec![pain, pain]).unwrap();
    assert_eq!(ok.entities(), &[pain]);
    assert!(ok.links(pain));
}

#[test]
fn test_instance_validation() {
    let fixture = Fixture::new();
    let instance = fixture.instance("v", "aspirin relieves pain", 2);
    assert_eq!(instance.len(), 3);
    // 3 singletons + 2 pairs
    assert_eq!(instance.segments().len(), 5);
    assert_eq!(instance.segments_ending_at(2).len(), 2);

    let gold = fixture.target(&instance, &[(0, 1, CHEMICAL, "MESH:D001241")]);
    assert!(instance.validate_path(&gold).is_ok());
    assert!(instance.validate_path(&gold[1..]).is_err());
    assert!(instance.validate_path(&gold[..2]).is_err());
    assert!(instance.clone().with_target(gold).is_ok());
}

#[test]
fn test_ner_loss_counts_span_type_mismatches() {
    let fixture = Fixture::new();
    let instance = fixture.instance("loss", "breast cancer with pain", 2);
    let gold = fixture.target(
        &instance,
        &[(0, 2, DISEASE, "MESH:D001943"), (3, 4, DISEASE, "MESH:D010146")],
    );
    assert_eq!(ner_loss(&instance, &gold, &gold).unwrap(), 0);

    // wrong entity on the right span costs nothing here
    let relinked = fixture.target(
        &instance,
        &[(0, 2, DISEASE, "?"), (3, 4, DISEASE, "MESH:D010146")],
    );
    assert_eq!(ner_loss(&instance, &gold, &relinked).unwrap(), 0);

    // split span: one miss plus two spurious mentions, pain missed too
    let split = fixture.target(
        &instance,
        &[(0, 1, DISEASE, "?"), (1, 2, DISEASE, "MESH:D009369")],
    );
    assert_eq!(ner_loss(&instance, &gold, &split).unwrap(), 4);
}
