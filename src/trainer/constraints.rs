//! Constraint families of one margin update.
//!
//! Every constraint compares two scorings whose difference is linear in the
//! parameters: `coeffs · Δ ≥ loss − (current difference)`. Path scores expand
//! through `Φ(path)`, the recognition features of each segment plus the
//! normalization gradient of the best linked entity's best name. Every score
//! is taken at the weights being trained.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use biojoint_core::SparseVector;
use log::debug;

use super::qp::{axpy, Coefficients, Constraint, ConstraintFamily, QpModel, VariableKey};
use super::TrainerConfig;
use crate::annotator::Annotator;
use crate::error::Result;
use crate::lexicon::{EntityId, TypeId};
use crate::model::{CurrentWeights, JointScorer, TrainableModel};
use crate::normalization::{NormalizationDelta, NormalizationPredictor};
use crate::text::{AnnotatedSegment, TextInstance};
use crate::SCORE_EPSILON;

/// Mention key: token span plus type.
type MentionKey = (usize, usize, TypeId);

/// One entity scored through its best name.
struct Scored<'a> {
    entity: EntityId,
    name: Option<&'a SparseVector>,
    score: f64,
}

pub(crate) struct ConstraintBuilder<'a> {
    model: &'a TrainableModel,
    current: CurrentWeights<'a>,
    annotator: &'a Annotator,
    instance: &'a TextInstance,
    config: &'a TrainerConfig,
}

/// Count of (span, type) mentions present in exactly one of the two paths.
pub fn ner_loss(
    instance: &TextInstance,
    target: &[AnnotatedSegment],
    predicted: &[AnnotatedSegment],
) -> Result<usize> {
    let t: BTreeSet<MentionKey> = mentions(instance, target)?.into_keys().collect();
    let p: BTreeSet<MentionKey> = mentions(instance, predicted)?.into_keys().collect();
    Ok(t.symmetric_difference(&p).count())
}

fn mentions<'p>(
    instance: &TextInstance,
    path: &'p [AnnotatedSegment],
) -> Result<BTreeMap<MentionKey, &'p AnnotatedSegment>> {
    let mut out = BTreeMap::new();
    for annotated in path {
        if let Some(t) = annotated.label().type_id() {
            let segment = instance.segment(annotated.segment())?;
            out.insert((segment.start, segment.end, t), annotated);
        }
    }
    Ok(out)
}

fn gradient_coefficients(t: TypeId, delta: &NormalizationDelta) -> Coefficients {
    let mut coefficients = Coefficients::new();
    if delta.cosine != 0.0 {
        coefficients.insert(VariableKey::Cosine { type_id: t }, delta.cosine);
    }
    for &(row, col, v) in &delta.matrix {
        *coefficients
            .entry(VariableKey::Normalization { type_id: t, row, col })
            .or_insert(0.0) += v;
    }
    coefficients
}

impl<'a> ConstraintBuilder<'a> {
    pub fn new(
        model: &'a TrainableModel,
        annotator: &'a Annotator,
        instance: &'a TextInstance,
        config: &'a TrainerConfig,
    ) -> Self {
        Self {
            model,
            current: model.current(),
            annotator,
            instance,
            config,
        }
    }

    /// All enabled families, pruned, with the cosine sign constraints last.
    pub fn build(&self, target: &[AnnotatedSegment], predicted: &[AnnotatedSegment]) -> Result<QpModel> {
        let mut qp = QpModel::new(self.config.slack_penalty);
        qp.push(self.base(target, predicted)?);

        let target_mentions = mentions(self.instance, target)?;
        let predicted_mentions = mentions(self.instance, predicted)?;
        for (key, gold) in &target_mentions {
            match predicted_mentions.get(key) {
                None => self.false_negative(&mut qp, key.2, gold)?,
                Some(guess) => self.wrong_normalization(&mut qp, key.2, gold, guess)?,
            }
        }
        for (key, guess) in &predicted_mentions {
            if !target_mentions.contains_key(key) {
                self.false_positive(&mut qp, key.2, guess)?;
            }
        }
        if self.config.normalization_only_constraints {
            self.normalization_only(&mut qp, &target_mentions)?;
        }

        qp.prune();
        if self.config.enforce_nonnegative_cosine {
            for t in 0..self.model.type_count() {
                let key = VariableKey::Cosine { type_id: t };
                if qp.uses(&key) {
                    let current = self.model.normalization(t)?.cosine_weight();
                    let coefficients = Coefficients::from([(key, 1.0)]);
                    let constraint =
                        Constraint::new(ConstraintFamily::NonNegativeCosine, coefficients, -current);
                    qp.push(constraint.hard());
                }
            }
        }
        debug!(
            "instance `{}`: {} constraints over {} variables",
            self.instance.id(),
            qp.len(),
            qp.variables().len()
        );
        Ok(qp)
    }

    /// `Φ(path)`: the coefficients of the path score in every parameter.
    pub fn features(&self, path: &[AnnotatedSegment]) -> Result<Coefficients> {
        let mut phi = Coefficients::new();
        for annotated in path {
            let segment = self.instance.segment(annotated.segment())?;
            let state = annotated.label().state();
            for (feature, v) in segment.features.iter() {
                *phi.entry(VariableKey::Recognition { state, feature }).or_insert(0.0) += v;
            }
            if let (Some(t), Some(mention)) = (annotated.label().type_id(), &segment.mention.vector) {
                if let Some(best) = self.best_linked(t, mention, annotated.entities())? {
                    axpy(&mut phi, &self.gradient(t, mention, &best)?, 1.0);
                }
            }
        }
        Ok(phi)
    }

    fn base(&self, target: &[AnnotatedSegment], predicted: &[AnnotatedSegment]) -> Result<Constraint> {
        let mut coefficients = self.features(target)?;
        axpy(&mut coefficients, &self.features(predicted)?, -1.0);
        let current = self.annotator.score_state_sequence(&self.current, self.instance, target)?
            - self.annotator.score_state_sequence(&self.current, self.instance, predicted)?;
        let loss = ner_loss(self.instance, target, predicted)? as f64;
        Ok(Constraint::new(ConstraintFamily::Base, coefficients, loss - current))
    }

    /// Missed mention: its correct entity must beat the model's current
    /// answer when that answer is wrong.
    fn false_negative(&self, qp: &mut QpModel, t: TypeId, gold: &AnnotatedSegment) -> Result<()> {
        let Some(mention) = self.mention(gold)? else {
            return Ok(());
        };
        let Some(correct) = self.best_linked(t, mention, gold.entities())? else {
            return Ok(());
        };
        let normalizer = self.predictor(t)?;
        let top = normalizer.find_best(mention, 1);
        if let Some((&alternative, _)) = top.best() {
            if !gold.links(alternative) {
                let wrong = self.scored(t, mention, alternative)?;
                qp.push(self.pairwise(
                    ConstraintFamily::FalseNegative,
                    t,
                    mention,
                    &correct,
                    &wrong,
                    self.config.normalization_margin,
                )?);
            }
        }
        Ok(())
    }

    /// Spurious mention: the unknown entity must beat every concept proposed.
    fn false_positive(&self, qp: &mut QpModel, t: TypeId, guess: &AnnotatedSegment) -> Result<()> {
        let Some(mention) = self.mention(guess)? else {
            return Ok(());
        };
        let normalizer = self.predictor(t)?;
        let unknown = Scored {
            entity: normalizer.unknown_entity(),
            name: None,
            score: 0.0,
        };
        for (&candidate, _) in normalizer.find_best(mention, self.config.max_alternatives).iter() {
            if candidate == unknown.entity {
                continue;
            }
            let wrong = self.scored(t, mention, candidate)?;
            qp.push(self.pairwise(
                ConstraintFamily::FalsePositive,
                t,
                mention,
                &unknown,
                &wrong,
                self.config.normalization_margin,
            )?);
        }
        Ok(())
    }

    /// Correct span and type, wrong entity: the correct entity must beat every
    /// incorrect candidate scoring at least as high.
    fn wrong_normalization(
        &self,
        qp: &mut QpModel,
        t: TypeId,
        gold: &AnnotatedSegment,
        guess: &AnnotatedSegment,
    ) -> Result<()> {
        if guess.entities().iter().all(|&e| gold.links(e)) {
            return Ok(());
        }
        let Some(mention) = self.mention(gold)? else {
            return Ok(());
        };
        let Some(correct) = self.best_linked(t, mention, gold.entities())? else {
            return Ok(());
        };
        let normalizer = self.predictor(t)?;
        for (&candidate, score) in normalizer.find_best(mention, self.config.max_alternatives).iter() {
            if gold.links(candidate) || score + SCORE_EPSILON < correct.score {
                continue;
            }
            let wrong = self.scored(t, mention, candidate)?;
            qp.push(self.pairwise(
                ConstraintFamily::WrongNormalization,
                t,
                mention,
                &correct,
                &wrong,
                self.config.normalization_margin,
            )?);
        }
        Ok(())
    }

    /// Every gold mention, independent of the prediction: correct entity vs
    /// incorrect top candidates inside the margin. Repeats of the same
    /// (type, mention vector, correct, incorrect) accumulate their loss.
    fn normalization_only(
        &self,
        qp: &mut QpModel,
        gold_mentions: &BTreeMap<MentionKey, &AnnotatedSegment>,
    ) -> Result<()> {
        let margin = self.config.normalization_margin;
        let mut order: Vec<Constraint> = Vec::new();
        let mut seen: HashMap<(TypeId, SparseVector, EntityId, EntityId), usize> = HashMap::new();

        for (&(_, _, t), gold) in gold_mentions {
            let Some(mention) = self.mention(gold)? else {
                continue;
            };
            let Some(correct) = self.best_linked(t, mention, gold.entities())? else {
                continue;
            };
            let normalizer = self.predictor(t)?;
            for (&candidate, score) in normalizer.find_best(mention, self.config.max_alternatives).iter() {
                if gold.links(candidate) || correct.score - score >= margin {
                    continue;
                }
                let key = (t, mention.clone(), correct.entity, candidate);
                match seen.get(&key) {
                    Some(&i) => order[i].rhs += margin,
                    None => {
                        let wrong = self.scored(t, mention, candidate)?;
                        seen.insert(key, order.len());
                        order.push(self.pairwise(
                            ConstraintFamily::NormalizationOnly,
                            t,
                            mention,
                            &correct,
                            &wrong,
                            margin,
                        )?);
                    }
                }
            }
        }
        for constraint in order {
            qp.push(constraint);
        }
        Ok(())
    }

    /// `score(correct) − score(wrong) ≥ margin`, linearized at the current
    /// weights.
    fn pairwise(
        &self,
        family: ConstraintFamily,
        t: TypeId,
        mention: &SparseVector,
        correct: &Scored<'_>,
        wrong: &Scored<'_>,
        margin: f64,
    ) -> Result<Constraint> {
        let mut coefficients = self.gradient(t, mention, correct)?;
        axpy(&mut coefficients, &self.gradient(t, mention, wrong)?, -1.0);
        Ok(Constraint::new(
            family,
            coefficients,
            margin - (correct.score - wrong.score),
        ))
    }

    fn mention(&self, annotated: &AnnotatedSegment) -> Result<Option<&'a SparseVector>> {
        Ok(self.instance.segment(annotated.segment())?.mention.vector.as_ref())
    }

    fn predictor(&self, t: TypeId) -> Result<&'a dyn NormalizationPredictor> {
        self.model.training_predictor(t)
    }

    fn gradient(&self, t: TypeId, mention: &SparseVector, scored: &Scored<'_>) -> Result<Coefficients> {
        Ok(match scored.name {
            Some(name) => gradient_coefficients(t, &self.model.normalization(t)?.gradient(mention, name)),
            None => Coefficients::new(),
        })
    }

    /// `entity` through its best name; placeholders score 0 with no name.
    fn scored(&self, t: TypeId, mention: &SparseVector, entity: EntityId) -> Result<Scored<'a>> {
        let lexicon = self.annotator.lexicon().as_ref();
        match self.predictor(t)?.find_best_name(mention, entity) {
            Some(found) => {
                let name = lexicon
                    .entity(entity)?
                    .names
                    .get(found.name)
                    .and_then(|n| n.vector.as_ref());
                Ok(Scored {
                    entity,
                    name,
                    score: found.score,
                })
            }
            None => Ok(Scored {
                entity,
                name: None,
                score: 0.0,
            }),
        }
    }

    /// Highest-scoring linked entity; earlier entities win ties.
    fn best_linked(
        &self,
        t: TypeId,
        mention: &SparseVector,
        entities: &[EntityId],
    ) -> Result<Option<Scored<'a>>> {
        let mut best: Option<Scored<'a>> = None;
        for &e in entities {
            let scored = self.scored(t, mention, e)?;
            if best.as_ref().map_or(true, |b| scored.score > b.score) {
                best = Some(scored);
            }
        }
        Ok(best)
    }
}
