//! Joint semi-Markov decoder.
//!
//! A single left-to-right pass over token positions. At position `i` every
//! lattice segment ending at `i` is paired with every allowed label, and each
//! pair gets an optimistic bound:
//!
//! ```ignore
//! bound = recognition(label, segment) + score_bound(mention) + best(start - 1)
//! ```
//!
//! Pairs are resolved in descending bound order. Resolving an entity label
//! runs `find_best(mention, 1)` on that type's normalizer, the expensive part.
//! As soon as the best exact score so far beats the next bound by
//! `SCORE_EPSILON` the remaining pairs cannot win and are skipped. Because the
//! bound never underestimates, the committed path at every position is the
//! exact optimum over all paths ending there.

use std::cmp::Ordering;
use std::sync::Arc;

use biojoint_core::RankedList;
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::error::{BioJointError, Result};
use crate::lexicon::{EntityId, Label, Lexicon};
use crate::model::JointScorer;
use crate::text::{AnnotatedSegment, StateSequence, TextInstance};
use crate::SCORE_EPSILON;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Longest segment, in tokens, that may be labelled non-entity.
    pub max_non_entity_length: usize,
    /// Re-score every decoded path and fail on disagreement.
    pub verify_scores: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_non_entity_length: 1,
            verify_scores: false,
        }
    }
}

impl DecoderConfig {
    /// Default limits with self-verification on.
    pub fn verified() -> Self {
        Self {
            verify_scores: true,
            ..Self::default()
        }
    }

    pub fn with_max_non_entity_length(mut self, length: usize) -> Self {
        self.max_non_entity_length = length;
        self
    }

    pub fn with_verify_scores(mut self, verify: bool) -> Self {
        self.verify_scores = verify;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_non_entity_length == 0 {
            return Err(BioJointError::Config(
                "max_non_entity_length must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScoredPath {
    pub path: StateSequence,
    pub score: f64,
}

/// Pruning counters of one decode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub candidates: usize,
    pub resolved: usize,
    pub pruned: usize,
}

struct Candidate {
    segment: usize,
    label: Label,
    recognition: f64,
    prefix: f64,
    bound: f64,
    parent: Option<usize>,
}

/// Committed best path ending at one position.
struct Node {
    segment: usize,
    label: Label,
    entity: Option<EntityId>,
    score: f64,
    parent: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct Annotator {
    lexicon: Arc<Lexicon>,
    config: DecoderConfig,
}

impl Annotator {
    pub fn new(lexicon: Arc<Lexicon>, config: DecoderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { lexicon, config })
    }

    pub fn lexicon(&self) -> &Arc<Lexicon> {
        &self.lexicon
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Scored paths for `instance`. Only the single optimal path is decoded,
    /// so the list holds exactly one entry.
    pub fn process(&self, model: &dyn JointScorer, instance: &TextInstance) -> Result<Vec<ScoredPath>> {
        let (best, stats) = self.decode(model, instance)?;
        debug!(
            "decoded `{}`: score={:.4} candidates={} resolved={} pruned={}",
            instance.id(),
            best.score,
            stats.candidates,
            stats.resolved,
            stats.pruned
        );
        Ok(vec![best])
    }

    /// Predicted labellings without scores; one entry, as for `process`.
    pub fn predicted_state_sequences(
        &self,
        model: &dyn JointScorer,
        instance: &TextInstance,
    ) -> Result<Vec<StateSequence>> {
        Ok(self
            .process(model, instance)?
            .into_iter()
            .map(|scored| scored.path)
            .collect())
    }

    /// Best full path and its pruning statistics.
    pub fn decode(&self, model: &dyn JointScorer, instance: &TextInstance) -> Result<(ScoredPath, DecodeStats)> {
        self.check_model(model)?;
        let mut stats = DecodeStats::default();
        let mut nodes: Vec<Node> = Vec::new();
        let mut committed: Vec<Option<usize>> = vec![None; instance.len()];

        for position in 0..instance.len() {
            let mut candidates = self.candidates(model, instance, position, &nodes, &committed)?;
            stats.candidates += candidates.len();
            candidates.sort_by(|a, b| b.bound.partial_cmp(&a.bound).unwrap_or(Ordering::Equal));

            let mut incumbent: Option<(usize, f64, Option<EntityId>)> = None;
            for (k, candidate) in candidates.iter().enumerate() {
                if let Some((_, best, _)) = incumbent {
                    if best >= candidate.bound + SCORE_EPSILON {
                        stats.pruned += candidates.len() - k;
                        break;
                    }
                }
                stats.resolved += 1;
                let (normalization, entity) =
                    self.resolve(model, instance, candidate.segment, candidate.label)?;
                let exact = candidate.prefix + candidate.recognition + normalization;
                if incumbent.map_or(true, |(_, best, _)| exact > best) {
                    incumbent = Some((k, exact, entity));
                }
            }

            match incumbent {
                Some((k, score, entity)) => {
                    let winner = &candidates[k];
                    trace!(
                        "position {}: segment {} {:?} score {:.4}",
                        position,
                        winner.segment,
                        winner.label,
                        score
                    );
                    nodes.push(Node {
                        segment: winner.segment,
                        label: winner.label,
                        entity,
                        score,
                        parent: winner.parent,
                    });
                    committed[position] = Some(nodes.len() - 1);
                }
                None => trace!("position {} is not reachable", position),
            }
        }

        let last = instance.len() - 1;
        let end = committed[last].ok_or_else(|| BioJointError::Instance {
            id: instance.id().to_string(),
            reason: format!("no lattice path reaches token {}", last),
        })?;

        let score = nodes[end].score;
        let mut path = Vec::new();
        let mut cursor = Some(end);
        while let Some(n) = cursor {
            let node = &nodes[n];
            path.push(AnnotatedSegment::predicted(node.segment, node.label, node.entity));
            cursor = node.parent;
        }
        path.reverse();

        let best = ScoredPath { path, score };
        if self.config.verify_scores {
            self.verify(model, instance, &best)?;
        }
        Ok((best, stats))
    }

    /// Fails when `scored.score` and the independent rescoring of its path
    /// differ by more than `SCORE_EPSILON`.
    pub fn verify(&self, model: &dyn JointScorer, instance: &TextInstance, scored: &ScoredPath) -> Result<()> {
        let rescored = self.score_state_sequence(model, instance, &scored.path)?;
        if (rescored - scored.score).abs() > SCORE_EPSILON {
            return Err(BioJointError::InvariantViolation(format!(
                "instance `{}`: decoder score {} but path rescores to {}",
                instance.id(),
                scored.score,
                rescored
            )));
        }
        Ok(())
    }

    /// Independent total score of `path`; entity segments score their best
    /// linked entity.
    pub fn score_state_sequence(
        &self,
        model: &dyn JointScorer,
        instance: &TextInstance,
        path: &[AnnotatedSegment],
    ) -> Result<f64> {
        instance.validate_path(path)?;
        let mut total = 0.0;
        for annotated in path {
            let segment = instance.segment(annotated.segment())?;
            total += model.recognition_score(annotated.label(), &segment.features);
            if let (Some(t), Some(mention)) = (annotated.label().type_id(), &segment.mention.vector) {
                let normalizer = model.normalizer(t)?;
                let best = annotated
                    .entities()
                    .iter()
                    .map(|&e| normalizer.score_entity(mention, e))
                    .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));
                total += best.unwrap_or(0.0);
            }
        }
        Ok(total)
    }

    fn check_model(&self, model: &dyn JointScorer) -> Result<()> {
        if model.type_count() != self.lexicon.type_count() {
            return Err(BioJointError::Config(format!(
                "model covers {} types, lexicon has {}",
                model.type_count(),
                self.lexicon.type_count()
            )));
        }
        Ok(())
    }

    fn candidates(
        &self,
        model: &dyn JointScorer,
        instance: &TextInstance,
        position: usize,
        nodes: &[Node],
        committed: &[Option<usize>],
    ) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::new();
        for &s in instance.segments_ending_at(position) {
            let segment = instance.segment(s)?;
            let (prefix, parent) = match segment.start {
                0 => (0.0, None),
                start => match committed[start - 1] {
                    Some(p) => (nodes[p].score, Some(p)),
                    None => continue,
                },
            };
            for label in self.lexicon.labels() {
                if label == Label::NonEntity && segment.len() > self.config.max_non_entity_length {
                    continue;
                }
                let recognition = model.recognition_score(label, &segment.features);
                let normalization = match (label.type_id(), &segment.mention.vector) {
                    (Some(t), Some(mention)) => model.normalizer(t)?.score_bound(mention),
                    _ => 0.0,
                };
                candidates.push(Candidate {
                    segment: s,
                    label,
                    recognition,
                    prefix,
                    bound: prefix + recognition + normalization,
                    parent,
                });
            }
        }
        Ok(candidates)
    }

    /// Exact normalization score and chosen entity of one (segment, label).
    fn resolve(
        &self,
        model: &dyn JointScorer,
        instance: &TextInstance,
        segment: usize,
        label: Label,
    ) -> Result<(f64, Option<EntityId>)> {
        let Some(t) = label.type_id() else {
            return Ok((0.0, None));
        };
        let normalizer = model.normalizer(t)?;
        let unknown = normalizer.unknown_entity();
        match &instance.segment(segment)?.mention.vector {
            Some(mention) => Ok(best_of(normalizer.find_best(mention, 1), unknown)),
            None => Ok((0.0, Some(unknown))),
        }
    }
}

fn best_of(list: RankedList<EntityId>, unknown: EntityId) -> (f64, Option<EntityId>) {
    match list.best() {
        Some((&e, score)) => (score, Some(e)),
        None => (0.0, Some(unknown)),
    }
}
