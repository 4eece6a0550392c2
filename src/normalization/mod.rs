//! Normalization model family: a learned bilinear scorer over
//! (mention vector, name vector).
//!
//! ```ignore
//! score(m, n) = mᵗ·W·n + cos · Σ_{i shared} m_i · n_s(i)
//! ```
//!
//! where `W` is a mention-vocabulary × name-vocabulary weight matrix and the
//! second term is a learned-weight similarity prior restricted to tokens that
//! exist in both vocabularies. Every variant shares one predictor surface:
//!
//! - `RawNormalizationModel`: trainable, deltas are added directly
//! - `AveragedNormalizationModel`: trainable, predicts with the running mean
//! - `CompiledNormalizationModel`: flattened and self-contained for inference
//! - `CachedNormalizationModel`: LRU wrapper around any of the above
//! - `NullNormalizationModel`: normalization disabled
//!
//! # Score bound
//!
//! The decoder prunes with `score_bound(m)`: the mention is translated into a
//! name-space vector `t = mᵗ·W + cos·shared(m)` and only its positive
//! coordinates are summed. Because every name vector lies in `[0, 1]^d`
//! (enforced when the index is built), `t·n ≤ Σ max(0, t_j)` for every name,
//! and the bound is never below the unknown entity's score of 0.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use biojoint_core::{DenseBySparseMatrix, Dictionary, RankedList, SparseVector};
use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::{BioJointError, Result};
use crate::index::Index;
use crate::lexicon::{EntityId, Label, Lexicon, TypeId};

pub mod averaged;
pub mod cached;
pub mod compiled;
pub mod null;
pub mod raw;

pub use averaged::AveragedNormalizationModel;
pub use cached::CachedNormalizationModel;
pub use compiled::CompiledNormalizationModel;
pub use null::NullNormalizationModel;
pub use raw::RawNormalizationModel;

/// Best-scoring name of one entity for a mention.
#[derive(Clone, Debug, PartialEq)]
pub struct NameMatch {
    pub entity: EntityId,
    /// Position in the entity's name list.
    pub name: usize,
    pub score: f64,
}

/// Sparse change to one type's normalization parameters. Also used for the
/// gradient of a score with respect to those parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NormalizationDelta {
    pub cosine: f64,
    /// (mention token, name token, value)
    pub matrix: Vec<(usize, usize, f64)>,
}

impl NormalizationDelta {
    pub fn is_empty(&self) -> bool {
        self.cosine == 0.0 && self.matrix.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizationConfig {
    /// Initial weight of the shared-token similarity term.
    pub initial_cosine_weight: f64,
    /// Initial value of `W` on (mention token, name token) pairs spelling the
    /// same token.
    pub shared_token_prior: f64,
    /// Capacity of `CachedNormalizationModel`.
    pub cache_capacity: usize,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            initial_cosine_weight: 1.0,
            shared_token_prior: 0.1,
            cache_capacity: 10_000,
        }
    }
}

impl NormalizationConfig {
    /// Pure cosine prior, no matrix seeding.
    pub fn cosine_only() -> Self {
        Self {
            shared_token_prior: 0.0,
            ..Self::default()
        }
    }

    pub fn with_initial_cosine_weight(mut self, weight: f64) -> Self {
        self.initial_cosine_weight = weight;
        self
    }

    pub fn with_shared_token_prior(mut self, prior: f64) -> Self {
        self.shared_token_prior = prior;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }
}

pub trait NormalizationPredictor: Send + Sync {
    fn type_id(&self) -> TypeId;

    fn unknown_entity(&self) -> EntityId;

    fn score_name_vector(&self, mention: &SparseVector, name: &SparseVector) -> f64;

    /// Upper bound on the score of any candidate for `mention`.
    fn score_bound(&self, mention: &SparseVector) -> f64;

    /// Top `k` entities for `mention`; always considers the unknown entity.
    fn find_best(&self, mention: &SparseVector, k: usize) -> RankedList<EntityId>;

    fn find_best_name(&self, mention: &SparseVector, entity: EntityId) -> Option<NameMatch>;

    fn score_entity(&self, mention: &SparseVector, entity: EntityId) -> f64 {
        self.find_best_name(mention, entity).map_or(0.0, |m| m.score)
    }

    /// Inference-optimized, score-identical copy.
    fn compile(&self) -> Result<CompiledNormalizationModel>;

    /// Stamp of any state besides the weights that predictions depend on.
    /// Memoized predictions are stale once it changes.
    fn revision(&self) -> u64 {
        0
    }
}

pub trait NormalizationModel: NormalizationPredictor {
    /// Validate `delta` against the parameter shape without applying it.
    fn check(&self, delta: &NormalizationDelta) -> Result<()>;

    /// Apply `delta`. Validates every entry before touching any weight.
    fn update(&mut self, delta: &NormalizationDelta) -> Result<()>;

    /// Coefficients of `score_name_vector(mention, name)` in the parameters.
    fn gradient(&self, mention: &SparseVector, name: &SparseVector) -> NormalizationDelta;

    /// Cosine weight being trained.
    fn cosine_weight(&self) -> f64;

    fn as_predictor(&self) -> &dyn NormalizationPredictor;

    /// Predictor over the weights being trained, when it differs from the
    /// model's own surface.
    fn training_surface(&self) -> Option<&dyn NormalizationPredictor> {
        None
    }
}

/// Geometry shared by the trainable models of one type: the index, the
/// vocabulary sizes and the mention → name map of shared tokens.
#[derive(Debug)]
pub struct NormalizationSpace {
    lexicon: Arc<Lexicon>,
    index: Arc<Index>,
    type_id: TypeId,
    unknown: EntityId,
    mention_dim: usize,
    shared: Vec<Option<usize>>,
}

impl NormalizationSpace {
    pub fn new(lexicon: Arc<Lexicon>, type_id: TypeId, mention_vocabulary: &Dictionary) -> Result<Self> {
        if !mention_vocabulary.is_frozen() {
            return Err(BioJointError::VocabularyNotFrozen("mentions".into()));
        }
        let index = Arc::clone(lexicon.shared_index(type_id)?);
        let unknown = lexicon.unknown_entity(type_id)?;
        let names = index.vocabulary();
        let shared = mention_vocabulary
            .iter()
            .map(|(_, token)| names.index_of(token))
            .collect();
        Ok(Self {
            lexicon,
            index,
            type_id,
            unknown,
            mention_dim: mention_vocabulary.len(),
            shared,
        })
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[inline]
    pub fn unknown(&self) -> EntityId {
        self.unknown
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    #[inline]
    pub fn mention_dim(&self) -> usize {
        self.mention_dim
    }

    #[inline]
    pub fn name_dim(&self) -> usize {
        self.index.vocabulary().len()
    }

    /// Name token spelled like mention token `i`.
    #[inline]
    pub fn shared(&self, i: usize) -> Option<usize> {
        self.shared.get(i).copied().flatten()
    }

    /// Named vectors of a concept of this type; empty for anything else.
    pub(crate) fn names_of(&self, entity: EntityId) -> impl Iterator<Item = (usize, &SparseVector)> {
        self.lexicon
            .entity(entity)
            .ok()
            .filter(|e| e.is_concept() && e.label == Label::Entity(self.type_id))
            .into_iter()
            .flat_map(|e| e.names.iter().enumerate())
            .filter_map(|(i, n)| n.vector.as_ref().map(|v| (i, v)))
    }
}

/// Trainable parameter block of one type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizationParams {
    pub cosine_weight: f64,
    pub matrix: DenseBySparseMatrix,
}

impl NormalizationParams {
    pub fn zeros(space: &NormalizationSpace) -> Self {
        Self {
            cosine_weight: 0.0,
            matrix: DenseBySparseMatrix::zeros(space.mention_dim(), space.name_dim()),
        }
    }

    pub fn initial(space: &NormalizationSpace, config: &NormalizationConfig) -> Result<Self> {
        let mut params = Self::zeros(space);
        params.cosine_weight = config.initial_cosine_weight;
        if config.shared_token_prior != 0.0 {
            for i in 0..space.mention_dim() {
                if let Some(j) = space.shared(i) {
                    params.matrix.increment(i, j, config.shared_token_prior)?;
                }
            }
        }
        Ok(params)
    }

    /// `t = mᵗ·W + cos·shared(m)`, in name space.
    pub fn translate(&self, space: &NormalizationSpace, mention: &SparseVector) -> BTreeMap<usize, f64> {
        let mut t = self.matrix.left_multiply(mention);
        if self.cosine_weight != 0.0 {
            for (i, mi) in mention.iter() {
                if let Some(j) = space.shared(i) {
                    *t.entry(j).or_insert(0.0) += self.cosine_weight * mi;
                }
            }
        }
        t
    }

    pub fn check(&self, delta: &NormalizationDelta) -> Result<()> {
        if !delta.cosine.is_finite() {
            return Err(BioJointError::InvariantViolation(
                "non-finite cosine update".into(),
            ));
        }
        for &(i, j, v) in &delta.matrix {
            if i >= self.matrix.nrows() || j >= self.matrix.ncols() || !v.is_finite() {
                return Err(BioJointError::InvariantViolation(format!(
                    "normalization update ({}, {}, {}) outside {}x{}",
                    i,
                    j,
                    v,
                    self.matrix.nrows(),
                    self.matrix.ncols()
                )));
            }
        }
        Ok(())
    }

    /// Add `scale * delta`. Call `check` first.
    pub fn apply(&mut self, delta: &NormalizationDelta, scale: f64) -> Result<()> {
        self.cosine_weight += scale * delta.cosine;
        for &(i, j, v) in &delta.matrix {
            self.matrix.increment(i, j, scale * v)?;
        }
        Ok(())
    }

    pub fn is_finite(&self) -> bool {
        self.cosine_weight.is_finite() && self.matrix.iter().all(|(_, _, v)| v.is_finite())
    }

    /// `self + scale * other`.
    pub fn scaled_sum(&self, other: &NormalizationParams, scale: f64) -> Result<Self> {
        Ok(Self {
            cosine_weight: self.cosine_weight + scale * other.cosine_weight,
            matrix: self.matrix.scaled_sum(&other.matrix, scale)?,
        })
    }
}

/// `t · n` over the name vector's support.
#[inline]
pub(crate) fn dot_translated(t: &BTreeMap<usize, f64>, name: &SparseVector) -> f64 {
    name.iter()
        .map(|(j, nj)| t.get(&j).map_or(0.0, |tj| tj * nj))
        .sum()
}

#[inline]
pub(crate) fn positive_mass<'a, I>(values: I) -> f64
where
    I: IntoIterator<Item = &'a f64>,
{
    values.into_iter().filter(|v| **v > 0.0).sum()
}

/// Rank scored ambiguity classes into entities.
///
/// Candidates are offered in a fixed order: the unknown entity (score 0)
/// first, then classes in ascending class id, entities within a class in
/// disambiguation order. An entity reached through several names keeps its
/// best score at its first position. Equal scores keep that order.
pub(crate) fn rank_classes<'a, I>(
    classes: I,
    unknown: EntityId,
    k: usize,
) -> RankedList<EntityId>
where
    I: IntoIterator<Item = (&'a [EntityId], f64)>,
{
    let mut order: Vec<(EntityId, f64)> = vec![(unknown, 0.0)];
    let mut position: HashMap<EntityId, usize> = HashMap::new();
    for (entities, score) in classes {
        for &e in entities {
            match position.get(&e) {
                Some(&p) => {
                    if score > order[p].1 {
                        order[p].1 = score;
                    }
                }
                None => {
                    position.insert(e, order.len());
                    order.push((e, score));
                }
            }
        }
    }
    let mut list = RankedList::new(k);
    for (e, score) in order {
        list.add(score, e);
    }
    list
}

/// Top `k` entities for a translated mention `t`.
pub(crate) fn rank_translated(
    space: &NormalizationSpace,
    t: &BTreeMap<usize, f64>,
    k: usize,
) -> RankedList<EntityId> {
    let index = space.index();
    let reachable = index.reachable_classes(t.iter().filter(|(_, v)| **v != 0.0).map(|(j, _)| *j));
    trace!(
        "find_best: {} translated tokens, {} reachable classes",
        t.len(),
        reachable.len()
    );
    let scored = reachable.into_iter().filter_map(|c| {
        index
            .class(c)
            .map(|class| (class.entities.as_slice(), dot_translated(t, &class.vector)))
    });
    rank_classes(scored, space.unknown(), k)
}

/// Best named vector of `entity` under `score`; first name wins ties.
pub(crate) fn best_name<'a, I, F>(entity: EntityId, names: I, score: F) -> Option<NameMatch>
where
    I: IntoIterator<Item = (usize, &'a SparseVector)>,
    F: Fn(&SparseVector) -> f64,
{
    let mut best: Option<NameMatch> = None;
    for (i, vector) in names {
        let s = score(vector);
        if best.as_ref().map_or(true, |b| s > b.score) {
            best = Some(NameMatch {
                entity,
                name: i,
                score: s,
            });
        }
    }
    best
}
