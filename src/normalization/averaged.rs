use std::collections::BTreeMap;
use std::sync::Arc;

use biojoint_core::{RankedList, SparseVector};
use log::trace;

use super::raw::gradient;
use super::{
    best_name, dot_translated, positive_mass, rank_translated, CompiledNormalizationModel,
    NameMatch, NormalizationConfig, NormalizationDelta, NormalizationModel, NormalizationParams,
    NormalizationPredictor, NormalizationSpace, RawNormalizationModel,
};
use crate::error::{BioJointError, Result};
use crate::lexicon::{EntityId, TypeId};
use crate::progress::TrainingProgress;

/// Time-averaged normalization model.
///
/// Holds the current weights `(W, cos)` as a raw model, plus accumulators
/// `(W₂, cos₂)` where every update `Δ` applied at progress count `c` adds
/// `c·Δ`. The mean of all parameter states seen so far is then
/// `W − W₂/c`, obtained without storing snapshots.
///
/// Every prediction scores with that running mean, so `compile` is
/// score-identical to the model itself. The weights being trained are
/// reachable through `current` and `training_surface`.
#[derive(Clone, Debug)]
pub struct AveragedNormalizationModel {
    current: RawNormalizationModel,
    accumulated: NormalizationParams,
    progress: TrainingProgress,
}

impl AveragedNormalizationModel {
    pub fn new(
        space: Arc<NormalizationSpace>,
        config: &NormalizationConfig,
        progress: TrainingProgress,
    ) -> Result<Self> {
        let accumulated = NormalizationParams::zeros(&space);
        Ok(Self {
            current: RawNormalizationModel::new(space, config)?,
            accumulated,
            progress,
        })
    }

    pub fn current(&self) -> &RawNormalizationModel {
        &self.current
    }

    /// Raw model holding the running mean `W − W₂/count`.
    pub fn averaged(&self) -> Result<RawNormalizationModel> {
        Ok(RawNormalizationModel::from_params(
            Arc::clone(self.current.space()),
            self.mean_params()?,
        ))
    }

    fn mean_params(&self) -> Result<NormalizationParams> {
        let count = self.progress.count();
        let mean = self
            .current
            .params()
            .scaled_sum(&self.accumulated, -1.0 / count as f64)
            .map_err(|e| {
                BioJointError::InvariantViolation(format!(
                    "averaging normalization type {}: {}",
                    self.type_id(),
                    e
                ))
            })?;
        if !mean.is_finite() {
            return Err(BioJointError::InvariantViolation(format!(
                "averaged normalization weights of type {} are not finite at count {}",
                self.type_id(),
                count
            )));
        }
        Ok(mean)
    }

    /// `t = mᵗ·W + cos·shared(m) − (mᵗ·W₂ + cos₂·shared(m)) / count`.
    fn translate(&self, mention: &SparseVector) -> BTreeMap<usize, f64> {
        let space = self.current.space();
        let mut t = self.current.params().translate(space, mention);
        let scale = -1.0 / self.progress.count() as f64;
        for (j, v) in self.accumulated.translate(space, mention) {
            *t.entry(j).or_insert(0.0) += scale * v;
        }
        t
    }
}

impl NormalizationPredictor for AveragedNormalizationModel {
    fn type_id(&self) -> TypeId {
        self.current.type_id()
    }

    fn unknown_entity(&self) -> EntityId {
        self.current.unknown_entity()
    }

    fn score_name_vector(&self, mention: &SparseVector, name: &SparseVector) -> f64 {
        dot_translated(&self.translate(mention), name)
    }

    fn score_bound(&self, mention: &SparseVector) -> f64 {
        positive_mass(self.translate(mention).values())
    }

    fn find_best(&self, mention: &SparseVector, k: usize) -> RankedList<EntityId> {
        rank_translated(self.current.space(), &self.translate(mention), k)
    }

    fn find_best_name(&self, mention: &SparseVector, entity: EntityId) -> Option<NameMatch> {
        let t = self.translate(mention);
        best_name(entity, self.current.space().names_of(entity), |n| {
            dot_translated(&t, n)
        })
    }

    fn compile(&self) -> Result<CompiledNormalizationModel> {
        Ok(CompiledNormalizationModel::from_params(
            self.current.space(),
            &self.mean_params()?,
        ))
    }

    fn revision(&self) -> u64 {
        self.progress.count()
    }
}

impl NormalizationModel for AveragedNormalizationModel {
    fn check(&self, delta: &NormalizationDelta) -> Result<()> {
        self.accumulated.check(delta)
    }

    fn update(&mut self, delta: &NormalizationDelta) -> Result<()> {
        self.accumulated.check(delta)?;
        let count = self.progress.count() as f64;
        trace!("averaged normalization update at count {}", count);
        self.current.update(delta)?;
        self.accumulated.apply(delta, count)
    }

    fn gradient(&self, mention: &SparseVector, name: &SparseVector) -> NormalizationDelta {
        gradient(self.current.space(), mention, name)
    }

    fn cosine_weight(&self) -> f64 {
        self.current.cosine_weight()
    }

    fn as_predictor(&self) -> &dyn NormalizationPredictor {
        self
    }

    fn training_surface(&self) -> Option<&dyn NormalizationPredictor> {
        Some(&self.current)
    }
}
