use std::sync::Arc;

use biojoint_core::{RankedList, SparseVector};

use super::{
    best_name, dot_translated, positive_mass, rank_translated, CompiledNormalizationModel,
    NameMatch, NormalizationConfig, NormalizationDelta, NormalizationModel, NormalizationParams,
    NormalizationPredictor, NormalizationSpace,
};
use crate::error::Result;
use crate::lexicon::{EntityId, TypeId};

/// Trainable normalization model; updates are added to the weights directly.
#[derive(Clone, Debug)]
pub struct RawNormalizationModel {
    space: Arc<NormalizationSpace>,
    params: NormalizationParams,
}

impl RawNormalizationModel {
    pub fn new(space: Arc<NormalizationSpace>, config: &NormalizationConfig) -> Result<Self> {
        let params = NormalizationParams::initial(&space, config)?;
        Ok(Self { space, params })
    }

    pub fn from_params(space: Arc<NormalizationSpace>, params: NormalizationParams) -> Self {
        Self { space, params }
    }

    pub fn space(&self) -> &Arc<NormalizationSpace> {
        &self.space
    }

    pub fn params(&self) -> &NormalizationParams {
        &self.params
    }
}

impl NormalizationPredictor for RawNormalizationModel {
    fn type_id(&self) -> TypeId {
        self.space.type_id()
    }

    fn unknown_entity(&self) -> EntityId {
        self.space.unknown()
    }

    fn score_name_vector(&self, mention: &SparseVector, name: &SparseVector) -> f64 {
        let t = self.params.translate(&self.space, mention);
        dot_translated(&t, name)
    }

    fn score_bound(&self, mention: &SparseVector) -> f64 {
        positive_mass(self.params.translate(&self.space, mention).values())
    }

    fn find_best(&self, mention: &SparseVector, k: usize) -> RankedList<EntityId> {
        rank_translated(&self.space, &self.params.translate(&self.space, mention), k)
    }

    fn find_best_name(&self, mention: &SparseVector, entity: EntityId) -> Option<NameMatch> {
        let t = self.params.translate(&self.space, mention);
        best_name(entity, self.space.names_of(entity), |n| dot_translated(&t, n))
    }

    fn compile(&self) -> Result<CompiledNormalizationModel> {
        Ok(CompiledNormalizationModel::from_params(&self.space, &self.params))
    }
}

impl NormalizationModel for RawNormalizationModel {
    fn check(&self, delta: &NormalizationDelta) -> Result<()> {
        self.params.check(delta)
    }

    fn update(&mut self, delta: &NormalizationDelta) -> Result<()> {
        self.params.check(delta)?;
        self.params.apply(delta, 1.0)
    }

    fn gradient(&self, mention: &SparseVector, name: &SparseVector) -> NormalizationDelta {
        gradient(&self.space, mention, name)
    }

    fn cosine_weight(&self) -> f64 {
        self.params.cosine_weight
    }

    fn as_predictor(&self) -> &dyn NormalizationPredictor {
        self
    }
}

/// Coefficients of the bilinear score: `m_i·n_j` for every matrix cell and
/// the shared-token overlap for the cosine weight.
pub(crate) fn gradient(
    space: &NormalizationSpace,
    mention: &SparseVector,
    name: &SparseVector,
) -> NormalizationDelta {
    let mut delta = NormalizationDelta::default();
    for (i, mi) in mention.iter() {
        for (j, nj) in name.iter() {
            delta.matrix.push((i, j, mi * nj));
        }
        if let Some(j) = space.shared(i) {
            delta.cosine += mi * name.get(j);
        }
    }
    delta
}
