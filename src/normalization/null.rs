use biojoint_core::{RankedList, SparseVector};

use super::{
    CompiledNormalizationModel, NameMatch, NormalizationDelta, NormalizationModel,
    NormalizationPredictor,
};
use crate::error::Result;
use crate::lexicon::{EntityId, TypeId};

/// Normalization switched off: every mention resolves to the unknown entity
/// with score 0, and updates are ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NullNormalizationModel {
    type_id: TypeId,
    unknown: EntityId,
}

impl NullNormalizationModel {
    pub fn new(type_id: TypeId, unknown: EntityId) -> Self {
        Self { type_id, unknown }
    }
}

impl NormalizationPredictor for NullNormalizationModel {
    fn type_id(&self) -> TypeId {
        self.type_id
    }

    fn unknown_entity(&self) -> EntityId {
        self.unknown
    }

    fn score_name_vector(&self, _mention: &SparseVector, _name: &SparseVector) -> f64 {
        0.0
    }

    fn score_bound(&self, _mention: &SparseVector) -> f64 {
        0.0
    }

    fn find_best(&self, _mention: &SparseVector, k: usize) -> RankedList<EntityId> {
        let mut list = RankedList::new(k);
        list.add(0.0, self.unknown);
        list
    }

    fn find_best_name(&self, _mention: &SparseVector, _entity: EntityId) -> Option<NameMatch> {
        None
    }

    fn compile(&self) -> Result<CompiledNormalizationModel> {
        Ok(CompiledNormalizationModel::empty(self.type_id, self.unknown))
    }
}

impl NormalizationModel for NullNormalizationModel {
    fn check(&self, _delta: &NormalizationDelta) -> Result<()> {
        Ok(())
    }

    fn update(&mut self, _delta: &NormalizationDelta) -> Result<()> {
        Ok(())
    }

    fn gradient(&self, _mention: &SparseVector, _name: &SparseVector) -> NormalizationDelta {
        NormalizationDelta::default()
    }

    fn cosine_weight(&self) -> f64 {
        0.0
    }

    fn as_predictor(&self) -> &dyn NormalizationPredictor {
        self
    }
}
