//! Joint model: one recognition block plus one normalization block per type.
//!
//! The decoder only needs the read side (`JointScorer`); the trainer works on
//! `TrainableModel`, whose blocks it updates together. `compile` turns a
//! trainable model into the serializable `CompiledModel` used at inference.
//!
//! A `TrainableModel` scores like its compiled form: averaged blocks predict
//! with their running mean. The trainer decodes and linearizes through
//! `TrainableModel::current`, which scores with the weights being trained.

use std::sync::Arc;

use biojoint_core::{Dictionary, SparseVector};
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{BioJointError, Result};
use crate::lexicon::{Label, Lexicon, TypeId};
use crate::normalization::{
    AveragedNormalizationModel, CachedNormalizationModel, CompiledNormalizationModel,
    NormalizationConfig, NormalizationDelta, NormalizationModel, NormalizationPredictor,
    NormalizationSpace, NullNormalizationModel, RawNormalizationModel,
};
use crate::progress::TrainingProgress;
use crate::recognition::{
    AveragedRecognitionWeights, RecognitionDelta, RecognitionModel, RecognitionWeights,
};

/// Read-only scoring surface used by the decoder.
pub trait JointScorer: Send + Sync {
    fn recognition_score(&self, label: Label, features: &SparseVector) -> f64;

    fn normalizer(&self, type_id: TypeId) -> Result<&dyn NormalizationPredictor>;

    fn type_count(&self) -> usize;
}

pub struct TrainableModel {
    recognition: Box<dyn RecognitionModel>,
    normalizers: Vec<Box<dyn NormalizationModel>>,
    progress: TrainingProgress,
}

impl std::fmt::Debug for TrainableModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainableModel")
            .field("normalizers", &self.normalizers.len())
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

impl TrainableModel {
    /// `normalizers[t]` must serve type `t`; recognition needs one state per
    /// type plus the non-entity state.
    pub fn new(
        recognition: Box<dyn RecognitionModel>,
        normalizers: Vec<Box<dyn NormalizationModel>>,
        progress: TrainingProgress,
    ) -> Result<Self> {
        if normalizers.is_empty() {
            return Err(BioJointError::Config("at least one normalizer is required".into()));
        }
        for (t, model) in normalizers.iter().enumerate() {
            if model.type_id() != t {
                return Err(BioJointError::Config(format!(
                    "normalizer at position {} serves type {}",
                    t,
                    model.type_id()
                )));
            }
        }
        if recognition.state_count() != normalizers.len() + 1 {
            return Err(BioJointError::Config(format!(
                "recognition has {} states, expected {}",
                recognition.state_count(),
                normalizers.len() + 1
            )));
        }
        Ok(Self {
            recognition,
            normalizers,
            progress,
        })
    }

    /// Averaged recognition and normalization blocks sharing one progress
    /// counter. Normalizers are cached when `config.cache_capacity > 0`.
    pub fn averaged(
        lexicon: &Arc<Lexicon>,
        feature_dim: usize,
        mentions: &Dictionary,
        config: &NormalizationConfig,
    ) -> Result<Self> {
        let progress = TrainingProgress::new();
        let recognition =
            AveragedRecognitionWeights::new(lexicon.state_count(), feature_dim, progress.clone());
        let mut normalizers: Vec<Box<dyn NormalizationModel>> = Vec::new();
        for t in 0..lexicon.type_count() {
            let space = Arc::new(NormalizationSpace::new(Arc::clone(lexicon), t, mentions)?);
            let model = AveragedNormalizationModel::new(space, config, progress.clone())?;
            normalizers.push(with_cache(model, config)?);
        }
        info!(
            "averaged joint model: {} types, {} features, {} mention tokens",
            lexicon.type_count(),
            feature_dim,
            mentions.len()
        );
        Self::new(Box::new(recognition), normalizers, progress)
    }

    /// Raw blocks: updates land directly in the weights used for prediction.
    pub fn raw(
        lexicon: &Arc<Lexicon>,
        feature_dim: usize,
        mentions: &Dictionary,
        config: &NormalizationConfig,
    ) -> Result<Self> {
        let recognition = RecognitionWeights::zeros(lexicon.state_count(), feature_dim);
        let mut normalizers: Vec<Box<dyn NormalizationModel>> = Vec::new();
        for t in 0..lexicon.type_count() {
            let space = Arc::new(NormalizationSpace::new(Arc::clone(lexicon), t, mentions)?);
            normalizers.push(with_cache(RawNormalizationModel::new(space, config)?, config)?);
        }
        Self::new(Box::new(recognition), normalizers, TrainingProgress::new())
    }

    /// Recognition only; every mention resolves to its type's unknown entity.
    pub fn recognition_only(lexicon: &Lexicon, feature_dim: usize) -> Result<Self> {
        let recognition = RecognitionWeights::zeros(lexicon.state_count(), feature_dim);
        let normalizers = (0..lexicon.type_count())
            .map(|t| {
                let unknown = lexicon.unknown_entity(t)?;
                Ok(Box::new(NullNormalizationModel::new(t, unknown)) as Box<dyn NormalizationModel>)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(Box::new(recognition), normalizers, TrainingProgress::new())
    }

    pub fn progress(&self) -> &TrainingProgress {
        &self.progress
    }

    pub fn recognition(&self) -> &dyn RecognitionModel {
        self.recognition.as_ref()
    }

    pub fn normalization(&self, t: TypeId) -> Result<&dyn NormalizationModel> {
        self.normalizers
            .get(t)
            .map(|m| m.as_ref())
            .ok_or_else(|| BioJointError::UnknownType(t.to_string()))
    }

    /// Apply one joint update. `normalization[t]` is the delta of type `t`.
    ///
    /// Every block is validated before any weight changes.
    pub fn apply(
        &mut self,
        recognition: &RecognitionDelta,
        normalization: &[NormalizationDelta],
    ) -> Result<()> {
        if normalization.len() != self.normalizers.len() {
            return Err(BioJointError::InvariantViolation(format!(
                "{} normalization deltas for {} types",
                normalization.len(),
                self.normalizers.len()
            )));
        }
        self.recognition.check(recognition)?;
        for (model, delta) in self.normalizers.iter().zip(normalization) {
            model.check(delta)?;
        }

        self.recognition.update(recognition)?;
        for (model, delta) in self.normalizers.iter_mut().zip(normalization) {
            if !delta.is_empty() {
                model.update(delta)?;
            }
        }
        debug!(
            "applied joint update: {} recognition entries, {} normalization entries",
            recognition.entries.len(),
            normalization.iter().map(|d| d.matrix.len()).sum::<usize>()
        );
        Ok(())
    }

    /// Inference copy; averaged blocks contribute their running mean.
    pub fn compile(&self) -> Result<CompiledModel> {
        let start = std::time::Instant::now();
        let normalizers = self
            .normalizers
            .par_iter()
            .map(|m| m.compile())
            .collect::<Result<Vec<_>>>()?;
        let compiled = CompiledModel {
            recognition: self.recognition.compile()?,
            normalizers,
        };
        info!(
            "compiled joint model at progress {} in {:?}",
            self.progress.count(),
            start.elapsed()
        );
        Ok(compiled)
    }

    /// Scoring view over the weights being trained.
    pub fn current(&self) -> CurrentWeights<'_> {
        CurrentWeights { model: self }
    }

    /// Predictor of type `t` over the weights being trained.
    pub fn training_predictor(&self, t: TypeId) -> Result<&dyn NormalizationPredictor> {
        let model = self.normalization(t)?;
        Ok(model.training_surface().unwrap_or_else(|| model.as_predictor()))
    }
}

fn with_cache<M: NormalizationModel + 'static>(
    model: M,
    config: &NormalizationConfig,
) -> Result<Box<dyn NormalizationModel>> {
    if config.cache_capacity == 0 {
        return Ok(Box::new(model));
    }
    Ok(Box::new(CachedNormalizationModel::new(model, config.cache_capacity)?))
}

impl JointScorer for TrainableModel {
    fn recognition_score(&self, label: Label, features: &SparseVector) -> f64 {
        self.recognition.score(label, features)
    }

    fn normalizer(&self, type_id: TypeId) -> Result<&dyn NormalizationPredictor> {
        self.normalization(type_id).map(|m| m.as_predictor())
    }

    fn type_count(&self) -> usize {
        self.normalizers.len()
    }
}

/// `TrainableModel` scored with its current weights instead of any running
/// mean. Identical to the model itself when no block is averaged.
#[derive(Clone, Copy)]
pub struct CurrentWeights<'a> {
    model: &'a TrainableModel,
}

impl JointScorer for CurrentWeights<'_> {
    fn recognition_score(&self, label: Label, features: &SparseVector) -> f64 {
        self.model.recognition.current().score(label, features)
    }

    fn normalizer(&self, type_id: TypeId) -> Result<&dyn NormalizationPredictor> {
        self.model.training_predictor(type_id)
    }

    fn type_count(&self) -> usize {
        self.model.normalizers.len()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompiledModel {
    recognition: RecognitionWeights,
    normalizers: Vec<CompiledNormalizationModel>,
}

impl CompiledModel {
    pub fn recognition(&self) -> &RecognitionWeights {
        &self.recognition
    }

    pub fn normalizers(&self) -> &[CompiledNormalizationModel] {
        &self.normalizers
    }
}

impl JointScorer for CompiledModel {
    fn recognition_score(&self, label: Label, features: &SparseVector) -> f64 {
        self.recognition.score(label, features)
    }

    fn normalizer(&self, type_id: TypeId) -> Result<&dyn NormalizationPredictor> {
        self.normalizers
            .get(type_id)
            .map(|m| m as &dyn NormalizationPredictor)
            .ok_or_else(|| BioJointError::UnknownType(type_id.to_string()))
    }

    fn type_count(&self) -> usize {
        self.normalizers.len()
    }
}
