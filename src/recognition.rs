//! Recognition model: per-label linear weights over segment features.
//!
//! `score(label, features) = w_label · features`. The raw weights are
//! trainable directly; the averaged variant keeps the accumulator pair used
//! by `normalization::averaged` so both parameter blocks average identically,
//! and likewise scores with the running mean.

use biojoint_core::{DenseVector, SparseVector};
use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::{BioJointError, Result};
use crate::lexicon::Label;
use crate::progress::TrainingProgress;

/// Sparse update to the recognition weights: (state, feature, delta).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecognitionDelta {
    pub entries: Vec<(usize, usize, f64)>,
}

impl RecognitionDelta {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub trait RecognitionModel: Send + Sync {
    fn score(&self, label: Label, features: &SparseVector) -> f64;

    /// Validate `delta` against the weight shape without applying it.
    fn check(&self, delta: &RecognitionDelta) -> Result<()>;

    /// Apply `delta`. Validates every entry before touching any weight.
    fn update(&mut self, delta: &RecognitionDelta) -> Result<()>;

    /// Plain weights for inference, scoring exactly like `score`.
    fn compile(&self) -> Result<RecognitionWeights>;

    /// Weights being trained.
    fn current(&self) -> &RecognitionWeights;

    fn state_count(&self) -> usize;

    fn feature_dim(&self) -> usize;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecognitionWeights {
    states: Vec<DenseVector>,
    feature_dim: usize,
}

impl RecognitionWeights {
    pub fn zeros(state_count: usize, feature_dim: usize) -> Self {
        Self {
            states: vec![DenseVector::zeros(feature_dim); state_count],
            feature_dim,
        }
    }

    pub fn weight(&self, state: usize, feature: usize) -> f64 {
        self.states.get(state).map_or(0.0, |w| w.get(feature))
    }

    fn validate(&self, delta: &RecognitionDelta) -> Result<()> {
        for &(state, feature, value) in &delta.entries {
            if state >= self.states.len() || feature >= self.feature_dim {
                return Err(BioJointError::InvariantViolation(format!(
                    "recognition update ({}, {}) outside {}x{}",
                    state,
                    feature,
                    self.states.len(),
                    self.feature_dim
                )));
            }
            if !value.is_finite() {
                return Err(BioJointError::InvariantViolation(format!(
                    "non-finite recognition update at ({}, {})",
                    state, feature
                )));
            }
        }
        Ok(())
    }

    fn apply(&mut self, delta: &RecognitionDelta, scale: f64) -> Result<()> {
        for &(state, feature, value) in &delta.entries {
            self.states[state].increment(feature, scale * value)?;
        }
        Ok(())
    }

    pub fn is_finite(&self) -> bool {
        self.states
            .iter()
            .all(|w| w.as_slice().iter().all(|v| v.is_finite()))
    }

    /// `self + scale * other`.
    fn scaled_sum(&self, other: &RecognitionWeights, scale: f64) -> Result<Self> {
        let states = self
            .states
            .iter()
            .zip(&other.states)
            .map(|(a, b)| a.scaled_sum(b, scale))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self {
            states,
            feature_dim: self.feature_dim,
        })
    }
}

impl RecognitionModel for RecognitionWeights {
    fn score(&self, label: Label, features: &SparseVector) -> f64 {
        self.states
            .get(label.state())
            .map_or(0.0, |w| w.dot_sparse(features))
    }

    fn check(&self, delta: &RecognitionDelta) -> Result<()> {
        self.validate(delta)
    }

    fn update(&mut self, delta: &RecognitionDelta) -> Result<()> {
        self.validate(delta)?;
        self.apply(delta, 1.0)
    }

    fn compile(&self) -> Result<RecognitionWeights> {
        Ok(self.clone())
    }

    fn current(&self) -> &RecognitionWeights {
        self
    }

    fn state_count(&self) -> usize {
        self.states.len()
    }

    fn feature_dim(&self) -> usize {
        self.feature_dim
    }
}

/// Averaged recognition weights: `W` plus `W₂ = Σ count·Δ`, scoring with
/// `W − W₂/count`.
#[derive(Clone, Debug)]
pub struct AveragedRecognitionWeights {
    current: RecognitionWeights,
    accumulated: RecognitionWeights,
    progress: TrainingProgress,
}

impl AveragedRecognitionWeights {
    pub fn new(state_count: usize, feature_dim: usize, progress: TrainingProgress) -> Self {
        Self {
            current: RecognitionWeights::zeros(state_count, feature_dim),
            accumulated: RecognitionWeights::zeros(state_count, feature_dim),
            progress,
        }
    }

    /// Running mean `W − W₂/count`.
    pub fn averaged(&self) -> Result<RecognitionWeights> {
        let count = self.progress.count();
        let mean = self
            .current
            .scaled_sum(&self.accumulated, -1.0 / count as f64)
            .map_err(|e| BioJointError::InvariantViolation(format!("averaging recognition: {}", e)))?;
        if !mean.is_finite() {
            return Err(BioJointError::InvariantViolation(format!(
                "averaged recognition weights are not finite at count {}",
                count
            )));
        }
        Ok(mean)
    }
}

impl RecognitionModel for AveragedRecognitionWeights {
    fn score(&self, label: Label, features: &SparseVector) -> f64 {
        let count = self.progress.count() as f64;
        self.current.score(label, features) - self.accumulated.score(label, features) / count
    }

    fn check(&self, delta: &RecognitionDelta) -> Result<()> {
        self.current.validate(delta)
    }

    fn update(&mut self, delta: &RecognitionDelta) -> Result<()> {
        self.current.validate(delta)?;
        let count = self.progress.count() as f64;
        trace!("averaged recognition update at count {}", count);
        self.current.apply(delta, 1.0)?;
        self.accumulated.apply(delta, count)
    }

    fn compile(&self) -> Result<RecognitionWeights> {
        self.averaged()
    }

    fn current(&self) -> &RecognitionWeights {
        &self.current
    }

    fn state_count(&self) -> usize {
        self.current.state_count()
    }

    fn feature_dim(&self) -> usize {
        self.current.feature_dim()
    }
}
