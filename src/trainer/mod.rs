//! Online margin trainer.
//!
//! After each decoded training instance that disagrees with its target, the
//! trainer builds one QP (see `qp`) from several constraint families (see
//! `constraints`) and solves it for the smallest joint update of the
//! recognition and normalization weights that makes the target outscore the
//! prediction by its loss. The solve runs on a worker thread with a timeout;
//! a failed or late solve skips the instance instead of failing training.
//!
//! Decoding and linearization use the weights being trained
//! (`TrainableModel::current`), never an averaged model's running mean.

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::annotator::Annotator;
use crate::error::{BioJointError, Result};
use crate::model::{JointScorer, TrainableModel};
use crate::normalization::NormalizationDelta;
use crate::recognition::RecognitionDelta;
use crate::text::{AnnotatedSegment, TextInstance};

pub mod constraints;
pub mod qp;
pub mod solver;

pub use constraints::ner_loss;
pub use qp::{Constraint, ConstraintFamily, QpModel, VariableKey};
pub use solver::SolveError;

use constraints::ConstraintBuilder;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Alternatives considered per mention by the normalization families.
    pub max_alternatives: usize,
    /// Required score gap between a correct and an incorrect entity.
    pub normalization_margin: f64,
    /// Weight `C` of `Σ slack²`; `None` makes every constraint hard.
    pub slack_penalty: Option<f64>,
    /// Cap on the L2 norm of one update.
    pub max_step_size: Option<f64>,
    pub solver_timeout: Duration,
    pub enforce_nonnegative_cosine: bool,
    pub normalization_only_constraints: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_alternatives: 5,
            normalization_margin: 1.0,
            slack_penalty: Some(1.0),
            max_step_size: None,
            solver_timeout: Duration::from_secs(10),
            enforce_nonnegative_cosine: true,
            normalization_only_constraints: false,
        }
    }
}

impl TrainerConfig {
    /// Hard constraints, uncapped steps.
    pub fn hard_margin() -> Self {
        Self {
            slack_penalty: None,
            ..Self::default()
        }
    }

    /// Adds the normalization-only family on every gold mention.
    pub fn normalization_focused() -> Self {
        Self {
            normalization_only_constraints: true,
            max_alternatives: 10,
            ..Self::default()
        }
    }

    pub fn with_max_alternatives(mut self, n: usize) -> Self {
        self.max_alternatives = n;
        self
    }

    pub fn with_normalization_margin(mut self, margin: f64) -> Self {
        self.normalization_margin = margin;
        self
    }

    pub fn with_slack_penalty(mut self, penalty: Option<f64>) -> Self {
        self.slack_penalty = penalty;
        self
    }

    pub fn with_max_step_size(mut self, step: Option<f64>) -> Self {
        self.max_step_size = step;
        self
    }

    pub fn with_solver_timeout(mut self, timeout: Duration) -> Self {
        self.solver_timeout = timeout;
        self
    }

    pub fn with_nonnegative_cosine(mut self, enforce: bool) -> Self {
        self.enforce_nonnegative_cosine = enforce;
        self
    }

    pub fn with_normalization_only_constraints(mut self, enabled: bool) -> Self {
        self.normalization_only_constraints = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_alternatives == 0 {
            return Err(BioJointError::Config("max_alternatives must be positive".into()));
        }
        if !self.normalization_margin.is_finite() || self.normalization_margin < 0.0 {
            return Err(BioJointError::Config(format!(
                "normalization_margin must be finite and non-negative, got {}",
                self.normalization_margin
            )));
        }
        if let Some(c) = self.slack_penalty {
            if !c.is_finite() || c <= 0.0 {
                return Err(BioJointError::Config(format!(
                    "slack_penalty must be finite and positive, got {}",
                    c
                )));
            }
        }
        if let Some(step) = self.max_step_size {
            if !step.is_finite() || step <= 0.0 {
                return Err(BioJointError::Config(format!(
                    "max_step_size must be finite and positive, got {}",
                    step
                )));
            }
        }
        if self.solver_timeout.is_zero() {
            return Err(BioJointError::Config("solver_timeout must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum UpdateOutcome {
    /// Prediction already matches the target.
    NoViolation,
    Applied {
        constraints: usize,
        variables: usize,
        /// L2 norm of the applied update, after step capping.
        step_norm: f64,
    },
    /// The instance was abandoned; weights are unchanged.
    Skipped { reason: String },
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied { .. })
    }
}

/// Totals of one pass over a training set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EpochStats {
    pub instances: usize,
    pub correct: usize,
    pub applied: usize,
    pub skipped: usize,
}

#[derive(Clone, Debug)]
pub struct MarginTrainer {
    annotator: Annotator,
    config: TrainerConfig,
}

impl MarginTrainer {
    pub fn new(annotator: Annotator, config: TrainerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { annotator, config })
    }

    pub fn annotator(&self) -> &Annotator {
        &self.annotator
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Decode `instance` with the current weights, update on disagreement
    /// with its target, then advance the model's progress counter.
    ///
    /// The decoded score is always checked against an independent rescoring
    /// of its path; a mismatch is an `InvariantViolation`.
    pub fn train_instance(&self, model: &mut TrainableModel, instance: &TextInstance) -> Result<UpdateOutcome> {
        let target = instance.target().ok_or_else(|| BioJointError::Instance {
            id: instance.id().to_string(),
            reason: "no target annotation to train on".into(),
        })?;
        let current = model.current();
        let (predicted, _) = self.annotator.decode(&current, instance)?;
        if !self.annotator.config().verify_scores {
            self.annotator.verify(&current, instance, &predicted)?;
        }
        let outcome = self.update(model, instance, target, &predicted.path)?;
        model.progress().advance();
        Ok(outcome)
    }

    /// One pass over `instances` in order.
    pub fn train_epoch(&self, model: &mut TrainableModel, instances: &[TextInstance]) -> Result<EpochStats> {
        let start = Instant::now();
        let mut stats = EpochStats::default();
        for instance in instances {
            stats.instances += 1;
            match self.train_instance(model, instance)? {
                UpdateOutcome::NoViolation => stats.correct += 1,
                UpdateOutcome::Applied { .. } => stats.applied += 1,
                UpdateOutcome::Skipped { .. } => stats.skipped += 1,
            }
        }
        info!(
            "epoch: {} instances, {} correct, {} updated, {} skipped in {:?}",
            stats.instances,
            stats.correct,
            stats.applied,
            stats.skipped,
            start.elapsed()
        );
        Ok(stats)
    }

    /// Minimal joint update making `target` beat `predicted` by its loss.
    pub fn update(
        &self,
        model: &mut TrainableModel,
        instance: &TextInstance,
        target: &[AnnotatedSegment],
        predicted: &[AnnotatedSegment],
    ) -> Result<UpdateOutcome> {
        instance.validate_path(target)?;
        instance.validate_path(predicted)?;
        if same_annotation(target, predicted) {
            return Ok(UpdateOutcome::NoViolation);
        }

        let qp = ConstraintBuilder::new(&*model, &self.annotator, instance, &self.config)
            .build(target, predicted)?;
        if qp.is_empty() {
            debug!("instance `{}`: every constraint is trivially satisfied", instance.id());
            return Ok(UpdateOutcome::Skipped {
                reason: "no active constraints".into(),
            });
        }
        let problem = qp.assemble()?;
        let variables = problem.variables.clone();

        let solution = match solver::solve(problem, self.config.solver_timeout) {
            Ok(x) => x,
            Err(e) => {
                warn!("instance `{}`: skipping update, {}", instance.id(), e);
                return Ok(UpdateOutcome::Skipped {
                    reason: e.to_string(),
                });
            }
        };
        if solution.len() < variables.len() || solution.iter().any(|v| !v.is_finite()) {
            warn!("instance `{}`: skipping update, malformed solution", instance.id());
            return Ok(UpdateOutcome::Skipped {
                reason: "solver returned a malformed solution".into(),
            });
        }

        let delta = &solution[..variables.len()];
        let norm = delta.iter().map(|v| v * v).sum::<f64>().sqrt();
        let scale = match self.config.max_step_size {
            Some(max) if norm > max => max / norm,
            _ => 1.0,
        };
        let (recognition, normalization) = split(&variables, delta, scale, model.type_count());
        model.apply(&recognition, &normalization)?;

        debug!(
            "instance `{}`: applied update over {} variables, norm {:.4} (scale {:.3})",
            instance.id(),
            variables.len(),
            norm * scale,
            scale
        );
        Ok(UpdateOutcome::Applied {
            constraints: qp.len(),
            variables: variables.len(),
            step_norm: norm * scale,
        })
    }
}

/// Same segments and labels, and every predicted entity linked by the target.
pub fn same_annotation(target: &[AnnotatedSegment], predicted: &[AnnotatedSegment]) -> bool {
    target.len() == predicted.len()
        && target.iter().zip(predicted).all(|(t, p)| {
            t.segment() == p.segment()
                && t.label() == p.label()
                && p.entities().iter().all(|&e| t.links(e))
        })
}

/// Scatter a solution back into per-block deltas.
fn split(
    variables: &[qp::VariableKey],
    values: &[f64],
    scale: f64,
    type_count: usize,
) -> (RecognitionDelta, Vec<NormalizationDelta>) {
    let mut recognition = RecognitionDelta::default();
    let mut normalization = vec![NormalizationDelta::default(); type_count];
    for (key, &value) in variables.iter().zip(values) {
        let v = scale * value;
        if v == 0.0 {
            continue;
        }
        match *key {
            VariableKey::Recognition { state, feature } => recognition.entries.push((state, feature, v)),
            VariableKey::Cosine { type_id } => {
                if let Some(d) = normalization.get_mut(type_id) {
                    d.cosine += v;
                }
            }
            VariableKey::Normalization { type_id, row, col } => {
                if let Some(d) = normalization.get_mut(type_id) {
                    d.matrix.push((row, col, v));
                }
            }
        }
    }
    (recognition, normalization)
}
