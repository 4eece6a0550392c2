//! Joint recognition and normalization of biomedical entity mentions.
//!
//! A sentence arrives as a `TextInstance`: tokens plus a lattice of candidate
//! segments, each carrying recognition features and a mention vector. The
//! `Annotator` finds the best segmentation, labelling and entity link in one
//! pass, pruning with the normalization models' score bounds. The
//! `MarginTrainer` turns each mistake into a small quadratic program and
//! updates recognition and normalization weights jointly.
//!
//! Modules:
//! - `lexicon` / `index`: entity catalog, ambiguity classes, disambiguation order
//! - `normalization`: bilinear mention → name scorer (raw, averaged, compiled, cached, null)
//! - `recognition`: per-label linear segment scorer
//! - `model`: the joint model seen by the decoder and the trainer
//! - `annotator`: branch-and-bound semi-Markov decoder
//! - `trainer`: MIRA-style margin updates solved as a QP
//! - `pipeline`: persisted inference bundle
//!
//! Numeric containers live in `biojoint-core`.

pub mod annotator;
pub mod error;
pub mod index;
pub mod lexicon;
pub mod model;
pub mod normalization;
pub mod pipeline;
pub mod progress;
pub mod recognition;
pub mod text;
pub mod trainer;

pub use annotator::{Annotator, DecodeStats, DecoderConfig, ScoredPath};
pub use error::{BioJointError, Result};
pub use index::{AmbiguityClass, EntityOrdering, FrequencyOrdering, Index};
pub use lexicon::{Entity, EntityId, EntityKind, EntityName, Label, Lexicon, TypeId};
pub use model::{CompiledModel, JointScorer, TrainableModel};
pub use pipeline::Pipeline;
pub use progress::TrainingProgress;
pub use text::{AnnotatedSegment, MentionName, Segment, StateSequence, TextInstance, Token};
pub use trainer::{MarginTrainer, TrainerConfig, UpdateOutcome};

/// Tolerance for every score comparison: pruning, verification and margins.
pub const SCORE_EPSILON: f64 = 1e-6;

#[cfg(test)]
mod tests;
