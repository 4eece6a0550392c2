//! Per-instance quadratic program over named parameter deltas.
//!
//! ```ignore
//! minimize    Σ Δ_v² + C · Σ ξ_k²
//! subject to  coeffs_k · Δ + ξ_k ≥ rhs_k
//! ```
//!
//! Variables are created on first use and keyed by the parameter they move.
//! Constraints without slack (`slack == false`, or no penalty configured)
//! are hard. `assemble` emits clarabel's conic form
//! `min ½xᵀPx + qᵀx  s.t.  Ax + s = b, s ≥ 0`, so every row is negated.

use std::collections::{BTreeMap, BTreeSet};

use clarabel::algebra::CscMatrix;
use log::trace;
use sprs::{CsMat, TriMat};

use crate::error::{BioJointError, Result};
use crate::lexicon::TypeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VariableKey {
    Recognition { state: usize, feature: usize },
    Cosine { type_id: TypeId },
    Normalization { type_id: TypeId, row: usize, col: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstraintFamily {
    Base,
    FalseNegative,
    FalsePositive,
    WrongNormalization,
    NormalizationOnly,
    NonNegativeCosine,
}

pub type Coefficients = BTreeMap<VariableKey, f64>;

/// `coefficients · Δ ≥ rhs`, relaxed by a slack variable when `slack`.
#[derive(Clone, Debug, PartialEq)]
pub struct Constraint {
    pub family: ConstraintFamily,
    pub coefficients: Coefficients,
    pub rhs: f64,
    pub slack: bool,
}

impl Constraint {
    pub fn new(family: ConstraintFamily, coefficients: Coefficients, rhs: f64) -> Self {
        Self {
            family,
            coefficients,
            rhs,
            slack: true,
        }
    }

    pub fn hard(mut self) -> Self {
        self.slack = false;
        self
    }

    /// Satisfied by the zero update regardless of the other constraints.
    pub fn is_trivial(&self) -> bool {
        self.coefficients.is_empty() && self.rhs <= 0.0
    }

    /// `coefficients · Δ` for a sparse assignment.
    pub fn evaluate(&self, delta: &Coefficients) -> f64 {
        self.coefficients
            .iter()
            .map(|(k, c)| c * delta.get(k).copied().unwrap_or(0.0))
            .sum()
    }
}

/// `target += scale * source`.
pub fn axpy(target: &mut Coefficients, source: &Coefficients, scale: f64) {
    for (&k, &v) in source {
        *target.entry(k).or_insert(0.0) += scale * v;
    }
}

#[derive(Clone, Debug)]
pub struct QpModel {
    constraints: Vec<Constraint>,
    slack_penalty: Option<f64>,
}

/// Solver-ready matrices plus the variable order they use.
pub struct QpProblem {
    pub variables: Vec<VariableKey>,
    pub slack_count: usize,
    pub p: CscMatrix<f64>,
    pub q: Vec<f64>,
    pub a: CscMatrix<f64>,
    pub b: Vec<f64>,
}

impl QpModel {
    pub fn new(slack_penalty: Option<f64>) -> Self {
        Self {
            constraints: Vec::new(),
            slack_penalty,
        }
    }

    pub fn push(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Remove zero coefficients, then drop trivially satisfied constraints.
    /// Returns how many constraints were dropped.
    pub fn prune(&mut self) -> usize {
        for c in &mut self.constraints {
            c.coefficients.retain(|_, v| *v != 0.0);
        }
        let before = self.constraints.len();
        self.constraints.retain(|c| !c.is_trivial());
        let dropped = before - self.constraints.len();
        trace!("pruned {} trivial constraints, {} remain", dropped, self.constraints.len());
        dropped
    }

    /// Variables referenced by at least one constraint, in key order.
    pub fn variables(&self) -> Vec<VariableKey> {
        self.constraints
            .iter()
            .flat_map(|c| c.coefficients.keys().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn uses(&self, key: &VariableKey) -> bool {
        self.constraints
            .iter()
            .any(|c| c.coefficients.contains_key(key))
    }

    pub fn assemble(&self) -> Result<QpProblem> {
        if self.constraints.is_empty() {
            return Err(BioJointError::InvariantViolation(
                "cannot assemble a QP without constraints".into(),
            ));
        }
        let variables = self.variables();
        let column: BTreeMap<VariableKey, usize> =
            variables.iter().enumerate().map(|(i, &k)| (k, i)).collect();

        let mut slack_column = Vec::with_capacity(self.constraints.len());
        let mut slack_count = 0;
        for c in &self.constraints {
            if c.slack && self.slack_penalty.is_some() {
                slack_column.push(Some(variables.len() + slack_count));
                slack_count += 1;
            } else {
                slack_column.push(None);
            }
        }

        let n = variables.len() + slack_count;
        let m = self.constraints.len();

        let penalty = self.slack_penalty.unwrap_or(0.0);
        let diagonal: Vec<f64> = (0..n)
            .map(|i| if i < variables.len() { 2.0 } else { 2.0 * penalty })
            .collect();
        let p = CscMatrix::new(n, n, (0..=n).collect(), (0..n).collect(), diagonal);

        let mut triplets = TriMat::new((m, n));
        let mut b = Vec::with_capacity(m);
        for (row, (c, slack)) in self.constraints.iter().zip(&slack_column).enumerate() {
            for (key, &v) in &c.coefficients {
                triplets.add_triplet(row, column[key], -v);
            }
            if let Some(s) = slack {
                triplets.add_triplet(row, *s, -1.0);
            }
            b.push(-c.rhs);
        }
        let csc: CsMat<f64> = triplets.to_csc();
        let (indptr, indices, data) = csc.into_raw_storage();
        let a = CscMatrix::new(m, n, indptr, indices, data);

        Ok(QpProblem {
            variables,
            slack_count,
            p,
            q: vec![0.0; n],
            a,
            b,
        })
    }
}
