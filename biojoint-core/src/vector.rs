//! Sparse and dense vectors over a dictionary.
//!
//! `SparseVector` wraps a `sprs::CsVec` with the invariants the rest of the
//! crate relies on: sorted indices, no explicit zeros, finite values. Under
//! those invariants exact equality is well defined, so sparse vectors hash by
//! value and can key ambiguity classes and caches.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use sprs::CsVec;

use crate::error::{CoreError, CoreResult};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SparseVector {
    inner: CsVec<f64>,
}

impl SparseVector {
    /// The all-zero vector of dimension `dim`.
    pub fn zero(dim: usize) -> Self {
        Self {
            inner: CsVec::empty(dim),
        }
    }

    /// Build from (index, value) pairs. Repeated indices are summed and
    /// entries that end up at exactly zero are dropped.
    pub fn from_pairs<I>(dim: usize, pairs: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = (usize, f64)>,
    {
        let mut acc: BTreeMap<usize, f64> = BTreeMap::new();
        for (index, value) in pairs {
            if index >= dim {
                return Err(CoreError::OutOfBounds { index, dim });
            }
            if !value.is_finite() {
                return Err(CoreError::NonFinite { index, value });
            }
            *acc.entry(index).or_insert(0.0) += value;
        }
        let (indices, data): (Vec<usize>, Vec<f64>) =
            acc.into_iter().filter(|(_, v)| *v != 0.0).unzip();
        Ok(Self {
            inner: CsVec::new(dim, indices, data),
        })
    }

    /// Bag-of-tokens vector: each token index counts once per occurrence.
    pub fn from_counts<I>(dim: usize, tokens: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = usize>,
    {
        Self::from_pairs(dim, tokens.into_iter().map(|t| (t, 1.0)))
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.inner.dim()
    }

    #[inline]
    pub fn nnz(&self) -> usize {
        self.inner.nnz()
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.inner.nnz() == 0
    }

    #[inline]
    pub fn get(&self, index: usize) -> f64 {
        self.inner.get(index).copied().unwrap_or(0.0)
    }

    /// Nonzero entries in increasing index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.inner.iter().map(|(i, &v)| (i, v))
    }

    pub fn indices(&self) -> &[usize] {
        self.inner.indices()
    }

    /// Sparse-sparse dot product by merging the sorted index lists.
    pub fn dot(&self, other: &SparseVector) -> f64 {
        let (ai, av) = (self.inner.indices(), self.inner.data());
        let (bi, bv) = (other.inner.indices(), other.inner.data());
        let (mut p, mut q) = (0, 0);
        let mut sum = 0.0;
        while p < ai.len() && q < bi.len() {
            match ai[p].cmp(&bi[q]) {
                std::cmp::Ordering::Less => p += 1,
                std::cmp::Ordering::Greater => q += 1,
                std::cmp::Ordering::Equal => {
                    sum += av[p] * bv[q];
                    p += 1;
                    q += 1;
                }
            }
        }
        sum
    }

    pub fn l2_norm(&self) -> f64 {
        self.inner.data().iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// Largest coordinate, 0.0 for the zero vector.
    pub fn max_value(&self) -> f64 {
        self.inner
            .data()
            .iter()
            .copied()
            .fold(0.0_f64, |m, v| if v > m { v } else { m })
    }

    /// Smallest coordinate, 0.0 for the zero vector.
    pub fn min_value(&self) -> f64 {
        self.inner
            .data()
            .iter()
            .copied()
            .fold(0.0_f64, |m, v| if v < m { v } else { m })
    }

    pub fn as_csvec(&self) -> &CsVec<f64> {
        &self.inner
    }
}

impl PartialEq for SparseVector {
    fn eq(&self, other: &Self) -> bool {
        self.dim() == other.dim()
            && self.inner.indices() == other.inner.indices()
            && self
                .inner
                .data()
                .iter()
                .zip(other.inner.data())
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

// values are finite and nonzero, so bitwise equality is an equivalence
impl Eq for SparseVector {}

impl Hash for SparseVector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dim().hash(state);
        self.inner.indices().hash(state);
        for v in self.inner.data() {
            v.to_bits().hash(state);
        }
    }
}

/// Dense weight vector, the mutable counterpart of `SparseVector`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DenseVector {
    values: Vec<f64>,
}

impl DenseVector {
    pub fn zeros(dim: usize) -> Self {
        Self {
            values: vec![0.0; dim],
        }
    }

    pub fn from_vec(values: Vec<f64>) -> Self {
        Self { values }
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn get(&self, index: usize) -> f64 {
        self.values.get(index).copied().unwrap_or(0.0)
    }

    pub fn increment(&mut self, index: usize, delta: f64) -> CoreResult<()> {
        let dim = self.values.len();
        let slot = self
            .values
            .get_mut(index)
            .ok_or(CoreError::OutOfBounds { index, dim })?;
        *slot += delta;
        Ok(())
    }

    pub fn dot_sparse(&self, other: &SparseVector) -> f64 {
        other.iter().map(|(i, v)| self.get(i) * v).sum()
    }

    /// `self + scale * other`, element-wise.
    pub fn scaled_sum(&self, other: &DenseVector, scale: f64) -> CoreResult<DenseVector> {
        if self.dim() != other.dim() {
            return Err(CoreError::DimensionMismatch {
                expected: self.dim(),
                found: other.dim(),
            });
        }
        Ok(DenseVector {
            values: self
                .values
                .iter()
                .zip(&other.values)
                .map(|(a, b)| a + scale * b)
                .collect(),
        })
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}
