//! Dense-by-sparse matrices: one sparse row per row index.
//!
//! Rows are addressed by one dictionary and columns by another. Row access and
//! single-cell increments are cheap, which is the access pattern of training
//! updates. For inference the matrix is flattened into CSR with `to_csr`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMat};

use crate::error::{CoreError, CoreResult};
use crate::vector::SparseVector;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DenseBySparseMatrix {
    rows: Vec<BTreeMap<usize, f64>>,
    ncols: usize,
}

impl DenseBySparseMatrix {
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            rows: vec![BTreeMap::new(); nrows],
            ncols,
        }
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.rows.iter().map(BTreeMap::len).sum()
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.rows
            .get(row)
            .and_then(|r| r.get(&col))
            .copied()
            .unwrap_or(0.0)
    }

    /// Sparse row; empty for rows that were never written.
    pub fn row(&self, row: usize) -> Option<&BTreeMap<usize, f64>> {
        self.rows.get(row)
    }

    pub fn increment(&mut self, row: usize, col: usize, delta: f64) -> CoreResult<()> {
        if col >= self.ncols {
            return Err(CoreError::OutOfBounds {
                index: col,
                dim: self.ncols,
            });
        }
        let nrows = self.rows.len();
        let r = self
            .rows
            .get_mut(row)
            .ok_or(CoreError::OutOfBounds { index: row, dim: nrows })?;
        let cell = r.entry(col).or_insert(0.0);
        *cell += delta;
        if *cell == 0.0 {
            r.remove(&col);
        }
        Ok(())
    }

    /// Nonzero cells in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.rows
            .iter()
            .enumerate()
            .flat_map(|(r, row)| row.iter().map(move |(&c, &v)| (r, c, v)))
    }

    /// `self + scale * other`.
    pub fn scaled_sum(&self, other: &DenseBySparseMatrix, scale: f64) -> CoreResult<Self> {
        if self.nrows() != other.nrows() || self.ncols != other.ncols {
            return Err(CoreError::DimensionMismatch {
                expected: self.nrows() * self.ncols,
                found: other.nrows() * other.ncols,
            });
        }
        let mut out = self.clone();
        for (r, c, v) in other.iter() {
            out.increment(r, c, scale * v)?;
        }
        Ok(out)
    }

    /// Translate a row-space vector into column space: `xᵗ·M`.
    pub fn left_multiply(&self, x: &SparseVector) -> BTreeMap<usize, f64> {
        let mut out = BTreeMap::new();
        for (i, xi) in x.iter() {
            if let Some(row) = self.rows.get(i) {
                for (&j, &w) in row {
                    *out.entry(j).or_insert(0.0) += xi * w;
                }
            }
        }
        out
    }

    /// Flatten into compressed sparse row storage.
    pub fn to_csr(&self) -> CsMat<f64> {
        let mut triplets = TriMat::new((self.nrows(), self.ncols));
        for (r, c, v) in self.iter() {
            triplets.add_triplet(r, c, v);
        }
        triplets.to_csr()
    }
}
