use std::collections::HashSet;

use approx::assert_relative_eq;

use crate::error::CoreError;
use crate::vector::{DenseVector, SparseVector};

#[test]
fn test_from_pairs_sums_and_drops_zeros() {
    crate::init();
    let v = SparseVector::from_pairs(5, [(3, 1.0), (1, 2.0), (3, 0.5), (4, 1.0), (4, -1.0)])
        .unwrap();
    assert_eq!(v.nnz(), 2);
    assert_eq!(v.indices(), &[1, 3]);
    assert_relative_eq!(v.get(3), 1.5);
    assert_eq!(v.get(4), 0.0);
}

#[test]
fn test_from_pairs_validates() {
    assert_eq!(
        SparseVector::from_pairs(2, [(2, 1.0)]).unwrap_err(),
        CoreError::OutOfBounds { index: 2, dim: 2 }
    );
    assert!(matches!(
        SparseVector::from_pairs(2, [(0, f64::NAN)]),
        Err(CoreError::NonFinite { index: 0, .. })
    ));
}

#[test]
fn test_sparse_dot_and_norm() {
    let a = SparseVector::from_pairs(6, [(0, 1.0), (2, 2.0), (5, 3.0)]).unwrap();
    let b = SparseVector::from_pairs(6, [(2, 4.0), (3, 1.0), (5, -1.0)]).unwrap();
    assert_relative_eq!(a.dot(&b), 8.0 - 3.0);
    assert_relative_eq!(a.l2_norm(), 14.0_f64.sqrt());
    assert_eq!(SparseVector::zero(6).dot(&a), 0.0);
}

#[test]
fn test_equal_vectors_hash_together() {
    let a = SparseVector::from_counts(4, [1, 2]).unwrap();
    let b = SparseVector::from_pairs(4, [(2, 1.0), (1, 1.0)]).unwrap();
    let c = SparseVector::from_counts(4, [1, 3]).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);

    let set: HashSet<SparseVector> = [a, b, c].into_iter().collect();
    assert_eq!(set.len(), 2);
}

#[test]
fn test_min_max_values() {
    let v = SparseVector::from_pairs(3, [(0, -0.5), (2, 0.75)]).unwrap();
    assert_eq!(v.max_value(), 0.75);
    assert_eq!(v.min_value(), -0.5);
    assert_eq!(SparseVector::zero(3).max_value(), 0.0);
}

#[test]
fn test_dense_vector_ops() {
    let mut w = DenseVector::zeros(4);
    w.increment(1, 2.0).unwrap();
    w.increment(3, -1.0).unwrap();
    assert!(w.increment(4, 1.0).is_err());

    let f = SparseVector::from_pairs(4, [(1, 0.5), (3, 2.0)]).unwrap();
    assert_relative_eq!(w.dot_sparse(&f), 1.0 - 2.0);

    let u = DenseVector::from_vec(vec![1.0, 1.0, 1.0, 1.0]);
    let s = w.scaled_sum(&u, -0.5).unwrap();
    assert_eq!(s.as_slice(), &[-0.5, 1.5, -0.5, -1.5]);
    assert!(w.scaled_sum(&DenseVector::zeros(2), 1.0).is_err());
}
