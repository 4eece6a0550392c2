use approx::assert_relative_eq;

use crate::matrix::DenseBySparseMatrix;
use crate::vector::SparseVector;

#[test]
fn test_increment_and_get() {
    crate::init();
    let mut m = DenseBySparseMatrix::zeros(3, 4);
    m.increment(0, 1, 2.0).unwrap();
    m.increment(2, 3, 1.0).unwrap();
    m.increment(0, 1, -2.0).unwrap();
    assert_eq!(m.get(0, 1), 0.0);
    assert_eq!(m.nnz(), 1, "cells returning to zero are dropped");
    assert_eq!(m.get(2, 3), 1.0);
    assert!(m.increment(3, 0, 1.0).is_err());
    assert!(m.increment(0, 4, 1.0).is_err());
}

#[test]
fn test_left_multiply_translates_rows() {
    let mut m = DenseBySparseMatrix::zeros(2, 3);
    m.increment(0, 0, 1.0).unwrap();
    m.increment(0, 2, 0.5).unwrap();
    m.increment(1, 2, 2.0).unwrap();
    let x = SparseVector::from_pairs(2, [(0, 2.0), (1, 1.0)]).unwrap();
    let t = m.left_multiply(&x);
    assert_relative_eq!(t[&0], 2.0);
    assert_relative_eq!(t[&2], 1.0 + 2.0);
    assert!(!t.contains_key(&1));
}

#[test]
fn test_scaled_sum_and_csr() {
    let mut a = DenseBySparseMatrix::zeros(2, 2);
    a.increment(0, 0, 3.0).unwrap();
    let mut b = DenseBySparseMatrix::zeros(2, 2);
    b.increment(0, 0, 3.0).unwrap();
    b.increment(1, 1, 4.0).unwrap();

    let s = a.scaled_sum(&b, -0.5).unwrap();
    assert_relative_eq!(s.get(0, 0), 1.5);
    assert_relative_eq!(s.get(1, 1), -2.0);

    let csr = s.to_csr();
    assert_eq!(csr.shape(), (2, 2));
    assert_eq!(csr.nnz(), 2);
    assert_relative_eq!(*csr.get(1, 1).unwrap(), -2.0);

    assert!(a.scaled_sum(&DenseBySparseMatrix::zeros(3, 2), 1.0).is_err());
}
