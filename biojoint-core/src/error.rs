use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("dictionary is frozen, cannot add `{0}`")]
    Frozen(String),

    #[error("index {index} out of bounds for dimension {dim}")]
    OutOfBounds { index: usize, dim: usize },

    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("non-finite value {value} at index {index}")]
    NonFinite { index: usize, value: f64 },

    #[error("invalid: {0}")]
    Invalid(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
