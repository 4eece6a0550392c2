//! Numeric layer for `biojoint`.
//!
//! - `dictionary`: append-only string ↔ index bijections, frozen before use
//! - `vector`: sparse and dense vectors addressed by a dictionary
//! - `matrix`: dense-by-sparse matrices addressed by two dictionaries
//! - `ranked`: bounded top-K ranked lists with stable tie-breaking
//! - `cache`: thread-safe LRU cache with hit/miss accounting

pub mod cache;
pub mod dictionary;
pub mod error;
pub mod matrix;
pub mod ranked;
pub mod vector;

pub use cache::{BoundedCache, CacheStats};
pub use dictionary::Dictionary;
pub use error::{CoreError, CoreResult};
pub use matrix::DenseBySparseMatrix;
pub use ranked::RankedList;
pub use vector::{DenseVector, SparseVector};

#[cfg(test)]
mod tests;

#[cfg(test)]
pub(crate) fn init() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let env = env_logger::Env::default().default_filter_or("debug");
        let _ = env_logger::Builder::from_env(env).is_test(true).try_init();
    });
}
