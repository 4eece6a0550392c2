use std::sync::atomic::{AtomicU64, Ordering};

use biojoint_core::{BoundedCache, CacheStats, RankedList, SparseVector};
use log::{debug, trace};

use super::{
    CompiledNormalizationModel, NameMatch, NormalizationDelta, NormalizationModel,
    NormalizationPredictor,
};
use crate::error::Result;
use crate::lexicon::{EntityId, TypeId};

/// Memoizes `find_best` per mention vector.
///
/// A cached list of size `k'` answers any request for `k ≤ k'` by truncation,
/// which is exact because equal scores keep their insertion order. Any weight
/// change clears the cache, and so does a change of the wrapped model's
/// revision (an averaged model's progress count).
///
/// Only the model's own surface is cached; `training_surface` passes through
/// to the wrapped model.
pub struct CachedNormalizationModel<M> {
    inner: M,
    cache: BoundedCache<SparseVector, RankedList<EntityId>>,
    revision: AtomicU64,
}

impl<M: NormalizationPredictor> CachedNormalizationModel<M> {
    pub fn new(inner: M, capacity: usize) -> Result<Self> {
        debug!(
            "caching normalization model type={} capacity={}",
            inner.type_id(),
            capacity
        );
        let revision = AtomicU64::new(inner.revision());
        Ok(Self {
            inner,
            cache: BoundedCache::new(capacity)?,
            revision,
        })
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    pub fn into_inner(self) -> M {
        self.inner
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    fn sync_revision(&self) {
        let revision = self.inner.revision();
        if self.revision.swap(revision, Ordering::AcqRel) != revision {
            trace!("revision moved to {}, clearing cache", revision);
            self.cache.clear();
        }
    }
}

impl<M: NormalizationPredictor> NormalizationPredictor for CachedNormalizationModel<M> {
    fn type_id(&self) -> TypeId {
        self.inner.type_id()
    }

    fn unknown_entity(&self) -> EntityId {
        self.inner.unknown_entity()
    }

    fn score_name_vector(&self, mention: &SparseVector, name: &SparseVector) -> f64 {
        self.inner.score_name_vector(mention, name)
    }

    fn score_bound(&self, mention: &SparseVector) -> f64 {
        self.inner.score_bound(mention)
    }

    fn find_best(&self, mention: &SparseVector, k: usize) -> RankedList<EntityId> {
        self.sync_revision();
        if let Some(list) = self.cache.get(mention) {
            if list.max_size() >= k {
                trace!("cache hit for mention with {} tokens", mention.nnz());
                return list.truncated(k);
            }
        }
        let list = self.inner.find_best(mention, k);
        self.cache.put(mention.clone(), list.clone());
        list
    }

    fn find_best_name(&self, mention: &SparseVector, entity: EntityId) -> Option<NameMatch> {
        self.inner.find_best_name(mention, entity)
    }

    fn compile(&self) -> Result<CompiledNormalizationModel> {
        self.cache.clear();
        self.inner.compile()
    }

    fn revision(&self) -> u64 {
        self.inner.revision()
    }
}

impl<M: NormalizationModel> NormalizationModel for CachedNormalizationModel<M> {
    fn check(&self, delta: &NormalizationDelta) -> Result<()> {
        self.inner.check(delta)
    }

    fn update(&mut self, delta: &NormalizationDelta) -> Result<()> {
        let outcome = self.inner.update(delta);
        self.cache.clear();
        outcome
    }

    fn gradient(&self, mention: &SparseVector, name: &SparseVector) -> NormalizationDelta {
        self.inner.gradient(mention, name)
    }

    fn cosine_weight(&self) -> f64 {
        self.inner.cosine_weight()
    }

    fn as_predictor(&self) -> &dyn NormalizationPredictor {
        self
    }

    fn training_surface(&self) -> Option<&dyn NormalizationPredictor> {
        self.inner.training_surface()
    }
}
