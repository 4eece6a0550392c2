//! Flattened, immutable normalization model for inference.
//!
//! Compilation folds the shared-token term into the matrix,
//! `M = W + cos·S` with `S` the 0/1 shared-token map, so that
//! `score(m, n) = mᵗ·M·n`. On top of the CSR matrix it precomputes, per
//! mention token `i`, the contribution `M_i·n_c` of every distinct name vector
//! `c` it reaches (`shortcuts`), which turns `find_best` into a sparse
//! accumulation over the mention's tokens. Entities sharing a name vector are
//! visited once per class, not once per entity. Single-token mentions asking
//! for the top candidate are answered from the precomputed `best_single`
//! winner of their token.
//!
//! The compiled model carries its own class and name tables, so it can be
//! persisted and used without the lexicon's index.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use biojoint_core::{RankedList, SparseVector};
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMat};

use super::{
    best_name, dot_translated, positive_mass, rank_classes, NameMatch, NormalizationParams,
    NormalizationPredictor, NormalizationSpace,
};
use crate::error::Result;
use crate::index::AmbiguityClass;
use crate::lexicon::{EntityId, TypeId};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompiledNormalizationModel {
    type_id: TypeId,
    unknown: EntityId,
    matrix: CsMat<f64>,
    classes: Vec<AmbiguityClass>,
    shortcuts: Vec<Vec<(usize, f64)>>,
    best_single: Vec<Option<(EntityId, f64)>>,
    names: HashMap<EntityId, Vec<(usize, SparseVector)>>,
}

impl CompiledNormalizationModel {
    pub fn from_params(space: &NormalizationSpace, params: &NormalizationParams) -> Self {
        let start = std::time::Instant::now();
        let index = space.index();
        let (nrows, ncols) = (space.mention_dim(), space.name_dim());

        let rows: Vec<BTreeMap<usize, f64>> = (0..nrows)
            .map(|i| {
                let mut row = params.matrix.row(i).cloned().unwrap_or_default();
                if params.cosine_weight != 0.0 {
                    if let Some(j) = space.shared(i) {
                        *row.entry(j).or_insert(0.0) += params.cosine_weight;
                    }
                }
                row.retain(|_, v| *v != 0.0);
                row
            })
            .collect();

        let mut triplets = TriMat::new((nrows, ncols));
        for (i, row) in rows.iter().enumerate() {
            for (&j, &v) in row {
                triplets.add_triplet(i, j, v);
            }
        }
        let matrix: CsMat<f64> = triplets.to_csr();

        let shortcuts: Vec<Vec<(usize, f64)>> = rows
            .par_iter()
            .map(|row| {
                let reachable: BTreeSet<usize> = index.reachable_classes(row.keys().copied());
                reachable
                    .into_iter()
                    .filter_map(|c| {
                        let class = index.class(c)?;
                        let v: f64 = class
                            .vector
                            .iter()
                            .map(|(j, nj)| row.get(&j).map_or(0.0, |w| w * nj))
                            .sum();
                        (v != 0.0).then_some((c, v))
                    })
                    .collect()
            })
            .collect();

        let unknown = space.unknown();
        let best_single = shortcuts
            .iter()
            .map(|entries| {
                let scored = entries
                    .iter()
                    .map(|&(c, v)| (index.classes()[c].entities.as_slice(), v));
                rank_classes(scored, unknown, 1)
                    .best()
                    .filter(|(e, _)| **e != unknown)
                    .map(|(e, v)| (*e, v))
            })
            .collect();

        let names = space
            .lexicon()
            .entities_of_type(space.type_id())
            .iter()
            .map(|&e| {
                let named: Vec<(usize, SparseVector)> =
                    space.names_of(e).map(|(i, v)| (i, v.clone())).collect();
                (e, named)
            })
            .filter(|(_, named)| !named.is_empty())
            .collect();

        let compiled = Self {
            type_id: space.type_id(),
            unknown,
            matrix,
            classes: index.classes().to_vec(),
            shortcuts,
            best_single,
            names,
        };
        info!(
            "compiled normalization model type={} nnz={} shortcuts={} in {:?}",
            compiled.type_id,
            compiled.matrix.nnz(),
            compiled.shortcut_count(),
            start.elapsed()
        );
        compiled
    }

    /// Model that scores everything 0 and always answers the unknown entity.
    pub fn empty(type_id: TypeId, unknown: EntityId) -> Self {
        debug!("compiling empty normalization model for type {}", type_id);
        Self {
            type_id,
            unknown,
            matrix: CsMat::zero((0, 0)),
            classes: Vec::new(),
            shortcuts: Vec::new(),
            best_single: Vec::new(),
            names: HashMap::new(),
        }
    }

    pub fn shortcut_count(&self) -> usize {
        self.shortcuts.iter().map(Vec::len).sum()
    }

    pub fn matrix(&self) -> &CsMat<f64> {
        &self.matrix
    }

    fn translate(&self, mention: &SparseVector) -> BTreeMap<usize, f64> {
        let mut t = BTreeMap::new();
        for (i, mi) in mention.iter() {
            if let Some(row) = self.matrix.outer_view(i) {
                for (j, &w) in row.iter() {
                    *t.entry(j).or_insert(0.0) += mi * w;
                }
            }
        }
        t
    }

    /// Top candidate of a one-token mention with positive weight; scaling by
    /// the weight preserves the ranking of the token's own winner.
    fn single_token_best(&self, token: usize, weight: f64) -> RankedList<EntityId> {
        let mut list = RankedList::new(1);
        list.add(0.0, self.unknown);
        if let Some(Some((e, v))) = self.best_single.get(token) {
            list.add(weight * v, *e);
        }
        list
    }
}

impl NormalizationPredictor for CompiledNormalizationModel {
    fn type_id(&self) -> TypeId {
        self.type_id
    }

    fn unknown_entity(&self) -> EntityId {
        self.unknown
    }

    fn score_name_vector(&self, mention: &SparseVector, name: &SparseVector) -> f64 {
        dot_translated(&self.translate(mention), name)
    }

    fn score_bound(&self, mention: &SparseVector) -> f64 {
        positive_mass(self.translate(mention).values())
    }

    fn find_best(&self, mention: &SparseVector, k: usize) -> RankedList<EntityId> {
        if k == 1 && mention.nnz() == 1 {
            if let Some((i, mi)) = mention.iter().next() {
                if mi > 0.0 {
                    return self.single_token_best(i, mi);
                }
            }
        }
        let mut acc: BTreeMap<usize, f64> = BTreeMap::new();
        for (i, mi) in mention.iter() {
            if let Some(entries) = self.shortcuts.get(i) {
                for &(c, v) in entries {
                    *acc.entry(c).or_insert(0.0) += mi * v;
                }
            }
        }
        let scored = acc
            .iter()
            .map(|(&c, &s)| (self.classes[c].entities.as_slice(), s));
        rank_classes(scored, self.unknown, k)
    }

    fn find_best_name(&self, mention: &SparseVector, entity: EntityId) -> Option<NameMatch> {
        let named = self.names.get(&entity)?;
        let t = self.translate(mention);
        best_name(entity, named.iter().map(|(i, v)| (*i, v)), |n| {
            dot_translated(&t, n)
        })
    }

    fn compile(&self) -> Result<CompiledNormalizationModel> {
        Ok(self.clone())
    }
}
