//! Bounded top-K ranked list.
//!
//! Items are kept in descending score order. An item with a score equal to an
//! existing one is placed after it, so for equal scores the insertion order is
//! the tie-break. When the list is full a new item enters only if it strictly
//! beats the current worst.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankedList<T> {
    max_size: usize,
    entries: Vec<(f64, T)>,
}

impl<T> RankedList<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            entries: Vec::with_capacity(max_size.min(64)),
        }
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_size
    }

    /// Would an item with `score` be retained?
    pub fn check(&self, score: f64) -> bool {
        if self.max_size == 0 {
            return false;
        }
        !self.is_full() || self.worst_score().map_or(true, |w| score > w)
    }

    /// Insert `item`; returns whether it was retained.
    pub fn add(&mut self, score: f64, item: T) -> bool {
        if !self.check(score) {
            return false;
        }
        let pos = self.entries.partition_point(|(s, _)| *s >= score);
        self.entries.insert(pos, (score, item));
        self.entries.truncate(self.max_size);
        true
    }

    pub fn best(&self) -> Option<(&T, f64)> {
        self.entries.first().map(|(s, t)| (t, *s))
    }

    pub fn best_score(&self) -> Option<f64> {
        self.entries.first().map(|(s, _)| *s)
    }

    pub fn worst_score(&self) -> Option<f64> {
        self.entries.last().map(|(s, _)| *s)
    }

    pub fn get(&self, rank: usize) -> Option<(&T, f64)> {
        self.entries.get(rank).map(|(s, t)| (t, *s))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&T, f64)> {
        self.entries.iter().map(|(s, t)| (t, *s))
    }

    pub fn into_vec(self) -> Vec<(T, f64)> {
        self.entries.into_iter().map(|(s, t)| (t, s)).collect()
    }
}

impl<T: Clone> RankedList<T> {
    /// Copy of the first `k` entries as a list bounded by `k`.
    pub fn truncated(&self, k: usize) -> RankedList<T> {
        RankedList {
            max_size: k,
            entries: self.entries.iter().take(k).cloned().collect(),
        }
    }
}
