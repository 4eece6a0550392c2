//! Symbol dictionaries: bijections between strings and dense indices.
//!
//! A dictionary is append-only while open. Once `freeze` is called the index
//! space is fixed, which is what lets vectors and matrices address it by
//! dimension. Lookups are O(1) in both directions at all times.

use std::collections::HashMap;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Dictionary {
    elements: Vec<String>,
    lookup: HashMap<String, usize>,
    frozen: bool,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an open dictionary from elements, skipping repeats.
    pub fn from_elements<I, S>(elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut dict = Self::new();
        for e in elements {
            // cannot fail on an open dictionary
            let _ = dict.add(e.as_ref());
        }
        dict
    }

    /// Build and freeze in one step.
    pub fn frozen_from<I, S>(elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut dict = Self::from_elements(elements);
        dict.freeze();
        dict
    }

    /// Returns the index of `element`, appending it if absent.
    ///
    /// Adding an element that already exists is allowed after freezing; only
    /// growth is rejected.
    pub fn add(&mut self, element: &str) -> CoreResult<usize> {
        if let Some(&idx) = self.lookup.get(element) {
            return Ok(idx);
        }
        if self.frozen {
            return Err(CoreError::Frozen(element.to_string()));
        }
        let idx = self.elements.len();
        trace!("dictionary: {} -> {}", element, idx);
        self.elements.push(element.to_string());
        self.lookup.insert(element.to_string(), idx);
        Ok(idx)
    }

    #[inline]
    pub fn index_of(&self, element: &str) -> Option<usize> {
        self.lookup.get(element).copied()
    }

    #[inline]
    pub fn element(&self, index: usize) -> Option<&str> {
        self.elements.get(index).map(String::as_str)
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Elements in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.elements.iter().enumerate().map(|(i, e)| (i, e.as_str()))
    }
}
