//! Per-type index of ambiguity classes.
//!
//! Entities whose names map to exactly the same name vector are
//! indistinguishable to the normalization model; they form one ambiguity
//! class. The index maps each distinct name vector to its class and keeps a
//! posting list from name token to classes, which is what makes a class
//! "reachable" from a mention. An installed `EntityOrdering` decides which
//! member of a class is the canonical answer.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use biojoint_core::{Dictionary, SparseVector};
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::error::{BioJointError, Result};
use crate::lexicon::{Entity, EntityId, TypeId};
use crate::text::AnnotatedSegment;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AmbiguityClass {
    pub vector: SparseVector,
    pub entities: Vec<EntityId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Index {
    type_id: TypeId,
    vocabulary: Dictionary,
    classes: Vec<AmbiguityClass>,
    class_of: HashMap<SparseVector, usize>,
    postings: Vec<Vec<usize>>,
}

impl Index {
    pub(crate) fn build(type_id: TypeId, vocabulary: Dictionary, members: &[&Entity]) -> Result<Self> {
        let dim = vocabulary.len();
        let mut classes: Vec<AmbiguityClass> = Vec::new();
        let mut class_of: HashMap<SparseVector, usize> = HashMap::new();

        for entity in members {
            for name in &entity.names {
                let Some(vector) = &name.vector else {
                    continue;
                };
                if vector.dim() != dim {
                    return Err(BioJointError::Lexicon(format!(
                        "name `{}` of `{}` has dimension {}, vocabulary has {}",
                        name.text,
                        entity.primary_identifier(),
                        vector.dim(),
                        dim
                    )));
                }
                if vector.min_value() < 0.0 || vector.max_value() > 1.0 {
                    return Err(BioJointError::Lexicon(format!(
                        "name `{}` of `{}` has coordinates outside [0, 1]",
                        name.text,
                        entity.primary_identifier()
                    )));
                }
                if vector.is_zero() {
                    continue;
                }
                let class_id = *class_of.entry(vector.clone()).or_insert_with(|| {
                    classes.push(AmbiguityClass {
                        vector: vector.clone(),
                        entities: Vec::new(),
                    });
                    classes.len() - 1
                });
                let class = &mut classes[class_id];
                if !class.entities.contains(&entity.id) {
                    class.entities.push(entity.id);
                }
            }
        }

        let mut postings = vec![Vec::new(); dim];
        for (c, class) in classes.iter().enumerate() {
            for (token, _) in class.vector.iter() {
                postings[token].push(c);
            }
        }

        let ambiguous = classes.iter().filter(|c| c.entities.len() > 1).count();
        debug!(
            "index type={} entities={} classes={} ambiguous={}",
            type_id,
            members.len(),
            classes.len(),
            ambiguous
        );

        Ok(Self {
            type_id,
            vocabulary,
            classes,
            class_of,
            postings,
        })
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn vocabulary(&self) -> &Dictionary {
        &self.vocabulary
    }

    pub fn classes(&self) -> &[AmbiguityClass] {
        &self.classes
    }

    pub fn class(&self, id: usize) -> Option<&AmbiguityClass> {
        self.classes.get(id)
    }

    pub fn class_id(&self, name_vector: &SparseVector) -> Option<usize> {
        self.class_of.get(name_vector).copied()
    }

    /// The ambiguity class of `name_vector`, in disambiguation order.
    pub fn entities(&self, name_vector: &SparseVector) -> &[EntityId] {
        self.class_id(name_vector)
            .map(|c| self.classes[c].entities.as_slice())
            .unwrap_or(&[])
    }

    pub fn classes_with_token(&self, token: usize) -> &[usize] {
        self.postings.get(token).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Classes sharing at least one token with `tokens`, in class order.
    pub fn reachable_classes<I>(&self, tokens: I) -> BTreeSet<usize>
    where
        I: IntoIterator<Item = usize>,
    {
        tokens
            .into_iter()
            .flat_map(|t| self.classes_with_token(t).iter().copied())
            .collect()
    }

    pub(crate) fn apply_ordering(&mut self, ordering: &dyn EntityOrdering) {
        for class in self.classes.iter_mut().filter(|c| c.entities.len() > 1) {
            // stable: ties keep insertion order
            class.entities.sort_by(|&a, &b| ordering.compare(a, b));
            trace!("reordered class {:?}", class.entities);
        }
    }
}

/// Deterministic disambiguation order within an ambiguity class.
pub trait EntityOrdering {
    fn compare(&self, a: EntityId, b: EntityId) -> Ordering;
}

/// Orders more frequently annotated entities first.
#[derive(Clone, Debug, Default)]
pub struct FrequencyOrdering {
    counts: HashMap<EntityId, usize>,
}

impl FrequencyOrdering {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entity: EntityId) {
        *self.counts.entry(entity).or_insert(0) += 1;
    }

    /// Count every entity linked by the given annotations.
    pub fn from_annotations<'a, I>(annotations: I) -> Self
    where
        I: IntoIterator<Item = &'a AnnotatedSegment>,
    {
        let mut ordering = Self::new();
        for segment in annotations {
            for &e in segment.entities() {
                ordering.record(e);
            }
        }
        ordering
    }

    pub fn count(&self, entity: EntityId) -> usize {
        self.counts.get(&entity).copied().unwrap_or(0)
    }
}

impl EntityOrdering for FrequencyOrdering {
    fn compare(&self, a: EntityId, b: EntityId) -> Ordering {
        self.count(b).cmp(&self.count(a))
    }
}
