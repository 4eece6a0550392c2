//! Entity catalog partitioned by type.
//!
//! A `Lexicon` is created with its full type set and is always seeded with a
//! non-entity pseudo-entity plus one unknown-entity placeholder per type
//! ("recognized type, unresolved identity"). Concepts are then added until
//! `create_indexes` runs, after which the lexicon is sealed and only read.

use std::collections::HashMap;
use std::sync::Arc;

use biojoint_core::{Dictionary, SparseVector};
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{BioJointError, Result};
use crate::index::{EntityOrdering, Index};

/// Dense index of an entity type in the lexicon's type dictionary.
pub type TypeId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub usize);

/// Segment label: non-entity, or one entity type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Label {
    NonEntity,
    Entity(TypeId),
}

impl Label {
    /// Row of this label in the recognition weights.
    #[inline]
    pub fn state(self) -> usize {
        match self {
            Label::NonEntity => 0,
            Label::Entity(t) => t + 1,
        }
    }

    #[inline]
    pub fn from_state(state: usize) -> Self {
        match state {
            0 => Label::NonEntity,
            s => Label::Entity(s - 1),
        }
    }

    #[inline]
    pub fn type_id(self) -> Option<TypeId> {
        match self {
            Label::NonEntity => None,
            Label::Entity(t) => Some(t),
        }
    }

    #[inline]
    pub fn is_entity(self) -> bool {
        matches!(self, Label::Entity(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    NonEntity,
    Unknown,
    Concept,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityName {
    pub text: String,
    /// Vector in the type's name space, computed by the lexicon loader.
    pub vector: Option<SparseVector>,
}

impl EntityName {
    pub fn new(text: impl Into<String>, vector: Option<SparseVector>) -> Self {
        Self {
            text: text.into(),
            vector,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub label: Label,
    pub kind: EntityKind,
    /// Equivalent identifiers; the first is primary.
    pub identifiers: Vec<String>,
    /// Alternate names; the first is primary.
    pub names: Vec<EntityName>,
}

impl Entity {
    pub fn primary_identifier(&self) -> &str {
        &self.identifiers[0]
    }

    pub fn primary_name(&self) -> Option<&EntityName> {
        self.names.first()
    }

    #[inline]
    pub fn is_concept(&self) -> bool {
        self.kind == EntityKind::Concept
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Lexicon {
    types: Dictionary,
    entities: Vec<Entity>,
    by_type: Vec<Vec<EntityId>>,
    by_identifier: HashMap<String, EntityId>,
    non_entity: EntityId,
    unknown: Vec<EntityId>,
    indexes: Option<Vec<Arc<Index>>>,
}

pub const NON_ENTITY_IDENTIFIER: &str = "<NON-ENTITY>";

impl Lexicon {
    /// New lexicon over a fixed, nonempty set of entity types.
    pub fn new<I, S>(types: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut dict = Dictionary::new();
        for t in types {
            let name = t.as_ref();
            if name.is_empty() {
                return Err(BioJointError::Lexicon("empty type name".into()));
            }
            if dict.index_of(name).is_some() {
                return Err(BioJointError::Lexicon(format!("duplicate type `{}`", name)));
            }
            dict.add(name)?;
        }
        if dict.is_empty() {
            return Err(BioJointError::Lexicon("at least one entity type is required".into()));
        }
        dict.freeze();

        let mut lexicon = Self {
            by_type: vec![Vec::new(); dict.len()],
            types: dict,
            entities: Vec::new(),
            by_identifier: HashMap::new(),
            non_entity: EntityId(0),
            unknown: Vec::new(),
            indexes: None,
        };

        lexicon.non_entity = lexicon.push(
            Label::NonEntity,
            EntityKind::NonEntity,
            vec![NON_ENTITY_IDENTIFIER.to_string()],
            Vec::new(),
        );
        for t in 0..lexicon.types.len() {
            let ident = format!("<UNKNOWN:{}>", lexicon.type_name(t).unwrap_or_default());
            let id = lexicon.push(Label::Entity(t), EntityKind::Unknown, vec![ident], Vec::new());
            lexicon.unknown.push(id);
        }
        debug!("lexicon created with {} types", lexicon.types.len());
        Ok(lexicon)
    }

    fn push(
        &mut self,
        label: Label,
        kind: EntityKind,
        identifiers: Vec<String>,
        names: Vec<EntityName>,
    ) -> EntityId {
        let id = EntityId(self.entities.len());
        for ident in &identifiers {
            self.by_identifier.insert(ident.clone(), id);
        }
        if let Label::Entity(t) = label {
            self.by_type[t].push(id);
        }
        self.entities.push(Entity {
            id,
            label,
            kind,
            identifiers,
            names,
        });
        id
    }

    /// Add a concept of type `type_name`.
    pub fn add_entity(
        &mut self,
        type_name: &str,
        identifiers: Vec<String>,
        names: Vec<EntityName>,
    ) -> Result<EntityId> {
        if self.indexes.is_some() {
            return Err(BioJointError::LexiconSealed);
        }
        let t = self.type_id(type_name)?;
        if identifiers.is_empty() {
            return Err(BioJointError::Lexicon("entity needs at least one identifier".into()));
        }
        if names.is_empty() {
            return Err(BioJointError::Lexicon(format!(
                "entity `{}` needs at least one name",
                identifiers[0]
            )));
        }
        for ident in &identifiers {
            if self.by_identifier.contains_key(ident) {
                return Err(BioJointError::Lexicon(format!(
                    "identifier `{}` is already bound",
                    ident
                )));
            }
        }
        Ok(self.push(Label::Entity(t), EntityKind::Concept, identifiers, names))
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn type_id(&self, type_name: &str) -> Result<TypeId> {
        self.types
            .index_of(type_name)
            .ok_or_else(|| BioJointError::UnknownType(type_name.to_string()))
    }

    pub fn type_name(&self, t: TypeId) -> Option<&str> {
        self.types.element(t)
    }

    /// Every label: non-entity first, then the types in order.
    pub fn labels(&self) -> impl Iterator<Item = Label> + '_ {
        std::iter::once(Label::NonEntity).chain((0..self.types.len()).map(Label::Entity))
    }

    pub fn state_count(&self) -> usize {
        self.types.len() + 1
    }

    pub fn entity(&self, id: EntityId) -> Result<&Entity> {
        self.entities
            .get(id.0)
            .ok_or(BioJointError::UnknownEntity(id))
    }

    pub fn entity_by_identifier(&self, identifier: &str) -> Option<&Entity> {
        self.by_identifier
            .get(identifier)
            .and_then(|id| self.entities.get(id.0))
    }

    /// All entities of a type, including its unknown placeholder.
    pub fn entities_of_type(&self, t: TypeId) -> &[EntityId] {
        self.by_type.get(t).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[inline]
    pub fn non_entity(&self) -> EntityId {
        self.non_entity
    }

    pub fn unknown_entity(&self, t: TypeId) -> Result<EntityId> {
        self.unknown
            .get(t)
            .copied()
            .ok_or_else(|| BioJointError::UnknownType(t.to_string()))
    }

    /// Check that `entities` may be linked to a segment labelled `label`.
    pub fn validate_link(&self, label: Label, entities: &[EntityId]) -> Result<()> {
        match label {
            Label::NonEntity => {
                if entities.iter().any(|&e| e != self.non_entity) {
                    return Err(BioJointError::Annotation(
                        "non-entity segment cannot link entities".into(),
                    ));
                }
            }
            Label::Entity(t) => {
                if entities.is_empty() {
                    return Err(BioJointError::Annotation(format!(
                        "segment of type `{}` needs at least one entity",
                        self.type_name(t).unwrap_or("?")
                    )));
                }
                for &e in entities {
                    let entity = self.entity(e)?;
                    if entity.label != label {
                        return Err(BioJointError::Annotation(format!(
                            "entity `{}` is not of type `{}`",
                            entity.primary_identifier(),
                            self.type_name(t).unwrap_or("?")
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Build one `Index` per type and seal the lexicon.
    ///
    /// `vocabularies[t]` is the frozen name-vector space of type `t`.
    pub fn create_indexes(&mut self, vocabularies: Vec<Dictionary>) -> Result<()> {
        if self.indexes.is_some() {
            return Err(BioJointError::LexiconSealed);
        }
        if vocabularies.len() != self.types.len() {
            return Err(BioJointError::Lexicon(format!(
                "expected {} vocabularies, found {}",
                self.types.len(),
                vocabularies.len()
            )));
        }
        for (t, vocab) in vocabularies.iter().enumerate() {
            if !vocab.is_frozen() {
                return Err(BioJointError::VocabularyNotFrozen(
                    self.type_name(t).unwrap_or_default().to_string(),
                ));
            }
        }

        let start = std::time::Instant::now();
        let indexes = vocabularies
            .into_par_iter()
            .enumerate()
            .map(|(t, vocab)| {
                let members: Vec<&Entity> = self.by_type[t]
                    .iter()
                    .map(|id| &self.entities[id.0])
                    .filter(|e| e.is_concept())
                    .collect();
                Index::build(t, vocab, &members).map(Arc::new)
            })
            .collect::<Result<Vec<Arc<Index>>>>()?;

        info!(
            "indexed {} entities over {} types in {:?}",
            self.entities.len(),
            indexes.len(),
            start.elapsed()
        );
        self.indexes = Some(indexes);
        Ok(())
    }

    #[inline]
    pub fn is_indexed(&self) -> bool {
        self.indexes.is_some()
    }

    pub fn index(&self, t: TypeId) -> Result<&Index> {
        self.shared_index(t).map(Arc::as_ref)
    }

    /// Handle on the index of type `t`, for models that keep it.
    pub fn shared_index(&self, t: TypeId) -> Result<&Arc<Index>> {
        self.indexes
            .as_ref()
            .ok_or(BioJointError::NotIndexed)?
            .get(t)
            .ok_or_else(|| BioJointError::UnknownType(t.to_string()))
    }

    /// Reorder every ambiguity class of type `t` by `ordering`.
    ///
    /// Must run before any model takes a handle on the index.
    pub fn install_ordering(&mut self, t: TypeId, ordering: &dyn EntityOrdering) -> Result<()> {
        let slot = self
            .indexes
            .as_mut()
            .ok_or(BioJointError::NotIndexed)?
            .get_mut(t)
            .ok_or_else(|| BioJointError::UnknownType(t.to_string()))?;
        let index = Arc::get_mut(slot).ok_or_else(|| {
            BioJointError::Lexicon("index is already shared with a model".into())
        })?;
        index.apply_ordering(ordering);
        Ok(())
    }
}
