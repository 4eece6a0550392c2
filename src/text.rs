//! Text instances and their segment lattice.
//!
//! Tokens, features and mention vectors are produced by external
//! collaborators; this module only holds them and validates the shapes the
//! decoder and trainer rely on.

use biojoint_core::SparseVector;
use serde::{Deserialize, Serialize};

use crate::error::{BioJointError, Result};
use crate::lexicon::{EntityId, Label, Lexicon};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    /// Character offsets in the source text.
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn new(text: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            text: text.into(),
            start,
            end,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MentionName {
    pub text: String,
    /// Vector in the shared mention vocabulary, if any token is known.
    pub vector: Option<SparseVector>,
}

impl MentionName {
    pub fn new(text: impl Into<String>, vector: Option<SparseVector>) -> Self {
        Self {
            text: text.into(),
            vector,
        }
    }
}

/// Candidate token range `start..end` in the lattice.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: usize,
    pub end: usize,
    pub features: SparseVector,
    pub mention: MentionName,
}

impl Segment {
    pub fn new(start: usize, end: usize, features: SparseVector, mention: MentionName) -> Self {
        Self {
            start,
            end,
            features,
            mention,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Last token covered.
    #[inline]
    pub fn last(&self) -> usize {
        self.end - 1
    }
}

/// A lattice segment bound to a label and, for entity labels, the linked
/// entities (sorted, unique).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnnotatedSegment {
    segment: usize,
    label: Label,
    entities: Vec<EntityId>,
}

impl AnnotatedSegment {
    pub fn new(lexicon: &Lexicon, segment: usize, label: Label, mut entities: Vec<EntityId>) -> Result<Self> {
        lexicon.validate_link(label, &entities)?;
        if label == Label::NonEntity {
            entities.clear();
        }
        entities.sort_unstable();
        entities.dedup();
        Ok(Self {
            segment,
            label,
            entities,
        })
    }

    pub fn non_entity(segment: usize) -> Self {
        Self {
            segment,
            label: Label::NonEntity,
            entities: Vec::new(),
        }
    }

    /// Decoder output: a single chosen entity, trusted to match `label`.
    pub(crate) fn predicted(segment: usize, label: Label, entity: Option<EntityId>) -> Self {
        Self {
            segment,
            label,
            entities: entity.into_iter().collect(),
        }
    }

    #[inline]
    pub fn segment(&self) -> usize {
        self.segment
    }

    #[inline]
    pub fn label(&self) -> Label {
        self.label
    }

    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    pub fn links(&self, entity: EntityId) -> bool {
        self.entities.binary_search(&entity).is_ok()
    }
}

/// A labelled segmentation of one instance, in token order.
pub type StateSequence = Vec<AnnotatedSegment>;

#[derive(Clone, Debug)]
pub struct TextInstance {
    id: String,
    tokens: Vec<Token>,
    segments: Vec<Segment>,
    ends_at: Vec<Vec<usize>>,
    target: Option<StateSequence>,
}

impl TextInstance {
    pub fn new(id: impl Into<String>, tokens: Vec<Token>, segments: Vec<Segment>) -> Result<Self> {
        let id = id.into();
        let invalid = |reason: String| BioJointError::Instance {
            id: id.clone(),
            reason,
        };
        if tokens.is_empty() {
            return Err(invalid("no tokens".into()));
        }
        if segments.is_empty() {
            return Err(invalid("empty segment lattice".into()));
        }
        let feature_dim = segments[0].features.dim();
        let mut ends_at = vec![Vec::new(); tokens.len()];
        for (s, segment) in segments.iter().enumerate() {
            if segment.is_empty() || segment.end > tokens.len() {
                return Err(invalid(format!(
                    "segment {} spans {}..{} over {} tokens",
                    s,
                    segment.start,
                    segment.end,
                    tokens.len()
                )));
            }
            if segment.features.dim() != feature_dim {
                return Err(invalid(format!(
                    "segment {} has feature dimension {}, expected {}",
                    s,
                    segment.features.dim(),
                    feature_dim
                )));
            }
            ends_at[segment.last()].push(s);
        }
        Ok(Self {
            id,
            tokens,
            segments,
            ends_at,
            target: None,
        })
    }

    /// Attach the gold path used for training.
    pub fn with_target(mut self, target: StateSequence) -> Result<Self> {
        self.validate_path(&target)?;
        self.target = Some(target);
        Ok(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment(&self, s: usize) -> Result<&Segment> {
        self.segments.get(s).ok_or_else(|| BioJointError::Instance {
            id: self.id.clone(),
            reason: format!("no segment {}", s),
        })
    }

    /// Lattice segments whose last token is `position`.
    pub fn segments_ending_at(&self, position: usize) -> &[usize] {
        self.ends_at.get(position).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find_segment(&self, start: usize, end: usize) -> Option<usize> {
        let last = end.checked_sub(1)?;
        self.segments_ending_at(last)
            .iter()
            .copied()
            .find(|&s| self.segments[s].start == start)
    }

    pub fn target(&self) -> Option<&StateSequence> {
        self.target.as_ref()
    }

    pub fn feature_dim(&self) -> usize {
        self.segments[0].features.dim()
    }

    /// Check that `path` covers every token exactly once, in order.
    pub fn validate_path(&self, path: &[AnnotatedSegment]) -> Result<()> {
        let mut next = 0;
        for annotated in path {
            let segment = self.segment(annotated.segment())?;
            if segment.start != next {
                return Err(BioJointError::Annotation(format!(
                    "instance `{}`: segment at {}..{} does not continue at token {}",
                    self.id, segment.start, segment.end, next
                )));
            }
            next = segment.end;
        }
        if next != self.tokens.len() {
            return Err(BioJointError::Annotation(format!(
                "instance `{}`: path covers {} of {} tokens",
                self.id,
                next,
                self.tokens.len()
            )));
        }
        Ok(())
    }
}
