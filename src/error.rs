use biojoint_core::CoreError;
use thiserror::Error;

use crate::lexicon::EntityId;

#[derive(Debug, Error)]
pub enum BioJointError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("invalid lexicon: {0}")]
    Lexicon(String),

    #[error("lexicon is already indexed, no further entities may be added")]
    LexiconSealed,

    #[error("lexicon has not been indexed yet")]
    NotIndexed,

    #[error("unknown entity type `{0}`")]
    UnknownType(String),

    #[error("unknown entity {0:?}")]
    UnknownEntity(EntityId),

    #[error("vocabulary for `{0}` must be frozen")]
    VocabularyNotFrozen(String),

    #[error("invalid annotation: {0}")]
    Annotation(String),

    #[error("invalid instance `{id}`: {reason}")]
    Instance { id: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, BioJointError>;
