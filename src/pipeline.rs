//! Persisted inference bundle: lexicon, compiled model and decoder settings
//! in one opaque bincode blob.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};

use crate::annotator::{Annotator, DecoderConfig, ScoredPath};
use crate::error::{BioJointError, Result};
use crate::lexicon::Lexicon;
use crate::model::{CompiledModel, JointScorer, TrainableModel};
use crate::text::TextInstance;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pipeline {
    lexicon: Arc<Lexicon>,
    model: CompiledModel,
    decoder: DecoderConfig,
}

impl Pipeline {
    pub fn new(lexicon: Arc<Lexicon>, model: CompiledModel, decoder: DecoderConfig) -> Result<Self> {
        let pipeline = Self {
            lexicon,
            model,
            decoder,
        };
        pipeline.validate()?;
        Ok(pipeline)
    }

    /// Compile `model` and bundle it with the annotator's lexicon and settings.
    pub fn from_training(model: &TrainableModel, annotator: &Annotator) -> Result<Self> {
        Self::new(
            Arc::clone(annotator.lexicon()),
            model.compile()?,
            annotator.config().clone(),
        )
    }

    fn validate(&self) -> Result<()> {
        self.decoder.validate()?;
        if !self.lexicon.is_indexed() {
            return Err(BioJointError::NotIndexed);
        }
        if self.model.type_count() != self.lexicon.type_count() {
            return Err(BioJointError::Config(format!(
                "model covers {} types, lexicon has {}",
                self.model.type_count(),
                self.lexicon.type_count()
            )));
        }
        Ok(())
    }

    pub fn lexicon(&self) -> &Arc<Lexicon> {
        &self.lexicon
    }

    pub fn model(&self) -> &CompiledModel {
        &self.model
    }

    pub fn decoder(&self) -> &DecoderConfig {
        &self.decoder
    }

    pub fn annotator(&self) -> Result<Annotator> {
        Annotator::new(Arc::clone(&self.lexicon), self.decoder.clone())
    }

    /// Best labelling of `instance` under the compiled model.
    pub fn annotate(&self, instance: &TextInstance) -> Result<ScoredPath> {
        let (best, _) = self.annotator()?.decode(&self.model, instance)?;
        Ok(best)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let pipeline: Self = bincode::deserialize(bytes)?;
        pipeline.validate()?;
        Ok(pipeline)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(&mut writer, self)?;
        writer.flush()?;
        info!(
            "saved pipeline with {} entities to {:?}",
            self.lexicon.len(),
            path
        );
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("loading pipeline from {:?}", path);
        let reader = BufReader::new(File::open(path)?);
        let pipeline: Self = bincode::deserialize_from(reader)?;
        pipeline.validate()?;
        Ok(pipeline)
    }
}
