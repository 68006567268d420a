use burn::{
    optim::Optimizer,
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::model::architecture::{Discriminator, Generator};

/// Full precision so that a restored state is bit-identical to the saved one.
pub type StateRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

const INDEX_FILE: &str = "checkpoint.json";
const GENERATOR_FILE: &str = "generator";
const DISCRIMINATOR_FILE: &str = "discriminator";
const GENERATOR_OPTIM_FILE: &str = "optim-generator";
const DISCRIMINATOR_OPTIM_FILE: &str = "optim-discriminator";

/// Everything training mutates: both networks and both optimizer states.
#[derive(Clone)]
pub struct ModelState<B: AutodiffBackend, OG, OD> {
    pub generator: Generator<B>,
    pub discriminator: Discriminator<B>,
    pub generator_optimizer: OG,
    pub discriminator_optimizer: OD,
}

impl<B, OG, OD> ModelState<B, OG, OD>
where
    B: AutodiffBackend,
    OG: Optimizer<Generator<B>, B>,
    OD: Optimizer<Discriminator<B>, B>,
{
    fn save_to(&self, dir: &Path, recorder: &StateRecorder) -> Result<()> {
        self.generator
            .clone()
            .save_file(dir.join(GENERATOR_FILE), recorder)?;
        self.discriminator
            .clone()
            .save_file(dir.join(DISCRIMINATOR_FILE), recorder)?;
        Recorder::<B>::record(
            recorder,
            self.generator_optimizer.to_record(),
            dir.join(GENERATOR_OPTIM_FILE),
        )?;
        Recorder::<B>::record(
            recorder,
            self.discriminator_optimizer.to_record(),
            dir.join(DISCRIMINATOR_OPTIM_FILE),
        )?;
        Ok(())
    }

    fn load_from(self, dir: &Path, recorder: &StateRecorder, device: &B::Device) -> Result<Self> {
        let generator = self
            .generator
            .load_file(dir.join(GENERATOR_FILE), recorder, device)?;
        let discriminator =
            self.discriminator
                .load_file(dir.join(DISCRIMINATOR_FILE), recorder, device)?;
        let generator_record =
            Recorder::<B>::load(recorder, dir.join(GENERATOR_OPTIM_FILE), device)?;
        let discriminator_record =
            Recorder::<B>::load(recorder, dir.join(DISCRIMINATOR_OPTIM_FILE), device)?;

        Ok(Self {
            generator,
            discriminator,
            generator_optimizer: self.generator_optimizer.load_record(generator_record),
            discriminator_optimizer: self
                .discriminator_optimizer
                .load_record(discriminator_record),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct CheckpointIndex {
    /// Retained checkpoint numbers, oldest first.
    retained: Vec<usize>,
    /// Number the next checkpoint will get. Never reused.
    next: usize,
}

/// Saves numbered snapshots of a [`ModelState`] under a directory and keeps
/// only the most recent `max_to_keep` of them.
///
/// Layout: `<dir>/ckpt-<n>/*.mpk` plus a `<dir>/checkpoint.json` index.
pub struct CheckpointManager {
    dir: PathBuf,
    max_to_keep: usize,
    index: CheckpointIndex,
    recorder: StateRecorder,
}

impl CheckpointManager {
    /// Opens `dir`, picking up the index of a previous run if there is one.
    pub fn open<P: AsRef<Path>>(dir: P, max_to_keep: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| Error::io(&dir, source))?;

        let index_path = dir.join(INDEX_FILE);
        let index = if index_path.exists() {
            let contents = std::fs::read_to_string(&index_path)
                .map_err(|source| Error::io(&index_path, source))?;
            serde_json::from_str(&contents).map_err(|source| Error::Json {
                path: index_path.clone(),
                source,
            })?
        } else {
            CheckpointIndex {
                retained: Vec::new(),
                next: 1,
            }
        };

        Ok(Self {
            dir,
            max_to_keep: max_to_keep.max(1),
            index,
            recorder: StateRecorder::new(),
        })
    }

    /// Number of the most recent checkpoint.
    pub fn latest(&self) -> Option<usize> {
        self.index.retained.last().copied()
    }

    pub fn retained(&self) -> &[usize] {
        &self.index.retained
    }

    pub fn checkpoint_path(&self, number: usize) -> PathBuf {
        self.dir.join(format!("ckpt-{number}"))
    }

    /// Writes a new checkpoint and prunes the oldest ones beyond `max_to_keep`.
    pub fn save<B, OG, OD>(&mut self, state: &ModelState<B, OG, OD>) -> Result<usize>
    where
        B: AutodiffBackend,
        OG: Optimizer<Generator<B>, B>,
        OD: Optimizer<Discriminator<B>, B>,
    {
        let number = self.index.next;
        let path = self.checkpoint_path(number);
        std::fs::create_dir_all(&path).map_err(|source| Error::io(&path, source))?;
        state.save_to(&path, &self.recorder)?;

        self.index.next += 1;
        self.index.retained.push(number);
        while self.index.retained.len() > self.max_to_keep {
            let oldest = self.index.retained.remove(0);
            let oldest_path = self.checkpoint_path(oldest);
            if oldest_path.exists() {
                std::fs::remove_dir_all(&oldest_path)
                    .map_err(|source| Error::io(&oldest_path, source))?;
            }
            tracing::debug!(checkpoint = oldest, "pruned checkpoint");
        }
        self.write_index()?;

        tracing::info!(checkpoint = number, path = %path.display(), "saved checkpoint");
        Ok(number)
    }

    /// Loads the most recent checkpoint into `state`. Returns `state` untouched
    /// when nothing has been saved yet.
    pub fn restore_latest<B, OG, OD>(
        &self,
        state: ModelState<B, OG, OD>,
        device: &B::Device,
    ) -> Result<ModelState<B, OG, OD>>
    where
        B: AutodiffBackend,
        OG: Optimizer<Generator<B>, B>,
        OD: Optimizer<Discriminator<B>, B>,
    {
        let Some(number) = self.latest() else {
            return Ok(state);
        };
        let state = state.load_from(&self.checkpoint_path(number), &self.recorder, device)?;
        tracing::info!(checkpoint = number, "restored checkpoint");
        Ok(state)
    }

    /// Loads only the generator weights of the latest checkpoint, on any backend.
    pub fn load_generator<B: Backend>(
        &self,
        generator: Generator<B>,
        device: &B::Device,
    ) -> Result<Generator<B>> {
        let number = self.latest().ok_or_else(|| Error::NoCheckpoint {
            path: self.dir.clone(),
        })?;
        let path = self.checkpoint_path(number).join(GENERATOR_FILE);
        let generator = generator.load_file(path, &self.recorder, device)?;
        tracing::info!(checkpoint = number, "loaded generator");
        Ok(generator)
    }

    fn write_index(&self) -> Result<()> {
        let path = self.dir.join(INDEX_FILE);
        let tmp = self.dir.join(format!("{INDEX_FILE}.tmp"));
        let json = serde_json::to_string_pretty(&self.index).map_err(|source| Error::Json {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&tmp, json).map_err(|source| Error::io(&tmp, source))?;
        std::fs::rename(&tmp, &path).map_err(|source| Error::io(&path, source))
    }
}
