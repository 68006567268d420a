use crate::error::Result;
use crate::model::{
    architecture::{Generator, GeneratorConfig},
    checkpoint::CheckpointManager,
    data::{DatasetSplit, EdgeBatch, EdgeBatcher, EvalData, SampleStore, batches, discover_sample_ids},
};
use crate::utils::{save_image, tensor_to_images};

use burn::prelude::*;
use std::path::{Path, PathBuf};

/// File name of the `index`-th evaluation output.
pub fn prediction_file_name(index: usize) -> String {
    format!("prediction-{index:04}.jpg")
}

/// Runs `generator` over every edge map of `data` and writes one
/// `prediction-NNNN.jpg` per sample, in dataset order.
pub fn predict<B: Backend>(
    generator: &Generator<B>,
    data: &EvalData,
    output_dir: &Path,
    device: &B::Device,
) -> Result<Vec<PathBuf>> {
    let batcher = EdgeBatcher::default();
    let mut written = Vec::new();

    for EdgeBatch { inputs } in batches::<B, _, _, _, _>(&data.eval, &batcher, device) {
        let prediction = generator.forward(inputs);
        for image in tensor_to_images(prediction)? {
            let path = output_dir.join(prediction_file_name(written.len()));
            save_image(&image, &path)?;
            tracing::debug!(path = %path.display(), "wrote prediction");
            written.push(path);
        }
    }

    Ok(written)
}

/// Restores the generator of the latest checkpoint in `checkpoint_dir` and
/// translates every edge map of `input_dir`.
///
/// `B` should be a non-autodiff backend so that batch normalization uses its
/// running statistics and dropout is disabled.
pub fn evaluate<B: Backend>(
    input_dir: &Path,
    output_dir: &Path,
    checkpoint_dir: &Path,
    generator: &GeneratorConfig,
    device: B::Device,
) -> Result<Vec<PathBuf>> {
    let checkpoints = CheckpointManager::open(checkpoint_dir, usize::MAX)?;
    let generator = checkpoints.load_generator(generator.init::<B>(&device), &device)?;

    let ids = discover_sample_ids(input_dir)?;
    // Evaluation walks the sorted id list, the ratio only affects train/test.
    let split = DatasetSplit::new(ids, 1.0, 0);
    let data = EvalData::load(&SampleStore::new(input_dir), &split)?;
    tracing::info!(
        samples = split.len(),
        height = data.image_size.0,
        width = data.image_size.1,
        "evaluating"
    );

    let written = predict(&generator, &data, output_dir, &device)?;
    tracing::info!(
        count = written.len(),
        dir = %output_dir.display(),
        "wrote predictions"
    );
    Ok(written)
}
