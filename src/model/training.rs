use crate::error::Error;
use crate::model::{
    architecture::{Discriminator, Generator, ModelConfig},
    checkpoint::{CheckpointManager, ModelState},
    data::{DatasetSplit, PairBatch, PairBatcher, SampleStore, TrainingData, batches, discover_sample_ids},
    loss::{LossConfig, discriminator_loss, generator_loss},
};
use crate::utils::{NoDisplay, PanelWriter, PreviewSink, save_image, tensor_to_images};

use burn::{
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    data::dataset::Dataset,
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::path::{Path, PathBuf};

#[derive(Config)]
pub struct TrainingConfig {
    #[config(default = "ModelConfig::new()")]
    pub model: ModelConfig,

    #[config(default = "LossConfig::new()")]
    pub loss: LossConfig,

    #[config(default = "AdamConfig::new().with_beta_1(0.5).with_epsilon(1e-7)")]
    pub optimizer_g: AdamConfig,

    #[config(default = "AdamConfig::new().with_beta_1(0.5).with_epsilon(1e-7)")]
    pub optimizer_d: AdamConfig,

    #[config(default = 100)]
    pub num_epochs: usize,

    #[config(default = 2e-4)]
    pub learning_rate: f64,

    /// Save a checkpoint every this many epochs, and after the last one.
    #[config(default = 25)]
    pub checkpoint_interval: usize,

    #[config(default = 3)]
    pub max_checkpoints: usize,

    /// Test samples rendered after each epoch.
    #[config(default = 5)]
    pub preview_count: usize,

    #[config(default = 0.8)]
    pub train_ratio: f64,

    #[config(default = 42)]
    pub seed: u64,
}

/// Freshly initialized networks with empty optimizer state.
pub fn init_state<B: AutodiffBackend>(
    config: &TrainingConfig,
    device: &B::Device,
) -> ModelState<
    B,
    impl Optimizer<Generator<B>, B> + Clone + use<B>,
    impl Optimizer<Discriminator<B>, B> + Clone + use<B>,
> {
    ModelState {
        generator: config.model.generator.init(device),
        discriminator: config.model.discriminator.init(device),
        generator_optimizer: config.optimizer_g.init::<B, Generator<B>>(),
        discriminator_optimizer: config.optimizer_d.init::<B, Discriminator<B>>(),
    }
}

/// Scalar loss values of one training step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepLosses {
    pub discriminator: f64,
    pub generator: f64,
    pub adversarial: f64,
    pub l1: f64,
    pub edge: f64,
}

impl StepLosses {
    fn accumulate(&mut self, other: &StepLosses) {
        self.discriminator += other.discriminator;
        self.generator += other.generator;
        self.adversarial += other.adversarial;
        self.l1 += other.l1;
        self.edge += other.edge;
    }

    fn mean(mut self, count: usize) -> Self {
        let count = count.max(1) as f64;
        self.discriminator /= count;
        self.generator /= count;
        self.adversarial /= count;
        self.l1 /= count;
        self.edge /= count;
        self
    }
}

/// What a call to [`Trainer::train`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingReport {
    pub steps: usize,
    pub previews: usize,
    /// Numbers of the checkpoints written, in order.
    pub checkpoints: Vec<usize>,
    pub resumed_from: Option<usize>,
}

/// Owns both networks, their optimizers and the checkpoint manager, and
/// drives the epoch loop.
pub struct Trainer<B: AutodiffBackend, OG, OD> {
    state: ModelState<B, OG, OD>,
    config: TrainingConfig,
    checkpoints: CheckpointManager,
    sink: Box<dyn PreviewSink>,
    output_dir: PathBuf,
    device: B::Device,
}

impl<B, OG, OD> Trainer<B, OG, OD>
where
    B: AutodiffBackend,
    OG: Optimizer<Generator<B>, B> + Clone,
    OD: Optimizer<Discriminator<B>, B> + Clone,
{
    pub fn new<P: AsRef<Path>>(
        state: ModelState<B, OG, OD>,
        config: TrainingConfig,
        checkpoints: CheckpointManager,
        sink: Box<dyn PreviewSink>,
        output_dir: P,
        device: B::Device,
    ) -> Self {
        Self {
            state,
            config,
            checkpoints,
            sink,
            output_dir: output_dir.as_ref().to_path_buf(),
            device,
        }
    }

    pub fn state(&self) -> &ModelState<B, OG, OD> {
        &self.state
    }

    /// One optimization step on a single `(input, target)` batch.
    ///
    /// The two losses are differentiated separately and each gradient set is
    /// restricted to its own network before the optimizers run.
    pub fn step(&mut self, batch: PairBatch<B>) -> StepLosses {
        let PairBatch { inputs, targets } = batch;
        let generated = self.state.generator.forward(inputs.clone());

        // Discriminator graph: the candidate is detached from the generator.
        let real_logits = self
            .state
            .discriminator
            .forward(targets.clone(), inputs.clone());
        let fake_logits = self
            .state
            .discriminator
            .forward(generated.clone().detach(), inputs.clone());
        let loss_d = discriminator_loss(real_logits, fake_logits);

        // Generator graph.
        let fake_logits = self
            .state
            .discriminator
            .forward(generated.clone(), inputs.clone());
        let loss_g = generator_loss(&self.config.loss, fake_logits, generated, inputs, targets);

        let losses = StepLosses {
            discriminator: loss_d.clone().into_scalar().elem::<f64>(),
            generator: loss_g.total.clone().into_scalar().elem::<f64>(),
            adversarial: loss_g.adversarial.into_scalar().elem::<f64>(),
            l1: loss_g.l1.into_scalar().elem::<f64>(),
            edge: loss_g.edge.into_scalar().elem::<f64>(),
        };

        let grads_d = GradientsParams::from_grads(loss_d.backward(), &self.state.discriminator);
        let grads_g = GradientsParams::from_grads(loss_g.total.backward(), &self.state.generator);

        let lr = self.config.learning_rate;
        self.state.discriminator = self.state.discriminator_optimizer.step(
            lr,
            self.state.discriminator.clone(),
            grads_d,
        );
        self.state.generator =
            self.state
                .generator_optimizer
                .step(lr, self.state.generator.clone(), grads_g);

        losses
    }

    /// Runs the generator in inference mode over the first test samples,
    /// writing `<index>_<epoch>.jpg` and forwarding the panels to the sink.
    pub fn preview(&mut self, data: &TrainingData, epoch: usize) -> crate::Result<usize> {
        let generator = self.state.generator.valid();
        let batcher = PairBatcher::default();
        let device = self.device.clone();

        let mut count = 0;
        for (index, batch) in batches::<B::InnerBackend, _, _, _, _>(&data.test, &batcher, &device)
            .take(self.config.preview_count)
            .enumerate()
        {
            let prediction = generator.forward(batch.inputs.clone());
            let label = format!("{index}_{epoch}");

            let predictions = tensor_to_images(prediction)?;
            save_image(&predictions[0], &self.output_dir.join(format!("{label}.jpg")))?;

            let mut panels = tensor_to_images(batch.inputs)?;
            panels.extend(tensor_to_images(batch.targets)?);
            panels.extend(predictions);
            self.sink.show(&label, &panels)?;
            count += 1;
        }
        Ok(count)
    }

    fn checkpoint_due(&self, epoch: usize) -> bool {
        let finished = epoch + 1;
        let interval = self.config.checkpoint_interval.max(1);
        finished % interval == 0 || finished == self.config.num_epochs
    }

    /// Resumes from the latest checkpoint if any, then runs every epoch.
    pub fn train(&mut self, data: &TrainingData) -> crate::Result<TrainingReport> {
        let mut report = TrainingReport::default();
        if let Some(latest) = self.checkpoints.latest() {
            self.state = self
                .checkpoints
                .restore_latest(self.state.clone(), &self.device)?;
            report.resumed_from = Some(latest);
            tracing::info!(checkpoint = latest, "resuming training");
        }

        let batcher = PairBatcher::default();
        let device = self.device.clone();
        let total = data.train.len();

        for epoch in 0..self.config.num_epochs {
            let mut totals = StepLosses::default();
            let mut steps = 0;
            for (iteration, batch) in
                batches::<B, _, _, _, _>(&data.train, &batcher, &device).enumerate()
            {
                let losses = self.step(batch);
                tracing::debug!(
                    d_loss = losses.discriminator,
                    g_loss = losses.generator,
                    "epoch {epoch} - train: {iteration} / {total}"
                );
                totals.accumulate(&losses);
                steps += 1;
            }
            report.steps += steps;

            let mean = totals.mean(steps);
            tracing::info!(
                "[Epoch {}/{}] D Loss: {:.4}, G Loss: {:.4} (adv {:.4}, l1 {:.4}, edge {:.4})",
                epoch + 1,
                self.config.num_epochs,
                mean.discriminator,
                mean.generator,
                mean.adversarial,
                mean.l1,
                mean.edge,
            );

            report.previews += self.preview(data, epoch)?;

            if self.checkpoint_due(epoch) {
                report.checkpoints.push(self.checkpoints.save(&self.state)?);
            }
        }

        Ok(report)
    }
}

/// Trains on the samples of `input_dir`, resuming from `checkpoint_dir` when
/// it already holds checkpoints.
pub fn train<B: AutodiffBackend>(
    input_dir: &Path,
    output_dir: &Path,
    checkpoint_dir: &Path,
    config: TrainingConfig,
    display: bool,
    device: B::Device,
) -> crate::Result<TrainingReport> {
    B::seed(config.seed);

    let ids = discover_sample_ids(input_dir)?;
    let split = DatasetSplit::new(ids, config.train_ratio, config.seed);
    tracing::info!(
        samples = split.len(),
        train = split.train.len(),
        test = split.test.len(),
        "partitioned dataset"
    );
    let data = TrainingData::load(&SampleStore::new(input_dir), &split)?;
    tracing::info!(
        height = data.image_size.0,
        width = data.image_size.1,
        "loaded training samples"
    );

    let checkpoints = CheckpointManager::open(checkpoint_dir, config.max_checkpoints)?;
    let config_path = checkpoint_dir.join("config.json");
    config
        .save(&config_path)
        .map_err(|source| Error::io(&config_path, source))?;

    let sink: Box<dyn PreviewSink> = if display {
        Box::new(PanelWriter::new(output_dir.join("panels"))?)
    } else {
        Box::new(NoDisplay)
    };

    let state = init_state::<B>(&config, &device);
    let mut trainer = Trainer::new(state, config, checkpoints, sink, output_dir, device);
    trainer.train(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::data::PairItem;
    use burn::backend::{Autodiff, NdArray};
    use burn::data::dataloader::batcher::Batcher;
    use burn::data::dataset::InMemDataset;
    use burn::tensor::Distribution;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn tiny_config() -> TrainingConfig {
        TrainingConfig::new().with_model(ModelConfig::with_base_filters(1))
    }

    fn pair() -> PairItem {
        let len = 3 * 256 * 256;
        PairItem {
            input: (0..len).map(|i| if i % 7 == 0 { -1.0 } else { 1.0 }).collect(),
            target: (0..len).map(|i| ((i % 11) as f32 / 5.0) - 1.0).collect(),
            height: 256,
            width: 256,
        }
    }

    fn trainer(
        config: TrainingConfig,
        checkpoint_dir: &Path,
        output_dir: &Path,
    ) -> Trainer<
        TestBackend,
        impl Optimizer<Generator<TestBackend>, TestBackend> + Clone + use<>,
        impl Optimizer<Discriminator<TestBackend>, TestBackend> + Clone + use<>,
    > {
        let device = Default::default();
        let checkpoints = CheckpointManager::open(checkpoint_dir, config.max_checkpoints).unwrap();
        let state = init_state::<TestBackend>(&config, &device);
        Trainer::new(state, config, checkpoints, Box::new(NoDisplay), output_dir, device)
    }

    #[test]
    fn step_updates_both_networks_and_reports_finite_losses() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(tiny_config(), &dir.path().join("ckpt"), dir.path());
        let device = Default::default();

        let sample = Tensor::<NdArray<f32>, 4>::random(
            [1, 3, 256, 256],
            Distribution::Uniform(-1.0, 1.0),
            &device,
        );
        let before_g = trainer.state().generator.valid().forward(sample.clone());
        let before_d = trainer
            .state()
            .discriminator
            .valid()
            .forward(sample.clone(), sample.clone());

        let batch: PairBatch<TestBackend> = PairBatcher::default().batch(vec![pair()], &device);
        let losses = trainer.step(batch);
        assert!(losses.discriminator.is_finite() && losses.discriminator > 0.0);
        assert!(losses.generator.is_finite() && losses.generator > 0.0);
        let expected = losses.adversarial + 100.0 * losses.l1 + 300.0 * losses.edge;
        assert!((losses.generator - expected).abs() < 1e-2 * expected.max(1.0));

        let after_g = trainer.state().generator.valid().forward(sample.clone());
        let after_d = trainer
            .state()
            .discriminator
            .valid()
            .forward(sample.clone(), sample);
        assert_ne!(
            before_g.into_data().to_vec::<f32>().unwrap(),
            after_g.into_data().to_vec::<f32>().unwrap()
        );
        assert_ne!(
            before_d.into_data().to_vec::<f32>().unwrap(),
            after_d.into_data().to_vec::<f32>().unwrap()
        );
    }

    /// Applies one discriminator update on fixed inputs and returns the
    /// updated discriminator's scores. Deterministic, no dropout involved.
    fn discriminator_update<OG, OD>(
        state: ModelState<TestBackend, OG, OD>,
        device: &<TestBackend as Backend>::Device,
    ) -> Vec<f32>
    where
        OD: Optimizer<Discriminator<TestBackend>, TestBackend>,
    {
        let ModelState {
            discriminator,
            mut discriminator_optimizer,
            ..
        } = state;
        let real = Tensor::<TestBackend, 4>::ones([1, 3, 256, 256], device);
        let fake = real.clone().neg();
        let loss = discriminator_loss(
            discriminator.forward(real.clone(), fake.clone()),
            discriminator.forward(fake.clone(), real.clone()),
        );
        let grads = GradientsParams::from_grads(loss.backward(), &discriminator);
        let discriminator = discriminator_optimizer.step(2e-4, discriminator, grads);
        discriminator
            .valid()
            .forward(real.inner(), fake.inner())
            .into_data()
            .to_vec::<f32>()
            .unwrap()
    }

    #[test]
    fn restored_optimizer_moments_continue_training_identically() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(tiny_config(), &dir.path().join("ckpt"), dir.path());
        let device = Default::default();
        let batch: PairBatch<TestBackend> = PairBatcher::default().batch(vec![pair()], &device);
        trainer.step(batch);

        let mut manager = CheckpointManager::open(dir.path().join("saved"), 3).unwrap();
        manager.save(trainer.state()).unwrap();
        let restored = manager
            .restore_latest(init_state::<TestBackend>(&tiny_config(), &device), &device)
            .unwrap();
        let without_moments = ModelState {
            discriminator_optimizer: init_state::<TestBackend>(&tiny_config(), &device)
                .discriminator_optimizer,
            ..restored.clone()
        };

        let expected = discriminator_update(trainer.state().clone(), &device);
        assert_eq!(discriminator_update(restored, &device), expected);
        assert_ne!(discriminator_update(without_moments, &device), expected);
    }

    #[test]
    fn checkpoints_every_interval_and_on_last_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_config().with_num_epochs(7).with_checkpoint_interval(3);
        let trainer = trainer(config, &dir.path().join("ckpt"), dir.path());
        let due: Vec<usize> = (0..7).filter(|&epoch| trainer.checkpoint_due(epoch)).collect();
        assert_eq!(due, vec![2, 5, 6]);
    }

    #[test]
    fn train_runs_every_sample_each_epoch_and_writes_previews() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out");
        std::fs::create_dir_all(&output).unwrap();
        let config = tiny_config().with_num_epochs(2).with_preview_count(1);
        let mut trainer = trainer(config, &dir.path().join("ckpt"), &output);

        let data = TrainingData {
            train: InMemDataset::new(vec![pair(), pair()]),
            test: InMemDataset::new(vec![pair(), pair()]),
            image_size: (256, 256),
        };
        let report = trainer.train(&data).unwrap();

        assert_eq!(report.steps, 4);
        assert_eq!(report.previews, 2);
        assert_eq!(report.checkpoints, vec![1]);
        assert_eq!(report.resumed_from, None);
        assert!(output.join("0_0.jpg").exists());
        assert!(output.join("0_1.jpg").exists());
        assert!(!output.join("1_0.jpg").exists());
    }
}
