use burn::backend::{Autodiff, NdArray};
use image::{Rgb, RgbImage};
use std::path::Path;
use texture_gan::Error;
use texture_gan::model::{
    architecture::ModelConfig,
    inference,
    training::{self, TrainingConfig},
};

type Inference = NdArray<f32>;
type Training = Autodiff<Inference>;

fn write_samples(dir: &Path, count: usize, size: u32) {
    std::fs::create_dir_all(dir).unwrap();
    for sample in 0..count {
        let edges = RgbImage::from_fn(size, size, |x, y| {
            if (x + y + sample as u32) % 16 == 0 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        });
        let photo = RgbImage::from_fn(size, size, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, (sample * 20) as u8])
        });
        edges
            .save(dir.join(format!("wood{sample:02}-edges.png")))
            .unwrap();
        photo
            .save(dir.join(format!("wood{sample:02}-image.png")))
            .unwrap();
    }
}

fn tiny_config(epochs: usize) -> TrainingConfig {
    TrainingConfig::new()
        .with_model(ModelConfig::with_base_filters(1))
        .with_num_epochs(epochs)
}

struct Dirs {
    _root: tempfile::TempDir,
    input: std::path::PathBuf,
    output: std::path::PathBuf,
    checkpoints: std::path::PathBuf,
}

fn dirs(samples: usize) -> Dirs {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("input");
    let output = root.path().join("output");
    let checkpoints = root.path().join("checkpoints");
    write_samples(&input, samples, 256);
    std::fs::create_dir_all(&output).unwrap();
    Dirs {
        _root: root,
        input,
        output,
        checkpoints,
    }
}

#[test]
fn one_epoch_over_ten_samples() {
    let dirs = dirs(10);

    let report = training::train::<Training>(
        &dirs.input,
        &dirs.output,
        &dirs.checkpoints,
        tiny_config(1),
        false,
        Default::default(),
    )
    .unwrap();

    assert_eq!(report.steps, 8);
    assert_eq!(report.previews, 2);
    assert_eq!(report.checkpoints, vec![1]);
    assert!(dirs.output.join("0_0.jpg").exists());
    assert!(dirs.output.join("1_0.jpg").exists());
    assert!(!dirs.output.join("panels").exists());

    assert!(dirs.checkpoints.join("config.json").exists());
    assert!(dirs.checkpoints.join("checkpoint.json").exists());
    for file in [
        "generator",
        "discriminator",
        "optim-generator",
        "optim-discriminator",
    ] {
        assert!(dirs.checkpoints.join("ckpt-1").join(format!("{file}.mpk")).exists());
    }
}

#[test]
fn second_run_resumes_and_continues_numbering() {
    let dirs = dirs(5);

    let first = training::train::<Training>(
        &dirs.input,
        &dirs.output,
        &dirs.checkpoints,
        tiny_config(1),
        true,
        Default::default(),
    )
    .unwrap();
    assert_eq!(first.resumed_from, None);
    assert_eq!(first.checkpoints, vec![1]);
    assert!(dirs.output.join("panels").join("0_0.png").exists());

    let second = training::train::<Training>(
        &dirs.input,
        &dirs.output,
        &dirs.checkpoints,
        tiny_config(1),
        false,
        Default::default(),
    )
    .unwrap();
    assert_eq!(second.resumed_from, Some(1));
    assert_eq!(second.checkpoints, vec![2]);
    assert!(dirs.checkpoints.join("ckpt-1").exists());
    assert!(dirs.checkpoints.join("ckpt-2").exists());
}

#[test]
fn evaluation_writes_one_prediction_per_id() {
    let dirs = dirs(4);
    training::train::<Training>(
        &dirs.input,
        &dirs.output,
        &dirs.checkpoints,
        tiny_config(1),
        false,
        Default::default(),
    )
    .unwrap();

    let predictions = dirs.output.join("predictions");
    std::fs::create_dir_all(&predictions).unwrap();
    let written = inference::evaluate::<Inference>(
        &dirs.input,
        &predictions,
        &dirs.checkpoints,
        &tiny_config(1).model.generator,
        Default::default(),
    )
    .unwrap();

    assert_eq!(written.len(), 4);
    for index in 0..4 {
        let path = predictions.join(format!("prediction-{index:04}.jpg"));
        assert!(path.exists());
        let image = image::open(path).unwrap();
        assert_eq!((image.width(), image.height()), (256, 256));
    }
    assert!(!predictions.join("prediction-0004.jpg").exists());
}

#[test]
fn mismatched_sample_sizes_are_rejected() {
    let dirs = dirs(3);
    RgbImage::from_pixel(512, 256, Rgb([1, 2, 3]))
        .save(dirs.input.join("wood99-edges.png"))
        .unwrap();
    RgbImage::from_pixel(512, 256, Rgb([1, 2, 3]))
        .save(dirs.input.join("wood99-image.png"))
        .unwrap();

    let result = training::train::<Training>(
        &dirs.input,
        &dirs.output,
        &dirs.checkpoints,
        tiny_config(1),
        false,
        Default::default(),
    );
    assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
}

#[test]
fn empty_input_directory_is_an_error() {
    let root = tempfile::tempdir().unwrap();
    let result = training::train::<Training>(
        root.path(),
        root.path(),
        &root.path().join("checkpoints"),
        tiny_config(1),
        false,
        Default::default(),
    );
    assert!(matches!(result, Err(Error::EmptyDataset { .. })));
}
