use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::{Dataset, InMemDataset};
use burn::prelude::*;
use image::RgbImage;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::model::constants::{CHANNELS, SIZE_MULTIPLE};

static SAMPLE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.+)-edges\.").expect("Invalid sample id regex"));

/// Lists the sample ids of every `<id>-edges.*` file in `dir`, sorted and deduplicated.
pub fn discover_sample_ids<P: AsRef<Path>>(dir: P) -> Result<Vec<String>> {
    let dir = dir.as_ref();
    let pattern = format!("{}/*edges*", dir.display());

    let mut ids = Vec::new();
    for entry in glob::glob(&pattern)? {
        let path = entry.map_err(|err| {
            let path = err.path().to_path_buf();
            Error::io(path, err.into())
        })?;
        let id = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| SAMPLE_ID.captures(name))
            .map(|captures| captures[1].to_string())
            .ok_or_else(|| Error::InvalidSampleName { path: path.clone() })?;
        ids.push(id);
    }

    if ids.is_empty() {
        return Err(Error::EmptyDataset {
            path: dir.to_path_buf(),
        });
    }
    ids.sort();
    ids.dedup();
    Ok(ids)
}

/// Maps an 8-bit channel value onto [-1, 1].
pub fn normalize(pixel: u8) -> f32 {
    (pixel as f32 / 127.5) - 1.0
}

/// Converts an RGB image to channel-first floats normalized to [-1, 1].
pub fn image_to_chw(image: &RgbImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; plane * CHANNELS];

    for (index, pixel) in image.pixels().enumerate() {
        data[index] = normalize(pixel[0]);
        data[plane + index] = normalize(pixel[1]);
        data[2 * plane + index] = normalize(pixel[2]);
    }

    data
}

#[derive(Debug, Clone)]
pub struct PairItem {
    pub input: Vec<f32>,
    pub target: Vec<f32>,
    pub height: usize,
    pub width: usize,
}

#[derive(Debug, Clone)]
pub struct EdgeItem {
    pub input: Vec<f32>,
    pub height: usize,
    pub width: usize,
}

/// Resolves sample ids to the `<id>-edges.png` / `<id>-image.png` files of a directory.
#[derive(Debug, Clone)]
pub struct SampleStore {
    dir: PathBuf,
}

impl SampleStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn edges_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}-edges.png"))
    }

    pub fn image_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}-image.png"))
    }

    pub fn load_input(&self, id: &str) -> Result<EdgeItem> {
        let edges = open_rgb(&self.edges_path(id))?;
        let (width, height) = edges.dimensions();
        Ok(EdgeItem {
            input: image_to_chw(&edges),
            height: height as usize,
            width: width as usize,
        })
    }

    pub fn load_pair(&self, id: &str) -> Result<PairItem> {
        let edges = open_rgb(&self.edges_path(id))?;
        let photo = open_rgb(&self.image_path(id))?;
        if photo.dimensions() != edges.dimensions() {
            return Err(Error::DimensionMismatch {
                id: id.to_string(),
                expected: edges.dimensions(),
                found: photo.dimensions(),
            });
        }
        let (width, height) = edges.dimensions();
        Ok(PairItem {
            input: image_to_chw(&edges),
            target: image_to_chw(&photo),
            height: height as usize,
            width: width as usize,
        })
    }
}

fn open_rgb(path: &Path) -> Result<RgbImage> {
    image::open(path)
        .map(|image| image.to_rgb8())
        .map_err(|source| Error::Image {
            path: path.to_path_buf(),
            source,
        })
}

/// Enforces that every sample of a run has the dimensions of the first one.
#[derive(Debug, Default)]
struct SizeGuard {
    expected: Option<(u32, u32)>,
}

impl SizeGuard {
    fn check(&mut self, id: &str, height: usize, width: usize) -> Result<()> {
        let found = (width as u32, height as u32);
        match self.expected {
            Some(expected) if expected != found => Err(Error::DimensionMismatch {
                id: id.to_string(),
                expected,
                found,
            }),
            Some(_) => Ok(()),
            None => {
                if found.0 % SIZE_MULTIPLE != 0 || found.1 % SIZE_MULTIPLE != 0 || found.0 == 0 {
                    return Err(Error::UnsupportedSize {
                        id: id.to_string(),
                        width: found.0,
                        height: found.1,
                    });
                }
                self.expected = Some(found);
                Ok(())
            }
        }
    }

    /// `(height, width)` of the first accepted sample.
    fn size(&self) -> Option<(usize, usize)> {
        self.expected
            .map(|(width, height)| (height as usize, width as usize))
    }
}

/// Train/test partition produced by a single seeded shuffle, plus the sorted eval list.
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub train: Vec<String>,
    pub test: Vec<String>,
    pub eval: Vec<String>,
}

impl DatasetSplit {
    pub fn new<I: IntoIterator<Item = String>>(ids: I, train_ratio: f64, seed: u64) -> Self {
        let mut eval: Vec<String> = ids.into_iter().collect();
        eval.sort();
        eval.dedup();

        let train_size = ((eval.len() as f64 * train_ratio).round() as usize).min(eval.len());
        let mut train = eval.clone();
        train.shuffle(&mut StdRng::seed_from_u64(seed));
        let test = train.split_off(train_size);

        Self { train, test, eval }
    }

    pub fn len(&self) -> usize {
        self.eval.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eval.is_empty()
    }
}

/// Decoded `(input, target)` pairs for training and previews, in split order.
pub struct TrainingData {
    pub train: InMemDataset<PairItem>,
    pub test: InMemDataset<PairItem>,
    /// `(height, width)` shared by every sample.
    pub image_size: (usize, usize),
}

impl TrainingData {
    pub fn load(store: &SampleStore, split: &DatasetSplit) -> Result<Self> {
        let mut guard = SizeGuard::default();
        let mut load_all = |ids: &[String]| -> Result<Vec<PairItem>> {
            ids.iter()
                .map(|id| {
                    let item = store.load_pair(id)?;
                    guard.check(id, item.height, item.width)?;
                    Ok(item)
                })
                .collect()
        };
        let train = load_all(&split.train)?;
        let test = load_all(&split.test)?;

        let image_size = guard.size().ok_or_else(|| Error::EmptyDataset {
            path: store.dir().to_path_buf(),
        })?;
        Ok(Self {
            train: InMemDataset::new(train),
            test: InMemDataset::new(test),
            image_size,
        })
    }
}

/// Decoded edge maps for every id, in sorted order. Photos are not required.
pub struct EvalData {
    pub eval: InMemDataset<EdgeItem>,
    pub image_size: (usize, usize),
}

impl EvalData {
    pub fn load(store: &SampleStore, split: &DatasetSplit) -> Result<Self> {
        let mut guard = SizeGuard::default();
        let eval = split
            .eval
            .iter()
            .map(|id| {
                let item = store.load_input(id)?;
                guard.check(id, item.height, item.width)?;
                Ok(item)
            })
            .collect::<Result<Vec<_>>>()?;

        let image_size = guard.size().ok_or_else(|| Error::EmptyDataset {
            path: store.dir().to_path_buf(),
        })?;
        Ok(Self {
            eval: InMemDataset::new(eval),
            image_size,
        })
    }
}

#[derive(Clone, Default)]
pub struct PairBatcher {}

#[derive(Clone, Debug)]
pub struct PairBatch<B: Backend> {
    pub inputs: Tensor<B, 4>,  // Shape: [batch_size, channels, height, width]
    pub targets: Tensor<B, 4>, // Shape: [batch_size, channels, height, width]
}

#[derive(Clone, Default)]
pub struct EdgeBatcher {}

#[derive(Clone, Debug)]
pub struct EdgeBatch<B: Backend> {
    pub inputs: Tensor<B, 4>,
}

fn chw_tensor<B: Backend>(
    data: Vec<f32>,
    height: usize,
    width: usize,
    device: &B::Device,
) -> Tensor<B, 4> {
    Tensor::<B, 3>::from_data(
        TensorData::new(data, [CHANNELS, height, width]).convert::<B::FloatElem>(),
        device,
    )
    .reshape([1, CHANNELS, height, width])
}

impl<B: Backend> Batcher<B, PairItem, PairBatch<B>> for PairBatcher {
    fn batch(&self, items: Vec<PairItem>, device: &B::Device) -> PairBatch<B> {
        let (inputs, targets): (Vec<_>, Vec<_>) = items
            .into_iter()
            .map(|item| {
                (
                    chw_tensor::<B>(item.input, item.height, item.width, device),
                    chw_tensor::<B>(item.target, item.height, item.width, device),
                )
            })
            .unzip();
        PairBatch {
            inputs: Tensor::cat(inputs, 0),
            targets: Tensor::cat(targets, 0),
        }
    }
}

impl<B: Backend> Batcher<B, EdgeItem, EdgeBatch<B>> for EdgeBatcher {
    fn batch(&self, items: Vec<EdgeItem>, device: &B::Device) -> EdgeBatch<B> {
        let inputs = items
            .into_iter()
            .map(|item| chw_tensor::<B>(item.input, item.height, item.width, device))
            .collect();
        EdgeBatch {
            inputs: Tensor::cat(inputs, 0),
        }
    }
}

/// Walks `dataset` in order, yielding one single-item batch per sample.
///
/// Every call restarts from the first item, so epochs see a stable order.
pub fn batches<'a, B, I, O, D, T>(
    dataset: &'a D,
    batcher: &'a T,
    device: &'a B::Device,
) -> impl Iterator<Item = O> + 'a
where
    B: Backend,
    D: Dataset<I>,
    T: Batcher<B, I, O>,
    I: Send + Sync + 'a,
    O: 'a,
{
    (0..dataset.len())
        .filter_map(move |index| dataset.get(index))
        .map(move |item| batcher.batch(vec![item], device))
}
