use burn::{nn::loss::BinaryCrossEntropyLossConfig, prelude::*};

use crate::model::constants::GRAYSCALE_WEIGHTS;

/// Weighting of the generator's pixel-fidelity terms.
#[derive(Config, Debug)]
pub struct LossConfig {
    #[config(default = 100.0)]
    pub l1_weight: f64,
    #[config(default = 300.0)]
    pub edge_weight: f64,
}

/// Generator objective split into its terms. Only `total` is differentiated.
#[derive(Debug, Clone)]
pub struct GeneratorLoss<B: Backend> {
    pub total: Tensor<B, 1>,
    pub adversarial: Tensor<B, 1>,
    pub l1: Tensor<B, 1>,
    pub edge: Tensor<B, 1>,
}

fn bce_with_logits<B: Backend>(logits: Tensor<B, 4>, real: bool) -> Tensor<B, 1> {
    let device = logits.device();
    let [batch, channels, height, width] = logits.dims();
    let logits = logits.reshape([batch, channels * height * width]);
    let targets = if real {
        Tensor::<B, 2, Int>::ones(logits.dims(), &device)
    } else {
        Tensor::<B, 2, Int>::zeros(logits.dims(), &device)
    };
    BinaryCrossEntropyLossConfig::new()
        .with_logits(true)
        .init(&device)
        .forward(logits, targets)
}

/// Real targets should be scored 1, generated candidates 0.
pub fn discriminator_loss<B: Backend>(
    real_logits: Tensor<B, 4>,
    generated_logits: Tensor<B, 4>,
) -> Tensor<B, 1> {
    bce_with_logits(real_logits, true) + bce_with_logits(generated_logits, false)
}

/// Adversarial term + weighted L1 over the whole image + weighted edge term.
pub fn generator_loss<B: Backend>(
    config: &LossConfig,
    generated_logits: Tensor<B, 4>,
    generated: Tensor<B, 4>,
    input: Tensor<B, 4>,
    target: Tensor<B, 4>,
) -> GeneratorLoss<B> {
    let adversarial = bce_with_logits(generated_logits, true);
    let l1 = target.clone().sub(generated.clone()).abs().mean();
    let edge = edge_loss(input, generated, target);

    let total = adversarial.clone()
        + l1.clone().mul_scalar(config.l1_weight)
        + edge.clone().mul_scalar(config.edge_weight);

    GeneratorLoss {
        total,
        adversarial,
        l1,
        edge,
    }
}

/// Selects the black pixels of a normalized edge map: `[batch, 1, H, W]` of 0/1.
///
/// Grayscale values are truncated to integers like an 8-bit cast, so only
/// pixels darker than 1/255 count as edges.
pub fn edge_mask<B: Backend>(input: Tensor<B, 4>) -> Tensor<B, 4> {
    let device = input.device();
    let weights = Tensor::<B, 1>::from_floats(GRAYSCALE_WEIGHTS, &device).reshape([1, 3, 1, 1]);
    let pixels = input.detach().mul_scalar(0.5).add_scalar(0.5).mul_scalar(255.0);
    pixels.mul(weights).sum_dim(1).lower_elem(1.0).float()
}

/// Mean absolute error restricted to edge pixels, averaged over channels.
///
/// Zero when the mask selects nothing.
pub fn edge_loss<B: Backend>(
    input: Tensor<B, 4>,
    generated: Tensor<B, 4>,
    target: Tensor<B, 4>,
) -> Tensor<B, 1> {
    let [_, channels, _, _] = target.dims();
    let mask = edge_mask(input);
    let selected = mask.clone().sum().clamp_min(1.0).mul_scalar(channels as f64);
    target.sub(generated).abs().mul(mask).sum().div(selected)
}
