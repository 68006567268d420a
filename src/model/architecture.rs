use burn::{
    nn::{
        Tanh,
        conv::{Conv2d, ConvTranspose2d},
    },
    prelude::*,
};

use crate::model::blocks::{Downsample, DownsampleConfig, Upsample, UpsampleConfig, conv, upconv};
use crate::model::constants::{
    DISCRIMINATOR_WIDTHS, GENERATOR_DOWN_WIDTHS, GENERATOR_DROPOUT_BLOCKS,
    GENERATOR_UP_WIDTHS,
};

/// U-Net generator: 8 downsampling blocks, 7 upsampling blocks fed with
/// mirrored skip connections, and a transposed convolution head.
///
/// Input and output are `[batch, 3, H, W]` with `H` and `W` multiples of 256.
#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    down: Vec<Downsample<B>>,
    up: Vec<Upsample<B>>,
    last: ConvTranspose2d<B>,
    activation: Tanh,
}

#[derive(Config, Debug)]
pub struct GeneratorConfig {
    #[config(default = 64)]
    pub base_filters: usize,
    #[config(default = 3)]
    pub channels: usize,
}

/// PatchGAN discriminator scoring `(candidate, condition)` pairs with a grid
/// of raw logits, one per receptive-field patch.
#[derive(Module, Debug)]
pub struct Discriminator<B: Backend> {
    down: Vec<Downsample<B>>,
    last: Conv2d<B>,
}

#[derive(Config, Debug)]
pub struct DiscriminatorConfig {
    #[config(default = 64)]
    pub base_filters: usize,
    #[config(default = 3)]
    pub channels: usize,
}

impl GeneratorConfig {
    pub fn down_widths(&self) -> [usize; 8] {
        GENERATOR_DOWN_WIDTHS.map(|factor| factor * self.base_filters)
    }

    pub fn up_widths(&self) -> [usize; 7] {
        GENERATOR_UP_WIDTHS.map(|factor| factor * self.base_filters)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Generator<B> {
        let down_widths = self.down_widths();
        let up_widths = self.up_widths();

        let mut channels_in = self.channels;
        let down = down_widths
            .iter()
            .enumerate()
            .map(|(depth, &channels_out)| {
                let block = DownsampleConfig::new(channels_in, channels_out)
                    .with_batch_norm(depth > 0)
                    .init(device);
                channels_in = channels_out;
                block
            })
            .collect();

        let deepest = down_widths.len() - 1;
        let up = up_widths
            .iter()
            .enumerate()
            .map(|(depth, &channels_out)| {
                let channels_in = match depth {
                    0 => down_widths[deepest],
                    _ => up_widths[depth - 1] + down_widths[deepest - depth],
                };
                UpsampleConfig::new(channels_in, channels_out)
                    .with_dropout(depth < GENERATOR_DROPOUT_BLOCKS)
                    .init(device)
            })
            .collect();

        Generator {
            down,
            up,
            last: upconv(up_widths[up_widths.len() - 1], self.channels, true, device),
            activation: Tanh::new(),
        }
    }
}

impl DiscriminatorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Discriminator<B> {
        let mut channels_in = self.channels * 2;
        let down = DISCRIMINATOR_WIDTHS
            .iter()
            .enumerate()
            .map(|(depth, &factor)| {
                let channels_out = factor * self.base_filters;
                let block = DownsampleConfig::new(channels_in, channels_out)
                    .with_batch_norm(depth > 0)
                    .init(device);
                channels_in = channels_out;
                block
            })
            .collect();

        Discriminator {
            down,
            last: conv(channels_in, 1, device),
        }
    }
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    #[config(default = "GeneratorConfig::new()")]
    pub generator: GeneratorConfig,
    #[config(default = "DiscriminatorConfig::new()")]
    pub discriminator: DiscriminatorConfig,
}

impl ModelConfig {
    /// Same topology with every width scaled from `base_filters`.
    pub fn with_base_filters(base_filters: usize) -> Self {
        Self::new()
            .with_generator(GeneratorConfig::new().with_base_filters(base_filters))
            .with_discriminator(DiscriminatorConfig::new().with_base_filters(base_filters))
    }
}

impl<B: Backend> Generator<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut skips = Vec::with_capacity(self.down.len());
        let mut x = input;
        for block in &self.down {
            x = block.forward(x);
            skips.push(x.clone());
        }
        // The deepest activation feeds the first decoder block directly.
        skips.pop();

        for (depth, block) in self.up.iter().enumerate() {
            if depth > 0 {
                let skip = skips[skips.len() - depth].clone();
                x = Tensor::cat(vec![x, skip], 1);
            }
            x = block.forward(x);
        }

        self.activation.forward(self.last.forward(x))
    }
}

impl<B: Backend> Discriminator<B> {
    pub fn forward(&self, candidate: Tensor<B, 4>, condition: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = Tensor::cat(vec![condition, candidate], 1);
        for block in &self.down {
            x = block.forward(x);
        }
        self.last.forward(x)
    }
}
