use burn::{
    nn::{
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Initializer, LeakyRelu,
        LeakyReluConfig, PaddingConfig2d, Relu,
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
    },
    prelude::*,
};

use crate::model::constants::{
    BATCH_NORM_EPSILON, BATCH_NORM_MOMENTUM, DROPOUT, INIT_STD, KERNEL_SIZE, LEAKY_SLOPE,
};

pub(crate) fn normal_init() -> Initializer {
    Initializer::Normal {
        mean: 0.0,
        std: INIT_STD,
    }
}

fn batch_norm<B: Backend>(channels: usize, device: &B::Device) -> BatchNorm<B, 2> {
    BatchNormConfig::new(channels)
        .with_momentum(BATCH_NORM_MOMENTUM)
        .with_epsilon(BATCH_NORM_EPSILON)
        .init(device)
}

/// Strided convolution -> optional batch norm -> leaky ReLU. Halves the spatial size.
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    norm: Option<BatchNorm<B, 2>>,
    activation: LeakyRelu,
}

#[derive(Config, Debug)]
pub struct DownsampleConfig {
    pub channels_in: usize,
    pub channels_out: usize,
    #[config(default = true)]
    pub batch_norm: bool,
}

impl DownsampleConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Downsample<B> {
        Downsample {
            // The bias would be cancelled by the normalization's shift.
            conv: Conv2dConfig::new(
                [self.channels_in, self.channels_out],
                [KERNEL_SIZE, KERNEL_SIZE],
            )
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(!self.batch_norm)
            .with_initializer(normal_init())
            .init(device),
            norm: self
                .batch_norm
                .then(|| batch_norm(self.channels_out, device)),
            activation: LeakyReluConfig::new()
                .with_negative_slope(LEAKY_SLOPE)
                .init(),
        }
    }
}

impl<B: Backend> Downsample<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.conv.forward(input);
        if let Some(norm) = &self.norm {
            x = norm.forward(x);
        }
        self.activation.forward(x)
    }
}

/// Transposed convolution -> batch norm -> optional dropout -> ReLU. Doubles the spatial size.
#[derive(Module, Debug)]
pub struct Upsample<B: Backend> {
    conv: ConvTranspose2d<B>,
    norm: BatchNorm<B, 2>,
    dropout: Option<Dropout>,
    activation: Relu,
}

#[derive(Config, Debug)]
pub struct UpsampleConfig {
    pub channels_in: usize,
    pub channels_out: usize,
    #[config(default = false)]
    pub dropout: bool,
}

impl UpsampleConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Upsample<B> {
        Upsample {
            conv: upconv(self.channels_in, self.channels_out, false, device),
            norm: batch_norm(self.channels_out, device),
            dropout: self.dropout.then(|| DropoutConfig::new(DROPOUT).init()),
            activation: Relu,
        }
    }
}

impl<B: Backend> Upsample<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.conv.forward(input);
        x = self.norm.forward(x);
        if let Some(dropout) = &self.dropout {
            x = dropout.forward(x);
        }
        self.activation.forward(x)
    }
}

pub(crate) fn upconv<B: Backend>(
    channels_in: usize,
    channels_out: usize,
    bias: bool,
    device: &B::Device,
) -> ConvTranspose2d<B> {
    ConvTranspose2dConfig::new([channels_in, channels_out], [KERNEL_SIZE, KERNEL_SIZE])
        .with_stride([2, 2])
        .with_padding([1, 1])
        .with_bias(bias)
        .with_initializer(normal_init())
        .init(device)
}

pub(crate) fn conv<B: Backend>(
    channels_in: usize,
    channels_out: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new([channels_in, channels_out], [KERNEL_SIZE, KERNEL_SIZE])
        .with_stride([2, 2])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_initializer(normal_init())
        .init(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn downsample_halves_spatial_size() {
        let device = Default::default();
        let block = DownsampleConfig::new(3, 8).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 16], &device);
        assert_eq!(block.forward(x).dims(), [1, 8, 16, 8]);
    }

    #[test]
    fn first_block_skips_normalization_and_keeps_bias() {
        let device = Default::default();
        let block = DownsampleConfig::new(3, 8)
            .with_batch_norm(false)
            .init::<TestBackend>(&device);
        assert!(block.norm.is_none());
        assert!(block.conv.bias.is_some());

        let block = DownsampleConfig::new(3, 8).init::<TestBackend>(&device);
        assert!(block.norm.is_some());
        assert!(block.conv.bias.is_none());
    }

    #[test]
    fn upsample_doubles_spatial_size() {
        let device = Default::default();
        let block = UpsampleConfig::new(8, 4)
            .with_dropout(true)
            .init::<TestBackend>(&device);
        assert!(block.dropout.is_some());
        let x = Tensor::<TestBackend, 4>::zeros([1, 8, 4, 2], &device);
        assert_eq!(block.forward(x).dims(), [1, 4, 8, 4]);
    }

    #[test]
    fn upsample_output_is_non_negative() {
        let device = Default::default();
        let block = UpsampleConfig::new(4, 4).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::random(
            [1, 4, 4, 4],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        let min = block.forward(x).min().into_scalar();
        assert!(min >= 0.0);
    }
}
