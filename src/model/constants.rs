pub const CHANNELS: usize = 3;

/// Every spatial side must survive 8 halvings in the generator encoder.
pub const SIZE_MULTIPLE: u32 = 256;

pub const KERNEL_SIZE: usize = 4;
pub const INIT_STD: f64 = 0.02;
pub const LEAKY_SLOPE: f64 = 0.2;
pub const DROPOUT: f64 = 0.5;
pub const BATCH_NORM_MOMENTUM: f64 = 0.01;
pub const BATCH_NORM_EPSILON: f64 = 1e-3;

pub const GENERATOR_DOWN_WIDTHS: [usize; 8] = [1, 2, 4, 8, 8, 8, 8, 8];
pub const GENERATOR_UP_WIDTHS: [usize; 7] = [8, 8, 8, 8, 4, 2, 1];
pub const GENERATOR_DROPOUT_BLOCKS: usize = 3;
pub const DISCRIMINATOR_WIDTHS: [usize; 4] = [1, 2, 4, 8];

/// ITU-R 601-2 luma weights, matching common RGB -> grayscale conversions.
pub const GRAYSCALE_WEIGHTS: [f32; 3] = [0.2989, 0.5870, 0.1140];
