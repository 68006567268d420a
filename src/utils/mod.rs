pub mod preview;

use burn::prelude::*;
use image::{GenericImage, Rgb, RgbImage};
use std::path::Path;

use crate::error::{Error, Result};
use crate::model::constants::CHANNELS;

pub use preview::{NoDisplay, PanelWriter, PreviewSink};

/// Maps a normalized value back to an 8-bit channel, saturating outside [-1, 1].
pub fn denormalize(value: f32) -> u8 {
    // Reversing the normalization: (val + 1.0) * 127.5
    ((value + 1.0) * 127.5).round().clamp(0.0, 255.0) as u8
}

/// Converts a channel-first buffer in [-1, 1] into an RGB image.
pub fn chw_to_image(data: &[f32], height: usize, width: usize) -> Result<RgbImage> {
    let plane = height * width;
    let expected_len = plane * CHANNELS;
    if data.len() != expected_len {
        return Err(Error::TensorData(format!(
            "mismatched data length, expected {expected_len}, got {}",
            data.len()
        )));
    }

    let mut image = RgbImage::new(width as u32, height as u32);
    for (index, pixel) in image.pixels_mut().enumerate() {
        *pixel = Rgb([
            denormalize(data[index]),
            denormalize(data[plane + index]),
            denormalize(data[2 * plane + index]),
        ]);
    }
    Ok(image)
}

/// Converts a `[batch, 3, H, W]` tensor in [-1, 1] into one RGB image per batch entry.
pub fn tensor_to_images<B: Backend>(tensor: Tensor<B, 4>) -> Result<Vec<RgbImage>> {
    let [batch, channels, height, width] = tensor.dims();
    if channels != CHANNELS {
        return Err(Error::TensorData(format!(
            "expected {CHANNELS} channels for images, got {channels}"
        )));
    }

    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| Error::TensorData(format!("{err:?}")))?;

    let stride = channels * height * width;
    (0..batch)
        .map(|index| chw_to_image(&values[index * stride..(index + 1) * stride], height, width))
        .collect()
}

/// Lays images side by side, left to right.
pub fn concat_images_horiz(images: &[RgbImage]) -> Result<RgbImage> {
    let height = images.iter().map(|img| img.height()).max().unwrap_or(0);
    let total_width: u32 = images.iter().map(|img| img.width()).sum();
    let mut out = RgbImage::new(total_width, height);

    let mut offset_x = 0;
    for img in images {
        out.copy_from(img, offset_x, 0)
            .map_err(|err| Error::TensorData(format!("cannot place panel at x={offset_x}: {err}")))?;
        offset_x += img.width();
    }
    Ok(out)
}

/// Saves an image, picking the encoder from the file extension.
pub fn save_image(image: &RgbImage, path: &Path) -> Result<()> {
    image.save(path).map_err(|source| Error::Image {
        path: path.to_path_buf(),
        source,
    })
}
