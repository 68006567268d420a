use image::RgbImage;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::utils::{concat_images_horiz, save_image};

/// Receives preview panels (input, ground truth, prediction) during training.
pub trait PreviewSink {
    fn show(&mut self, label: &str, panels: &[RgbImage]) -> Result<()>;
}

/// Discards previews, used when displaying plots is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDisplay;

impl PreviewSink for NoDisplay {
    fn show(&mut self, _label: &str, _panels: &[RgbImage]) -> Result<()> {
        Ok(())
    }
}

/// Renders the panels side by side into `<dir>/<label>.png`.
#[derive(Debug, Clone)]
pub struct PanelWriter {
    dir: PathBuf,
}

impl PanelWriter {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| Error::io(&dir, source))?;
        Ok(Self { dir })
    }
}

impl PreviewSink for PanelWriter {
    fn show(&mut self, label: &str, panels: &[RgbImage]) -> Result<()> {
        let strip = concat_images_horiz(panels)?;
        let path = self.dir.join(format!("{label}.png"));
        save_image(&strip, &path)?;
        tracing::debug!(path = %path.display(), "wrote preview panel");
        Ok(())
    }
}
