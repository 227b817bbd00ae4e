use std::sync::Arc;

use anyhow::Context;
use camino::Utf8Path;
use image::ExtendedColorType;
use image::codecs::webp::WebPEncoder;

use crate::cache::{Cached, ContentCache};
use crate::pipeline::Pipeline;
use crate::record::FileRecord;
use crate::task::Task;
use crate::transform::{RenameSuffix, Transformer};

/// Resizes an image down to a width cap (never upscaling) and re-encodes it
/// as lossless WebP. GIFs pass through untouched since re-encoding them drops
/// animation frames.
///
/// This is the expensive transform the content cache exists for; wrap it with
/// [`Cached`] or use [`image_variants`].
pub struct ImageResize {
    width: u32,
}

impl ImageResize {
    pub fn new(width: u32) -> Self {
        Self { width }
    }
}

impl Transformer for ImageResize {
    fn name(&self) -> &str {
        "image-resize"
    }

    fn params(&self) -> Vec<u8> {
        let mut params = b"webp-lossless;width=".to_vec();
        params.extend_from_slice(&self.width.to_le_bytes());
        params
    }

    fn apply(&self, record: FileRecord) -> anyhow::Result<Vec<FileRecord>> {
        let format = image::guess_format(&record.content)
            .with_context(|| format!("Couldn't detect image format of '{}'", record.path))?;

        if matches!(format, image::ImageFormat::Gif) {
            return Ok(vec![record]);
        }

        let img = image::load_from_memory(&record.content)
            .with_context(|| format!("Couldn't decode image '{}'", record.path))?;

        let img = if img.width() > self.width {
            img.resize(self.width, u32::MAX, image::imageops::FilterType::Lanczos3)
        } else {
            img
        };

        let (width, height) = (img.width(), img.height());
        let mut out = Vec::new();

        WebPEncoder::new_lossless(&mut out).encode(
            &img.to_rgba8(),
            width,
            height,
            ExtendedColorType::Rgba8,
        )?;

        let path = record.path.with_extension("webp");
        Ok(vec![record.renamed(path).with_content(out)])
    }
}

/// Builds the image task as a parallel group with one cache-backed leaf per
/// target width, each output suffixed with `_{width}`.
pub fn image_variants(
    name: impl Into<String>,
    base: impl AsRef<Utf8Path>,
    globs: Vec<String>,
    dest: impl AsRef<Utf8Path>,
    widths: &[u32],
    cache: Arc<ContentCache>,
) -> Task {
    let name = name.into();
    let base = base.as_ref();
    let dest = dest.as_ref();

    let children = widths
        .iter()
        .map(|&width| {
            let pipeline = Pipeline::new()
                .stage(Cached::new(ImageResize::new(width), cache.clone()))
                .stage(RenameSuffix::new(format!("_{width}")));

            Task::pipeline(
                format!("{name}-{width}"),
                base,
                globs.clone(),
                dest,
                pipeline,
            )
        })
        .collect();

    Task::parallel(name, children)
}
