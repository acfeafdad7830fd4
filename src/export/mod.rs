use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};

use crate::db::Store;
use crate::derive::{baked_rotation, DerivationGraph};
use crate::error::{Error, Result};
use crate::model::PhotoInfo;
use crate::transform::{Interpolation, Transform};

/// Removes the file at `path` on drop unless committed.
#[must_use]
pub struct PartialFile {
    path: PathBuf,
    committed: bool,
}

impl PartialFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            committed: false,
        }
    }

    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::warn!(path = %self.path.display(), "Removed partially written file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::error!(path = %self.path.display(), error = %e, "Failed to remove partial file"),
        }
    }
}

/// Encoder for a destination path, chosen by its extension.
pub fn format_for_path(path: &Path) -> Result<ImageFormat> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();
    ImageFormat::from_extension(&extension)
        .filter(|f| f.writing_enabled())
        .ok_or(Error::UnsupportedFormat { extension })
}

fn supports_alpha(format: ImageFormat) -> bool {
    !matches!(format, ImageFormat::Jpeg | ImageFormat::Pnm)
}

/// Composite over white and drop the alpha channel.
pub fn flatten_alpha(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let p = rgba.get_pixel(x, y).0;
        let alpha = p[3] as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(p[0]), blend(p[1]), blend(p[2])])
    })
}

pub fn encode_image(image: &DynamicImage, format: ImageFormat, jpeg_quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_encoded(image, format, jpeg_quality, &mut Cursor::new(&mut buf))?;
    Ok(buf)
}

fn write_encoded<W: Write + std::io::Seek>(
    image: &DynamicImage,
    format: ImageFormat,
    jpeg_quality: u8,
    writer: &mut W,
) -> Result<()> {
    let flattened;
    let image = if image.color().has_alpha() && !supports_alpha(format) {
        flattened = DynamicImage::ImageRgb8(flatten_alpha(image));
        &flattened
    } else {
        image
    };

    match format {
        ImageFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(writer, jpeg_quality.clamp(1, 100));
            image.write_with_encoder(encoder)?;
        }
        _ => image.write_to(writer, format)?,
    }
    Ok(())
}

/// Encode to `path`. On failure nothing is left at `path`.
pub fn write_image(image: &DynamicImage, path: &Path, jpeg_quality: u8) -> Result<()> {
    let format = format_for_path(path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(path)?;
    let guard = PartialFile::new(path);
    let mut writer = BufWriter::new(file);
    write_encoded(image, format, jpeg_quality, &mut writer)?;
    writer.flush()?;
    drop(writer);
    guard.commit();
    Ok(())
}

/// Render `photo` with all of its edits and write it to `dest`.
///
/// `target_box` with a non-positive side, or `None`, exports at natural size.
pub fn export_photo(
    graph: &DerivationGraph<'_>,
    store: &dyn Store,
    photo: &PhotoInfo,
    dest: &Path,
    target_box: Option<(u32, u32)>,
    jpeg_quality: u8,
) -> Result<()> {
    // Fail before decoding anything.
    format_for_path(dest)?;

    let original = photo
        .descriptors()
        .iter()
        .filter_map(|id| store.find_descriptor(*id).ok().flatten())
        .find(|d| d.as_original().is_some())
        .ok_or(Error::NoOriginal { photo: photo.id.0 })?;

    let params = photo.edit_params();
    let requested = params.requested_operations();
    let source = graph.select_source(store, original.id(), &requested, &params)?;
    let pixels = graph.decode(store, &source)?;

    let rendered = Transform::new(requested.difference(&source.applied_operations()), params)
        .with_source_rotation(baked_rotation(&source))
        .with_interpolation(Interpolation::Bicubic)
        .with_target_box(target_box)
        .apply(&pixels);

    if let Err(e) = write_image(&rendered, dest, jpeg_quality) {
        tracing::error!(photo = %photo.id, dest = %dest.display(), error = %e, "Export failed");
        return Err(e);
    }
    tracing::info!(
        photo = %photo.id,
        dest = %dest.display(),
        width = rendered.width(),
        height = rendered.height(),
        "Exported photo"
    );
    Ok(())
}
