//! Originals, copies and the operations baked into each copy.

use chrono::{Local, NaiveDateTime};
use image::{DynamicImage, ImageFormat};
use std::fs;
use std::path::Path;

use crate::db::Store;
use crate::error::{Error, Result};
use crate::export::{encode_image, PartialFile};
use crate::model::{
    CopyImage, CopyPurpose, DescriptorId, EditParams, FileLocation, ImageDescriptor, ImageFile, ImageOperation,
    OperationSet, OriginalImage,
};
use crate::registry;
use crate::scanner::hash_bytes;
use crate::transform::{Interpolation, Transform};
use crate::volume::VolumeCatalog;

/// What a derived copy should look like.
#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub operations: OperationSet,
    pub params: EditParams,
    pub purpose: CopyPurpose,
    pub interpolation: Interpolation,
    pub target_box: Option<(u32, u32)>,
    /// Volume the copy is filed into; the catalog default if unset.
    pub volume: Option<String>,
    pub format: ImageFormat,
}

impl CopyRequest {
    pub fn new(operations: OperationSet, params: EditParams) -> Self {
        Self {
            operations,
            params,
            purpose: CopyPurpose::Copy,
            interpolation: Interpolation::Bicubic,
            target_box: None,
            volume: None,
            format: ImageFormat::Png,
        }
    }

    /// A small JPEG preview carrying the geometry in `params`.
    pub fn thumbnail(params: &EditParams, size: u32) -> Self {
        Self {
            operations: [ImageOperation::Crop].into_iter().collect(),
            params: EditParams {
                crop: params.crop,
                rotation: params.rotation,
                ..EditParams::default()
            },
            purpose: CopyPurpose::Thumbnail,
            interpolation: Interpolation::Nearest,
            target_box: Some((size, size)),
            volume: None,
            format: ImageFormat::Jpeg,
        }
    }

    pub fn in_volume(mut self, volume: Option<String>) -> Self {
        self.volume = volume;
        self
    }
}

/// Rotation present in a descriptor's pixels.
pub fn baked_rotation(descriptor: &ImageDescriptor) -> f64 {
    descriptor
        .as_copy()
        .filter(|c| c.applied.contains(ImageOperation::Crop))
        .map(|c| c.params.rotation)
        .unwrap_or(0.0)
}

pub struct DerivationGraph<'a> {
    catalog: &'a VolumeCatalog,
    jpeg_quality: u8,
}

impl<'a> DerivationGraph<'a> {
    pub fn new(catalog: &'a VolumeCatalog, jpeg_quality: u8) -> Self {
        Self { catalog, jpeg_quality }
    }

    pub fn catalog(&self) -> &VolumeCatalog {
        self.catalog
    }

    /// Create the root descriptor for `file`.
    pub fn register_original(
        &self,
        store: &mut dyn Store,
        file: &mut ImageFile,
        (width, height): (u32, u32),
    ) -> Result<ImageDescriptor> {
        let descriptor = ImageDescriptor::Original(OriginalImage {
            id: DescriptorId(store.next_id()?),
            image_file: file.hash,
            width,
            height,
            copies: Vec::new(),
        });
        store.save_descriptor(&descriptor)?;
        file.descriptors.push(descriptor.id());
        store.save_image_file(file)?;

        tracing::debug!(id = %descriptor.id(), hash = %file.hash, width, height, "Registered original");
        Ok(descriptor)
    }

    /// Decode the pixels behind a descriptor from any readable location.
    pub fn decode(&self, store: &dyn Store, descriptor: &ImageDescriptor) -> Result<DynamicImage> {
        let file = store.image_file(&descriptor.image_file())?;
        let path = registry::readable_path(self.catalog, &file)
            .ok_or_else(|| Error::not_found("readable location", file.hash))?;
        decode_path(&path)
    }

    /// Derive a copy from `source`, applying only what it does not already carry.
    pub fn derive_copy(
        &self,
        store: &mut dyn Store,
        source: &ImageDescriptor,
        request: &CopyRequest,
    ) -> Result<ImageDescriptor> {
        let pixels = self.decode(store, source)?;
        self.derive_from_pixels(store, source, &pixels, request)
    }

    /// Like [`derive_copy`](Self::derive_copy) with pixels the caller has
    /// already decoded for `source`.
    pub fn derive_from_pixels(
        &self,
        store: &mut dyn Store,
        source: &ImageDescriptor,
        pixels: &DynamicImage,
        request: &CopyRequest,
    ) -> Result<ImageDescriptor> {
        let already = source.applied_operations();
        let to_apply = request.operations.difference(&already);

        let rendered = Transform::new(to_apply, request.params.clone())
            .with_source_rotation(baked_rotation(source))
            .with_interpolation(request.interpolation)
            .with_target_box(request.target_box)
            .apply(pixels);

        let bytes = encode_image(&rendered, request.format, self.jpeg_quality)?;
        let extension = request.format.extensions_str().first().copied().unwrap_or("img");
        let mut file = self.store_rendition(store, &bytes, extension, request.volume.as_deref())?;

        // Operations already in the source keep the parameters they were baked with.
        let params = match source.as_copy() {
            Some(baked) => request.params.with_baked(&baked.params, &already),
            None => request.params.clone(),
        };
        let copy = ImageDescriptor::Copy(CopyImage {
            id: DescriptorId(store.next_id()?),
            image_file: file.hash,
            width: rendered.width(),
            height: rendered.height(),
            original: source.original_id(),
            purpose: request.purpose,
            params,
            applied: request.operations.union(&already),
        });
        store.save_descriptor(&copy)?;
        file.descriptors.push(copy.id());
        store.save_image_file(&file)?;

        if let ImageDescriptor::Original(mut original) = store.descriptor(source.original_id())? {
            original.copies.push(copy.id());
            store.save_descriptor(&ImageDescriptor::Original(original))?;
        }

        tracing::info!(
            id = %copy.id(),
            original = %source.original_id(),
            purpose = ?request.purpose,
            width = rendered.width(),
            height = rendered.height(),
            "Derived copy"
        );
        Ok(copy)
    }

    /// Undo a rendition that could not be recorded: its descriptor, and its
    /// file when nothing else is decoded from it.
    pub fn discard(&self, store: &mut dyn Store, descriptor: &ImageDescriptor) {
        let result = registry::remove_descriptor(store, descriptor.id()).and_then(|emptied| match emptied {
            Some(file) => {
                registry::delete_managed_files(self.catalog, &file);
                store.delete_image_file(&file.hash)
            }
            None => Ok(()),
        });
        match result {
            Ok(()) => tracing::debug!(id = %descriptor.id(), "Discarded rendition"),
            Err(e) => tracing::warn!(id = %descriptor.id(), error = %e, "Failed to discard rendition"),
        }
    }

    /// Write encoded bytes into a managed volume unless identical content
    /// is already readable somewhere.
    fn store_rendition(
        &self,
        store: &mut dyn Store,
        bytes: &[u8],
        extension: &str,
        volume: Option<&str>,
    ) -> Result<ImageFile> {
        let hash = hash_bytes(bytes);
        if let Some(existing) = store.find_image_file(&hash)? {
            if registry::readable_path(self.catalog, &existing).is_some() {
                return Ok(existing);
            }
        }

        let volume = match volume {
            Some(name) => self.catalog.get(name)?,
            None => self.catalog.default_volume()?,
        };
        let now: NaiveDateTime = Local::now().naive_local();
        let rel_path = volume.filing_name(&now, extension, self.catalog.allocator())?;
        let physical = volume.root.join(&rel_path);

        write_new_file(&physical, bytes)?;
        let location = FileLocation::new(&volume.name, rel_path, registry::modified_time(&physical)?);
        registry::find_or_create(store, hash, bytes.len() as u64, location)
    }

    /// Pick the source for a rendition: the readable copy with the most
    /// operations baked in, provided every baked operation was requested
    /// with the same parameters. Falls back to the original.
    pub fn select_source(
        &self,
        store: &dyn Store,
        original: DescriptorId,
        requested: &OperationSet,
        params: &EditParams,
    ) -> Result<ImageDescriptor> {
        let root = store.descriptor(original)?;
        let Some(orig) = root.as_original() else {
            return Ok(root);
        };

        let mut best: Option<ImageDescriptor> = None;
        for id in &orig.copies {
            let Some(candidate) = store.find_descriptor(*id)? else {
                continue;
            };
            let Some(copy) = candidate.as_copy() else {
                continue;
            };
            if copy.purpose != CopyPurpose::Copy
                || copy.applied.is_empty()
                || !requested.is_superset(&copy.applied)
                || !copy.params.matches_for(params, &copy.applied)
            {
                continue;
            }
            let better = best
                .as_ref()
                .map_or(true, |b| copy.applied.len() > b.applied_operations().len());
            if !better {
                continue;
            }
            let readable = store
                .find_image_file(&copy.image_file)?
                .and_then(|f| registry::readable_path(self.catalog, &f))
                .is_some();
            if readable {
                best = Some(candidate);
            }
        }

        match best {
            Some(copy) => {
                tracing::debug!(copy = %copy.id(), original = %original, "Reusing existing copy as source");
                Ok(copy)
            }
            None => Ok(root),
        }
    }
}

pub fn decode_path(path: &Path) -> Result<DynamicImage> {
    let image = image::open(path).map_err(|e| Error::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if image.width() == 0 || image.height() == 0 {
        return Err(Error::Corrupt {
            path: path.to_path_buf(),
            reason: "zero image dimension".to_string(),
        });
    }
    Ok(image)
}

fn write_new_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let guard = PartialFile::new(path);
    fs::write(path, bytes)?;
    guard.commit();
    Ok(())
}
