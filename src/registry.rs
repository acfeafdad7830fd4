//! Content-addressed file registry: one `ImageFile` per hash, any number of
//! physical locations.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

use crate::db::Store;
use crate::error::{Error, Result};
use crate::model::{DescriptorId, FileLocation, ImageDescriptor, ImageFile};
use crate::scanner::{hash_file, ContentHash};
use crate::volume::VolumeCatalog;

/// Look up the file for `hash` and attach `location`, or create it.
///
/// This is the only place identical content is merged.
pub fn find_or_create(
    store: &mut dyn Store,
    hash: ContentHash,
    size: u64,
    location: FileLocation,
) -> Result<ImageFile> {
    let file = match store.find_image_file(&hash)? {
        Some(mut existing) => {
            let volume = location.volume.clone();
            let rel_path = location.rel_path.clone();
            if existing.attach_location(location) {
                tracing::info!(
                    hash = %hash,
                    volume = %volume,
                    path = %rel_path.display(),
                    locations = existing.locations.len(),
                    "Identical content found at new location"
                );
            }
            existing
        }
        None => {
            let mut file = ImageFile::new(hash, size);
            file.attach_location(location);
            tracing::debug!(hash = %hash, size, "New image file");
            file
        }
    };
    store.save_image_file(&file)?;
    Ok(file)
}

/// Hash a file already sitting inside a volume and register it there.
pub fn register_physical(
    store: &mut dyn Store,
    volume: &str,
    rel_path: &Path,
    physical: &Path,
) -> Result<ImageFile> {
    let (hash, size) = hash_file(physical)?;
    let location = FileLocation::new(volume, rel_path, modified_time(physical)?);
    find_or_create(store, hash, size, location)
}

pub fn modified_time(path: &Path) -> Result<DateTime<Utc>> {
    Ok(fs::metadata(path)?.modified()?.into())
}

/// Detach one location. The file record stays, even with no locations left.
pub fn remove_location(
    store: &mut dyn Store,
    hash: &ContentHash,
    volume: &str,
    rel_path: &Path,
) -> Result<FileLocation> {
    let mut file = store.image_file(hash)?;
    let removed = file
        .detach_location(volume, rel_path)
        .ok_or_else(|| Error::not_found("location", format!("{}:{}", volume, rel_path.display())))?;
    store.save_image_file(&file)?;
    tracing::debug!(hash = %hash, volume, path = %rel_path.display(), "Removed location");
    Ok(removed)
}

/// Delete a file record together with the descriptors decoded from it.
/// Copies are unlinked from their original's copy list.
///
/// Returns the ids of the deleted descriptors.
pub fn remove_image_file(store: &mut dyn Store, hash: &ContentHash) -> Result<Vec<DescriptorId>> {
    let file = store.image_file(hash)?;

    for id in &file.descriptors {
        let Some(descriptor) = store.find_descriptor(*id)? else {
            continue;
        };
        if let ImageDescriptor::Copy(copy) = &descriptor {
            if let Some(ImageDescriptor::Original(mut original)) = store.find_descriptor(copy.original)? {
                original.copies.retain(|c| c != id);
                store.save_descriptor(&ImageDescriptor::Original(original))?;
            }
        }
        store.delete_descriptor(*id)?;
    }

    store.delete_image_file(hash)?;
    tracing::info!(hash = %hash, descriptors = file.descriptors.len(), "Removed image file");
    Ok(file.descriptors)
}

/// Delete one descriptor and drop it from its file's descriptor list.
///
/// Returns the file when no descriptor is left on it; the caller decides
/// whether its bytes go too.
pub fn remove_descriptor(store: &mut dyn Store, id: DescriptorId) -> Result<Option<ImageFile>> {
    let Some(descriptor) = store.find_descriptor(id)? else {
        return Ok(None);
    };
    if let ImageDescriptor::Copy(copy) = &descriptor {
        if let Some(ImageDescriptor::Original(mut original)) = store.find_descriptor(copy.original)? {
            original.copies.retain(|c| *c != id);
            store.save_descriptor(&ImageDescriptor::Original(original))?;
        }
    }
    store.delete_descriptor(id)?;

    let Some(mut file) = store.find_image_file(&descriptor.image_file())? else {
        return Ok(None);
    };
    file.descriptors.retain(|d| *d != id);
    store.save_image_file(&file)?;
    tracing::debug!(id = %id, hash = %file.hash, remaining = file.descriptors.len(), "Removed descriptor");
    Ok(file.descriptors.is_empty().then_some(file))
}

/// Delete the bytes of `file` held on managed volumes. External volumes
/// belong to the user and are left untouched.
pub fn delete_managed_files(catalog: &VolumeCatalog, file: &ImageFile) {
    for location in &file.locations {
        let Ok(volume) = catalog.get(&location.volume) else {
            continue;
        };
        if !volume.is_managed() {
            continue;
        }
        let path = volume.root.join(&location.rel_path);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Failed to delete archived file");
            }
        }
    }
}

/// First location of `file` that currently exists on disk.
pub fn readable_path(catalog: &VolumeCatalog, file: &ImageFile) -> Option<PathBuf> {
    file.locations
        .iter()
        .find_map(|loc| catalog.resolve(&loc.volume, &loc.rel_path).ok())
}
