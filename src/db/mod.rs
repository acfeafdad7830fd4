//! Persistence collaborator.
//!
//! The archive core only issues CRUD calls through [`Store`]; identity and
//! transactions belong to the implementation.

mod schema;
pub mod sqlite;

use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::model::{DescriptorId, ImageDescriptor, ImageFile, PhotoId, PhotoInfo};
use crate::scanner::ContentHash;

pub use schema::SCHEMA;
pub use sqlite::{SqliteCounter, SqliteStore};

pub trait Store {
    /// A fresh identifier for a descriptor or photo.
    fn next_id(&mut self) -> Result<i64>;

    fn find_image_file(&self, hash: &ContentHash) -> Result<Option<ImageFile>>;
    fn save_image_file(&mut self, file: &ImageFile) -> Result<()>;
    fn delete_image_file(&mut self, hash: &ContentHash) -> Result<()>;

    fn find_descriptor(&self, id: DescriptorId) -> Result<Option<ImageDescriptor>>;
    fn save_descriptor(&mut self, descriptor: &ImageDescriptor) -> Result<()>;
    fn delete_descriptor(&mut self, id: DescriptorId) -> Result<()>;

    fn find_photo(&self, id: PhotoId) -> Result<Option<PhotoInfo>>;
    fn save_photo(&mut self, photo: &PhotoInfo) -> Result<()>;
    fn delete_photo(&mut self, id: PhotoId) -> Result<()>;

    /// Photos whose retained original hash equals `hash`.
    fn find_photos_by_orig_hash(&self, hash: &ContentHash) -> Result<Vec<PhotoId>>;

    fn image_file(&self, hash: &ContentHash) -> Result<ImageFile> {
        self.find_image_file(hash)?
            .ok_or_else(|| Error::not_found("image file", hash))
    }

    fn descriptor(&self, id: DescriptorId) -> Result<ImageDescriptor> {
        self.find_descriptor(id)?
            .ok_or_else(|| Error::not_found("descriptor", id))
    }

    fn photo(&self, id: PhotoId) -> Result<PhotoInfo> {
        self.find_photo(id)?
            .ok_or_else(|| Error::not_found("photo", id))
    }
}

/// Store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    next_id: i64,
    image_files: HashMap<ContentHash, ImageFile>,
    descriptors: BTreeMap<DescriptorId, ImageDescriptor>,
    photos: BTreeMap<PhotoId, PhotoInfo>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image_file_count(&self) -> usize {
        self.image_files.len()
    }

    pub fn descriptor_count(&self) -> usize {
        self.descriptors.len()
    }

    pub fn photo_count(&self) -> usize {
        self.photos.len()
    }
}

impl Store for MemoryStore {
    fn next_id(&mut self) -> Result<i64> {
        self.next_id += 1;
        Ok(self.next_id)
    }

    fn find_image_file(&self, hash: &ContentHash) -> Result<Option<ImageFile>> {
        Ok(self.image_files.get(hash).cloned())
    }

    fn save_image_file(&mut self, file: &ImageFile) -> Result<()> {
        self.image_files.insert(file.hash, file.clone());
        Ok(())
    }

    fn delete_image_file(&mut self, hash: &ContentHash) -> Result<()> {
        self.image_files.remove(hash);
        Ok(())
    }

    fn find_descriptor(&self, id: DescriptorId) -> Result<Option<ImageDescriptor>> {
        Ok(self.descriptors.get(&id).cloned())
    }

    fn save_descriptor(&mut self, descriptor: &ImageDescriptor) -> Result<()> {
        self.descriptors.insert(descriptor.id(), descriptor.clone());
        Ok(())
    }

    fn delete_descriptor(&mut self, id: DescriptorId) -> Result<()> {
        self.descriptors.remove(&id);
        Ok(())
    }

    fn find_photo(&self, id: PhotoId) -> Result<Option<PhotoInfo>> {
        Ok(self.photos.get(&id).cloned())
    }

    fn save_photo(&mut self, photo: &PhotoInfo) -> Result<()> {
        self.photos.insert(photo.id, photo.clone());
        Ok(())
    }

    fn delete_photo(&mut self, id: PhotoId) -> Result<()> {
        self.photos.remove(&id);
        Ok(())
    }

    fn find_photos_by_orig_hash(&self, hash: &ContentHash) -> Result<Vec<PhotoId>> {
        Ok(self
            .photos
            .values()
            .filter(|p| p.orig_instance_hash().as_ref() == Some(hash))
            .map(|p| p.id)
            .collect())
    }
}
