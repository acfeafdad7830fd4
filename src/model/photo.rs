use chrono::NaiveDateTime;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::edit::{ColorCurves, EditParams, RawSettings};
use super::geometry::{same_rotation, CropBounds};
use super::{DescriptorId, PhotoId};
use crate::scanner::ContentHash;

/// Decoded thumbnail held in memory together with the geometry it was
/// rendered for.
#[derive(Debug, Clone)]
pub struct CachedThumbnail {
    pub bitmap: Arc<DynamicImage>,
    pub rotation: f64,
    pub crop: CropBounds,
}

impl CachedThumbnail {
    /// A cached bitmap is only usable while the photo's geometry is unchanged.
    pub fn is_valid(&self, rotation: f64, crop: &CropBounds) -> bool {
        same_rotation(self.rotation, rotation) && self.crop.approx_eq(crop)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailState {
    Empty,
    Valid,
    /// No usable original was available last time a thumbnail was requested.
    Error,
}

/// The logical photograph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoInfo {
    pub id: PhotoId,
    pub capture_time: Option<NaiveDateTime>,
    crop: CropBounds,
    pref_rotation: f64,
    pub raw_settings: Option<RawSettings>,
    pub color_curves: Option<ColorCurves>,
    pub photographer: Option<String>,
    pub description: Option<String>,
    pub camera: Option<String>,
    descriptors: Vec<DescriptorId>,
    /// Hash of the original's content, kept after the original is deleted.
    orig_instance_hash: Option<ContentHash>,
    #[serde(skip)]
    thumbnail: Option<CachedThumbnail>,
    #[serde(skip)]
    thumbnail_failed: bool,
}

impl PhotoInfo {
    pub fn new(id: PhotoId) -> Self {
        Self {
            id,
            capture_time: None,
            crop: CropBounds::FULL,
            pref_rotation: 0.0,
            raw_settings: None,
            color_curves: None,
            photographer: None,
            description: None,
            camera: None,
            descriptors: Vec::new(),
            orig_instance_hash: None,
            thumbnail: None,
            thumbnail_failed: false,
        }
    }

    pub fn crop_bounds(&self) -> CropBounds {
        self.crop
    }

    pub fn pref_rotation(&self) -> f64 {
        self.pref_rotation
    }

    /// Change the crop; degenerate rectangles are normalized.
    pub fn set_crop_bounds(&mut self, crop: CropBounds) {
        let crop = CropBounds::new(crop.min_x, crop.min_y, crop.max_x, crop.max_y);
        if !crop.approx_eq(&self.crop) {
            self.crop = crop;
            self.invalidate_thumbnail();
        }
    }

    pub fn set_pref_rotation(&mut self, rotation: f64) {
        if !same_rotation(rotation, self.pref_rotation) {
            self.invalidate_thumbnail();
        }
        self.pref_rotation = rotation;
    }

    /// Current edit parameters as a single value.
    pub fn edit_params(&self) -> EditParams {
        EditParams {
            crop: self.crop,
            rotation: self.pref_rotation,
            raw_settings: self.raw_settings,
            color_curves: self.color_curves.clone(),
        }
    }

    pub fn descriptors(&self) -> &[DescriptorId] {
        &self.descriptors
    }

    pub fn add_instance(&mut self, id: DescriptorId) {
        if !self.descriptors.contains(&id) {
            self.descriptors.push(id);
            self.thumbnail_failed = false;
        }
    }

    pub fn remove_instance(&mut self, id: DescriptorId) -> bool {
        let before = self.descriptors.len();
        self.descriptors.retain(|d| *d != id);
        before != self.descriptors.len()
    }

    pub fn orig_instance_hash(&self) -> Option<ContentHash> {
        self.orig_instance_hash
    }

    /// Record the original's hash. Only the first registration sticks.
    pub fn retain_original_hash(&mut self, hash: ContentHash) {
        if self.orig_instance_hash.is_none() {
            self.orig_instance_hash = Some(hash);
        }
    }

    pub fn thumbnail_state(&self) -> ThumbnailState {
        if self.thumbnail_failed {
            return ThumbnailState::Error;
        }
        match &self.thumbnail {
            Some(cached) if cached.is_valid(self.pref_rotation, &self.crop) => ThumbnailState::Valid,
            _ => ThumbnailState::Empty,
        }
    }

    /// The cached bitmap, if it still matches the current geometry.
    pub fn cached_thumbnail(&self) -> Option<Arc<DynamicImage>> {
        match (&self.thumbnail, self.thumbnail_state()) {
            (Some(cached), ThumbnailState::Valid) => Some(Arc::clone(&cached.bitmap)),
            _ => None,
        }
    }

    pub fn cache_thumbnail(&mut self, bitmap: Arc<DynamicImage>) {
        self.thumbnail = Some(CachedThumbnail {
            bitmap,
            rotation: self.pref_rotation,
            crop: self.crop,
        });
        self.thumbnail_failed = false;
    }

    pub fn mark_thumbnail_error(&mut self) {
        self.thumbnail = None;
        self.thumbnail_failed = true;
    }

    fn invalidate_thumbnail(&mut self) {
        self.thumbnail = None;
        self.thumbnail_failed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cached_photo() -> PhotoInfo {
        let mut photo = PhotoInfo::new(PhotoId(1));
        photo.cache_thumbnail(Arc::new(DynamicImage::new_rgb8(4, 4)));
        photo
    }

    #[test]
    fn test_new_photo_has_empty_cache() {
        let photo = PhotoInfo::new(PhotoId(1));
        assert_eq!(photo.thumbnail_state(), ThumbnailState::Empty);
        assert!(photo.cached_thumbnail().is_none());
    }

    #[test]
    fn test_rotation_change_invalidates() {
        let mut photo = cached_photo();
        assert_eq!(photo.thumbnail_state(), ThumbnailState::Valid);

        photo.set_pref_rotation(90.0);
        assert_eq!(photo.thumbnail_state(), ThumbnailState::Empty);
        assert!(photo.cached_thumbnail().is_none());
    }

    #[test]
    fn test_crop_change_invalidates() {
        let mut photo = cached_photo();
        photo.set_crop_bounds(CropBounds::new(0.1, 0.1, 0.9, 0.9));
        assert_eq!(photo.thumbnail_state(), ThumbnailState::Empty);
    }

    #[test]
    fn test_unrelated_fields_keep_cache() {
        let mut photo = cached_photo();
        photo.description = Some("harbour at dusk".to_string());
        photo.photographer = Some("A. Person".to_string());
        photo.camera = Some("X100".to_string());
        photo.set_pref_rotation(0.0);
        photo.set_crop_bounds(CropBounds::FULL);
        assert_eq!(photo.thumbnail_state(), ThumbnailState::Valid);
    }

    #[test]
    fn test_degenerate_crop_is_normalized() {
        let mut photo = PhotoInfo::new(PhotoId(1));
        photo.set_crop_bounds(CropBounds {
            min_x: 0.25,
            min_y: 0.1,
            max_x: 0.25,
            max_y: 0.05,
        });
        let crop = photo.crop_bounds();
        assert!((crop.max_x - 0.75).abs() < 1e-9);
        assert!((crop.max_y - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_original_hash_is_retained() {
        let mut photo = PhotoInfo::new(PhotoId(1));
        let first = crate::scanner::hash_bytes(b"first");
        photo.retain_original_hash(first);
        photo.retain_original_hash(crate::scanner::hash_bytes(b"second"));
        assert_eq!(photo.orig_instance_hash(), Some(first));
    }

    #[test]
    fn test_cache_is_not_serialized() {
        let photo = cached_photo();
        let json = serde_json::to_string(&photo).unwrap();
        let restored: PhotoInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.thumbnail_state(), ThumbnailState::Empty);
    }
}
