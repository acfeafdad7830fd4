//! Thumbnail lookup and generation for photos.
//!
//! The in-memory bitmap on [`PhotoInfo`] is checked first, then thumbnail
//! copies already recorded for the photo, and only then is a new one
//! rendered from the original.

use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use crate::db::Store;
use crate::derive::{decode_path, CopyRequest, DerivationGraph};
use crate::error::{Error, Result};
use crate::model::geometry::same_rotation;
use crate::model::{ImageDescriptor, PhotoInfo, ThumbnailState};
use crate::registry;
use crate::scanner::MetadataReader;

const MIN_CROP_SIDE: f64 = 0.01;
const ASPECT_TOLERANCE: f64 = 0.01;

/// The bitmap handed out when no thumbnail can be produced.
pub fn default_thumbnail() -> Arc<DynamicImage> {
    static DEFAULT: OnceLock<Arc<DynamicImage>> = OnceLock::new();
    Arc::clone(DEFAULT.get_or_init(|| {
        Arc::new(DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 1, Rgb([128, 128, 128]))))
    }))
}

/// Smallest source side that still yields `target` pixels after cropping.
pub fn min_source_side(target: u32, crop_width: f64, crop_height: f64) -> f64 {
    let guard = |v: f64| if v < MIN_CROP_SIDE { 1.0 } else { v };
    target as f64 / guard(crop_width).min(guard(crop_height))
}

/// Largest power-of-two subsampling factor that keeps the short side at or
/// above `min_side`.
pub fn subsample_factor(width: u32, height: u32, min_side: f64) -> u32 {
    let short = width.min(height) as f64;
    let mut factor = 1;
    while short / (factor * 2) as f64 >= min_side && factor < 1 << 16 {
        factor *= 2;
    }
    factor
}

fn same_aspect(a: (u32, u32), b: (u32, u32)) -> bool {
    let ra = a.0 as f64 / a.1 as f64;
    let rb = b.0 as f64 / b.1 as f64;
    (ra - rb).abs() / rb <= ASPECT_TOLERANCE
}

pub struct ThumbnailService<'a> {
    graph: DerivationGraph<'a>,
    reader: &'a dyn MetadataReader,
    size: u32,
    volume: Option<String>,
}

impl<'a> ThumbnailService<'a> {
    pub fn new(graph: DerivationGraph<'a>, reader: &'a dyn MetadataReader, size: u32) -> Self {
        Self {
            graph,
            reader,
            size,
            volume: None,
        }
    }

    /// File new thumbnails into `volume` instead of the default one.
    pub fn with_volume(mut self, volume: Option<String>) -> Self {
        self.volume = volume;
        self
    }

    /// A thumbnail for the photo's current rotation and crop. Never fails:
    /// when nothing can be produced the photo enters the error state and
    /// the default bitmap is returned.
    pub fn get_thumbnail(&self, store: &mut dyn Store, photo: &mut PhotoInfo) -> Arc<DynamicImage> {
        if photo.thumbnail_state() == ThumbnailState::Valid {
            if let Some(bitmap) = photo.cached_thumbnail() {
                tracing::trace!(photo = %photo.id, "Thumbnail cache hit");
                return bitmap;
            }
        }

        if let Some(bitmap) = self.find_existing(store, photo) {
            photo.cache_thumbnail(Arc::clone(&bitmap));
            return bitmap;
        }

        match self.create_thumbnail(store, photo) {
            Ok(bitmap) => bitmap,
            Err(e) => {
                tracing::warn!(photo = %photo.id, error = %e, "Could not create thumbnail");
                photo.mark_thumbnail_error();
                default_thumbnail()
            }
        }
    }

    /// Decode a recorded thumbnail copy matching the current geometry.
    fn find_existing(&self, store: &dyn Store, photo: &PhotoInfo) -> Option<Arc<DynamicImage>> {
        let params = photo.edit_params();
        for id in photo.descriptors() {
            let Ok(Some(descriptor)) = store.find_descriptor(*id) else {
                continue;
            };
            let Some(copy) = descriptor.as_copy().filter(|_| descriptor.is_thumbnail()) else {
                continue;
            };
            if !copy.params.crop.approx_eq(&params.crop)
                || !same_rotation(copy.params.rotation, params.rotation)
            {
                continue;
            }
            match self.graph.decode(store, &descriptor) {
                Ok(bitmap) => {
                    tracing::debug!(photo = %photo.id, thumbnail = %copy.id, "Reusing stored thumbnail");
                    return Some(Arc::new(bitmap));
                }
                Err(e) => {
                    tracing::debug!(photo = %photo.id, thumbnail = %copy.id, error = %e, "Stored thumbnail unusable");
                }
            }
        }
        None
    }

    /// Render, record and cache a new thumbnail from the photo's original.
    pub fn create_thumbnail(&self, store: &mut dyn Store, photo: &mut PhotoInfo) -> Result<Arc<DynamicImage>> {
        let (original, path) = self.readable_original(store, photo)?;
        let (orig_w, orig_h) = original.dimensions();
        let params = photo.edit_params();
        let min_side = min_source_side(self.size, params.crop.width(), params.crop.height());

        let bytes = std::fs::read(&path)?;
        let preview = self
            .reader
            .read_embedded_preview(&bytes)
            .filter(|p| p.width().min(p.height()) as f64 >= min_side)
            .filter(|p| same_aspect((p.width(), p.height()), (orig_w, orig_h)));

        let pixels = match preview {
            Some(preview) => {
                tracing::debug!(photo = %photo.id, "Using embedded preview");
                preview
            }
            None => {
                let full = decode_path(&path)?;
                let factor = subsample_factor(full.width(), full.height(), min_side);
                if factor > 1 {
                    full.resize_exact(full.width() / factor, full.height() / factor, FilterType::Nearest)
                } else {
                    full
                }
            }
        };

        let request = CopyRequest::thumbnail(&params, self.size).in_volume(self.volume.clone());
        let thumbnail = self.graph.derive_from_pixels(store, &original, &pixels, &request)?;

        photo.add_instance(thumbnail.id());
        let recorded = self.graph.decode(store, &thumbnail).and_then(|bitmap| {
            store.save_photo(photo)?;
            Ok(bitmap)
        });
        let bitmap = match recorded {
            Ok(bitmap) => Arc::new(bitmap),
            Err(e) => {
                photo.remove_instance(thumbnail.id());
                self.graph.discard(store, &thumbnail);
                return Err(e);
            }
        };
        photo.cache_thumbnail(Arc::clone(&bitmap));
        Ok(bitmap)
    }

    fn readable_original(&self, store: &dyn Store, photo: &PhotoInfo) -> Result<(ImageDescriptor, PathBuf)> {
        for id in photo.descriptors() {
            let Some(descriptor) = store.find_descriptor(*id)? else {
                continue;
            };
            if descriptor.as_original().is_none() {
                continue;
            }
            let Some(file) = store.find_image_file(&descriptor.image_file())? else {
                continue;
            };
            if let Some(path) = registry::readable_path(self.graph.catalog(), &file) {
                return Ok((descriptor, path));
            }
        }
        Err(Error::NoOriginal { photo: photo.id.0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::model::{DescriptorId, ImageFile, PhotoId};
    use crate::scanner::{CaptureInfo, ContentHash, ExifMetadataReader};
    use crate::volume::{Volume, VolumeCatalog};
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    const RED: Rgb<u8> = Rgb([200, 10, 10]);
    const BLUE: Rgb<u8> = Rgb([10, 10, 200]);

    /// Reports a fixed embedded preview for every file.
    struct PreviewReader(Option<DynamicImage>);

    impl MetadataReader for PreviewReader {
        fn read_dimensions(&self, bytes: &[u8]) -> Result<(u32, u32)> {
            ExifMetadataReader.read_dimensions(bytes)
        }

        fn read_embedded_preview(&self, _bytes: &[u8]) -> Option<DynamicImage> {
            self.0.clone()
        }

        fn read_capture_info(&self, _bytes: &[u8]) -> CaptureInfo {
            CaptureInfo::default()
        }
    }

    fn solid(width: u32, height: u32, colour: Rgb<u8>) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, colour))
    }

    struct Fixture {
        dir: TempDir,
        catalog: VolumeCatalog,
        store: MemoryStore,
        photo: PhotoInfo,
    }

    /// A red 400x200 original on an external volume, owned by one photo.
    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("usb")).unwrap();
        let mut catalog = VolumeCatalog::default();
        catalog.add(Volume::managed("main", dir.path().join("main")));
        catalog.add(Volume::external("usb", dir.path().join("usb")));

        let physical = dir.path().join("usb/orig.png");
        solid(400, 200, RED).save(&physical).unwrap();

        let mut store = MemoryStore::new();
        let mut file = registry::register_physical(&mut store, "usb", Path::new("orig.png"), &physical).unwrap();
        let original = DerivationGraph::new(&catalog, 90)
            .register_original(&mut store, &mut file, (400, 200))
            .unwrap();
        let mut photo = PhotoInfo::new(PhotoId(100));
        photo.add_instance(original.id());
        store.save_photo(&photo).unwrap();

        Fixture {
            dir,
            catalog,
            store,
            photo,
        }
    }

    fn thumbnail_with(fx: &mut Fixture, preview: Option<DynamicImage>) -> Arc<DynamicImage> {
        let reader = PreviewReader(preview);
        ThumbnailService::new(DerivationGraph::new(&fx.catalog, 90), &reader, 100)
            .create_thumbnail(&mut fx.store, &mut fx.photo)
            .unwrap()
    }

    fn is_blue(image: &DynamicImage) -> bool {
        let p = image.to_rgb8().get_pixel(image.width() / 2, image.height() / 2).0;
        p[2] > 150 && p[0] < 60
    }

    #[test]
    fn test_matching_preview_is_used() {
        let mut fx = fixture();
        let thumb = thumbnail_with(&mut fx, Some(solid(200, 100, BLUE)));
        assert_eq!((thumb.width(), thumb.height()), (100, 50));
        assert!(is_blue(&thumb));
    }

    #[test]
    fn test_preview_with_other_aspect_falls_back_to_original() {
        let mut fx = fixture();
        let thumb = thumbnail_with(&mut fx, Some(solid(200, 200, BLUE)));
        assert_eq!((thumb.width(), thumb.height()), (100, 50));
        assert!(!is_blue(&thumb));
    }

    #[test]
    fn test_small_preview_falls_back_to_original() {
        let mut fx = fixture();
        let thumb = thumbnail_with(&mut fx, Some(solid(160, 80, BLUE)));
        assert_eq!((thumb.width(), thumb.height()), (100, 50));
        assert!(!is_blue(&thumb));
    }

    /// Rejects every photo write.
    struct ReadOnlyPhotos(MemoryStore);

    impl Store for ReadOnlyPhotos {
        fn next_id(&mut self) -> Result<i64> {
            self.0.next_id()
        }
        fn find_image_file(&self, hash: &ContentHash) -> Result<Option<ImageFile>> {
            self.0.find_image_file(hash)
        }
        fn save_image_file(&mut self, file: &ImageFile) -> Result<()> {
            self.0.save_image_file(file)
        }
        fn delete_image_file(&mut self, hash: &ContentHash) -> Result<()> {
            self.0.delete_image_file(hash)
        }
        fn find_descriptor(&self, id: DescriptorId) -> Result<Option<ImageDescriptor>> {
            self.0.find_descriptor(id)
        }
        fn save_descriptor(&mut self, descriptor: &ImageDescriptor) -> Result<()> {
            self.0.save_descriptor(descriptor)
        }
        fn delete_descriptor(&mut self, id: DescriptorId) -> Result<()> {
            self.0.delete_descriptor(id)
        }
        fn find_photo(&self, id: PhotoId) -> Result<Option<PhotoInfo>> {
            self.0.find_photo(id)
        }
        fn save_photo(&mut self, _photo: &PhotoInfo) -> Result<()> {
            Err(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "photos are read-only")))
        }
        fn delete_photo(&mut self, id: PhotoId) -> Result<()> {
            self.0.delete_photo(id)
        }
        fn find_photos_by_orig_hash(&self, hash: &ContentHash) -> Result<Vec<PhotoId>> {
            self.0.find_photos_by_orig_hash(hash)
        }
    }

    #[test]
    fn test_unrecorded_thumbnail_leaves_no_metadata() {
        let fx = fixture();
        let mut photo = fx.photo.clone();
        let mut store = ReadOnlyPhotos(fx.store);
        let reader = PreviewReader(None);

        let thumb = ThumbnailService::new(DerivationGraph::new(&fx.catalog, 90), &reader, 100)
            .get_thumbnail(&mut store, &mut photo);
        assert!(Arc::ptr_eq(&thumb, &default_thumbnail()));
        assert_eq!(photo.thumbnail_state(), ThumbnailState::Error);
        assert_eq!(photo.descriptors().len(), 1);

        assert_eq!(store.0.descriptor_count(), 1);
        assert_eq!(store.0.image_file_count(), 1);
        let original = store.descriptor(photo.descriptors()[0]).unwrap();
        assert!(original.as_original().unwrap().copies.is_empty());
        let written = walkdir::WalkDir::new(fx.dir.path().join("main"))
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count();
        assert_eq!(written, 0);
    }

    #[test]
    fn test_min_source_side_guards_tiny_crops() {
        assert_eq!(min_source_side(100, 1.0, 1.0), 100.0);
        assert_eq!(min_source_side(100, 0.5, 0.8), 200.0);
        assert_eq!(min_source_side(100, 0.001, 0.5), 200.0);
    }

    #[test]
    fn test_subsample_factor_stays_above_minimum() {
        assert_eq!(subsample_factor(4000, 3000, 100.0), 16);
        assert_eq!(subsample_factor(4000, 3000, 200.0), 8);
        assert_eq!(subsample_factor(150, 150, 100.0), 1);
    }

    #[test]
    fn test_aspect_tolerance() {
        assert!(same_aspect((160, 120), (4000, 3000)));
        assert!(same_aspect((161, 120), (4000, 3000)));
        assert!(!same_aspect((160, 90), (4000, 3000)));
    }

    #[test]
    fn test_default_thumbnail_is_shared() {
        assert!(Arc::ptr_eq(&default_thumbnail(), &default_thumbnail()));
    }
}
