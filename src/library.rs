//! The archive as a whole: store, volumes, metadata reader and settings.

use chrono::{Duration, Local, NaiveDateTime, Utc};
use image::DynamicImage;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{AllocationConfig, Config};
use crate::db::{SqliteCounter, SqliteStore, Store};
use crate::derive::{CopyRequest, DerivationGraph};
use crate::error::{Error, Result};
use crate::export::{self, PartialFile};
use crate::model::{DescriptorId, FileLocation, ImageDescriptor, ImageFile, PhotoId, PhotoInfo};
use crate::registry;
use crate::scanner::{discover_images, hash_bytes, hash_file, CaptureInfo, ContentHash, ExifMetadataReader, MetadataReader};
use crate::thumbnail::ThumbnailService;
use crate::volume::{CounterSource, VolumeCatalog};

/// Modification times closer than this are treated as equal.
const MTIME_TOLERANCE_SECS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationStatus {
    Unchanged,
    Modified,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationCheck {
    pub volume: String,
    pub rel_path: PathBuf,
    pub status: LocationStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSummary {
    pub scanned: usize,
    pub new_files: usize,
    pub new_locations: usize,
    pub new_photos: usize,
    pub failed: usize,
}

pub struct Library<S: Store> {
    store: S,
    catalog: VolumeCatalog,
    reader: Box<dyn MetadataReader>,
    config: Config,
}

impl Library<SqliteStore> {
    /// Open the SQLite-backed archive described by `config`.
    pub fn open(config: Config) -> Result<Self> {
        let store = SqliteStore::open(&config.db_path)?;
        let counter: Option<Arc<dyn CounterSource>> = match config.naming.allocation {
            AllocationConfig::StoreCounter => Some(Arc::new(SqliteCounter::open(&config.db_path)?)),
            _ => None,
        };
        let catalog = VolumeCatalog::from_config(
            &config.volumes,
            config.default_volume.as_deref(),
            config.naming.allocation,
            counter,
        )?;
        tracing::info!(db = %config.db_path.display(), ?catalog, "Opened archive");
        Ok(Self::new(store, catalog, config))
    }
}

impl<S: Store> Library<S> {
    pub fn new(store: S, catalog: VolumeCatalog, config: Config) -> Self {
        Self {
            store,
            catalog,
            reader: Box::new(ExifMetadataReader),
            config,
        }
    }

    pub fn with_reader(mut self, reader: Box<dyn MetadataReader>) -> Self {
        self.reader = reader;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn catalog(&self) -> &VolumeCatalog {
        &self.catalog
    }

    pub fn photo(&self, id: PhotoId) -> Result<PhotoInfo> {
        self.store.photo(id)
    }

    pub fn save_photo(&mut self, photo: &PhotoInfo) -> Result<()> {
        self.store.save_photo(photo)
    }

    fn graph(&self) -> DerivationGraph<'_> {
        DerivationGraph::new(&self.catalog, self.config.export.jpeg_quality)
    }

    /// Copy a file into the default managed volume and register it as a
    /// new photo. Content that is already archived is not copied again.
    pub fn import_file(&mut self, path: &Path) -> Result<PhotoId> {
        let bytes = fs::read(path)?;
        let hash = hash_bytes(&bytes);

        let known = self.store.find_photos_by_orig_hash(&hash)?;
        for id in &known {
            if self.has_readable_original(&self.store.photo(*id)?)? {
                tracing::info!(path = %path.display(), photo = %id, "Content already archived");
                return Ok(*id);
            }
        }

        let dimensions = self.reader.read_dimensions(&bytes).map_err(|e| Error::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let capture = self.reader.read_capture_info(&bytes);

        let readable = self
            .store
            .find_image_file(&hash)?
            .filter(|f| registry::readable_path(&self.catalog, f).is_some());
        let mut file = match readable {
            Some(file) => file,
            None => {
                let taken = match capture.taken_at {
                    Some(t) => t,
                    None => local_mtime(path)?,
                };
                let location = self.copy_into_archive(path, &taken)?;
                registry::find_or_create(&mut self.store, hash, bytes.len() as u64, location)?
            }
        };

        let graph = DerivationGraph::new(&self.catalog, self.config.export.jpeg_quality);
        let id = match known.first() {
            // A photo that lost its original recognises the content again.
            Some(&id) => {
                let mut photo = self.store.photo(id)?;
                let original = original_for(&mut self.store, &graph, &mut file, dimensions)?;
                photo.add_instance(original.id());
                self.store.save_photo(&photo)?;
                tracing::info!(path = %path.display(), photo = %id, hash = %hash, "Relinked original");
                id
            }
            None => register_photo(&mut self.store, &graph, &mut file, dimensions, capture)?,
        };
        tracing::info!(path = %path.display(), photo = %id, hash = %hash, "Imported photo");
        Ok(id)
    }

    fn has_readable_original(&self, photo: &PhotoInfo) -> Result<bool> {
        for id in photo.descriptors() {
            let Some(ImageDescriptor::Original(original)) = self.store.find_descriptor(*id)? else {
                continue;
            };
            if let Some(file) = self.store.find_image_file(&original.image_file)? {
                if registry::readable_path(&self.catalog, &file).is_some() {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn copy_into_archive(&self, path: &Path, taken: &NaiveDateTime) -> Result<FileLocation> {
        let volume = self.catalog.default_volume()?;
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "img".to_string());
        let rel_path = volume.filing_name(taken, &extension, self.catalog.allocator())?;
        let dest = volume.root.join(&rel_path);

        let guard = PartialFile::new(&dest);
        fs::copy(path, &dest)?;
        guard.commit();

        Ok(FileLocation::new(&volume.name, rel_path, registry::modified_time(&dest)?))
    }

    /// Walk an external volume and register every image found there.
    pub fn index_external(&mut self, volume: &str) -> Result<IndexSummary> {
        let volume = self.catalog.get(volume)?.clone();
        let paths = discover_images(&volume.root, &self.config.scanner.image_extensions)?;
        tracing::info!(volume = %volume.name, files = paths.len(), "Indexing volume");

        let hashed: Vec<(PathBuf, Result<(ContentHash, u64)>)> = paths
            .into_par_iter()
            .map(|p| {
                let digest = hash_file(&p);
                (p, digest)
            })
            .collect();

        let graph = DerivationGraph::new(&self.catalog, self.config.export.jpeg_quality);
        let mut summary = IndexSummary {
            scanned: hashed.len(),
            ..IndexSummary::default()
        };

        for (path, hashed) in hashed {
            let indexed = hashed.and_then(|(hash, size)| {
                let found = volume.locate(&path)?;
                let mut location = FileLocation::new(&volume.name, found.rel_path, registry::modified_time(&path)?);
                location.dir_name = Some(found.dir_name);
                location.dir_level = Some(found.dir_level);

                let known = self.store.find_image_file(&hash)?.map(|f| f.locations.len());
                let mut file = registry::find_or_create(&mut self.store, hash, size, location)?;
                match known {
                    None => summary.new_files += 1,
                    Some(n) if file.locations.len() > n => summary.new_locations += 1,
                    Some(_) => {}
                }

                if !self.store.find_photos_by_orig_hash(&hash)?.is_empty() {
                    return Ok(());
                }
                let bytes = fs::read(&path)?;
                let dimensions = self.reader.read_dimensions(&bytes)?;
                let capture = self.reader.read_capture_info(&bytes);
                register_photo(&mut self.store, &graph, &mut file, dimensions, capture)?;
                summary.new_photos += 1;
                Ok(())
            });

            if let Err(e) = indexed {
                tracing::warn!(path = %path.display(), error = %e, "Failed to index file");
                summary.failed += 1;
            }
        }

        tracing::info!(volume = %volume.name, ?summary, "Indexing finished");
        Ok(summary)
    }

    /// Compare each recorded location of a file with the filesystem.
    pub fn check_locations(&mut self, hash: &ContentHash) -> Result<Vec<LocationCheck>> {
        let mut file = self.store.image_file(hash)?;
        let now = Utc::now();
        let mut checks = Vec::with_capacity(file.locations.len());

        for location in &mut file.locations {
            let status = match self.catalog.resolve(&location.volume, &location.rel_path) {
                Err(_) => LocationStatus::Missing,
                Ok(path) => {
                    let modified = registry::modified_time(&path)?;
                    if modified - location.last_modified > Duration::seconds(MTIME_TOLERANCE_SECS) {
                        location.last_modified = modified;
                        LocationStatus::Modified
                    } else {
                        LocationStatus::Unchanged
                    }
                }
            };
            location.last_checked = now;
            if status != LocationStatus::Unchanged {
                tracing::info!(
                    hash = %hash,
                    volume = %location.volume,
                    path = %location.rel_path.display(),
                    ?status,
                    "Location changed"
                );
            }
            checks.push(LocationCheck {
                volume: location.volume.clone(),
                rel_path: location.rel_path.clone(),
                status,
            });
        }

        self.store.save_image_file(&file)?;
        Ok(checks)
    }

    pub fn remove_location(&mut self, hash: &ContentHash, volume: &str, rel_path: &Path) -> Result<()> {
        registry::remove_location(&mut self.store, hash, volume, rel_path)?;
        Ok(())
    }

    /// Delete a photo's original: its file record, descriptors and any
    /// managed copies of its bytes. Copies and thumbnails derived from it
    /// go too, along with their files once nothing else uses them. The
    /// photo keeps the original's hash.
    pub fn remove_original(&mut self, id: PhotoId) -> Result<()> {
        let mut photo = self.store.photo(id)?;
        let originals: Vec<ImageDescriptor> = photo
            .descriptors()
            .iter()
            .filter_map(|d| self.store.find_descriptor(*d).transpose())
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|d| d.as_original().is_some())
            .collect();
        if originals.is_empty() {
            return Err(Error::NoOriginal { photo: id.0 });
        }

        for original in originals {
            let copies = original.as_original().map(|o| o.copies.clone()).unwrap_or_default();
            for copy in copies {
                if let Some(emptied) = registry::remove_descriptor(&mut self.store, copy)? {
                    registry::delete_managed_files(&self.catalog, &emptied);
                    self.store.delete_image_file(&emptied.hash)?;
                }
                photo.remove_instance(copy);
            }

            let hash = original.image_file();
            let file = self.store.image_file(&hash)?;
            registry::delete_managed_files(&self.catalog, &file);
            for removed in registry::remove_image_file(&mut self.store, &hash)? {
                photo.remove_instance(removed);
            }
        }

        self.store.save_photo(&photo)?;
        tracing::info!(photo = %id, "Removed original");
        Ok(())
    }

    /// Thumbnail for the photo's current geometry; see [`ThumbnailService`].
    pub fn thumbnail(&mut self, photo: &mut PhotoInfo) -> Arc<DynamicImage> {
        let graph = DerivationGraph::new(&self.catalog, self.config.export.jpeg_quality);
        ThumbnailService::new(graph, self.reader.as_ref(), self.config.thumbnails.size)
            .with_volume(self.config.thumbnails.volume.clone())
            .get_thumbnail(&mut self.store, photo)
    }

    /// Derive a copy of a photo, starting from the best existing source.
    pub fn derive_copy(&mut self, id: PhotoId, request: &CopyRequest) -> Result<ImageDescriptor> {
        let mut photo = self.store.photo(id)?;
        let original = find_original(&self.store, &photo)?;

        let graph = DerivationGraph::new(&self.catalog, self.config.export.jpeg_quality);
        let source = graph.select_source(&self.store, original, &request.operations, &request.params)?;
        let copy = graph.derive_copy(&mut self.store, &source, request)?;

        photo.add_instance(copy.id());
        self.store.save_photo(&photo)?;
        Ok(copy)
    }

    /// Render a photo with its edits into `dest`.
    pub fn export_photo(&self, id: PhotoId, dest: &Path, target_box: Option<(u32, u32)>) -> Result<()> {
        let photo = self.store.photo(id)?;
        export::export_photo(
            &self.graph(),
            &self.store,
            &photo,
            dest,
            target_box,
            self.config.export.jpeg_quality,
        )
    }
}

fn find_original(store: &dyn Store, photo: &PhotoInfo) -> Result<DescriptorId> {
    for id in photo.descriptors() {
        if let Some(ImageDescriptor::Original(original)) = store.find_descriptor(*id)? {
            return Ok(original.id);
        }
    }
    Err(Error::NoOriginal { photo: photo.id.0 })
}

/// Create the original descriptor (if the file has none) and a photo for it.
fn register_photo(
    store: &mut dyn Store,
    graph: &DerivationGraph<'_>,
    file: &mut ImageFile,
    dimensions: (u32, u32),
    capture: CaptureInfo,
) -> Result<PhotoId> {
    let original = original_for(store, graph, file, dimensions)?;

    let mut photo = PhotoInfo::new(PhotoId(store.next_id()?));
    photo.capture_time = capture.taken_at;
    photo.camera = capture.camera;
    photo.add_instance(original.id());
    photo.retain_original_hash(file.hash);
    store.save_photo(&photo)?;
    Ok(photo.id)
}

/// The file's original descriptor, registering one if it has none.
fn original_for(
    store: &mut dyn Store,
    graph: &DerivationGraph<'_>,
    file: &mut ImageFile,
    dimensions: (u32, u32),
) -> Result<ImageDescriptor> {
    for id in &file.descriptors {
        if let Some(d) = store.find_descriptor(*id)?.filter(|d| d.as_original().is_some()) {
            return Ok(d);
        }
    }
    graph.register_original(store, file, dimensions)
}

fn local_mtime(path: &Path) -> Result<NaiveDateTime> {
    Ok(registry::modified_time(path)?.with_timezone(&Local).naive_local())
}
