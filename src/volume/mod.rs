//! Storage roots and the catalog that names them.
//!
//! A managed volume owns its layout:
//! ```text
//! <root>/
//! └── 2024/
//!     └── 202403/
//!         ├── 20240315_00001.jpg
//!         └── 20240315_00002.nef
//! ```
//! An external volume is a directory tree the user controls; files there
//! are located, never named.

pub mod naming;
pub mod sequence;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{AllocationConfig, VolumeConfig};
use crate::error::{Error, Result};

pub use naming::ExternalLocation;
pub use sequence::{
    AllocationStrategy, CounterAllocator, CounterSource, DirectoryScanAllocator, SequenceAllocator,
    ShardKey, ShardLockAllocator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeKind {
    #[default]
    Managed,
    External,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub name: String,
    pub root: PathBuf,
    pub kind: VolumeKind,
}

impl Volume {
    pub fn managed(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            kind: VolumeKind::Managed,
        }
    }

    pub fn external(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            kind: VolumeKind::External,
        }
    }

    pub fn is_managed(&self) -> bool {
        self.kind == VolumeKind::Managed
    }
}

/// Explicit registry of the volumes known to one archive.
pub struct VolumeCatalog {
    volumes: BTreeMap<String, Volume>,
    default_volume: Option<String>,
    allocator: Arc<dyn SequenceAllocator>,
}

impl Default for VolumeCatalog {
    fn default() -> Self {
        Self::new(Arc::new(ShardLockAllocator::new()))
    }
}

impl std::fmt::Debug for VolumeCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeCatalog")
            .field("volumes", &self.volumes)
            .field("default_volume", &self.default_volume)
            .field("allocation", &self.allocator.strategy())
            .finish()
    }
}

impl VolumeCatalog {
    pub fn new(allocator: Arc<dyn SequenceAllocator>) -> Self {
        Self {
            volumes: BTreeMap::new(),
            default_volume: None,
            allocator,
        }
    }

    /// Build a catalog from configuration. `counter` backs the
    /// `store_counter` allocation strategy.
    pub fn from_config(
        volumes: &[VolumeConfig],
        default_volume: Option<&str>,
        allocation: AllocationConfig,
        counter: Option<Arc<dyn CounterSource>>,
    ) -> Result<Self> {
        let allocator: Arc<dyn SequenceAllocator> = match (allocation, counter) {
            (AllocationConfig::ShardLock, _) => Arc::new(ShardLockAllocator::new()),
            (AllocationConfig::DirectoryScan, _) => Arc::new(DirectoryScanAllocator),
            (AllocationConfig::StoreCounter, Some(source)) => Arc::new(CounterAllocator::new(source)),
            (AllocationConfig::StoreCounter, None) => {
                tracing::warn!("No counter source available, falling back to shard locks");
                Arc::new(ShardLockAllocator::new())
            }
        };

        let mut catalog = Self::new(allocator);
        for v in volumes {
            catalog.add(Volume {
                name: v.name.clone(),
                root: v.root.clone(),
                kind: v.kind,
            });
        }
        if let Some(name) = default_volume {
            catalog.set_default(name)?;
        }
        Ok(catalog)
    }

    /// Register a volume. The first managed volume becomes the default.
    pub fn add(&mut self, volume: Volume) {
        if self.default_volume.is_none() && volume.is_managed() {
            self.default_volume = Some(volume.name.clone());
        }
        self.volumes.insert(volume.name.clone(), volume);
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        let volume = self.get(name)?;
        if !volume.is_managed() {
            return Err(Error::NotApplicable {
                volume: name.to_string(),
            });
        }
        self.default_volume = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Volume> {
        self.volumes
            .get(name)
            .ok_or_else(|| Error::not_found("volume", name))
    }

    /// The managed volume new files are filed into.
    pub fn default_volume(&self) -> Result<&Volume> {
        let name = self
            .default_volume
            .as_deref()
            .ok_or_else(|| Error::not_found("volume", "<default managed volume>"))?;
        self.get(name)
    }

    pub fn volumes(&self) -> impl Iterator<Item = &Volume> {
        self.volumes.values()
    }

    pub fn allocator(&self) -> &dyn SequenceAllocator {
        self.allocator.as_ref()
    }

    /// The volume whose root contains `path`, preferring the deepest root.
    pub fn volume_for_path(&self, path: &Path) -> Option<&Volume> {
        self.volumes
            .values()
            .filter(|v| path.starts_with(&v.root))
            .max_by_key(|v| v.root.components().count())
    }

    /// Physical path of a volume-relative name.
    pub fn resolve(&self, volume: &str, rel_path: &Path) -> Result<PathBuf> {
        self.get(volume)?.map_to_physical_path(rel_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_managed_volume_is_default() {
        let mut catalog = VolumeCatalog::default();
        catalog.add(Volume::external("usb", "/media/usb"));
        catalog.add(Volume::managed("main", "/srv/photos"));
        catalog.add(Volume::managed("backup", "/srv/backup"));

        assert_eq!(catalog.default_volume().unwrap().name, "main");
        assert!(catalog.set_default("usb").is_err());
        catalog.set_default("backup").unwrap();
        assert_eq!(catalog.default_volume().unwrap().name, "backup");
    }

    #[test]
    fn test_unknown_volume_is_not_found() {
        let catalog = VolumeCatalog::default();
        assert!(catalog.get("nope").unwrap_err().is_not_found());
        assert!(catalog.default_volume().unwrap_err().is_not_found());
    }

    #[test]
    fn test_volume_for_path_prefers_deepest_root() {
        let mut catalog = VolumeCatalog::default();
        catalog.add(Volume::managed("main", "/srv/photos"));
        catalog.add(Volume::external("inbox", "/srv/photos/inbox"));

        let found = catalog
            .volume_for_path(Path::new("/srv/photos/inbox/a.jpg"))
            .unwrap();
        assert_eq!(found.name, "inbox");
        assert!(catalog.volume_for_path(Path::new("/tmp/a.jpg")).is_none());
    }

    #[test]
    fn test_catalogs_are_isolated() {
        let mut a = VolumeCatalog::default();
        let b = VolumeCatalog::default();
        a.add(Volume::managed("main", "/srv/photos"));
        assert!(a.get("main").is_ok());
        assert!(b.get("main").is_err());
    }
}
