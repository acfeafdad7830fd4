//! Archive data model: content-addressed files, their physical locations,
//! logical image descriptors and photos.

pub mod descriptor;
pub mod edit;
pub mod geometry;
pub mod photo;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::scanner::ContentHash;

pub use descriptor::{CopyImage, CopyPurpose, ImageDescriptor, OriginalImage};
pub use edit::{Channel, ColorCurves, Curve, EditParams, ImageOperation, OperationSet, RawSettings};
pub use geometry::CropBounds;
pub use photo::{CachedThumbnail, PhotoInfo, ThumbnailState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DescriptorId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhotoId(pub i64);

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One known physical copy of an image file's bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileLocation {
    pub volume: String,
    /// Path relative to the volume root.
    pub rel_path: PathBuf,
    pub last_modified: DateTime<Utc>,
    pub last_checked: DateTime<Utc>,
    /// Name of the containing directory (external volumes).
    pub dir_name: Option<String>,
    /// Directory depth below the volume root (external volumes).
    pub dir_level: Option<u32>,
}

impl FileLocation {
    pub fn new(volume: impl Into<String>, rel_path: impl Into<PathBuf>, last_modified: DateTime<Utc>) -> Self {
        Self {
            volume: volume.into(),
            rel_path: rel_path.into(),
            last_modified,
            last_checked: Utc::now(),
            dir_name: None,
            dir_level: None,
        }
    }

    pub fn same_place(&self, other: &FileLocation) -> bool {
        self.volume == other.volume && self.rel_path == other.rel_path
    }
}

/// Content-addressed record of a unique byte sequence.
///
/// The hash is the identity: two physical files with identical bytes
/// always resolve to the same `ImageFile`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFile {
    pub hash: ContentHash,
    pub size: u64,
    pub locations: Vec<FileLocation>,
    pub descriptors: Vec<DescriptorId>,
}

impl ImageFile {
    pub fn new(hash: ContentHash, size: u64) -> Self {
        Self {
            hash,
            size,
            locations: Vec::new(),
            descriptors: Vec::new(),
        }
    }

    /// Add a location, refreshing timestamps if it is already known.
    /// Returns `true` if the location is new.
    pub fn attach_location(&mut self, location: FileLocation) -> bool {
        if let Some(existing) = self.locations.iter_mut().find(|l| l.same_place(&location)) {
            *existing = location;
            return false;
        }
        self.locations.push(location);
        true
    }

    pub fn detach_location(&mut self, volume: &str, rel_path: &std::path::Path) -> Option<FileLocation> {
        let index = self
            .locations
            .iter()
            .position(|l| l.volume == volume && l.rel_path == rel_path)?;
        Some(self.locations.remove(index))
    }
}
