use serde::{Deserialize, Serialize};

use super::edit::{EditParams, OperationSet};
use super::DescriptorId;
use crate::scanner::ContentHash;

/// What a copy is used for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyPurpose {
    #[default]
    Copy,
    /// Small preview rendition, matched against the photo's current
    /// rotation and crop.
    Thumbnail,
}

/// Root of a derivation chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginalImage {
    pub id: DescriptorId,
    pub image_file: ContentHash,
    pub width: u32,
    pub height: u32,
    /// Copies derived from this original, directly or transitively.
    #[serde(default)]
    pub copies: Vec<DescriptorId>,
}

/// A rendition derived from an original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyImage {
    pub id: DescriptorId,
    pub image_file: ContentHash,
    pub width: u32,
    pub height: u32,
    /// The ultimate original of the chain, never an intermediate copy.
    pub original: DescriptorId,
    pub purpose: CopyPurpose,
    pub params: EditParams,
    /// Operations already baked into this copy's pixels.
    pub applied: OperationSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageDescriptor {
    Original(OriginalImage),
    Copy(CopyImage),
}

impl ImageDescriptor {
    pub fn id(&self) -> DescriptorId {
        match self {
            ImageDescriptor::Original(o) => o.id,
            ImageDescriptor::Copy(c) => c.id,
        }
    }

    pub fn image_file(&self) -> ContentHash {
        match self {
            ImageDescriptor::Original(o) => o.image_file,
            ImageDescriptor::Copy(c) => c.image_file,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            ImageDescriptor::Original(o) => (o.width, o.height),
            ImageDescriptor::Copy(c) => (c.width, c.height),
        }
    }

    /// Operations baked into the pixels; an original has none.
    pub fn applied_operations(&self) -> OperationSet {
        match self {
            ImageDescriptor::Original(_) => OperationSet::empty(),
            ImageDescriptor::Copy(c) => c.applied.clone(),
        }
    }

    /// The original this descriptor belongs to.
    pub fn original_id(&self) -> DescriptorId {
        match self {
            ImageDescriptor::Original(o) => o.id,
            ImageDescriptor::Copy(c) => c.original,
        }
    }

    pub fn as_original(&self) -> Option<&OriginalImage> {
        match self {
            ImageDescriptor::Original(o) => Some(o),
            ImageDescriptor::Copy(_) => None,
        }
    }

    pub fn as_copy(&self) -> Option<&CopyImage> {
        match self {
            ImageDescriptor::Original(_) => None,
            ImageDescriptor::Copy(c) => Some(c),
        }
    }

    pub fn is_thumbnail(&self) -> bool {
        matches!(self, ImageDescriptor::Copy(c) if c.purpose == CopyPurpose::Thumbnail)
    }
}
