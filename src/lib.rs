//! Content-addressed photo archive.
//!
//! Files are identified by the hash of their bytes and may live in several
//! volumes at once. Photos own an original plus derived copies (edits,
//! thumbnails), each copy recording which operations are baked into it.

pub mod config;
pub mod db;
pub mod derive;
pub mod error;
pub mod export;
pub mod library;
pub mod logging;
pub mod model;
pub mod registry;
pub mod scanner;
pub mod thumbnail;
pub mod transform;
pub mod volume;

pub use config::Config;
pub use db::{MemoryStore, SqliteStore, Store};
pub use error::{Error, Result};
pub use library::{IndexSummary, Library, LocationCheck, LocationStatus};
pub use model::{ImageDescriptor, ImageFile, PhotoId, PhotoInfo};
pub use volume::{Volume, VolumeCatalog, VolumeKind};
