pub mod discovery;
pub mod hashing;
pub mod metadata;

pub use discovery::discover_images;
pub use hashing::{hash_bytes, hash_file, ContentHash};
pub use metadata::{CaptureInfo, ExifMetadataReader, MetadataReader};
