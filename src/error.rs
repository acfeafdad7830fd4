//! Error type shared by the library.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A relative name, descriptor, photo, location or volume does not exist.
    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    /// Filing names are only issued for managed volumes.
    #[error("volume '{volume}' does not issue managed file names")]
    NotApplicable { volume: String },

    #[error("{} is not under volume '{volume}'", path.display())]
    NotUnderVolume { path: PathBuf, volume: String },

    #[error("photo {photo} has no readable original")]
    NoOriginal { photo: i64 },

    #[error("cannot decode {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("invalid content hash '{0}'")]
    InvalidHash(String),

    #[error("no image encoder for extension '{extension}'")]
    UnsupportedFormat { extension: String },

    #[error("sequence numbers exhausted for shard {shard}")]
    SequenceExhausted { shard: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    ConfigWrite(#[from] toml::ser::Error),
}

impl Error {
    pub fn not_found(what: &'static str, key: impl ToString) -> Self {
        Error::NotFound {
            what,
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
