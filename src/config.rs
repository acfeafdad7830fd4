use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::volume::VolumeKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Managed volume that receives imports and derived renditions.
    #[serde(default)]
    pub default_volume: Option<String>,

    #[serde(default = "default_volumes")]
    pub volumes: Vec<VolumeConfig>,

    #[serde(default)]
    pub naming: NamingConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub thumbnails: ThumbnailConfig,

    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    pub name: String,
    pub root: PathBuf,
    #[serde(default)]
    pub kind: VolumeKind,
}

/// How filing-name sequence numbers are allocated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AllocationConfig {
    /// Per-shard lock inside this process.
    #[default]
    ShardLock,
    /// Bare directory scan; callers serialise themselves.
    DirectoryScan,
    /// Atomic counter kept in the database.
    StoreCounter,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamingConfig {
    #[serde(default)]
    pub allocation: AllocationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            image_extensions: default_image_extensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    /// Longest side of generated thumbnails.
    #[serde(default = "default_thumb_size")]
    pub size: u32,

    /// Volume thumbnails are filed into; the default volume if unset.
    #[serde(default)]
    pub volume: Option<String>,
}

fn default_thumb_size() -> u32 {
    100
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            size: default_thumb_size(),
            volume: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_jpeg_quality() -> u8 {
    90
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("photovault")
        .join("photovault.db")
}

fn default_volumes() -> Vec<VolumeConfig> {
    let root = dirs::picture_dir()
        .or_else(dirs::data_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("photovault");
    vec![VolumeConfig {
        name: "main".to_string(),
        root,
        kind: VolumeKind::Managed,
    }]
}

fn default_image_extensions() -> Vec<String> {
    [
        "jpg", "jpeg", "png", "gif", "webp", "tif", "tiff", "bmp", "heic", "cr2", "nef", "arw", "dng",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            volumes: default_volumes(),
            default_volume: None,
            naming: NamingConfig::default(),
            scanner: ScannerConfig::default(),
            thumbnails: ThumbnailConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

impl Config {
    /// Load from the default location, writing defaults if absent.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("photovault")
    }

    /// `PHOTOVAULT_CONFIG` overrides the default location.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("PHOTOVAULT_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }
}
