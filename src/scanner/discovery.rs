use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::Result;

/// All files below `directory` whose extension is in `extensions`,
/// sorted by path.
pub fn discover_images(directory: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();

    for entry in WalkDir::new(directory)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();

        if path.is_file() && has_image_extension(path, extensions) {
            images.push(path.to_path_buf());
        }
    }

    images.sort();

    Ok(images)
}

pub fn has_image_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| extensions.iter().any(|e| e.to_lowercase() == ext))
}
