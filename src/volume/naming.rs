//! File naming for managed volumes and location for external ones.

use chrono::{Datelike, NaiveDateTime};
use std::fs;
use std::path::{Path, PathBuf};

use super::sequence::{SequenceAllocator, ShardKey};
use super::{Volume, VolumeCatalog};
use crate::error::{Error, Result};

/// Where a file sits inside an external volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalLocation {
    pub rel_path: PathBuf,
    /// Name of the directory holding the file; empty at the root.
    pub dir_name: String,
    /// Number of directories between the root and the file.
    pub dir_level: u32,
}

/// `yyyy`, `yyyyMM` and `yyyyMMdd` components for a timestamp.
fn date_parts(timestamp: &NaiveDateTime) -> (String, String, String) {
    let year = format!("{:04}", timestamp.year());
    let month = format!("{}{:02}", year, timestamp.month());
    let day = format!("{}{:02}", month, timestamp.day());
    (year, month, day)
}

impl Volume {
    /// Allocate a new relative name `yyyy/yyyyMM/yyyyMMdd_NNNNN.ext`,
    /// creating the year and month directories.
    ///
    /// External volumes do not issue names and return `NotApplicable`.
    pub fn filing_name(
        &self,
        timestamp: &NaiveDateTime,
        extension: &str,
        allocator: &dyn SequenceAllocator,
    ) -> Result<PathBuf> {
        if !self.is_managed() {
            return Err(Error::NotApplicable {
                volume: self.name.clone(),
            });
        }

        let (year, month, day) = date_parts(timestamp);
        let month_dir = self.root.join(&year).join(&month);
        fs::create_dir_all(&month_dir)?;

        let shard = ShardKey::new(&month_dir, day.as_str());
        let seq = allocator.next(&shard)?;

        let extension = extension.trim_start_matches('.').to_lowercase();
        let file_name = format!("{}_{:05}.{}", day, seq, extension);
        let rel_path = PathBuf::from(year).join(month).join(file_name);

        tracing::debug!(volume = %self.name, path = %rel_path.display(), "Allocated filing name");
        Ok(rel_path)
    }

    /// Physical path of a relative name; the file must exist.
    pub fn map_to_physical_path(&self, rel_path: &Path) -> Result<PathBuf> {
        let physical = self.root.join(rel_path);
        if !physical.is_file() {
            return Err(Error::not_found("file", physical.display()));
        }
        Ok(physical)
    }

    /// Path of `file` relative to this volume's root, found by walking up
    /// parent directories until the root is reached.
    pub fn locate(&self, file: &Path) -> Result<ExternalLocation> {
        let not_under = || Error::NotUnderVolume {
            path: file.to_path_buf(),
            volume: self.name.clone(),
        };

        let root = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
        let file = file.canonicalize().unwrap_or_else(|_| file.to_path_buf());
        let file_name = file.file_name().ok_or_else(not_under)?;

        let mut dirs = Vec::new();
        let mut current = file.parent();
        loop {
            match current {
                Some(dir) if dir == root => break,
                Some(dir) => {
                    dirs.push(dir.file_name().ok_or_else(not_under)?.to_os_string());
                    current = dir.parent();
                }
                None => return Err(not_under()),
            }
        }

        let dir_name = dirs
            .first()
            .map(|d| d.to_string_lossy().to_string())
            .unwrap_or_default();
        let dir_level = dirs.len() as u32;

        let mut rel_path: PathBuf = dirs.into_iter().rev().collect();
        rel_path.push(file_name);

        Ok(ExternalLocation {
            rel_path,
            dir_name,
            dir_level,
        })
    }
}

impl VolumeCatalog {
    /// Allocate a filing name on the named volume with the catalog's allocator.
    pub fn filing_name(&self, volume: &str, timestamp: &NaiveDateTime, extension: &str) -> Result<PathBuf> {
        self.get(volume)?
            .filing_name(timestamp, extension, self.allocator())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{DirectoryScanAllocator, ShardLockAllocator};
    use chrono::NaiveDate;
    use std::collections::HashSet;
    use std::fs::File;
    use tempfile::tempdir;

    fn timestamp(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(14, 35, 0)
            .unwrap()
    }

    #[test]
    fn test_filing_name_layout() {
        let dir = tempdir().unwrap();
        let volume = Volume::managed("main", dir.path());
        let allocator = ShardLockAllocator::new();

        let name = volume
            .filing_name(&timestamp(2024, 3, 5), "JPG", &allocator)
            .unwrap();
        assert_eq!(name, PathBuf::from("2024/202403/20240305_00001.jpg"));
        assert!(dir.path().join("2024/202403").is_dir());
    }

    #[test]
    fn test_filing_name_continues_after_existing_files() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("2024/202403")).unwrap();
        File::create(dir.path().join("2024/202403/20240305_00041.nef")).unwrap();
        File::create(dir.path().join("2024/202403/20240306_00099.nef")).unwrap();

        let volume = Volume::managed("main", dir.path());
        let name = volume
            .filing_name(&timestamp(2024, 3, 5), "jpg", &DirectoryScanAllocator)
            .unwrap();
        assert_eq!(name, PathBuf::from("2024/202403/20240305_00042.jpg"));
    }

    #[test]
    fn test_names_are_unique_when_files_are_created() {
        let dir = tempdir().unwrap();
        let volume = Volume::managed("main", dir.path());
        let mut seen = HashSet::new();

        for i in 0..30 {
            let day = 1 + (i % 3);
            let name = volume
                .filing_name(&timestamp(2023, 12, day), "jpg", &DirectoryScanAllocator)
                .unwrap();
            File::create(dir.path().join(&name)).unwrap();
            assert!(seen.insert(name));
        }
    }

    #[test]
    fn test_round_trip_to_physical_path() {
        let dir = tempdir().unwrap();
        let volume = Volume::managed("main", dir.path());
        let allocator = ShardLockAllocator::new();

        for (ts, ext) in [(timestamp(1999, 1, 31), "tif"), (timestamp(2030, 11, 2), "png")] {
            let name = volume.filing_name(&ts, ext, &allocator).unwrap();
            let created = dir.path().join(&name);
            fs::write(&created, b"pixels").unwrap();

            let physical = volume.map_to_physical_path(&name).unwrap();
            assert_eq!(physical, created);
        }
    }

    #[test]
    fn test_missing_physical_file_is_not_found() {
        let dir = tempdir().unwrap();
        let volume = Volume::managed("main", dir.path());
        let err = volume
            .map_to_physical_path(Path::new("2024/202401/20240101_00001.jpg"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_external_volume_does_not_issue_names() {
        let dir = tempdir().unwrap();
        let volume = Volume::external("usb", dir.path());
        let err = volume
            .filing_name(&timestamp(2024, 1, 1), "jpg", &DirectoryScanAllocator)
            .unwrap_err();
        assert!(matches!(err, Error::NotApplicable { .. }));
        assert!(!dir.path().join("2024").exists());
    }

    #[test]
    fn test_locate_inside_external_volume() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("trips/norway");
        fs::create_dir_all(&nested).unwrap();
        let file = nested.join("fjord.jpg");
        File::create(&file).unwrap();

        let volume = Volume::external("usb", dir.path());
        let location = volume.locate(&file).unwrap();
        assert_eq!(location.rel_path, PathBuf::from("trips/norway/fjord.jpg"));
        assert_eq!(location.dir_name, "norway");
        assert_eq!(location.dir_level, 2);

        let top = dir.path().join("top.jpg");
        File::create(&top).unwrap();
        let location = volume.locate(&top).unwrap();
        assert_eq!(location.rel_path, PathBuf::from("top.jpg"));
        assert_eq!(location.dir_level, 0);
    }

    #[test]
    fn test_locate_outside_volume_fails() {
        let root = tempdir().unwrap();
        let elsewhere = tempdir().unwrap();
        let file = elsewhere.path().join("stray.jpg");
        File::create(&file).unwrap();

        let volume = Volume::external("usb", root.path());
        assert!(matches!(
            volume.locate(&file),
            Err(Error::NotUnderVolume { .. })
        ));
    }

    #[test]
    fn test_catalog_filing_name_uses_catalog_allocator() {
        let dir = tempdir().unwrap();
        let mut catalog = VolumeCatalog::default();
        catalog.add(Volume::managed("main", dir.path()));

        let a = catalog.filing_name("main", &timestamp(2024, 6, 1), "jpg").unwrap();
        let b = catalog.filing_name("main", &timestamp(2024, 6, 1), "jpg").unwrap();
        assert_ne!(a, b);
    }
}
