//! SQLite backend implementation.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::schema::SCHEMA;
use super::Store;
use crate::error::{Error, Result};
use crate::model::{DescriptorId, FileLocation, ImageDescriptor, ImageFile, PhotoId, PhotoInfo};
use crate::scanner::ContentHash;
use crate::volume::CounterSource;

const ENTITY_SEQUENCE: &str = "__entity_id";

pub struct SqliteStore {
    pub(crate) conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn load_locations(&self, hash: &ContentHash) -> Result<Vec<FileLocation>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT volume, rel_path, dir_name, dir_level, last_modified, last_checked
            FROM file_locations
            WHERE image_hash = ?
            ORDER BY id
            "#,
        )?;
        let rows = stmt
            .query_map([hash.to_hex()], |row| {
                Ok(FileLocation {
                    volume: row.get(0)?,
                    rel_path: PathBuf::from(row.get::<_, String>(1)?),
                    dir_name: row.get(2)?,
                    dir_level: row.get(3)?,
                    last_modified: parse_timestamp(row.get(4)?, 4)?,
                    last_checked: parse_timestamp(row.get(5)?, 5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn load_descriptor_ids(&self, hash: &ContentHash) -> Result<Vec<DescriptorId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM descriptors WHERE image_hash = ? ORDER BY id")?;
        let ids = stmt
            .query_map([hash.to_hex()], |row| row.get(0).map(DescriptorId))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }
}

fn parse_timestamp(value: String, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

impl Store for SqliteStore {
    fn next_id(&mut self) -> Result<i64> {
        let id = self.conn.query_row(
            r#"
            INSERT INTO sequences (name, value) VALUES (?1, 1)
            ON CONFLICT(name) DO UPDATE SET value = value + 1
            RETURNING value
            "#,
            [ENTITY_SEQUENCE],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn find_image_file(&self, hash: &ContentHash) -> Result<Option<ImageFile>> {
        let size: Option<i64> = self
            .conn
            .query_row(
                "SELECT size_bytes FROM image_files WHERE hash = ?",
                [hash.to_hex()],
                |row| row.get(0),
            )
            .optional()?;

        let Some(size) = size else {
            return Ok(None);
        };

        Ok(Some(ImageFile {
            hash: *hash,
            size: size as u64,
            locations: self.load_locations(hash)?,
            descriptors: self.load_descriptor_ids(hash)?,
        }))
    }

    fn save_image_file(&mut self, file: &ImageFile) -> Result<()> {
        let hash = file.hash.to_hex();
        let tx = self.conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO image_files (hash, size_bytes) VALUES (?1, ?2)
            ON CONFLICT(hash) DO UPDATE SET size_bytes = excluded.size_bytes
            "#,
            rusqlite::params![hash, file.size as i64],
        )?;
        tx.execute("DELETE FROM file_locations WHERE image_hash = ?", [&hash])?;
        for location in &file.locations {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO file_locations (
                    image_hash, volume, rel_path, dir_name, dir_level, last_modified, last_checked
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
                rusqlite::params![
                    hash,
                    location.volume,
                    location.rel_path.to_string_lossy().into_owned(),
                    location.dir_name,
                    location.dir_level,
                    location.last_modified.to_rfc3339(),
                    location.last_checked.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_image_file(&mut self, hash: &ContentHash) -> Result<()> {
        let hash = hash.to_hex();
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM file_locations WHERE image_hash = ?", [&hash])?;
        tx.execute("DELETE FROM image_files WHERE hash = ?", [&hash])?;
        tx.commit()?;
        Ok(())
    }

    fn find_descriptor(&self, id: DescriptorId) -> Result<Option<ImageDescriptor>> {
        let data: Option<String> = self
            .conn
            .query_row("SELECT data FROM descriptors WHERE id = ?", [id.0], |row| {
                row.get(0)
            })
            .optional()?;
        data.map(|json| serde_json::from_str(&json).map_err(Into::into))
            .transpose()
    }

    fn save_descriptor(&mut self, descriptor: &ImageDescriptor) -> Result<()> {
        let kind = match descriptor {
            ImageDescriptor::Original(_) => "original",
            ImageDescriptor::Copy(_) if descriptor.is_thumbnail() => "thumbnail",
            ImageDescriptor::Copy(_) => "copy",
        };
        let original_id = descriptor.as_copy().map(|c| c.original.0);
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO descriptors (id, image_hash, kind, original_id, data)
            VALUES (?, ?, ?, ?, ?)
            "#,
            rusqlite::params![
                descriptor.id().0,
                descriptor.image_file().to_hex(),
                kind,
                original_id,
                serde_json::to_string(descriptor)?,
            ],
        )?;
        Ok(())
    }

    fn delete_descriptor(&mut self, id: DescriptorId) -> Result<()> {
        self.conn
            .execute("DELETE FROM descriptors WHERE id = ?", [id.0])?;
        Ok(())
    }

    fn find_photo(&self, id: PhotoId) -> Result<Option<PhotoInfo>> {
        let data: Option<String> = self
            .conn
            .query_row("SELECT data FROM photos WHERE id = ?", [id.0], |row| row.get(0))
            .optional()?;
        data.map(|json| serde_json::from_str(&json).map_err(Into::into))
            .transpose()
    }

    fn save_photo(&mut self, photo: &PhotoInfo) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO photos (id, orig_hash, capture_time, data)
            VALUES (?, ?, ?, ?)
            "#,
            rusqlite::params![
                photo.id.0,
                photo.orig_instance_hash().map(|h| h.to_hex()),
                photo
                    .capture_time
                    .map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string()),
                serde_json::to_string(photo)?,
            ],
        )?;
        Ok(())
    }

    fn delete_photo(&mut self, id: PhotoId) -> Result<()> {
        self.conn.execute("DELETE FROM photos WHERE id = ?", [id.0])?;
        Ok(())
    }

    fn find_photos_by_orig_hash(&self, hash: &ContentHash) -> Result<Vec<PhotoId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM photos WHERE orig_hash = ? ORDER BY id")?;
        let ids = stmt
            .query_map([hash.to_hex()], |row| row.get(0).map(PhotoId))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }
}

/// Per-key counters in the `sequences` table, safe across processes
/// sharing the database file.
pub struct SqliteCounter {
    conn: Mutex<Connection>,
}

impl SqliteCounter {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl CounterSource for SqliteCounter {
    fn next_value(&self, key: &str, floor: u32) -> Result<u32> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let value: i64 = conn.query_row(
            r#"
            INSERT INTO sequences (name, value) VALUES (?1, ?2 + 1)
            ON CONFLICT(name) DO UPDATE SET value = MAX(value, ?2) + 1
            RETURNING value
            "#,
            rusqlite::params![key, floor as i64],
            |row| row.get(0),
        )?;
        u32::try_from(value).map_err(|_| Error::SequenceExhausted { shard: key.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CopyImage, CopyPurpose, EditParams, OperationSet, OriginalImage};
    use crate::scanner::hash_bytes;
    use tempfile::tempdir;

    fn sample_file() -> ImageFile {
        let mut file = ImageFile::new(hash_bytes(b"sample"), 6);
        let mut location = FileLocation::new("main", "2024/202401/20240101_00001.jpg", Utc::now());
        location.dir_level = Some(2);
        file.attach_location(location);
        file.attach_location(FileLocation::new("usb", "dcim/a.jpg", Utc::now()));
        file
    }

    #[test]
    fn test_image_file_round_trip() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let file = sample_file();
        store.save_image_file(&file).unwrap();

        let loaded = store.image_file(&file.hash).unwrap();
        assert_eq!(loaded.size, 6);
        assert_eq!(loaded.locations.len(), 2);
        assert_eq!(loaded.locations[0].dir_level, Some(2));
        assert_eq!(loaded.locations[1].rel_path, PathBuf::from("dcim/a.jpg"));

        let mut fewer = loaded.clone();
        fewer.detach_location("usb", Path::new("dcim/a.jpg"));
        store.save_image_file(&fewer).unwrap();
        assert_eq!(store.image_file(&file.hash).unwrap().locations.len(), 1);

        store.delete_image_file(&file.hash).unwrap();
        assert!(store.find_image_file(&file.hash).unwrap().is_none());
    }

    #[test]
    fn test_descriptors_are_listed_on_their_file() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let file = sample_file();
        store.save_image_file(&file).unwrap();

        let original = ImageDescriptor::Original(OriginalImage {
            id: DescriptorId(store.next_id().unwrap()),
            image_file: file.hash,
            width: 640,
            height: 480,
            copies: Vec::new(),
        });
        let thumb = ImageDescriptor::Copy(CopyImage {
            id: DescriptorId(store.next_id().unwrap()),
            image_file: file.hash,
            width: 100,
            height: 75,
            original: original.id(),
            purpose: CopyPurpose::Thumbnail,
            params: EditParams::default(),
            applied: OperationSet::empty(),
        });
        store.save_descriptor(&original).unwrap();
        store.save_descriptor(&thumb).unwrap();

        assert_eq!(store.descriptor(thumb.id()).unwrap(), thumb);
        assert_eq!(
            store.image_file(&file.hash).unwrap().descriptors,
            vec![original.id(), thumb.id()]
        );

        store.delete_descriptor(thumb.id()).unwrap();
        assert!(store.find_descriptor(thumb.id()).unwrap().is_none());
    }

    #[test]
    fn test_photo_round_trip_and_hash_lookup() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let hash = hash_bytes(b"original");
        let mut photo = PhotoInfo::new(PhotoId(store.next_id().unwrap()));
        photo.description = Some("lighthouse".to_string());
        photo.set_pref_rotation(90.0);
        photo.retain_original_hash(hash);
        photo.add_instance(DescriptorId(7));
        store.save_photo(&photo).unwrap();

        let loaded = store.photo(photo.id).unwrap();
        assert_eq!(loaded.description.as_deref(), Some("lighthouse"));
        assert_eq!(loaded.pref_rotation(), 90.0);
        assert_eq!(loaded.descriptors(), &[DescriptorId(7)]);
        assert_eq!(store.find_photos_by_orig_hash(&hash).unwrap(), vec![photo.id]);
    }

    #[test]
    fn test_counter_is_shared_between_connections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.db");
        let a = SqliteCounter::open(&path).unwrap();
        let b = SqliteCounter::open(&path).unwrap();

        assert_eq!(a.next_value("shard", 0).unwrap(), 1);
        assert_eq!(b.next_value("shard", 0).unwrap(), 2);
        assert_eq!(a.next_value("shard", 10).unwrap(), 11);
        assert_eq!(b.next_value("other", 3).unwrap(), 4);
    }

    #[test]
    fn test_counter_past_u32_is_an_error() {
        let dir = tempdir().unwrap();
        let counter = SqliteCounter::open(&dir.path().join("vault.db")).unwrap();

        assert_eq!(counter.next_value("shard", u32::MAX - 1).unwrap(), u32::MAX);
        assert!(matches!(
            counter.next_value("shard", 0),
            Err(Error::SequenceExhausted { .. })
        ));
    }
}
