//! Sequence number allocation for managed file names.
//!
//! Numbers are per shard, where a shard is one day inside one month
//! directory of one volume. The directory scan alone is a read-then-write
//! race: two callers can both see the same maximum before either file is
//! written. Which allocator is plugged in decides whether that race exists.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifies one day-shard: `<month dir>` plus the `yyyyMMdd` stamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardKey {
    pub month_dir: PathBuf,
    pub day_stamp: String,
}

impl ShardKey {
    pub fn new(month_dir: impl Into<PathBuf>, day_stamp: impl Into<String>) -> Self {
        Self {
            month_dir: month_dir.into(),
            day_stamp: day_stamp.into(),
        }
    }

    /// Stable string form used as a counter key.
    pub fn counter_key(&self) -> String {
        format!("{}#{}", self.month_dir.display(), self.day_stamp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationStrategy {
    /// No synchronisation; callers must serialise per shard.
    Unsynchronized,
    /// Serialised per shard within this process.
    ShardLock,
    /// Delegated to an external atomic counter.
    AtomicCounter,
}

pub trait SequenceAllocator: Send + Sync {
    /// Next free sequence number for the shard, starting at 1.
    fn next(&self, shard: &ShardKey) -> Result<u32>;

    fn strategy(&self) -> AllocationStrategy;
}

/// Highest numeric suffix among `<day_stamp>_NNNNN.*` entries of the
/// shard's month directory, or 0.
pub fn scan_highest_suffix(shard: &ShardKey) -> Result<u32> {
    let entries = match fs::read_dir(&shard.month_dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut highest = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(n) = parse_suffix(&name, &shard.day_stamp) {
            highest = highest.max(n);
        }
    }
    Ok(highest)
}

/// The number following `highest` in `shard`.
fn successor(highest: u32, shard: &ShardKey) -> Result<u32> {
    highest.checked_add(1).ok_or_else(|| Error::SequenceExhausted {
        shard: shard.counter_key(),
    })
}

/// Parse the numeric suffix of `<stamp>_<digits>[.<ext>]`.
pub fn parse_suffix(file_name: &str, day_stamp: &str) -> Option<u32> {
    let rest = file_name.strip_prefix(day_stamp)?.strip_prefix('_')?;
    let digits = rest.split('.').next()?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Plain directory scan. Unique only if every returned name is created
/// before the next call for the same shard.
#[derive(Debug, Default)]
pub struct DirectoryScanAllocator;

impl SequenceAllocator for DirectoryScanAllocator {
    fn next(&self, shard: &ShardKey) -> Result<u32> {
        successor(scan_highest_suffix(shard)?, shard)
    }

    fn strategy(&self) -> AllocationStrategy {
        AllocationStrategy::Unsynchronized
    }
}

/// Serialises allocation per shard and remembers the last number issued,
/// so names are unique even before their files exist.
#[derive(Debug, Default)]
pub struct ShardLockAllocator {
    shards: Mutex<HashMap<ShardKey, Arc<Mutex<u32>>>>,
}

impl ShardLockAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    fn shard_lock(&self, shard: &ShardKey) -> Arc<Mutex<u32>> {
        let mut shards = self.shards.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(shards.entry(shard.clone()).or_default())
    }
}

impl SequenceAllocator for ShardLockAllocator {
    fn next(&self, shard: &ShardKey) -> Result<u32> {
        let lock = self.shard_lock(shard);
        let mut last_issued = lock.lock().unwrap_or_else(|e| e.into_inner());
        let next = successor(scan_highest_suffix(shard)?.max(*last_issued), shard)?;
        *last_issued = next;
        Ok(next)
    }

    fn strategy(&self) -> AllocationStrategy {
        AllocationStrategy::ShardLock
    }
}

/// An atomic counter owned by someone else, typically the persistence layer.
pub trait CounterSource: Send + Sync {
    /// Atomically raise the counter to at least `floor` and increment it,
    /// returning the new value.
    fn next_value(&self, key: &str, floor: u32) -> Result<u32>;
}

pub struct CounterAllocator {
    source: Arc<dyn CounterSource>,
}

impl CounterAllocator {
    pub fn new(source: Arc<dyn CounterSource>) -> Self {
        Self { source }
    }
}

impl SequenceAllocator for CounterAllocator {
    fn next(&self, shard: &ShardKey) -> Result<u32> {
        let floor = scan_highest_suffix(shard)?;
        self.source.next_value(&shard.counter_key(), floor)
    }

    fn strategy(&self) -> AllocationStrategy {
        AllocationStrategy::AtomicCounter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn test_parse_suffix() {
        assert_eq!(parse_suffix("20240315_00007.jpg", "20240315"), Some(7));
        assert_eq!(parse_suffix("20240315_00012", "20240315"), Some(12));
        assert_eq!(parse_suffix("20240316_00007.jpg", "20240315"), None);
        assert_eq!(parse_suffix("20240315_abc.jpg", "20240315"), None);
        assert_eq!(parse_suffix("20240315.jpg", "20240315"), None);
    }

    #[test]
    fn test_directory_scan_uses_existing_max() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("20240315_00003.jpg")).unwrap();
        File::create(dir.path().join("20240315_00010.nef")).unwrap();
        File::create(dir.path().join("20240314_00050.jpg")).unwrap();

        let shard = ShardKey::new(dir.path(), "20240315");
        assert_eq!(DirectoryScanAllocator.next(&shard).unwrap(), 11);
        assert_eq!(
            DirectoryScanAllocator.strategy(),
            AllocationStrategy::Unsynchronized
        );
    }

    #[test]
    fn test_directory_scan_repeats_without_files() {
        let dir = tempdir().unwrap();
        let shard = ShardKey::new(dir.path(), "20240315");
        assert_eq!(DirectoryScanAllocator.next(&shard).unwrap(), 1);
        assert_eq!(DirectoryScanAllocator.next(&shard).unwrap(), 1);
    }

    #[test]
    fn test_shard_lock_is_unique_across_threads() {
        let dir = tempdir().unwrap();
        let allocator = Arc::new(ShardLockAllocator::new());
        let shard = ShardKey::new(dir.path(), "20240315");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                let shard = shard.clone();
                thread::spawn(move || {
                    (0..25)
                        .map(|_| allocator.next(&shard).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 200);
        assert_eq!(all[0], 1);
    }

    #[test]
    fn test_exhausted_suffix_is_an_error() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("20240315_4294967295.jpg")).unwrap();
        let shard = ShardKey::new(dir.path(), "20240315");

        let err = DirectoryScanAllocator.next(&shard).unwrap_err();
        assert!(matches!(err, Error::SequenceExhausted { .. }));
        let err = ShardLockAllocator::new().next(&shard).unwrap_err();
        assert!(matches!(err, Error::SequenceExhausted { .. }));
    }

    struct FixedCounter(Mutex<u32>);

    impl CounterSource for FixedCounter {
        fn next_value(&self, _key: &str, floor: u32) -> Result<u32> {
            let mut value = self.0.lock().unwrap();
            *value = (*value).max(floor) + 1;
            Ok(*value)
        }
    }

    #[test]
    fn test_counter_allocator_respects_existing_files() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("20240315_00004.jpg")).unwrap();
        let allocator = CounterAllocator::new(Arc::new(FixedCounter(Mutex::new(0))));
        let shard = ShardKey::new(dir.path(), "20240315");

        assert_eq!(allocator.next(&shard).unwrap(), 5);
        assert_eq!(allocator.next(&shard).unwrap(), 6);
        assert_eq!(allocator.strategy(), AllocationStrategy::AtomicCounter);
    }
}
