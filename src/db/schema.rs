pub const SCHEMA: &str = r#"
-- Content-addressed files: one row per unique byte sequence
CREATE TABLE IF NOT EXISTS image_files (
    hash TEXT PRIMARY KEY,
    size_bytes INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- Physical copies of image files, one per volume-relative path
CREATE TABLE IF NOT EXISTS file_locations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    image_hash TEXT NOT NULL,
    volume TEXT NOT NULL,
    rel_path TEXT NOT NULL,
    dir_name TEXT,
    dir_level INTEGER,
    last_modified TEXT NOT NULL,
    last_checked TEXT NOT NULL,
    UNIQUE(volume, rel_path)
);

CREATE INDEX IF NOT EXISTS idx_locations_hash ON file_locations(image_hash);

-- Originals and copies; the variant payload is JSON
CREATE TABLE IF NOT EXISTS descriptors (
    id INTEGER PRIMARY KEY,
    image_hash TEXT NOT NULL,
    kind TEXT NOT NULL,
    original_id INTEGER,
    data TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_descriptors_hash ON descriptors(image_hash);
CREATE INDEX IF NOT EXISTS idx_descriptors_original ON descriptors(original_id);

-- Logical photographs
CREATE TABLE IF NOT EXISTS photos (
    id INTEGER PRIMARY KEY,
    orig_hash TEXT,
    capture_time TEXT,
    data TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_photos_orig_hash ON photos(orig_hash);

-- Named counters: entity ids and filing-name sequences
CREATE TABLE IF NOT EXISTS sequences (
    name TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
"#;

