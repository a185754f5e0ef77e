use chrono::{Local, NaiveDateTime, TimeZone};
use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::data::{ImageQuery, ImageRecord, NewImage};
use crate::media::metadata::{self, MetadataError};

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("invalid stored JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outcome of a path repair pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelocateReport {
    /// Records whose path was rewritten to an existing file
    pub fixed: usize,
    /// Broken records dropped because the repaired path was already cataloged
    pub removed_duplicates: usize,
    /// Broken records with no file to point at
    pub lost: usize,
}

const IMAGE_COLUMNS: &str = "id, path, COALESCE(prompt, ''), COALESCE(negative_prompt, ''), \
     COALESCE(model, ''), COALESCE(steps, 0), COALESCE(cfg, 0.0), COALESCE(seed, 'Random'), \
     timestamp, COALESCE(favorite, 0)";

/// The Library manages the SQLite catalog of generated images.
///
/// It only remembers where the database lives: every operation opens its
/// own connection, so the handle is cheap to clone into worker threads.
/// The catalog is an index over the output folder, never the source of
/// truth, which is why the plain operations log and swallow storage errors.
/// The `try_*` variants return them instead.
#[derive(Debug, Clone)]
pub struct Library {
    db_path: PathBuf,
}

impl Library {
    /// Open (creating if needed) the catalog at `db_path` and initialize the schema
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, LibraryError> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let library = Library { db_path };
        library.initialize()?;

        info!("📁 Database initialized at: {}", library.db_path.display());
        Ok(library)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub(crate) fn connect(&self) -> Result<Connection, LibraryError> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Create all tables and indexes if they don't exist.
    ///
    /// Safe to call on every start. Columns added after the first release are
    /// migrated in with `ALTER TABLE`; the "duplicate column" error on an
    /// up-to-date database is ignored.
    pub fn initialize(&self) -> Result<(), LibraryError> {
        let mut conn = self.connect()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS images (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                path            TEXT NOT NULL UNIQUE,
                prompt          TEXT,
                negative_prompt TEXT,
                model           TEXT,
                steps           INTEGER,
                cfg             REAL,
                seed            TEXT,
                timestamp       INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS characters (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                name            TEXT NOT NULL UNIQUE,
                prompt          TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS presets (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                name            TEXT NOT NULL UNIQUE,
                params_json     TEXT NOT NULL
            )",
            [],
        )?;

        let _ = conn.execute("ALTER TABLE images ADD COLUMN favorite INTEGER DEFAULT 0", []);
        let _ = conn.execute(
            "ALTER TABLE characters ADD COLUMN default_lora TEXT DEFAULT 'None'",
            [],
        );
        let _ = conn.execute(
            "ALTER TABLE characters ADD COLUMN lora_scale REAL DEFAULT 0.8",
            [],
        );

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_images_timestamp ON images(timestamp DESC)",
            [],
        )?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_images_model ON images(model)", [])?;

        let migrated = migrate_text_timestamps(&mut conn)?;
        if migrated > 0 {
            info!("🕒 Converted {} legacy timestamps to milliseconds", migrated);
        }

        debug!("✅ Database schema initialized");
        Ok(())
    }

    /// Get a count of images in the library
    pub fn image_count(&self) -> Result<i64, LibraryError> {
        let conn = self.connect()?;
        let count = conn.query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
        Ok(count)
    }

    // ========== Insert ==========

    /// Record a generated image. Returns true if a new row was inserted.
    pub fn record_image(&self, image: &NewImage) -> bool {
        match self.try_record_image(image) {
            Ok(inserted) => inserted,
            Err(e) => {
                warn!("⚠️  Could not record {} in the library: {}", image.path, e);
                false
            }
        }
    }

    /// Insert a record, ignoring it if the normalized path is already cataloged
    pub fn try_record_image(&self, image: &NewImage) -> Result<bool, LibraryError> {
        let conn = self.connect()?;
        let path = normalize_path(Path::new(&image.path));
        let timestamp = image.timestamp.unwrap_or_else(now_millis);
        Ok(insert_image(&conn, &path, image, timestamp)? > 0)
    }

    // ========== Query ==========

    /// Filtered, sorted listing. Errors are logged and yield an empty list.
    pub fn query_images(&self, query: &ImageQuery) -> Vec<ImageRecord> {
        self.try_query_images(query).unwrap_or_else(|e| {
            warn!("⚠️  Gallery query failed: {}", e);
            Vec::new()
        })
    }

    pub fn try_query_images(&self, query: &ImageQuery) -> Result<Vec<ImageRecord>, LibraryError> {
        let conn = self.connect()?;

        let mut sql = format!("SELECT {} FROM images WHERE 1=1", IMAGE_COLUMNS);
        let mut args: Vec<String> = Vec::new();

        let search = query.search.trim();
        if !search.is_empty() {
            sql.push_str(
                " AND (prompt LIKE ? ESCAPE '\\' OR seed LIKE ? ESCAPE '\\' OR model LIKE ? ESCAPE '\\')",
            );
            let pattern = like_pattern(search);
            args.extend([pattern.clone(), pattern.clone(), pattern]);
        }

        if let Some(model) = query.effective_model_filter() {
            sql.push_str(" AND model LIKE ? ESCAPE '\\'");
            args.push(like_pattern(model));
        }

        sql.push(' ');
        sql.push_str(query.sort.order_clause());

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), image_from_row)?;

        let mut images = Vec::new();
        for image in rows {
            images.push(image?);
        }
        Ok(images)
    }

    /// Unique non-empty model names, sorted
    pub fn list_distinct_models(&self) -> Vec<String> {
        self.try_list_distinct_models().unwrap_or_else(|e| {
            warn!("⚠️  Could not list models: {}", e);
            Vec::new()
        })
    }

    pub fn try_list_distinct_models(&self) -> Result<Vec<String>, LibraryError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT model FROM images WHERE model IS NOT NULL AND model != '' ORDER BY model",
        )?;
        let models = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(models)
    }

    pub fn get_image(&self, path: &str) -> Result<Option<ImageRecord>, LibraryError> {
        let conn = self.connect()?;
        let path = normalize_path(Path::new(path));
        let image = conn
            .query_row(
                &format!("SELECT {} FROM images WHERE path = ?1", IMAGE_COLUMNS),
                [&path],
                image_from_row,
            )
            .optional()?;
        Ok(image)
    }

    /// Flip the favorite flag. Returns false if no record matches.
    pub fn set_favorite(&self, path: &str, favorite: bool) -> Result<bool, LibraryError> {
        let conn = self.connect()?;
        let path = normalize_path(Path::new(path));
        let changed = conn.execute(
            "UPDATE images SET favorite = ?1 WHERE path = ?2",
            params![favorite, path],
        )?;
        Ok(changed > 0)
    }

    // ========== Delete ==========

    /// Remove the record for `path`. Returns whether a row was removed.
    pub fn delete_image(&self, path: &str) -> bool {
        self.try_delete_image(path).unwrap_or_else(|e| {
            warn!("⚠️  Could not delete {} from the library: {}", path, e);
            false
        })
    }

    pub fn try_delete_image(&self, path: &str) -> Result<bool, LibraryError> {
        let conn = self.connect()?;
        let path = normalize_path(Path::new(path));
        let removed = conn.execute("DELETE FROM images WHERE path = ?1", [&path])?;
        Ok(removed > 0)
    }

    /// Delete the image file, then its record.
    ///
    /// A file that is already gone is not an error. If removing the file
    /// fails the record is kept, so the catalog never points at less than
    /// what is on disk; a record left behind by a failed database delete is
    /// cleaned up by `prune_missing`.
    pub fn delete_image_with_file(&self, path: &str) -> Result<bool, LibraryError> {
        match fs::remove_file(path) {
            Ok(()) => info!("🗑️  Deleted {}", path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("File already gone: {}", path)
            }
            Err(e) => return Err(e.into()),
        }
        self.try_delete_image(path)
    }

    // ========== Reconciliation ==========

    /// Import every PNG under `base_dir` that is not cataloged yet.
    /// Returns the number of new records.
    pub fn rescan_folder(&self, base_dir: &Path) -> usize {
        self.try_rescan_folder(base_dir).unwrap_or_else(|e| {
            warn!("⚠️  Rescan of {} failed: {}", base_dir.display(), e);
            0
        })
    }

    pub fn try_rescan_folder(&self, base_dir: &Path) -> Result<usize, LibraryError> {
        if !base_dir.is_dir() {
            debug!("Rescan skipped, {} is not a directory", base_dir.display());
            return Ok(0);
        }

        info!("🔍 Scanning folder: {}", base_dir.display());

        let mut conn = self.connect()?;
        let mut known: HashSet<String> = {
            let mut stmt = conn.prepare("SELECT path FROM images")?;
            let paths = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<HashSet<_>, _>>()?;
            paths
        };

        let tx = conn.transaction()?;
        let mut imported = 0;

        for entry in WalkDir::new(base_dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let file = entry.path();
            if !entry.file_type().is_file() || !is_png(file) {
                continue;
            }

            let path = normalize_path(file);
            if known.contains(&path) {
                continue;
            }

            let info = match metadata::read_generation_info(file) {
                Ok(info) => info,
                Err(e) => {
                    warn!("⚠️  Skipping {}: {}", file.display(), e);
                    continue;
                }
            };

            let timestamp = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(system_time_millis)
                .unwrap_or_else(now_millis);

            let record = info.into_new_image(path.clone(), Some(timestamp));
            imported += insert_image(&tx, &path, &record, timestamp)?;
            known.insert(path);

            if imported > 0 && imported % 100 == 0 {
                debug!("⏳ Imported {} files...", imported);
            }
        }

        tx.commit()?;

        info!("✅ Rescan complete: {} new images", imported);
        Ok(imported)
    }

    /// Delete records whose file no longer exists. Returns how many went.
    pub fn prune_missing(&self) -> Result<usize, LibraryError> {
        let conn = self.connect()?;
        let missing: Vec<(i64, String)> = {
            let mut stmt = conn.prepare("SELECT id, path FROM images")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<(i64, String)>, _>>()?;
            rows.into_iter()
                .filter(|(_, path)| !Path::new(path).exists())
                .collect()
        };

        for (id, _) in &missing {
            conn.execute("DELETE FROM images WHERE id = ?1", [id])?;
        }

        if !missing.is_empty() {
            info!("🧹 Pruned {} records with missing files", missing.len());
        }
        Ok(missing.len())
    }

    /// Point broken records back at their files after the output folder moved.
    ///
    /// A broken path `.../<YYYYMMDD>/<file>` is looked up as
    /// `<output_root>/<YYYYMMDD>/<file>`, then as `<output_root>/<file>`.
    pub fn relocate_paths(&self, output_root: &Path) -> Result<RelocateReport, LibraryError> {
        let conn = self.connect()?;
        let records: Vec<(i64, String)> = {
            let mut stmt = conn.prepare("SELECT id, path FROM images")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<(i64, String)>, _>>()?;
            rows
        };

        let mut report = RelocateReport::default();

        for (id, old_path) in records {
            let old = Path::new(&old_path);
            if old.exists() {
                continue;
            }

            let Some(new_path) = relocation_candidates(old, output_root)
                .into_iter()
                .find(|candidate| candidate.is_file())
                .map(|candidate| normalize_path(&candidate))
            else {
                report.lost += 1;
                continue;
            };

            let taken: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM images WHERE path = ?1)",
                [&new_path],
                |row| row.get(0),
            )?;

            if taken {
                conn.execute("DELETE FROM images WHERE id = ?1", [id])?;
                report.removed_duplicates += 1;
            } else {
                conn.execute(
                    "UPDATE images SET path = ?1 WHERE id = ?2",
                    params![new_path, id],
                )?;
                report.fixed += 1;
            }
        }

        info!(
            "🔧 Path repair: {} fixed, {} duplicates removed, {} lost",
            report.fixed, report.removed_duplicates, report.lost
        );
        Ok(report)
    }
}

fn insert_image(
    conn: &Connection,
    path: &str,
    image: &NewImage,
    timestamp: i64,
) -> Result<usize, LibraryError> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO images
            (path, prompt, negative_prompt, model, steps, cfg, seed, timestamp, favorite)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
        params![
            path,
            image.prompt,
            image.negative_prompt,
            image.model,
            image.steps,
            image.cfg,
            image.seed,
            timestamp,
        ],
    )?;
    Ok(changed)
}

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<ImageRecord> {
    let steps: i64 = row.get(5)?;
    Ok(ImageRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        prompt: row.get(2)?,
        negative_prompt: row.get(3)?,
        model: row.get(4)?,
        steps: u32::try_from(steps).unwrap_or(0),
        cfg: row.get(6)?,
        seed: row.get(7)?,
        timestamp: timestamp_from_value(row.get_ref(8)?),
        favorite: row.get(9)?,
    })
}

/// Timestamps are unix milliseconds; older databases stored SQLite datetime text
fn timestamp_from_value(value: ValueRef<'_>) -> i64 {
    match value {
        ValueRef::Integer(ms) => ms,
        ValueRef::Real(ms) => ms as i64,
        ValueRef::Text(text) => std::str::from_utf8(text)
            .ok()
            .and_then(parse_legacy_timestamp)
            .unwrap_or(0),
        _ => 0,
    }
}

fn parse_legacy_timestamp(text: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(text.trim(), "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .and_then(|dt| Local.from_local_datetime(&dt).earliest())
        .map(|dt| dt.timestamp_millis())
}

/// Rewrite TEXT timestamps as integer milliseconds.
///
/// SQLite orders every TEXT value after every INTEGER, so a mixed column
/// would sort legacy rows as the newest. Unparseable text becomes 0.
fn migrate_text_timestamps(conn: &mut Connection) -> Result<usize, LibraryError> {
    let tx = conn.transaction()?;
    let legacy: Vec<(i64, String)> = {
        let mut stmt = tx.prepare("SELECT id, timestamp FROM images WHERE typeof(timestamp) = 'text'")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<_, _>>()?
    };

    {
        let mut update = tx.prepare("UPDATE images SET timestamp = ?1 WHERE id = ?2")?;
        for (id, text) in &legacy {
            update.execute(params![parse_legacy_timestamp(text).unwrap_or(0), id])?;
        }
    }
    tx.commit()?;
    Ok(legacy.len())
}

fn like_pattern(text: &str) -> String {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn is_png(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("png"))
        .unwrap_or(false)
}

fn relocation_candidates(old: &Path, output_root: &Path) -> Vec<PathBuf> {
    let Some(file_name) = old.file_name() else {
        return Vec::new();
    };

    let mut candidates = Vec::new();
    if let Some(day) = old.parent().and_then(Path::file_name) {
        let day = day.to_string_lossy();
        if day.len() == 8 && day.chars().all(|c| c.is_ascii_digit()) {
            candidates.push(output_root.join(day.as_ref()).join(file_name));
        }
    }
    candidates.push(output_root.join(file_name));
    candidates
}

/// Absolute, lexically cleaned form of `path` used as the catalog key.
///
/// Symlinks are not resolved, so the file does not have to exist.
pub fn normalize_path(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut clean = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                clean.pop();
            }
            other => clean.push(other.as_os_str()),
        }
    }
    clean.to_string_lossy().to_string()
}

pub(crate) fn now_millis() -> i64 {
    system_time_millis(SystemTime::now())
}

fn system_time_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::metadata::{write_png, GenerationInfo};
    use crate::state::data::SortKey;
    use image::{DynamicImage, RgbImage};
    use tempfile::TempDir;

    fn library(dir: &TempDir) -> Library {
        Library::open(dir.path().join("library.db")).unwrap()
    }

    fn new_image(path: &Path, prompt: &str, model: &str, steps: u32, timestamp: i64) -> NewImage {
        NewImage {
            path: path.display().to_string(),
            prompt: prompt.to_string(),
            negative_prompt: String::new(),
            model: model.to_string(),
            steps,
            cfg: 7.0,
            seed: "42".to_string(),
            timestamp: Some(timestamp),
        }
    }

    fn write_generated(path: &Path, prompt: &str, steps: u32) {
        let info = GenerationInfo {
            prompt: prompt.to_string(),
            negative_prompt: "blurry".to_string(),
            steps,
            cfg: 6.5,
            seed: "1234".to_string(),
            model: "juggernaut.safetensors".to_string(),
            ..GenerationInfo::default()
        };
        let image = DynamicImage::ImageRgb8(RgbImage::new(8, 8));
        write_png(path, &image, &info).unwrap();
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);
        lib.initialize().unwrap();
        lib.initialize().unwrap();
        assert_eq!(lib.image_count().unwrap(), 0);
    }

    #[test]
    fn test_duplicate_path_is_ignored() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);
        let path = dir.path().join("out").join("a.png");

        assert!(lib.record_image(&new_image(&path, "a cat", "sdxl", 30, 1)));
        let relative_twin = dir.path().join("out").join(".").join("a.png");
        assert!(!lib.record_image(&new_image(&relative_twin, "a cat again", "sdxl", 30, 2)));

        assert_eq!(lib.image_count().unwrap(), 1);
        let stored = lib.get_image(&path.display().to_string()).unwrap().unwrap();
        assert_eq!(stored.prompt, "a cat");
    }

    #[test]
    fn test_search_and_model_filter() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);
        for (i, (prompt, model)) in [("a cat", "juggernaut"), ("a dog", "pony"), ("a cow", "juggernaut")]
            .iter()
            .enumerate()
        {
            let path = dir.path().join(format!("{}.png", i));
            lib.record_image(&new_image(&path, prompt, model, 30, i as i64));
        }

        let cats = lib.query_images(&ImageQuery::new("CAT", SortKey::Newest, ""));
        assert_eq!(cats.len(), 1);
        assert_eq!(cats[0].prompt, "a cat");

        let all = lib.query_images(&ImageQuery::new("", SortKey::Newest, "All"));
        assert_eq!(all.len(), 3);

        let juggernaut = lib.query_images(&ImageQuery::new("", SortKey::Newest, "jugger"));
        assert_eq!(juggernaut.len(), 2);

        let by_model = lib.query_images(&ImageQuery::new("pony", SortKey::Newest, "All Models"));
        assert_eq!(by_model.len(), 1);
        assert_eq!(by_model[0].prompt, "a dog");

        let by_seed = lib.query_images(&ImageQuery::new("42", SortKey::Newest, ""));
        assert_eq!(by_seed.len(), 3);
    }

    #[test]
    fn test_like_wildcards_are_literal() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);
        lib.record_image(&new_image(&dir.path().join("1.png"), "100% cotton", "m", 30, 1));
        lib.record_image(&new_image(&dir.path().join("2.png"), "1000 cats", "m", 30, 2));

        let hits = lib.query_images(&ImageQuery::new("0%", SortKey::Newest, ""));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].prompt, "100% cotton");

        assert!(lib.query_images(&ImageQuery::new("_", SortKey::Newest, "")).is_empty());
    }

    #[test]
    fn test_sort_orders() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);
        for (i, steps) in [10u32, 50, 30].iter().enumerate() {
            let path = dir.path().join(format!("{}.png", i));
            lib.record_image(&new_image(&path, "x", "m", *steps, 1000 + i as i64));
        }

        let steps = |sort| {
            lib.query_images(&ImageQuery::new("", sort, ""))
                .iter()
                .map(|r| r.steps)
                .collect::<Vec<_>>()
        };

        assert_eq!(steps(SortKey::StepsDesc), vec![50, 30, 10]);
        assert_eq!(steps(SortKey::Newest), vec![30, 50, 10]);
        assert_eq!(steps(SortKey::Oldest), vec![10, 50, 30]);
    }

    #[test]
    fn test_distinct_models_skip_empty() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);
        lib.record_image(&new_image(&dir.path().join("1.png"), "x", "zeta", 30, 1));
        lib.record_image(&new_image(&dir.path().join("2.png"), "x", "alpha", 30, 2));
        lib.record_image(&new_image(&dir.path().join("3.png"), "x", "zeta", 30, 3));
        lib.record_image(&new_image(&dir.path().join("4.png"), "x", "", 30, 4));

        assert_eq!(lib.list_distinct_models(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_delete_and_favorite() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);
        let path = dir.path().join("a.png");
        let key = path.display().to_string();
        lib.record_image(&new_image(&path, "x", "m", 30, 1));

        assert!(lib.set_favorite(&key, true).unwrap());
        assert!(lib.get_image(&key).unwrap().unwrap().favorite);

        assert!(lib.delete_image(&key));
        assert!(!lib.delete_image(&key));
        assert!(!lib.set_favorite(&key, false).unwrap());
    }

    #[test]
    fn test_delete_with_file_tolerates_missing_file() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);
        let present = dir.path().join("present.png");
        let absent = dir.path().join("absent.png");
        write_generated(&present, "x", 30);
        lib.record_image(&new_image(&present, "x", "m", 30, 1));
        lib.record_image(&new_image(&absent, "y", "m", 30, 2));

        assert!(lib.delete_image_with_file(&present.display().to_string()).unwrap());
        assert!(!present.exists());
        assert!(lib.delete_image_with_file(&absent.display().to_string()).unwrap());
        assert_eq!(lib.image_count().unwrap(), 0);
    }

    #[test]
    fn test_rescan_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);
        let out = dir.path().join("output_images");
        let day = out.join("20240501");
        fs::create_dir_all(&day).unwrap();
        write_generated(&day.join("120000_cat.png"), "a cat", 25);
        write_generated(&day.join("120100_dog.PNG"), "a dog", 40);
        fs::write(day.join("notes.txt"), "not an image").unwrap();

        assert_eq!(lib.rescan_folder(&out), 2);
        assert_eq!(lib.rescan_folder(&out), 0);
        assert_eq!(lib.image_count().unwrap(), 2);
    }

    #[test]
    fn test_rescan_reads_embedded_metadata() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);
        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        let path = out.join("cat.png");
        write_generated(&path, "a cat, sitting", 25);

        assert_eq!(lib.rescan_folder(&out), 1);
        let record = lib.get_image(&path.display().to_string()).unwrap().unwrap();
        assert_eq!(record.prompt, "a cat, sitting");
        assert_eq!(record.negative_prompt, "blurry");
        assert_eq!(record.steps, 25);
        assert!((record.cfg - 6.5).abs() < 1e-6);
        assert_eq!(record.seed, "1234");
        assert_eq!(record.model, "juggernaut.safetensors");
        assert!(record.timestamp > 0);
    }

    #[test]
    fn test_rescan_defaults_and_skips() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);
        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();

        let plain = out.join("plain.png");
        RgbImage::new(4, 4).save(&plain).unwrap();
        fs::write(out.join("broken.png"), b"definitely not a png").unwrap();

        assert_eq!(lib.rescan_folder(&out), 1);
        let record = lib.get_image(&plain.display().to_string()).unwrap().unwrap();
        assert_eq!(record.prompt, "Unknown");
        assert_eq!(record.model, "Unknown");
        assert_eq!(record.steps, 0);
        assert_eq!(record.cfg, 0.0);
        assert_eq!(record.seed, "Random");
    }

    #[test]
    fn test_rescan_missing_dir_is_zero() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);
        assert_eq!(lib.rescan_folder(&dir.path().join("nope")), 0);
    }

    #[test]
    fn test_prune_missing() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);
        let kept = dir.path().join("kept.png");
        write_generated(&kept, "x", 30);
        lib.record_image(&new_image(&kept, "x", "m", 30, 1));
        lib.record_image(&new_image(&dir.path().join("gone.png"), "y", "m", 30, 2));

        assert_eq!(lib.prune_missing().unwrap(), 1);
        assert_eq!(lib.image_count().unwrap(), 1);
        assert_eq!(lib.prune_missing().unwrap(), 0);
    }

    #[test]
    fn test_relocate_paths() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);
        let new_root = dir.path().join("moved");
        let day = new_root.join("20240501");
        fs::create_dir_all(&day).unwrap();
        write_generated(&day.join("a.png"), "a", 30);
        write_generated(&day.join("b.png"), "b", 30);

        let old_day = dir.path().join("old").join("20240501");
        lib.record_image(&new_image(&old_day.join("a.png"), "a", "m", 30, 1));
        lib.record_image(&new_image(&old_day.join("b.png"), "b", "m", 30, 2));
        lib.record_image(&new_image(&day.join("b.png"), "b", "m", 30, 3));
        lib.record_image(&new_image(&old_day.join("c.png"), "c", "m", 30, 4));

        let report = lib.relocate_paths(&new_root).unwrap();
        assert_eq!(
            report,
            RelocateReport {
                fixed: 1,
                removed_duplicates: 1,
                lost: 1,
            }
        );
        assert!(lib
            .get_image(&day.join("a.png").display().to_string())
            .unwrap()
            .is_some());
        assert_eq!(lib.image_count().unwrap(), 3);
    }

    #[test]
    fn test_legacy_text_timestamps() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);
        let conn = lib.connect().unwrap();
        conn.execute(
            "INSERT INTO images (path, prompt, model, steps, cfg, seed, timestamp)
             VALUES ('/old/a.png', 'old', 'm', 20, 5.0, 'Random', '2024-01-02 03:04:05')",
            [],
        )
        .unwrap();

        let record = lib.get_image("/old/a.png").unwrap().unwrap();
        let created = record.created_at().unwrap();
        assert_eq!(created.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-01-02 03:04:05");
        assert!(!record.favorite);
    }

    #[test]
    fn test_legacy_rows_sort_by_age_after_reopen() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("library.db");
        {
            let conn = Connection::open(&db).unwrap();
            conn.execute_batch(
                "CREATE TABLE images (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    path TEXT NOT NULL UNIQUE,
                    prompt TEXT, negative_prompt TEXT, model TEXT,
                    steps INTEGER, cfg REAL, seed TEXT,
                    timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
                );
                INSERT INTO images (path, prompt, model, steps, cfg, seed, timestamp)
                VALUES ('/old/a.png', 'old 2023', 'm', 20, 5.0, 'Random', '2023-01-02 03:04:05.123456');",
            )
            .unwrap();
        }

        let lib = Library::open(&db).unwrap();
        assert!(lib.try_record_image(&new_image(Path::new("/new/b.png"), "new now", "m", 20, now_millis())).unwrap());

        let newest: Vec<String> = lib
            .query_images(&ImageQuery::new("", SortKey::Newest, ""))
            .into_iter()
            .map(|r| r.prompt)
            .collect();
        assert_eq!(newest, vec!["new now", "old 2023"]);

        let oldest: Vec<String> = lib
            .query_images(&ImageQuery::new("", SortKey::Oldest, ""))
            .into_iter()
            .map(|r| r.prompt)
            .collect();
        assert_eq!(oldest, vec!["old 2023", "new now"]);

        let record = lib.get_image("/old/a.png").unwrap().unwrap();
        assert_eq!(
            record.created_at().unwrap().format("%Y-%m-%d %H:%M:%S").to_string(),
            "2023-01-02 03:04:05"
        );

        let conn = lib.connect().unwrap();
        let text_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM images WHERE typeof(timestamp) = 'text'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(text_rows, 0);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("/a/b/../c/./d.png")), "/a/c/d.png");
        assert!(Path::new(&normalize_path(Path::new("rel.png"))).is_absolute());
    }
}
