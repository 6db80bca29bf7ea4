pub mod migrations;
#[cfg(test)]
mod tests;

use crate::error::CatalogError;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// One recording in the catalog
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub id: String,
    pub filename: String,
    /// Seconds since the Unix epoch
    pub time_started: i64,
    pub animals: BTreeSet<String>,
    /// Seconds of recorded video, unset until the first update
    pub duration: Option<f64>,
    pub finalized: bool,
}

impl CatalogEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<(Self, Option<String>)> {
        Ok((
            Self {
                id: row.get(0)?,
                filename: row.get(1)?,
                time_started: row.get(2)?,
                animals: BTreeSet::new(),
                duration: row.get(4)?,
                finalized: row.get::<_, i64>(5)? != 0,
            },
            row.get(3)?,
        ))
    }
}

const SELECT_COLUMNS: &str =
    "SELECT video_id, video_filename, time_started, animals, duration, finalized FROM videos";

/// Persisted index of recordings backed by SQLite
pub struct VideoCatalog {
    conn: Mutex<Connection>,
}

impl VideoCatalog {
    /// Open (or create) the catalog database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> CatalogResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CatalogError::Storage {
                details: format!("{}: {}", parent.display(), e),
            })?;
        }

        let conn = Connection::open(path)?;
        migrations::run_migrations(&conn)?;
        info!("Video catalog opened at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> CatalogResult<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create a new row with a fresh id
    pub fn insert<I, S>(&self, filename: &str, time_started: i64, labels: I) -> CatalogResult<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = CatalogEntry {
            id: Uuid::new_v4().to_string(),
            filename: filename.to_string(),
            time_started,
            animals: labels.into_iter().map(Into::into).collect(),
            duration: None,
            finalized: false,
        };
        self.upsert(&entry)?;
        debug!("Catalog row {} created for {}", entry.id, filename);
        Ok(entry.id)
    }

    /// Write a full row keyed by id; finalized rows are left untouched
    pub fn upsert(&self, entry: &CatalogEntry) -> CatalogResult<()> {
        let animals = serde_json::to_string(&entry.animals)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO videos (video_id, video_filename, time_started, animals, duration, finalized)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(video_id) DO UPDATE SET
                video_filename = excluded.video_filename,
                time_started = excluded.time_started,
                animals = excluded.animals,
                duration = excluded.duration,
                finalized = excluded.finalized
             WHERE videos.finalized = 0",
            params![
                entry.id,
                entry.filename,
                entry.time_started,
                animals,
                entry.duration,
                entry.finalized as i64
            ],
        )?;
        Ok(())
    }

    /// Merge `labels` into the stored set
    pub fn update_labels<'a, I>(&self, id: &str, labels: I) -> CatalogResult<()>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let conn = self.conn.lock();
        let (stored, finalized) = Self::load_labels(&conn, id)?;
        if finalized {
            return Err(CatalogError::Finalized { id: id.to_string() });
        }

        let mut merged = stored;
        let before = merged.len();
        merged.extend(labels.into_iter().cloned());
        if merged.len() == before {
            return Ok(());
        }

        conn.execute(
            "UPDATE videos SET animals = ?2 WHERE video_id = ?1 AND finalized = 0",
            params![id, serde_json::to_string(&merged)?],
        )?;
        debug!("Catalog row {} labels now {:?}", id, merged);
        Ok(())
    }

    /// Raise the stored duration; smaller values are ignored
    pub fn update_duration(&self, id: &str, duration: f64) -> CatalogResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE videos SET duration = MAX(COALESCE(duration, 0.0), ?2)
             WHERE video_id = ?1 AND finalized = 0",
            params![id, duration],
        )?;
        if changed == 0 {
            return Err(Self::unchanged_reason(&conn, id)?);
        }
        Ok(())
    }

    /// Record the final duration and freeze the row; repeating is a no-op
    pub fn finalize(&self, id: &str, duration: f64) -> CatalogResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE videos SET duration = MAX(COALESCE(duration, 0.0), ?2), finalized = 1
             WHERE video_id = ?1 AND finalized = 0",
            params![id, duration],
        )?;
        if changed == 0 {
            return match Self::unchanged_reason(&conn, id)? {
                CatalogError::Finalized { .. } => Ok(()),
                other => Err(other),
            };
        }
        info!("Catalog row {} finalized with duration {:.1}s", id, duration);
        Ok(())
    }

    pub fn get(&self, id: &str) -> CatalogResult<Option<CatalogEntry>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("{} WHERE video_id = ?1", SELECT_COLUMNS),
                params![id],
                CatalogEntry::from_row,
            )
            .optional()?;
        Ok(row.map(decode_labels))
    }

    /// All rows ordered by start time
    pub fn list_all(&self) -> CatalogResult<Vec<CatalogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY time_started ASC, video_id ASC",
            SELECT_COLUMNS
        ))?;
        let rows = stmt.query_map([], CatalogEntry::from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(decode_labels(row?));
        }
        Ok(entries)
    }

    /// Remove a row, returning whether it existed
    pub fn delete(&self, id: &str) -> CatalogResult<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM videos WHERE video_id = ?1", params![id])?;
        if removed > 0 {
            info!("Catalog row {} deleted", id);
        }
        Ok(removed > 0)
    }

    pub fn count(&self) -> CatalogResult<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM videos", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn load_labels(conn: &Connection, id: &str) -> CatalogResult<(BTreeSet<String>, bool)> {
        let row: Option<(Option<String>, i64)> = conn
            .query_row(
                "SELECT animals, finalized FROM videos WHERE video_id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((animals, finalized)) => Ok((decode_animals(id, animals), finalized != 0)),
            None => Err(CatalogError::NotFound { id: id.to_string() }),
        }
    }

    fn unchanged_reason(conn: &Connection, id: &str) -> CatalogResult<CatalogError> {
        let finalized: Option<i64> = conn
            .query_row(
                "SELECT finalized FROM videos WHERE video_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match finalized {
            Some(_) => CatalogError::Finalized { id: id.to_string() },
            None => CatalogError::NotFound { id: id.to_string() },
        })
    }
}

fn decode_labels((mut entry, animals): (CatalogEntry, Option<String>)) -> CatalogEntry {
    entry.animals = decode_animals(&entry.id, animals);
    entry
}

/// A row whose labels cannot be read still lists, with no labels
fn decode_animals(id: &str, stored: Option<String>) -> BTreeSet<String> {
    let Some(text) = stored else {
        return BTreeSet::new();
    };
    if let Ok(labels) = serde_json::from_str(&text) {
        return labels;
    }
    migrations::parse_legacy_labels(&text).unwrap_or_else(|| {
        warn!("Catalog row {} has unreadable animals {:?}", id, text);
        BTreeSet::new()
    })
}
