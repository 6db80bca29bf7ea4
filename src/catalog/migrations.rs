use crate::error::CatalogError;
use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Create or upgrade the catalog schema
pub fn run_migrations(conn: &Connection) -> Result<(), CatalogError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS videos (
            video_id TEXT PRIMARY KEY,
            video_filename TEXT NOT NULL,
            time_started INTEGER NOT NULL,
            animals TEXT NOT NULL DEFAULT '[]',
            duration REAL,
            finalized INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_videos_time_started ON videos(time_started);
        ",
    )?;

    // Databases written before rows could be finalized lack the column
    if !has_column(conn, "videos", "finalized")? {
        info!("Adding finalized column to existing videos table");
        conn.execute_batch(
            "ALTER TABLE videos ADD COLUMN finalized INTEGER NOT NULL DEFAULT 0;
             UPDATE videos SET finalized = 1 WHERE duration IS NOT NULL;",
        )?;
    }

    normalize_animals(conn)?;

    debug!("Catalog schema migrations completed");
    Ok(())
}

/// Rewrite animals values that are not JSON arrays
///
/// Older databases allow NULL and store label sets as `{'cat', 'bear'}`.
fn normalize_animals(conn: &Connection) -> Result<(), CatalogError> {
    let stale: Vec<(String, Option<String>)> = {
        let mut stmt = conn.prepare(
            "SELECT video_id, animals FROM videos
             WHERE CASE
                WHEN animals IS NULL THEN 1
                WHEN json_valid(animals) THEN json_type(animals) != 'array'
                ELSE 1
             END",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let collected = rows.collect::<Result<Vec<_>, _>>()?;
        collected
    };
    if stale.is_empty() {
        return Ok(());
    }

    info!("Converting {} catalog rows to JSON label sets", stale.len());
    let tx = conn.unchecked_transaction()?;
    for (id, animals) in &stale {
        let labels = match animals.as_deref() {
            None => BTreeSet::new(),
            Some(text) => parse_legacy_labels(text).unwrap_or_else(|| {
                warn!("Catalog row {} has unreadable animals {:?}; clearing", id, text);
                BTreeSet::new()
            }),
        };
        tx.execute(
            "UPDATE videos SET animals = ?2 WHERE video_id = ?1",
            params![id, serde_json::to_string(&labels)?],
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Parse a label set stored as a set or list literal
///
/// Accepts `{'cat', 'bear'}`, `['cat']`, `set()` and `None`.
pub(crate) fn parse_legacy_labels(text: &str) -> Option<BTreeSet<String>> {
    let text = text.trim();
    if text.is_empty() || text == "None" || text == "set()" {
        return Some(BTreeSet::new());
    }

    let inner = text
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .or_else(|| text.strip_prefix('[').and_then(|t| t.strip_suffix(']')))?;

    let mut labels = BTreeSet::new();
    for item in inner.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        let label = item
            .strip_prefix('\'')
            .and_then(|i| i.strip_suffix('\''))
            .or_else(|| item.strip_prefix('"').and_then(|i| i.strip_suffix('"')))?;
        labels.insert(label.to_string());
    }
    Some(labels)
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parses_set_and_list_literals() {
        assert_eq!(parse_legacy_labels("{'cat', 'bear'}"), Some(labels(&["bear", "cat"])));
        assert_eq!(parse_legacy_labels("['deer']"), Some(labels(&["deer"])));
        assert_eq!(parse_legacy_labels("{\"fox\"}"), Some(labels(&["fox"])));
        assert_eq!(parse_legacy_labels("set()"), Some(BTreeSet::new()));
        assert_eq!(parse_legacy_labels("None"), Some(BTreeSet::new()));
        assert_eq!(parse_legacy_labels("{}"), Some(BTreeSet::new()));
    }

    #[test]
    fn test_rejects_unquoted_or_free_text() {
        assert_eq!(parse_legacy_labels("cat"), None);
        assert_eq!(parse_legacy_labels("{cat}"), None);
    }
}
