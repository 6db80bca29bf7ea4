use super::*;
use rusqlite::Connection;
use std::path::Path;
use tempfile::TempDir;

fn create_test_catalog() -> VideoCatalog {
    VideoCatalog::open_in_memory().unwrap()
}

fn labels(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_insert_get_round_trips_label_sets() {
    let catalog = create_test_catalog();

    let empty = catalog
        .insert("videos/a.mp4", 100, Vec::<String>::new())
        .unwrap();
    let dupes = catalog
        .insert("videos/b.mp4", 200, ["cat", "bear", "cat"])
        .unwrap();

    let entry = catalog.get(&empty).unwrap().unwrap();
    assert!(entry.animals.is_empty());
    assert_eq!(entry.filename, "videos/a.mp4");
    assert_eq!(entry.time_started, 100);
    assert_eq!(entry.duration, None);
    assert!(!entry.finalized);

    let entry = catalog.get(&dupes).unwrap().unwrap();
    assert_eq!(entry.animals, labels(&["bear", "cat"]));
}

#[test]
fn test_ids_are_unique() {
    let catalog = create_test_catalog();
    let a = catalog.insert("a.mp4", 1, ["cat"]).unwrap();
    let b = catalog.insert("a.mp4", 1, ["cat"]).unwrap();
    assert_ne!(a, b);
    assert_eq!(catalog.count().unwrap(), 2);
}

#[test]
fn test_update_labels_only_grows() {
    let catalog = create_test_catalog();
    let id = catalog.insert("a.mp4", 1, ["cat"]).unwrap();

    catalog.update_labels(&id, &labels(&["person"])).unwrap();
    catalog.update_labels(&id, &labels(&["cat"])).unwrap();
    catalog.update_labels(&id, &BTreeSet::new()).unwrap();

    let entry = catalog.get(&id).unwrap().unwrap();
    assert_eq!(entry.animals, labels(&["cat", "person"]));
}

#[test]
fn test_duration_updates_are_monotonic() {
    let catalog = create_test_catalog();
    let id = catalog.insert("a.mp4", 1, Vec::<String>::new()).unwrap();

    catalog.update_duration(&id, 10.0).unwrap();
    catalog.update_duration(&id, 4.0).unwrap();
    assert_eq!(catalog.get(&id).unwrap().unwrap().duration, Some(10.0));

    catalog.update_duration(&id, 12.5).unwrap();
    assert_eq!(catalog.get(&id).unwrap().unwrap().duration, Some(12.5));
}

#[test]
fn test_finalized_rows_are_immutable() {
    let catalog = create_test_catalog();
    let id = catalog.insert("a.mp4", 1, ["cat"]).unwrap();
    catalog.finalize(&id, 20.0).unwrap();

    // Finalizing again is a no-op
    catalog.finalize(&id, 99.0).unwrap();

    assert!(matches!(
        catalog.update_duration(&id, 50.0),
        Err(CatalogError::Finalized { .. })
    ));
    assert!(matches!(
        catalog.update_labels(&id, &labels(&["bear"])),
        Err(CatalogError::Finalized { .. })
    ));

    let mut rewrite = catalog.get(&id).unwrap().unwrap();
    rewrite.filename = "other.mp4".to_string();
    catalog.upsert(&rewrite).unwrap();

    let entry = catalog.get(&id).unwrap().unwrap();
    assert!(entry.finalized);
    assert_eq!(entry.duration, Some(20.0));
    assert_eq!(entry.filename, "a.mp4");
    assert_eq!(entry.animals, labels(&["cat"]));
}

#[test]
fn test_missing_rows_report_not_found() {
    let catalog = create_test_catalog();
    assert!(catalog.get("nope").unwrap().is_none());
    assert!(matches!(
        catalog.update_duration("nope", 1.0),
        Err(CatalogError::NotFound { .. })
    ));
    assert!(matches!(
        catalog.update_labels("nope", &labels(&["cat"])),
        Err(CatalogError::NotFound { .. })
    ));
    assert!(matches!(
        catalog.finalize("nope", 1.0),
        Err(CatalogError::NotFound { .. })
    ));
}

#[test]
fn test_upsert_is_idempotent() {
    let catalog = create_test_catalog();
    let entry = CatalogEntry {
        id: "fixed-id".to_string(),
        filename: "a.mp4".to_string(),
        time_started: 5,
        animals: labels(&["cat"]),
        duration: Some(1.0),
        finalized: false,
    };
    catalog.upsert(&entry).unwrap();
    catalog.upsert(&entry).unwrap();

    assert_eq!(catalog.count().unwrap(), 1);
    assert_eq!(catalog.get("fixed-id").unwrap().unwrap(), entry);
}

#[test]
fn test_list_all_orders_by_start_time_and_delete() {
    let catalog = create_test_catalog();
    let late = catalog.insert("late.mp4", 300, ["cat"]).unwrap();
    let early = catalog.insert("early.mp4", 100, ["bear"]).unwrap();
    let middle = catalog.insert("middle.mp4", 200, Vec::<String>::new()).unwrap();

    let ids: Vec<String> = catalog
        .list_all()
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(ids, vec![early.clone(), middle.clone(), late.clone()]);

    assert!(catalog.delete(&middle).unwrap());
    assert!(!catalog.delete(&middle).unwrap());
    assert_eq!(catalog.list_all().unwrap().len(), 2);
}

#[test]
fn test_catalog_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db").join("videos.db");

    let id = {
        let catalog = VideoCatalog::open(&path).unwrap();
        let id = catalog.insert("a.mp4", 42, ["person"]).unwrap();
        catalog.finalize(&id, 3.5).unwrap();
        id
    };

    let catalog = VideoCatalog::open(&path).unwrap();
    let entry = catalog.get(&id).unwrap().unwrap();
    assert_eq!(entry.time_started, 42);
    assert_eq!(entry.duration, Some(3.5));
    assert!(entry.finalized);
}

#[test]
fn test_migrates_table_without_finalized_column() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("legacy.db");
    {
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE videos (
                video_id TEXT PRIMARY KEY,
                video_filename TEXT NOT NULL,
                time_started INTEGER NOT NULL,
                animals TEXT NOT NULL,
                duration REAL
            );
            INSERT INTO videos VALUES ('done', 'a.mp4', 1, '[\"cat\"]', 12.0);
            INSERT INTO videos VALUES ('open', 'b.mp4', 2, '[]', NULL);",
        )
        .unwrap();
    }

    let catalog = VideoCatalog::open(&path).unwrap();
    assert!(catalog.get("done").unwrap().unwrap().finalized);
    assert!(!catalog.get("open").unwrap().unwrap().finalized);
}

/// Table layout of catalogs written before this crate managed them
fn create_legacy_database(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE videos (
            video_id TEXT PRIMARY KEY,
            video_filename TEXT NOT NULL,
            time_started INTEGER NOT NULL,
            animals TEXT,
            duration INTEGER
        );
        INSERT INTO videos VALUES ('blank', 'a.mp4', 10, NULL, NULL);
        INSERT INTO videos VALUES ('cat', 'b.mp4', 20, '{''cat''}', 12);
        INSERT INTO videos VALUES ('pair', 'c.mp4', 30, '{''bear'', ''deer''}', 40);
        INSERT INTO videos VALUES ('nothing', 'd.mp4', 40, 'set()', 5);",
    )
    .unwrap();
}

#[test]
fn test_opens_legacy_database_with_set_literals() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("legacy.db");
    create_legacy_database(&path);

    let catalog = VideoCatalog::open(&path).unwrap();

    let blank = catalog.get("blank").unwrap().unwrap();
    assert!(blank.animals.is_empty());
    assert_eq!(blank.duration, None);
    assert!(!blank.finalized);

    let cat = catalog.get("cat").unwrap().unwrap();
    assert_eq!(cat.animals, labels(&["cat"]));
    assert_eq!(cat.duration, Some(12.0));
    assert!(cat.finalized);

    assert_eq!(
        catalog.get("pair").unwrap().unwrap().animals,
        labels(&["bear", "deer"])
    );
    assert!(catalog.get("nothing").unwrap().unwrap().animals.is_empty());

    let fresh = catalog.insert("e.mp4", 50, ["fox"]).unwrap();
    let entries = catalog.list_all().unwrap();
    assert_eq!(entries.len(), 5);
    assert_eq!(entries.last().unwrap().id, fresh);

    // Converted values are stored as JSON, so labels merge normally
    catalog
        .update_labels("blank", &labels(&["owl"]))
        .unwrap();
    assert_eq!(catalog.get("blank").unwrap().unwrap().animals, labels(&["owl"]));
}

#[test]
fn test_unreadable_labels_do_not_break_listing() {
    let catalog = create_test_catalog();
    let good = catalog.insert("a.mp4", 1, ["cat"]).unwrap();
    catalog
        .conn
        .lock()
        .execute(
            "INSERT INTO videos (video_id, video_filename, time_started, animals)
             VALUES ('odd', 'b.mp4', 2, 'a cat, probably')",
            [],
        )
        .unwrap();

    let entries = catalog.list_all().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].id, good);
    assert!(entries[1].animals.is_empty());
    assert!(catalog.get("odd").unwrap().unwrap().animals.is_empty());
}

#[test]
fn test_entry_serializes_with_catalog_field_names() {
    let entry = CatalogEntry {
        id: "x".to_string(),
        filename: "a.mp4".to_string(),
        time_started: 7,
        animals: labels(&["cat"]),
        duration: None,
        finalized: false,
    };
    let json = serde_json::to_value(&entry).unwrap();
    assert_eq!(json["id"], "x");
    assert_eq!(json["time_started"], 7);
    assert_eq!(json["animals"], serde_json::json!(["cat"]));
    assert!(json["duration"].is_null());
}
