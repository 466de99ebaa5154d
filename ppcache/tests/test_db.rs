use chrono::{Duration, TimeZone, Utc};
use ppcache::db::{CacheEntry, DB, SCHEMA_VERSION};
use ppcache::CacheError;
use tempfile::TempDir;

/// Crée une DB temporaire pour les tests
fn create_test_db() -> (TempDir, DB) {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = DB::init(&db_path).unwrap();
    (temp_dir, db)
}

fn entry(pk: &str, key: &str, offset_secs: i64) -> CacheEntry {
    CacheEntry {
        pk: pk.to_string(),
        resource_key: key.to_string(),
        mime_type: "audio/mpeg".to_string(),
        last_modified: None,
        inserted_at: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
            + Duration::seconds(offset_secs),
        size: 3,
    }
}

#[test]
fn test_db_init() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = DB::init(&db_path).unwrap();
    assert!(db_path.exists());
    assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
    assert_eq!(db.count().unwrap(), 0);
}

#[test]
fn test_reopen_keeps_entries() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("test.db");
    {
        let db = DB::init(&db_path).unwrap();
        db.upsert(&entry("pk1", "audio/a.mp3", 0)).unwrap();
    }
    let db = DB::init(&db_path).unwrap();
    assert!(db.contains("audio/a.mp3").unwrap());
}

#[test]
fn test_newer_schema_is_rejected() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("test.db");
    {
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute_batch("PRAGMA user_version = 42").unwrap();
    }
    match DB::init(&db_path) {
        Err(CacheError::SchemaVersion { found, supported }) => {
            assert_eq!(found, 42);
            assert_eq!(supported, SCHEMA_VERSION);
        }
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_upsert_and_get() {
    let (_temp_dir, db) = create_test_db();

    let mut e = entry("pk1", "audio/Book1/Unit1/A/01.mp3", 0);
    e.last_modified = Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
    db.upsert(&e).unwrap();

    let fetched = db.get("audio/Book1/Unit1/A/01.mp3").unwrap().unwrap();
    assert_eq!(fetched, e);

    assert!(db.get("audio/unknown.mp3").unwrap().is_none());
}

#[test]
fn test_upsert_replaces_existing_row() {
    let (_temp_dir, db) = create_test_db();

    db.upsert(&entry("pk1", "audio/a.mp3", 0)).unwrap();
    let mut updated = entry("pk1", "audio/a.mp3", 10);
    updated.mime_type = "audio/wav".to_string();
    updated.size = 99;
    db.upsert(&updated).unwrap();

    assert_eq!(db.count().unwrap(), 1);
    let fetched = db.get("audio/a.mp3").unwrap().unwrap();
    assert_eq!(fetched.mime_type, "audio/wav");
    assert_eq!(fetched.size, 99);
}

#[test]
fn test_delete_and_purge() {
    let (_temp_dir, db) = create_test_db();

    db.upsert(&entry("pk1", "audio/a.mp3", 0)).unwrap();
    db.upsert(&entry("pk2", "audio/b.mp3", 1)).unwrap();
    db.upsert(&entry("pk3", "audio/c.mp3", 2)).unwrap();

    db.delete("audio/b.mp3").unwrap();
    assert!(!db.contains("audio/b.mp3").unwrap());
    assert_eq!(db.count().unwrap(), 2);

    // Supprimer une clé absente n'est pas une erreur
    db.delete("audio/b.mp3").unwrap();

    db.purge().unwrap();
    assert_eq!(db.count().unwrap(), 0);
}

#[test]
fn test_get_all_by_insertion_order() {
    let (_temp_dir, db) = create_test_db();

    db.upsert(&entry("pk3", "audio/late.mp3", 30)).unwrap();
    db.upsert(&entry("pk1", "audio/early.mp3", 0)).unwrap();
    db.upsert(&entry("pk2", "audio/middle.mp3", 15)).unwrap();

    let keys: Vec<String> = db
        .get_all_by_insertion()
        .unwrap()
        .into_iter()
        .map(|e| e.resource_key)
        .collect();
    assert_eq!(
        keys,
        vec!["audio/early.mp3", "audio/middle.mp3", "audio/late.mp3"]
    );
}
