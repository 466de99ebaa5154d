use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use ppcache::{
    pk_from_url, AudioCache, CacheMetadata, FetchError, Fetched, Fetcher, HttpFetcher,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

const KEY: &str = "audio/Book1/Unit1/Section%20A/01.mp3";

fn create_test_cache() -> (TempDir, AudioCache) {
    let temp_dir = tempfile::tempdir().unwrap();
    let cache = AudioCache::new(temp_dir.path()).unwrap();
    (temp_dir, cache)
}

fn metadata(last_modified: Option<DateTime<Utc>>) -> CacheMetadata {
    CacheMetadata {
        mime_type: "audio/mpeg".to_string(),
        last_modified,
    }
}

fn date(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()
}

/// Fetcher de test qui compte les téléchargements
struct StubFetcher {
    server_last_modified: Option<DateTime<Utc>>,
    downloads: AtomicUsize,
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn get_bytes(&self, _url: &str) -> Result<Fetched, FetchError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(Fetched {
            bytes: Bytes::from_static(b"fresh"),
            mime_type: "audio/mpeg".to_string(),
            last_modified: self.server_last_modified,
        })
    }

    async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        Err(FetchError::InvalidPayload(url.to_string()))
    }

    async fn head_last_modified(&self, _url: &str) -> Result<Option<DateTime<Utc>>, FetchError> {
        Ok(self.server_last_modified)
    }
}

#[tokio::test]
async fn test_cache_creation() {
    let (temp_dir, cache) = create_test_cache();
    assert_eq!(cache.cache_dir(), temp_dir.path());
    assert!(temp_dir.path().join("cache.db").exists());
    assert!(cache.is_empty().unwrap());
}

#[tokio::test]
async fn test_put_then_get() {
    let (_temp_dir, cache) = create_test_cache();

    assert!(!cache.has(KEY).await);
    assert!(cache.get(KEY).await.is_none());

    cache
        .put(KEY, Bytes::from_static(b"ID3-audio"), metadata(Some(date(1))))
        .await
        .unwrap();

    assert!(cache.has(KEY).await);
    let record = cache.get(KEY).await.unwrap();
    assert_eq!(record.resource_key, KEY);
    assert_eq!(&record.bytes[..], b"ID3-audio");
    assert_eq!(record.mime_type, "audio/mpeg");
    assert_eq!(record.last_modified, Some(date(1)));

    let path = cache.file_path(&pk_from_url(KEY));
    assert!(path.to_string_lossy().ends_with(".orig.bin"));
    assert!(path.exists());
}

#[tokio::test]
async fn test_put_replaces_previous_record() {
    let (_temp_dir, cache) = create_test_cache();

    cache.put(KEY, Bytes::from_static(b"v1"), metadata(None)).await.unwrap();
    cache.put(KEY, Bytes::from_static(b"v2"), metadata(None)).await.unwrap();

    assert_eq!(cache.len().unwrap(), 1);
    assert_eq!(&cache.get(KEY).await.unwrap().bytes[..], b"v2");
}

#[tokio::test]
async fn test_missing_blob_is_a_miss() {
    let (_temp_dir, cache) = create_test_cache();

    cache.put(KEY, Bytes::from_static(b"data"), metadata(None)).await.unwrap();
    std::fs::remove_file(cache.file_path(&pk_from_url(KEY))).unwrap();

    assert!(!cache.has(KEY).await);
    assert!(cache.get(KEY).await.is_none());
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let temp_dir = tempfile::tempdir().unwrap();
    {
        let cache = AudioCache::new(temp_dir.path()).unwrap();
        cache.put(KEY, Bytes::from_static(b"persist"), metadata(None)).await.unwrap();
    }
    let cache = AudioCache::new(temp_dir.path()).unwrap();
    assert_eq!(&cache.get(KEY).await.unwrap().bytes[..], b"persist");
}

#[tokio::test]
async fn test_get_metadata() {
    let (_temp_dir, cache) = create_test_cache();
    assert!(cache.get_metadata(KEY).await.is_none());

    let before = Utc::now();
    cache.put(KEY, Bytes::from_static(b"x"), metadata(Some(date(3)))).await.unwrap();

    let meta = cache.get_metadata(KEY).await.unwrap();
    assert_eq!(meta.last_modified, Some(date(3)));
    assert_eq!(meta.mime_type, "audio/mpeg");
    assert!(meta.inserted_at >= before - chrono::Duration::seconds(1));
}

#[tokio::test]
async fn test_is_stale_rules() {
    let (_temp_dir, cache) = create_test_cache();

    // Pas d'enregistrement
    assert!(cache.is_stale(KEY, None).await);

    cache.put(KEY, Bytes::from_static(b"x"), metadata(Some(date(10)))).await.unwrap();
    assert!(!cache.is_stale(KEY, None).await);
    assert!(!cache.is_stale(KEY, Some(date(10))).await);
    assert!(!cache.is_stale(KEY, Some(date(9))).await);
    assert!(cache.is_stale(KEY, Some(date(11))).await);

    // Date inconnue en cache
    cache.put(KEY, Bytes::from_static(b"x"), metadata(None)).await.unwrap();
    assert!(cache.is_stale(KEY, Some(date(1))).await);
    assert!(!cache.is_stale(KEY, None).await);
}

#[tokio::test]
async fn test_refresh_if_stale() {
    let (_temp_dir, cache) = create_test_cache();
    cache.put(KEY, Bytes::from_static(b"old"), metadata(Some(date(10)))).await.unwrap();

    let same = StubFetcher {
        server_last_modified: Some(date(10)),
        downloads: AtomicUsize::new(0),
    };
    assert!(!cache.refresh_if_stale(&same, KEY).await.unwrap());
    assert_eq!(same.downloads.load(Ordering::SeqCst), 0);
    assert_eq!(&cache.get(KEY).await.unwrap().bytes[..], b"old");

    let newer = StubFetcher {
        server_last_modified: Some(date(12)),
        downloads: AtomicUsize::new(0),
    };
    assert!(cache.refresh_if_stale(&newer, KEY).await.unwrap());
    assert_eq!(newer.downloads.load(Ordering::SeqCst), 1);
    let record = cache.get(KEY).await.unwrap();
    assert_eq!(&record.bytes[..], b"fresh");
    assert_eq!(record.last_modified, Some(date(12)));
}

#[tokio::test]
async fn test_delete_purge_and_insertion_order() {
    let (_temp_dir, cache) = create_test_cache();

    for key in ["audio/a.mp3", "audio/b.mp3", "audio/c.mp3"] {
        cache.put(key, Bytes::from_static(b"x"), metadata(None)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(
        cache.keys_by_insertion().unwrap(),
        vec!["audio/a.mp3", "audio/b.mp3", "audio/c.mp3"]
    );

    cache.delete("audio/b.mp3").await.unwrap();
    assert!(!cache.has("audio/b.mp3").await);
    assert!(!cache.file_path(&pk_from_url("audio/b.mp3")).exists());
    assert_eq!(cache.len().unwrap(), 2);

    cache.purge().await.unwrap();
    assert!(cache.is_empty().unwrap());
    assert!(!cache.file_path(&pk_from_url("audio/a.mp3")).exists());
}

#[tokio::test]
async fn test_concurrent_puts_last_write_wins() {
    let temp_dir = tempfile::tempdir().unwrap();
    let cache = std::sync::Arc::new(AudioCache::new(temp_dir.path()).unwrap());

    let mut handles = Vec::new();
    for i in 0..8u8 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            let metadata = CacheMetadata {
                mime_type: format!("audio/x-writer-{}", i),
                last_modified: None,
            };
            cache
                .put(KEY, Bytes::from(vec![i; 16]), metadata)
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(cache.len().unwrap(), 1);
    let record = cache.get(KEY).await.unwrap();
    assert_eq!(record.bytes.len(), 16);
    assert!(record.bytes.iter().all(|b| *b == record.bytes[0]));
    // Octets et métadonnées viennent du même écrivain
    assert_eq!(record.mime_type, format!("audio/x-writer-{}", record.bytes[0]));
}

#[tokio::test]
async fn test_corrupt_database_degrades_to_memory() {
    let temp_dir = tempfile::tempdir().unwrap();
    std::fs::write(temp_dir.path().join("cache.db"), b"this is not a sqlite file").unwrap();

    let cache = AudioCache::new(temp_dir.path()).unwrap();
    assert!(cache.is_degraded());
    assert!(!cache.has(KEY).await);
    assert!(cache.get(KEY).await.is_none());

    cache
        .put(KEY, Bytes::from_static(b"audio"), metadata(None))
        .await
        .unwrap();
    assert_eq!(&cache.get(KEY).await.unwrap().bytes[..], b"audio");

    // Le fichier d'origine n'est pas écrasé
    let raw = std::fs::read(temp_dir.path().join("cache.db")).unwrap();
    assert_eq!(&raw[..], b"this is not a sqlite file");
}

#[tokio::test]
async fn test_newer_schema_degrades_to_memory() {
    let temp_dir = tempfile::tempdir().unwrap();
    {
        let conn = rusqlite::Connection::open(temp_dir.path().join("cache.db")).unwrap();
        conn.execute_batch("PRAGMA user_version = 42").unwrap();
    }

    let cache = AudioCache::new(temp_dir.path()).unwrap();
    assert!(cache.is_degraded());
    assert!(!cache.has(KEY).await);
    cache
        .put_logged(KEY, Bytes::from_static(b"audio"), metadata(None))
        .await;
    assert!(cache.has(KEY).await);
}

#[tokio::test]
async fn test_healthy_cache_is_not_degraded() {
    let (_temp_dir, cache) = create_test_cache();
    assert!(!cache.is_degraded());
}

#[tokio::test]
async fn test_unchanged_local_file_is_not_stale() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("audio/Book1/Unit1/Section A");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("01.mp3"), b"local").unwrap();
    let fetcher = HttpFetcher::builder().local_root(root.path()).build().unwrap();

    let (_temp_dir, cache) = create_test_cache();
    let fetched = fetcher.get_bytes(KEY).await.unwrap();
    let stored = CacheMetadata::from(&fetched);
    cache.put(KEY, fetched.bytes, stored.clone()).await.unwrap();

    // Précision complète conservée par la base
    let record = cache.get_metadata(KEY).await.unwrap();
    assert_eq!(record.last_modified, stored.last_modified);

    let server = fetcher.head_last_modified(KEY).await.unwrap();
    assert!(!cache.is_stale(KEY, server).await);
    assert!(!cache.refresh_if_stale(&fetcher, KEY).await.unwrap());
    assert!(!cache.refresh_if_stale(&fetcher, KEY).await.unwrap());
}

#[tokio::test]
async fn test_sub_microsecond_dates_round_trip() {
    let (_temp_dir, cache) = create_test_cache();
    let precise = Utc.timestamp_opt(1_715_000_000, 123_456_789).unwrap();

    cache
        .put(KEY, Bytes::from_static(b"x"), metadata(Some(precise)))
        .await
        .unwrap();

    assert_eq!(cache.get(KEY).await.unwrap().last_modified, Some(precise));
    assert!(!cache.is_stale(KEY, Some(precise)).await);
}
