//! Module de gestion du cache audio persistant
//!
//! Associe une clé de ressource (URL canonique) à des octets audio et à leurs
//! métadonnées. Les métadonnées vivent dans SQLite ([`DB`]), les octets dans
//! un fichier `{pk}.orig.bin` du répertoire de cache.
//!
//! Toutes les lectures sont "fail-open" : une erreur de stockage est
//! journalisée et traitée comme un défaut de cache, pour que la lecture
//! puisse toujours se rabattre sur le réseau.

use crate::db::{CacheEntry, DB};
use crate::download::{Fetched, Fetcher};
use crate::error::Result;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

const BLOB_QUALIFIER: &str = "orig";
const BLOB_EXTENSION: &str = "bin";

/// Métadonnées fournies lors d'une écriture
#[derive(Debug, Clone, PartialEq)]
pub struct CacheMetadata {
    pub mime_type: String,
    pub last_modified: Option<DateTime<Utc>>,
}

impl From<&Fetched> for CacheMetadata {
    fn from(fetched: &Fetched) -> Self {
        Self {
            mime_type: fetched.mime_type.clone(),
            last_modified: fetched.last_modified,
        }
    }
}

/// Enregistrement complet : octets + métadonnées
#[derive(Debug, Clone)]
pub struct CacheRecord {
    pub resource_key: String,
    pub bytes: Bytes,
    pub mime_type: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub inserted_at: DateTime<Utc>,
}

/// Métadonnées seules, pour les vérifications de fraîcheur
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMetadata {
    pub last_modified: Option<DateTime<Utc>>,
    pub inserted_at: DateTime<Utc>,
    pub mime_type: String,
}

impl From<CacheEntry> for RecordMetadata {
    fn from(entry: CacheEntry) -> Self {
        Self {
            last_modified: entry.last_modified,
            inserted_at: entry.inserted_at,
            mime_type: entry.mime_type,
        }
    }
}

/// Génère la clé primaire d'une clé de ressource (hash SHA1 hexadécimal)
///
/// ```
/// use ppcache::pk_from_url;
///
/// let pk = pk_from_url("audio/Book1/Unit1/A/01.mp3");
/// assert_eq!(pk.len(), 40);
/// assert_eq!(pk, pk_from_url("audio/Book1/Unit1/A/01.mp3"));
/// ```
pub fn pk_from_url(url: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cache audio persistant
///
/// Note : ce type est conçu pour être partagé derrière un `Arc<AudioCache>`.
/// Le renommage du fichier d'octets et la mise à jour de la ligne SQLite se
/// font sous un même verrou d'écriture : deux écritures concurrentes sur la
/// même clé se résolvent en "la dernière écriture gagne", octets et
/// métadonnées compris.
#[derive(Debug)]
pub struct AudioCache {
    /// Répertoire de stockage
    dir: PathBuf,
    /// Base de données SQLite
    db: Arc<DB>,
    /// Compteur pour nommer les fichiers temporaires
    tmp_counter: AtomicU64,
    /// Sérialise renommage + upsert (et suppressions)
    write_lock: Mutex<()>,
    /// Vrai si `cache.db` n'a pas pu être ouvert
    degraded: bool,
}

impl AudioCache {
    /// Ouvre (ou crée) un cache dans le répertoire donné
    ///
    /// Si `cache.db` est inutilisable, le cache passe en mode dégradé : les
    /// métadonnées sont tenues en mémoire le temps de la session et la
    /// lecture continue par le réseau. Voir [`is_degraded`](Self::is_degraded).
    ///
    /// # Exemple
    ///
    /// ```rust,no_run
    /// use ppcache::AudioCache;
    ///
    /// let cache = AudioCache::new("./cache_audio").unwrap();
    /// ```
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let directory = dir.as_ref().to_path_buf();
        if let Err(e) = std::fs::create_dir_all(&directory) {
            tracing::warn!(dir = %directory.display(), "Cannot create cache directory: {}", e);
        }

        let (db, degraded) = match DB::init(&directory.join("cache.db")) {
            Ok(db) => (db, false),
            Err(e) => {
                tracing::warn!(
                    dir = %directory.display(),
                    "Audio cache unavailable, falling back to an in-memory index: {}",
                    e
                );
                (DB::in_memory()?, true)
            }
        };

        Ok(Self {
            dir: directory,
            db: Arc::new(db),
            tmp_counter: AtomicU64::new(0),
            write_lock: Mutex::new(()),
            degraded,
        })
    }

    /// Vrai si la base `cache.db` n'a pas pu être ouverte
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Répertoire de stockage du cache
    pub fn cache_dir(&self) -> &Path {
        &self.dir
    }

    /// Base de données sous-jacente
    pub fn database(&self) -> Arc<DB> {
        self.db.clone()
    }

    /// Chemin du fichier d'octets pour une clé primaire
    ///
    /// Format: `{pk}.orig.bin`
    pub fn file_path(&self, pk: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}.{}", pk, BLOB_QUALIFIER, BLOB_EXTENSION))
    }

    /// Indique si la ressource est en cache. Ne renvoie jamais d'erreur.
    pub async fn has(&self, resource_key: &str) -> bool {
        match self.db.contains(resource_key) {
            Ok(true) => tokio::fs::try_exists(self.file_path(&pk_from_url(resource_key)))
                .await
                .unwrap_or(false),
            Ok(false) => false,
            Err(e) => {
                tracing::warn!(resource_key, "Cache lookup failed, treating as miss: {}", e);
                false
            }
        }
    }

    /// Récupère l'enregistrement complet (octets + métadonnées)
    ///
    /// Une ligne sans fichier d'octets est traitée comme un défaut de cache.
    pub async fn get(&self, resource_key: &str) -> Option<CacheRecord> {
        let entry = match self.db.get(resource_key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(resource_key, "Cache read failed, treating as miss: {}", e);
                return None;
            }
        };

        match tokio::fs::read(self.file_path(&entry.pk)).await {
            Ok(bytes) => {
                tracing::debug!(resource_key, size = bytes.len(), "Cache hit");
                Some(CacheRecord {
                    resource_key: entry.resource_key,
                    bytes: Bytes::from(bytes),
                    mime_type: entry.mime_type,
                    last_modified: entry.last_modified,
                    inserted_at: entry.inserted_at,
                })
            }
            Err(e) => {
                tracing::warn!(resource_key, "Cached blob unreadable, treating as miss: {}", e);
                None
            }
        }
    }

    /// Écrit (ou remplace) un enregistrement
    ///
    /// Les octets sont écrits dans un fichier temporaire puis renommés, la
    /// ligne SQLite n'est mise à jour qu'ensuite : un lecteur ne voit jamais
    /// de fichier partiel. Renommage et mise à jour se font sous le verrou
    /// d'écriture, pour que les octets et les métadonnées d'une clé viennent
    /// toujours du même écrivain.
    pub async fn put(&self, resource_key: &str, bytes: Bytes, metadata: CacheMetadata) -> Result<()> {
        let pk = pk_from_url(resource_key);
        let final_path = self.file_path(&pk);
        let tmp_path = self.dir.join(format!(
            "{}.{}.tmp",
            pk,
            self.tmp_counter.fetch_add(1, Ordering::Relaxed)
        ));

        tokio::fs::write(&tmp_path, &bytes).await?;

        let _guard = self.write_lock.lock().await;
        if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        self.db.upsert(&CacheEntry {
            pk,
            resource_key: resource_key.to_string(),
            mime_type: metadata.mime_type,
            last_modified: metadata.last_modified,
            inserted_at: Utc::now(),
            size: bytes.len() as u64,
        })?;

        tracing::debug!(resource_key, size = bytes.len(), "Stored in cache");
        Ok(())
    }

    /// Variante de [`put`](Self::put) qui journalise les erreurs au lieu de les propager
    pub async fn put_logged(&self, resource_key: &str, bytes: Bytes, metadata: CacheMetadata) {
        if let Err(e) = self.put(resource_key, bytes, metadata).await {
            tracing::warn!(resource_key, "Failed to store in cache: {}", e);
        }
    }

    /// Lecture légère des métadonnées, sans transférer les octets
    pub async fn get_metadata(&self, resource_key: &str) -> Option<RecordMetadata> {
        match self.db.get(resource_key) {
            Ok(entry) => entry.map(RecordMetadata::from),
            Err(e) => {
                tracing::warn!(resource_key, "Cache metadata read failed: {}", e);
                None
            }
        }
    }

    /// Indique si l'enregistrement doit être rafraîchi
    ///
    /// Vrai si aucun enregistrement n'existe, ou si la date annoncée par le
    /// serveur est plus récente que celle en cache. Une date serveur inconnue
    /// n'est jamais considérée comme plus récente.
    pub async fn is_stale(
        &self,
        resource_key: &str,
        server_last_modified: Option<DateTime<Utc>>,
    ) -> bool {
        let Some(metadata) = self.get_metadata(resource_key).await else {
            return true;
        };

        match (metadata.last_modified, server_last_modified) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(cached), Some(server)) => server > cached,
        }
    }

    /// Vérifie la fraîcheur via HEAD et retélécharge si nécessaire
    ///
    /// # Returns
    ///
    /// `true` si l'enregistrement a été (re)téléchargé
    pub async fn refresh_if_stale(&self, fetcher: &dyn Fetcher, resource_key: &str) -> Result<bool> {
        let server_last_modified = fetcher.head_last_modified(resource_key).await?;
        if !self.is_stale(resource_key, server_last_modified).await {
            tracing::debug!(resource_key, "Cache entry is fresh");
            return Ok(false);
        }

        let fetched = fetcher.get_bytes(resource_key).await?;
        let mut metadata = CacheMetadata::from(&fetched);
        if metadata.last_modified.is_none() {
            metadata.last_modified = server_last_modified;
        }
        self.put(resource_key, fetched.bytes, metadata).await?;
        tracing::info!(resource_key, "Refreshed stale cache entry");
        Ok(true)
    }

    /// Supprime un enregistrement (action explicite, pas d'éviction automatique)
    pub async fn delete(&self, resource_key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.file_path(&pk_from_url(resource_key));
        if let Err(err) = tokio::fs::remove_file(&path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                return Err(err.into());
            }
        }
        self.db.delete(resource_key)?;
        Ok(())
    }

    /// Supprime tous les fichiers et entrées du cache
    pub async fn purge(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        for entry in self.db.get_all_by_insertion()? {
            if let Err(err) = tokio::fs::remove_file(self.file_path(&entry.pk)).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    return Err(err.into());
                }
            }
        }
        self.db.purge()?;
        tracing::info!(dir = %self.dir.display(), "Purged audio cache");
        Ok(())
    }

    /// Nombre d'enregistrements
    pub fn len(&self) -> Result<usize> {
        self.db.count()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Clés de ressource, des plus anciennes aux plus récentes
    pub fn keys_by_insertion(&self) -> Result<Vec<String>> {
        Ok(self
            .db
            .get_all_by_insertion()?
            .into_iter()
            .map(|entry| entry.resource_key)
            .collect())
    }
}
