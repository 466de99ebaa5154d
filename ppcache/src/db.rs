//! Module de gestion de la base de données SQLite pour le cache audio
//!
//! La base ne contient que les métadonnées des enregistrements ; les octets
//! sont stockés à côté, dans un fichier par clé primaire.

use crate::error::{CacheError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Version courante du schéma (stockée dans `PRAGMA user_version`)
pub const SCHEMA_VERSION: i32 = 1;

const TABLE_NAME: &str = "audio_files";

/// Entrée de cache représentant un enregistrement dans la base de données
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct CacheEntry {
    /// Clé primaire (hash SHA1 de la clé de ressource)
    pub pk: String,
    /// Clé de ressource canonique (URL)
    pub resource_key: String,
    /// Type MIME des octets stockés
    pub mime_type: String,
    /// Date de dernière modification annoncée par la source, si connue
    pub last_modified: Option<DateTime<Utc>>,
    /// Date d'insertion (ou de dernière mise à jour) dans le cache
    pub inserted_at: DateTime<Utc>,
    /// Taille des octets stockés
    pub size: u64,
}

/// Base de données SQLite pour le cache
///
/// Gère les métadonnées des éléments en cache :
/// - Clés primaires (pk) et clés de ressource
/// - Type MIME, dates de modification et d'insertion
/// - Opérations CRUD de base
#[derive(Debug)]
pub struct DB {
    conn: Mutex<Connection>,
}

fn encode_time(time: &DateTime<Utc>) -> String {
    // Largeur fixe : l'ordre lexical suit l'ordre chronologique.
    // Précision complète : les dates de modification des fichiers locaux
    // sont à la nanoseconde.
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheEntry> {
    let last_modified: Option<String> = row.get(3)?;
    let inserted_at: String = row.get(4)?;
    let size: i64 = row.get(5)?;
    Ok(CacheEntry {
        pk: row.get(0)?,
        resource_key: row.get(1)?,
        mime_type: row.get(2)?,
        last_modified: last_modified.as_deref().and_then(decode_time),
        inserted_at: decode_time(&inserted_at).unwrap_or_default(),
        size: size.max(0) as u64,
    })
}

impl DB {
    /// Initialise (ou ouvre) la base de données et applique les migrations
    ///
    /// # Exemple
    ///
    /// ```rust,no_run
    /// use ppcache::db::DB;
    /// use std::path::Path;
    ///
    /// let db = DB::init(Path::new("cache.db")).unwrap();
    /// ```
    pub fn init(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Base en mémoire, sans persistance
    ///
    /// Sert de repli lorsque `cache.db` est inutilisable (fichier corrompu,
    /// schéma plus récent) : le cache reste fonctionnel pour la session.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn migrate(conn: &Connection) -> Result<()> {
        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version > SCHEMA_VERSION {
            return Err(CacheError::SchemaVersion {
                found: version,
                supported: SCHEMA_VERSION,
            });
        }

        if version < 1 {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    pk TEXT PRIMARY KEY,
                    resource_key TEXT NOT NULL UNIQUE,
                    mime_type TEXT NOT NULL,
                    last_modified TEXT,
                    inserted_at TEXT NOT NULL,
                    size INTEGER NOT NULL DEFAULT 0
                );
                CREATE INDEX IF NOT EXISTS idx_{table}_inserted_at ON {table} (inserted_at);",
                table = TABLE_NAME
            ))?;
            tracing::info!(from = version, to = SCHEMA_VERSION, "Migrated audio cache schema");
        }

        conn.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CacheError::Unavailable("cache database lock poisoned".into()))
    }

    /// Version du schéma actuellement appliquée
    pub fn schema_version(&self) -> Result<i32> {
        let conn = self.lock()?;
        Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    /// Ajoute ou met à jour une entrée (la dernière écriture gagne)
    pub fn upsert(&self, entry: &CacheEntry) -> Result<()> {
        let conn = self.lock()?;
        let sql = format!(
            "INSERT INTO {} (pk, resource_key, mime_type, last_modified, inserted_at, size)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(pk) DO UPDATE SET
                 resource_key = excluded.resource_key,
                 mime_type = excluded.mime_type,
                 last_modified = excluded.last_modified,
                 inserted_at = excluded.inserted_at,
                 size = excluded.size",
            TABLE_NAME
        );

        conn.execute(
            &sql,
            params![
                entry.pk,
                entry.resource_key,
                entry.mime_type,
                entry.last_modified.as_ref().map(encode_time),
                encode_time(&entry.inserted_at),
                entry.size as i64,
            ],
        )?;

        Ok(())
    }

    /// Récupère une entrée par sa clé de ressource
    pub fn get(&self, resource_key: &str) -> Result<Option<CacheEntry>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT pk, resource_key, mime_type, last_modified, inserted_at, size
             FROM {} WHERE resource_key = ?1",
            TABLE_NAME
        );

        Ok(conn.query_row(&sql, [resource_key], row_to_entry).optional()?)
    }

    /// Indique si une entrée existe pour cette clé de ressource
    pub fn contains(&self, resource_key: &str) -> Result<bool> {
        let conn = self.lock()?;
        let sql = format!("SELECT COUNT(*) FROM {} WHERE resource_key = ?1", TABLE_NAME);
        let count: i64 = conn.query_row(&sql, [resource_key], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Supprime une entrée de la base de données
    pub fn delete(&self, resource_key: &str) -> Result<()> {
        let conn = self.lock()?;
        let sql = format!("DELETE FROM {} WHERE resource_key = ?1", TABLE_NAME);
        conn.execute(&sql, [resource_key])?;
        Ok(())
    }

    /// Purge toutes les entrées de la base de données
    pub fn purge(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(&format!("DELETE FROM {}", TABLE_NAME), [])?;
        Ok(())
    }

    /// Compte le nombre total d'entrées dans le cache
    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let sql = format!("SELECT COUNT(*) FROM {}", TABLE_NAME);
        let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Récupère toutes les entrées, des plus anciennes aux plus récentes
    ///
    /// S'appuie sur l'index secondaire `inserted_at`.
    pub fn get_all_by_insertion(&self) -> Result<Vec<CacheEntry>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT pk, resource_key, mime_type, last_modified, inserted_at, size
             FROM {} ORDER BY inserted_at ASC, rowid ASC",
            TABLE_NAME
        );

        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map([], row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }
}
