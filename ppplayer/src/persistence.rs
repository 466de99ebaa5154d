//! Gestion de la persistance SQLite de l'état du lecteur
//!
//! Petit magasin clé → JSON, distinct du cache audio. Les clés sont fixes :
//! [`PLAYBACK_STATE_KEY`] et [`DAILY_PLAY_TIME_KEY`].

use crate::error::{Error, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Clé de l'état de session
pub const PLAYBACK_STATE_KEY: &str = "playbackState";

/// Clé du temps d'écoute quotidien
pub const DAILY_PLAY_TIME_KEY: &str = "dailyPlayTime";

fn persistence_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Persistence(format!("{}: {}", context, e))
}

/// Magasin d'enregistrements nommés
#[derive(Debug)]
pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    /// Ouvre (ou crée) la base d'état
    pub fn open(db_path: &Path) -> Result<Self> {
        // Créer le répertoire parent si nécessaire
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| persistence_error("Failed to create directory", e))?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| persistence_error("Failed to open database", e))?;
        Self::with_connection(conn)
    }

    /// Base en mémoire, pour les tests et les sessions éphémères
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| persistence_error("Failed to open database", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS records (
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| persistence_error("Failed to create records table", e))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Persistence("state database lock poisoned".into()))
    }

    /// Écrase l'enregistrement `name`
    pub fn put<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)
            .map_err(|e| persistence_error("Failed to encode record", e))?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO records (name, value, updated_at) VALUES (?1, ?2, ?3)",
            params![name, json, now],
        )
        .map_err(|e| persistence_error("Failed to save record", e))?;
        Ok(())
    }

    /// Lit la valeur JSON brute
    pub fn get_raw(&self, name: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM records WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| persistence_error("Failed to load record", e))
    }

    /// Lit et décode l'enregistrement `name`
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.get_raw(name)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| persistence_error("Failed to decode record", e)),
            None => Ok(None),
        }
    }

    /// Supprime l'enregistrement `name`
    pub fn remove(&self, name: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM records WHERE name = ?1", params![name])
            .map_err(|e| persistence_error("Failed to delete record", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_put_get_remove() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get::<Value>("missing").unwrap().is_none());

        store.put("k", &json!({"a": 1})).unwrap();
        store.put("k", &json!({"a": 2})).unwrap();
        assert_eq!(store.get::<Value>("k").unwrap(), Some(json!({"a": 2})));

        store.remove("k").unwrap();
        assert!(store.get_raw("k").unwrap().is_none());
    }

    #[test]
    fn test_undecodable_record_is_an_error() {
        let store = StateStore::open_in_memory().unwrap();
        store.put("k", &"text").unwrap();
        assert!(matches!(store.get::<Vec<u8>>("k"), Err(Error::Persistence(_))));
    }

    #[test]
    fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        StateStore::open(&path).unwrap().put("k", &42).unwrap();
        let reopened = StateStore::open(&path).unwrap();
        assert_eq!(reopened.get::<i32>("k").unwrap(), Some(42));
    }
}
