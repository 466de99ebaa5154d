//! # ppcache - Cache audio persistant pour Pitter-Patter
//!
//! Cette crate fournit le stockage local des enregistrements audio du lecteur
//! et la couche de téléchargement qui les alimente.
//!
//! ## Vue d'ensemble
//!
//! - Un enregistrement associe une clé de ressource (URL canonique) à des
//!   octets audio, un type MIME, une date de modification et une date
//!   d'insertion.
//! - Les métadonnées sont conservées dans SQLite, les octets dans un fichier
//!   `{pk}.orig.bin` par enregistrement.
//! - Les lectures ne renvoient jamais d'erreur : tout problème de stockage
//!   est journalisé et traité comme un défaut de cache.
//! - Aucune éviction automatique ; la suppression est explicite.
//!
//! ## Architecture
//!
//! ```text
//! ppcache
//!     ├── db.rs        - Métadonnées SQLite (schéma versionné)
//!     ├── cache.rs     - AudioCache : octets + métadonnées
//!     └── download.rs  - Fetcher : fichiers locaux, HTTP, API du miroir
//! ```
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use ppcache::{AudioCache, CacheMetadata};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = AudioCache::new("./cache_audio")?;
//!
//!     let key = "audio/Book1/Unit1/Section%20A/01.mp3";
//!     cache
//!         .put(
//!             key,
//!             Bytes::from_static(b"ID3"),
//!             CacheMetadata {
//!                 mime_type: "audio/mpeg".into(),
//!                 last_modified: None,
//!             },
//!         )
//!         .await?;
//!
//!     if let Some(record) = cache.get(key).await {
//!         println!("{} octets ({})", record.bytes.len(), record.mime_type);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod db;
pub mod download;
pub mod error;

#[cfg(feature = "ppconfig")]
pub mod config_ext;

pub use cache::{pk_from_url, AudioCache, CacheMetadata, CacheRecord, RecordMetadata};
pub use db::{CacheEntry, DB};
pub use download::{decode_mirror_payload, mime_type_for, Fetched, Fetcher, HttpFetcher};
pub use error::{CacheError, FetchError, Result};

#[cfg(feature = "ppconfig")]
pub use config_ext::AudioCacheConfigExt;
