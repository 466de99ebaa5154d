//! Types d'erreurs pour ppcache

/// Erreurs du cache persistant
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Unsupported cache schema version {found} (expected at most {supported})")]
    SchemaVersion { found: i32, supported: i32 },

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Erreurs de téléchargement (réseau, fichiers locaux, miroir distant)
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid mirror payload: {0}")]
    InvalidPayload(String),

    #[error("Base64 decoding failed: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("No local root configured for relative URL {0}")]
    NoLocalRoot(String),
}

/// Type Result spécialisé pour ppcache
pub type Result<T> = std::result::Result<T, CacheError>;
