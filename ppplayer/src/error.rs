//! Types d'erreurs pour ppplayer

/// Erreurs du moteur de lecture
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("No files selected")]
    EmptyPlaylist,

    #[error("Invalid playlist entry: {0}")]
    InvalidEntry(String),

    #[error("Playback unavailable: {0}")]
    PlaybackUnavailable(String),

    #[error("Fetch failed: {0}")]
    FetchFailed(#[from] ppcache::FetchError),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(#[from] ppcache::CacheError),

    #[error("Remote mirror is not configured")]
    MirrorDisabled,

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Player task stopped")]
    PlayerStopped,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Type Result spécialisé pour ppplayer
pub type Result<T> = std::result::Result<T, Error>;
