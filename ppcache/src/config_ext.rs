//! Extension pour intégrer le cache audio dans ppconfig
//!
//! Ce module fournit le trait `AudioCacheConfigExt` qui construit le cache et
//! la couche de téléchargement à partir de `ppconfig::Config`.

use crate::cache::AudioCache;
use crate::download::HttpFetcher;
use anyhow::Result;
use ppconfig::Config;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Trait d'extension pour créer le cache audio depuis ppconfig
///
/// # Exemple
///
/// ```rust,ignore
/// use ppconfig::get_config;
/// use ppcache::AudioCacheConfigExt;
///
/// let config = get_config();
/// let cache = config.create_audio_cache()?;
/// let fetcher = config.create_fetcher()?;
/// ```
pub trait AudioCacheConfigExt {
    /// Crée le cache audio dans le répertoire `host.audio_cache.directory`
    fn create_audio_cache(&self) -> Result<Arc<AudioCache>>;

    /// Crée le fetcher HTTP
    ///
    /// Les URLs relatives sont lues sous le répertoire de configuration,
    /// qui joue le rôle de serveur de fichiers statiques.
    fn create_fetcher(&self) -> Result<HttpFetcher>;
}

impl AudioCacheConfigExt for Config {
    fn create_audio_cache(&self) -> Result<Arc<AudioCache>> {
        let dir = match self.get_audio_cache_dir() {
            Ok(dir) => PathBuf::from(dir),
            Err(e) => {
                // Repli sur un répertoire temporaire
                let fallback = std::env::temp_dir().join("pitter-audio-cache");
                tracing::warn!(
                    fallback = %fallback.display(),
                    "Audio cache directory unavailable: {}",
                    e
                );
                fallback
            }
        };
        tracing::info!(directory = %dir.display(), "Opening audio cache");
        Ok(Arc::new(AudioCache::new(dir)?))
    }

    fn create_fetcher(&self) -> Result<HttpFetcher> {
        let timeout = self.get_fetch_timeout_secs()?.max(1) as u64;
        Ok(HttpFetcher::builder()
            .timeout(Duration::from_secs(timeout))
            .local_root(self.directory())
            .build()?)
    }
}
