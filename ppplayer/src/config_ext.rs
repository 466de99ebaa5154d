//! Extension de ppconfig pour le moteur de lecture
//!
//! Construit le séquenceur et ses dépendances (cache, fetcher, index, base
//! d'état) à partir de `ppconfig::Config`.

use crate::index::IndexSet;
use crate::output::AudioOutput;
use crate::persistence::StateStore;
use crate::resolver::Resolver;
use crate::sequencer::{CachePolicy, Sequencer, SequencerOptions, SpeedPolicy};
use anyhow::{Context, Result};
use async_trait::async_trait;
use ppcache::AudioCacheConfigExt;
use ppconfig::Config;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Nom du fichier de la base d'état
pub const STATE_DB_FILE: &str = "state.db";

/// Trait d'extension pour ppconfig::Config
#[async_trait]
pub trait PlayerConfigExt {
    /// Chemin de la base d'état (session et temps d'écoute)
    fn state_db_path(&self) -> Result<PathBuf>;

    /// Ouvre la base d'état
    fn create_state_store(&self) -> Result<Arc<StateStore>>;

    /// Résolveur d'URLs (base locale et miroir éventuel)
    fn resolver(&self) -> Result<Resolver>;

    /// Options du séquenceur (`player.*`)
    fn sequencer_options(&self) -> Result<SequencerOptions>;

    /// Période de sauvegarde automatique ; `None` si désactivée
    fn autosave_interval(&self) -> Result<Option<Duration>>;

    /// Charge l'index courant et l'index historique
    async fn load_index_set(&self) -> Result<IndexSet>;

    /// Construit un séquenceur complet pour la sortie audio donnée
    async fn build_sequencer(&self, output: Arc<dyn AudioOutput>) -> Result<Sequencer>;
}

#[async_trait]
impl PlayerConfigExt for Config {
    fn state_db_path(&self) -> Result<PathBuf> {
        let dir = self.get_state_dir()?;
        Ok(PathBuf::from(dir).join(STATE_DB_FILE))
    }

    fn create_state_store(&self) -> Result<Arc<StateStore>> {
        let path = self.state_db_path()?;
        tracing::info!(path = %path.display(), "Opening state database");
        Ok(Arc::new(StateStore::open(&path)?))
    }

    fn resolver(&self) -> Result<Resolver> {
        let resolver = Resolver::new(self.get_local_base()?);
        if !self.get_mirror_enabled()? {
            return Ok(resolver);
        }
        Ok(resolver.with_mirror(self.get_mirror_raw_base()?, self.get_mirror_api_base()?))
    }

    fn sequencer_options(&self) -> Result<SequencerOptions> {
        let cache_policy: CachePolicy = self
            .get_cache_policy()?
            .parse()
            .context("Invalid player.cache_policy")?;

        Ok(SequencerOptions {
            loop_count: self.get_loop_count()?.max(1),
            continuous: self.get_continuous_playback()?,
            lookahead: self.get_prefetch_lookahead()?,
            cache_policy,
            speed: SpeedPolicy {
                default_rate: self.get_default_rate()? as f32,
                legacy_rate: self.get_legacy_rate()? as f32,
            },
        })
    }

    fn autosave_interval(&self) -> Result<Option<Duration>> {
        let secs = self.get_autosave_interval_secs()?;
        Ok((secs > 0).then(|| Duration::from_secs(secs as u64)))
    }

    async fn load_index_set(&self) -> Result<IndexSet> {
        let current = self.get_index_path()?;
        let legacy = self.get_legacy_index_path()?;
        let set = IndexSet::load(&current, legacy.as_deref().map(Path::new))
            .await
            .with_context(|| format!("Cannot load index {}", current))?;
        Ok(set)
    }

    async fn build_sequencer(&self, output: Arc<dyn AudioOutput>) -> Result<Sequencer> {
        let cache = self.create_audio_cache()?;
        let fetcher = Arc::new(self.create_fetcher()?);
        let index = self.load_index_set().await?;

        Ok(Sequencer::builder(output, cache, fetcher)
            .resolver(self.resolver()?)
            .index(index)
            .state_store(self.create_state_store()?)
            .options(self.sequencer_options()?)
            .build()?)
    }
}
