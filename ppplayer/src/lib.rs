//! # ppplayer - Moteur de lecture de Pitter-Patter
//!
//! Cette crate séquence la lecture d'enregistrements audio pédagogiques :
//! - Playlist de fichiers d'une section (manuel / unité / section)
//! - Répétition de chaque fichier N fois, puis passage au suivant
//! - Lecture continue optionnelle vers la section suivante de l'unité
//! - Résolution des sources : cache, miroir distant, flux direct
//! - Préchargement des fichiers suivants en arrière-plan
//! - Sauvegarde de session valable pour la journée
//! - Cumul du temps d'écoute quotidien
//!
//! # Architecture
//!
//! - **Sequencer** : machine d'états de lecture, propriétaire de la playlist
//! - **Player** / **PlayerHandle** : tâche tokio qui possède le séquenceur et
//!   reçoit commandes et événements de la sortie audio
//! - **AudioOutput** : trait implémenté par l'élément audio réel
//! - **Resolver** : construction des URLs (locale, miroir brut, API miroir)
//! - **Prefetcher** : remplissage du cache `ppcache` en tâche de fond
//! - **SessionStore** / **PlayTimeTracker** : persistance SQLite
//!
//! # Exemple
//!
//! ```
//! use ppplayer::{Index, PlaylistEntry, Resolver, SourceKind};
//!
//! let index = Index::from_json(br#"{"Book 1": {"Unit 1": {"Section A": ["01.mp3", "02.mp3"]}}}"#)?;
//! let playlist = index.entries("Book 1", "Unit 1", "Section A");
//! assert_eq!(playlist.len(), 2);
//!
//! let resolver = Resolver::default();
//! let url = resolver.resolve(&playlist[0], SourceKind::Local)?;
//! assert_eq!(url, "audio/Book%201/Unit%201/Section%20A/01.mp3");
//! # Ok::<(), ppplayer::Error>(())
//! ```
//!
//! Restauration de la session du jour :
//!
//! ```
//! use ppplayer::{SessionStore, StateStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(StateStore::open_in_memory()?);
//! let sessions = SessionStore::new(store);
//! assert!(sessions.load().is_none());
//! # Ok::<(), ppplayer::Error>(())
//! ```
//!
//! Câblage complet à partir de la configuration :
//!
//! ```no_run
//! # #[cfg(feature = "ppconfig")]
//! # fn wire(output: std::sync::Arc<dyn ppplayer::AudioOutput>) -> ppplayer::Result<()> {
//! use ppplayer::{Player, PlayerConfigExt};
//! use std::time::Duration;
//!
//! tokio_test::block_on(async {
//!     let config = ppconfig::get_config();
//!     let sequencer = config.build_sequencer(output).await?;
//!     let (_events_tx, events_rx) = tokio::sync::mpsc::channel(16);
//!     let (player, _task) = Player::spawn(sequencer, events_rx, Some(Duration::from_secs(5)));
//!
//!     let index = config.load_index_set().await?;
//!     let playlist = index.current().entries("Book 1", "Unit 1", "Section A");
//!     player.start(playlist, 3).await?;
//!     player.shutdown().await?;
//!     Ok::<(), ppplayer::Error>(())
//! })
//! # }
//! ```

pub mod entry;
pub mod error;
pub mod events;
pub mod index;
pub mod logging;
pub mod output;
pub mod persistence;
pub mod player;
pub mod playtime;
pub mod prefetch;
pub mod resolver;
pub mod sequencer;
pub mod session;

#[cfg(feature = "ppconfig")]
pub mod config_ext;

// Réexports publics
pub use entry::{EntrySource, PlaylistEntry};
pub use error::{Error, Result};
pub use events::{PlayerEvent, Selection};
pub use index::{Index, IndexSet, Section};
pub use logging::init_tracing;
pub use output::{AudioOutput, AudioSource, OutputEvent, SourceOrigin};
pub use persistence::StateStore;
pub use player::{Player, PlayerCommand, PlayerHandle};
pub use playtime::{format_hms, DailyPlayTime, PlayTimeTracker};
pub use prefetch::Prefetcher;
pub use resolver::{MirrorConfig, Resolver, SourceKind};
pub use sequencer::{
    CachePolicy, PlaybackCursor, PlaybackState, PlayerSnapshot, Sequencer, SequencerBuilder,
    SequencerOptions, SpeedPolicy,
};
pub use session::{apply as apply_session, SessionState, SessionStore, SessionUi};

#[cfg(feature = "ppconfig")]
pub use config_ext::PlayerConfigExt;
