//! Sauvegarde et restauration de la session de lecture
//!
//! La session est un enregistrement unique, réécrit à chaque transition. Elle
//! n'est valable que le jour où elle a été écrite : un enregistrement d'un
//! autre jour est supprimé à la lecture.

use crate::entry::PlaylistEntry;
use crate::error::Result;
use crate::persistence::{StateStore, PLAYBACK_STATE_KEY};
use crate::sequencer::Sequencer;
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Date locale du jour
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn default_loop_count() -> usize {
    1
}

fn default_rate() -> f32 {
    1.0
}

/// État de session persisté
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    #[serde(default)]
    pub textbook: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub selected_files: Vec<PlaylistEntry>,
    #[serde(rename = "currentFileIdx", default)]
    pub current_index: usize,
    #[serde(rename = "currentTime", default)]
    pub current_offset_seconds: f64,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default = "default_loop_count")]
    pub loop_count: usize,
    #[serde(default = "default_rate")]
    pub playback_rate: f32,
    #[serde(rename = "date")]
    pub saved_on_date: NaiveDate,
}

impl SessionState {
    /// L'enregistrement date-t-il d'aujourd'hui ?
    pub fn is_current(&self) -> bool {
        self.saved_on_date == today()
    }
}

/// Magasin de la session (singleton `playbackState`)
#[derive(Debug, Clone)]
pub struct SessionStore {
    store: Arc<StateStore>,
}

impl SessionStore {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Écrase la session, datée d'aujourd'hui
    pub fn save(&self, state: &SessionState) -> Result<()> {
        let mut stamped = state.clone();
        stamped.saved_on_date = today();
        self.store.put(PLAYBACK_STATE_KEY, &stamped)
    }

    /// Lit la session du jour
    ///
    /// Absente si aucun enregistrement n'existe, s'il est illisible, ou s'il
    /// date d'un autre jour (il est alors supprimé).
    pub fn load(&self) -> Option<SessionState> {
        let state = match self.store.get::<SessionState>(PLAYBACK_STATE_KEY) {
            Ok(Some(state)) => state,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Ignoring unreadable playback state: {}", e);
                return None;
            }
        };

        if state.is_current() {
            return Some(state);
        }

        tracing::info!(saved_on = %state.saved_on_date, "Discarding expired playback state");
        if let Err(e) = self.store.remove(PLAYBACK_STATE_KEY) {
            tracing::warn!("Failed to remove expired playback state: {}", e);
        }
        None
    }

    pub fn clear(&self) -> Result<()> {
        self.store.remove(PLAYBACK_STATE_KEY)
    }
}

/// Interface de sélection (menus déroulants et cases à cocher)
pub trait SessionUi: Send {
    /// Sélectionne manuel/unité/section ; faux si l'un d'eux n'est plus proposé
    fn select_context(&mut self, textbook: &str, unit: &str, section: &str) -> bool;

    /// Coche les fichiers de la playlist
    fn mark_selected(&mut self, files: &[PlaylistEntry]);

    fn set_loop_count(&mut self, loop_count: usize);

    /// Met en évidence le fichier courant
    fn highlight(&mut self, _entry: Option<&PlaylistEntry>) {}
}

/// Applique une session restaurée à l'interface et au séquenceur
///
/// Si la session était en lecture, le séquenceur est réarmé sur l'entrée et
/// la position sauvegardées, sans démarrer l'audio : la reprise demande une
/// action explicite de l'utilisateur.
///
/// # Returns
///
/// `false` si le contexte sauvegardé n'est plus disponible
pub async fn apply(
    state: &SessionState,
    ui: &mut dyn SessionUi,
    sequencer: &mut Sequencer,
) -> Result<bool> {
    if !ui.select_context(&state.textbook, &state.unit, &state.section) {
        tracing::info!(
            textbook = %state.textbook,
            unit = %state.unit,
            section = %state.section,
            "Saved selection is no longer available"
        );
        return Ok(false);
    }

    if state.selected_files.is_empty() {
        sequencer.change_selection(&state.textbook, &state.unit, &state.section);
        return Ok(true);
    }

    ui.mark_selected(&state.selected_files);
    ui.set_loop_count(state.loop_count.max(1));

    sequencer.restore(state).await?;

    if state.is_playing {
        ui.highlight(state.selected_files.get(state.current_index));
    }
    Ok(true)
}
