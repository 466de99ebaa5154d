use crate::entry::PlaylistEntry;
use crate::output::SourceOrigin;
use serde::Serialize;

/// Textbook / unit / section currently selected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub textbook: String,
    pub unit: String,
    pub section: String,
}

impl Selection {
    pub fn new(textbook: impl Into<String>, unit: impl Into<String>, section: impl Into<String>) -> Self {
        Self {
            textbook: textbook.into(),
            unit: unit.into(),
            section: section.into(),
        }
    }

    pub fn of(entry: &PlaylistEntry) -> Self {
        Self::new(&entry.textbook, &entry.unit, &entry.section)
    }

    pub fn is_empty(&self) -> bool {
        self.textbook.is_empty()
    }
}

/// Notifications broadcast to every subscriber of the player.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerEvent {
    TrackStarted {
        index: usize,
        entry: PlaylistEntry,
        origin: SourceOrigin,
    },
    Looped {
        index: usize,
        loop_index: usize,
    },
    SectionContinued {
        section: String,
        files: usize,
    },
    PlaybackUnavailable {
        index: usize,
        entry: PlaylistEntry,
    },
    Paused {
        index: usize,
    },
    Resumed {
        index: usize,
    },
    /// A restored session loaded its entry without starting audio.
    Rearmed {
        index: usize,
        offset_seconds: f64,
    },
    SelectionChanged {
        selection: Selection,
    },
    Exhausted,
}
