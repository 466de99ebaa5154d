//! Entrée de playlist : un fichier audio identifié par manuel/unité/section/nom

use serde::{Deserialize, Serialize};
use std::fmt;

/// Origine d'une entrée
///
/// Les entrées `Remote` sont servies par une autre origine : leurs octets ne
/// sont pas préchargés, elles sont lues en flux direct.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    #[default]
    Local,
    Remote,
}

/// Entrée immuable d'une playlist
///
/// Sérialisée sous la forme `{textbook, unit, section, file, source}` ;
/// `source` vaut `local` lorsqu'il est absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub textbook: String,
    pub unit: String,
    pub section: String,
    #[serde(rename = "file")]
    pub file_name: String,
    #[serde(default)]
    pub source: EntrySource,
}

impl PlaylistEntry {
    /// Crée une entrée locale
    pub fn new(
        textbook: impl Into<String>,
        unit: impl Into<String>,
        section: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            textbook: textbook.into(),
            unit: unit.into(),
            section: section.into(),
            file_name: file_name.into(),
            source: EntrySource::Local,
        }
    }

    /// Change l'origine de l'entrée
    pub fn with_source(mut self, source: EntrySource) -> Self {
        self.source = source;
        self
    }

    /// Les octets d'une entrée locale peuvent être mis en cache par préchargement
    pub fn is_cacheable(&self) -> bool {
        self.source == EntrySource::Local
    }

    /// Segments de chemin, dans l'ordre
    pub fn segments(&self) -> [&str; 4] {
        [&self.textbook, &self.unit, &self.section, &self.file_name]
    }
}

impl fmt::Display for PlaylistEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments().join("/"))
    }
}
