//! Index des fichiers audio : manuel → unité → section → fichiers
//!
//! L'ordre des clés est celui du document JSON. Une section est soit un
//! tableau de noms, soit un objet `{files: [...]}` (ancien format) ; les deux
//! formes sont normalisées en [`Section`] au chargement.

use crate::entry::{EntrySource, PlaylistEntry};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSection {
    Files(Vec<String>),
    Object {
        #[serde(default)]
        files: Vec<String>,
    },
}

/// Section normalisée : liste ordonnée de noms de fichiers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawSection")]
pub struct Section {
    pub files: Vec<String>,
}

impl From<RawSection> for Section {
    fn from(raw: RawSection) -> Self {
        match raw {
            RawSection::Files(files) | RawSection::Object { files } => Section { files },
        }
    }
}

type Units = IndexMap<String, IndexMap<String, Section>>;

/// Index hiérarchique des fichiers
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Index {
    textbooks: IndexMap<String, Units>,
}

impl Index {
    /// Décode un index JSON (les deux formes de section sont acceptées)
    pub fn from_json(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).map_err(|e| Error::Index(e.to_string()))
    }

    /// Charge un index depuis un fichier
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read(path)
            .await
            .map_err(|e| Error::Index(format!("{}: {}", path.display(), e)))?;
        let index = Self::from_json(&raw)?;
        tracing::debug!(path = %path.display(), textbooks = index.textbooks.len(), "Loaded index");
        Ok(index)
    }

    pub fn textbooks(&self) -> impl Iterator<Item = &str> {
        self.textbooks.keys().map(String::as_str)
    }

    pub fn units(&self, textbook: &str) -> impl Iterator<Item = &str> {
        self.textbooks
            .get(textbook)
            .into_iter()
            .flat_map(|units| units.keys().map(String::as_str))
    }

    pub fn sections(&self, textbook: &str, unit: &str) -> impl Iterator<Item = &str> {
        self.textbooks
            .get(textbook)
            .and_then(|units| units.get(unit))
            .into_iter()
            .flat_map(|sections| sections.keys().map(String::as_str))
    }

    pub fn section(&self, textbook: &str, unit: &str, section: &str) -> Option<&Section> {
        self.textbooks.get(textbook)?.get(unit)?.get(section)
    }

    /// Indique si l'index liste le fichier de cette entrée
    pub fn contains(&self, entry: &PlaylistEntry) -> bool {
        self.section(&entry.textbook, &entry.unit, &entry.section)
            .map(|s| s.files.iter().any(|f| *f == entry.file_name))
            .unwrap_or(false)
    }

    /// Section suivant `section` dans la même unité, dans l'ordre du document
    pub fn next_section(&self, textbook: &str, unit: &str, section: &str) -> Option<(&str, &Section)> {
        let sections = self.textbooks.get(textbook)?.get(unit)?;
        let position = sections.get_index_of(section)?;
        sections
            .get_index(position + 1)
            .map(|(name, section)| (name.as_str(), section))
    }

    /// Toutes les entrées d'une section, dans l'ordre
    pub fn entries(&self, textbook: &str, unit: &str, section: &str) -> Vec<PlaylistEntry> {
        self.section(textbook, unit, section)
            .map(|s| {
                s.files
                    .iter()
                    .map(|file| {
                        PlaylistEntry::new(textbook, unit, section, file.as_str())
                            .with_source(EntrySource::Local)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Index courant et index historique optionnel
///
/// L'index historique ne sert qu'à choisir la vitesse de lecture par défaut.
#[derive(Debug, Clone, Default)]
pub struct IndexSet {
    current: Index,
    legacy: Option<Index>,
}

impl IndexSet {
    pub fn new(current: Index, legacy: Option<Index>) -> Self {
        Self { current, legacy }
    }

    /// Charge les deux index ; un index historique illisible est ignoré
    pub async fn load(current: impl AsRef<Path>, legacy: Option<&Path>) -> Result<Self> {
        let current = Index::load(current).await?;
        let legacy = match legacy {
            Some(path) => match Index::load(path).await {
                Ok(index) => Some(index),
                Err(e) => {
                    tracing::warn!("Legacy index unavailable, ignoring: {}", e);
                    None
                }
            },
            None => None,
        };
        Ok(Self { current, legacy })
    }

    pub fn current(&self) -> &Index {
        &self.current
    }

    pub fn legacy(&self) -> Option<&Index> {
        self.legacy.as_ref()
    }

    /// L'entrée figure-t-elle dans l'index historique ?
    pub fn is_legacy(&self, entry: &PlaylistEntry) -> bool {
        self.legacy
            .as_ref()
            .map(|index| index.contains(entry))
            .unwrap_or(false)
    }

    /// Vrai si la playlist est non vide et entièrement historique
    pub fn all_legacy(&self, entries: &[PlaylistEntry]) -> bool {
        !entries.is_empty() && entries.iter().all(|e| self.is_legacy(e))
    }
}
