//! Résolution des URLs candidates d'une entrée
//!
//! Fonction pure : aucun accès réseau ni cache. Chaque segment est encodé
//! (`urlencoding`) pour qu'un nom contenant des espaces reste une URL valide.

use crate::entry::{EntrySource, PlaylistEntry};
use crate::error::{Error, Result};

/// URL par défaut du serveur local
pub const DEFAULT_LOCAL_BASE: &str = "audio";

/// Type de source demandé
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// `{local_base}/{textbook}/{unit}/{section}/{file}`
    Local,
    /// `{raw_base}/{textbook}/{unit}/{section}/{file}` sur le miroir
    RemoteRaw,
    /// `{api_base}/{textbook}/{unit}/{section}/{file}` (réponse `{content, encoding}`)
    RemoteApi,
}

/// Bases du miroir distant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorConfig {
    pub raw_base: String,
    pub api_base: String,
}

/// Résolveur d'URLs
///
/// ```
/// use ppplayer::{PlaylistEntry, Resolver, SourceKind};
///
/// let resolver = Resolver::new("audio")
///     .with_mirror("https://mirror.example/raw", "https://mirror.example/api/contents");
/// let entry = PlaylistEntry::new("Book1", "Unit 1", "A", "01.mp3");
///
/// assert_eq!(
///     resolver.resolve(&entry, SourceKind::Local).unwrap(),
///     "audio/Book1/Unit%201/A/01.mp3"
/// );
/// assert_eq!(
///     resolver.resolve(&entry, SourceKind::RemoteApi).unwrap(),
///     "https://mirror.example/api/contents/Book1/Unit%201/A/01.mp3"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolver {
    local_base: String,
    mirror: Option<MirrorConfig>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_BASE)
    }
}

fn join(base: &str, entry: &PlaylistEntry) -> Result<String> {
    let mut url = base.trim_end_matches('/').to_string();
    for segment in entry.segments() {
        let segment = segment.trim();
        if segment.is_empty() {
            return Err(Error::InvalidEntry(format!(
                "empty path segment in {:?}",
                entry.to_string()
            )));
        }
        if !url.is_empty() {
            url.push('/');
        }
        url.push_str(&urlencoding::encode(segment));
    }
    Ok(url)
}

impl Resolver {
    pub fn new(local_base: impl Into<String>) -> Self {
        Self {
            local_base: local_base.into(),
            mirror: None,
        }
    }

    /// Active le miroir distant ; des bases vides le laissent désactivé
    pub fn with_mirror(mut self, raw_base: impl Into<String>, api_base: impl Into<String>) -> Self {
        let raw_base = raw_base.into();
        let api_base = api_base.into();
        self.mirror = if raw_base.trim().is_empty() && api_base.trim().is_empty() {
            None
        } else {
            Some(MirrorConfig { raw_base, api_base })
        };
        self
    }

    pub fn local_base(&self) -> &str {
        &self.local_base
    }

    pub fn mirror(&self) -> Option<&MirrorConfig> {
        self.mirror.as_ref()
    }

    pub fn mirror_enabled(&self) -> bool {
        self.mirror.is_some()
    }

    /// Calcule l'URL d'une entrée pour un type de source
    pub fn resolve(&self, entry: &PlaylistEntry, kind: SourceKind) -> Result<String> {
        let base = match kind {
            SourceKind::Local => self.local_base.as_str(),
            SourceKind::RemoteRaw => self.mirror_base(|m| &m.raw_base)?,
            SourceKind::RemoteApi => self.mirror_base(|m| &m.api_base)?,
        };
        join(base, entry)
    }

    /// Clé de cache canonique : URL locale, ou URL brute du miroir pour une entrée distante
    pub fn resource_key(&self, entry: &PlaylistEntry) -> Result<String> {
        match entry.source {
            EntrySource::Local => self.resolve(entry, SourceKind::Local),
            EntrySource::Remote => self.resolve(entry, SourceKind::RemoteRaw),
        }
    }

    fn mirror_base(&self, pick: impl Fn(&MirrorConfig) -> &String) -> Result<&str> {
        match &self.mirror {
            Some(mirror) if !pick(mirror).trim().is_empty() => Ok(pick(mirror).as_str()),
            _ => Err(Error::MirrorDisabled),
        }
    }
}
