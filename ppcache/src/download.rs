//! Couche de téléchargement : serveur local, réseau et miroir distant
//!
//! Le trait [`Fetcher`] abstrait la récupération d'octets pour que le cache
//! et le lecteur puissent être testés sans réseau. [`HttpFetcher`] en est
//! l'implémentation par défaut : les URLs absolues `http(s)://` passent par
//! `reqwest`, les chemins relatifs sont lus sous une racine locale (le
//! serveur de fichiers statiques "même origine").

use crate::error::FetchError;
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, LAST_MODIFIED};
use reqwest::Client;
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_USER_AGENT: &str = concat!("ppcache/", env!("CARGO_PKG_VERSION"));
const DEFAULT_MIME_TYPE: &str = "audio/mpeg";

/// Octets récupérés depuis une source, avec leurs métadonnées
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Bytes,
    pub mime_type: String,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Source d'octets (HTTP, fichier local, mock de test)
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Télécharge une ressource complète
    async fn get_bytes(&self, url: &str) -> Result<Fetched, FetchError>;

    /// Télécharge et décode une réponse JSON
    async fn get_json(&self, url: &str) -> Result<Value, FetchError>;

    /// Requête légère (HEAD) exposant la date `Last-Modified` de la ressource
    async fn head_last_modified(&self, url: &str) -> Result<Option<DateTime<Utc>>, FetchError>;
}

/// Déduit le type MIME d'un nom de fichier audio
///
/// ```
/// use ppcache::download::mime_type_for;
///
/// assert_eq!(mime_type_for("lesson-01.WAV"), "audio/wav");
/// assert_eq!(mime_type_for("no_extension"), "audio/mpeg");
/// ```
pub fn mime_type_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "m4a" => "audio/mp4",
        _ => DEFAULT_MIME_TYPE,
    }
}

/// Décode la réponse de l'API de contenu du miroir (`{content, encoding}`)
///
/// Le contenu base64 peut être découpé en lignes ; les blancs sont ignorés.
pub fn decode_mirror_payload(payload: &Value, file_name: &str) -> Result<Fetched, FetchError> {
    let content = payload
        .get("content")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| FetchError::InvalidPayload("missing content field".into()))?;

    let cleaned: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD.decode(cleaned)?;

    let mime_type = match payload.get("encoding").and_then(Value::as_str) {
        Some("base64") => mime_type_for(file_name),
        _ => DEFAULT_MIME_TYPE,
    };

    Ok(Fetched {
        bytes: Bytes::from(bytes),
        mime_type: mime_type.to_string(),
        last_modified: None,
    })
}

fn parse_http_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Implémentation HTTP + fichiers locaux de [`Fetcher`]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    local_root: Option<PathBuf>,
}

impl HttpFetcher {
    /// Crée un fetcher avec les réglages par défaut
    pub fn new() -> Result<Self, FetchError> {
        Self::builder().build()
    }

    /// Crée un builder pour configurer le fetcher
    pub fn builder() -> HttpFetcherBuilder {
        HttpFetcherBuilder::default()
    }

    /// Racine utilisée pour les URLs relatives
    pub fn local_root(&self) -> Option<&PathBuf> {
        self.local_root.as_ref()
    }

    fn local_path(&self, url: &str) -> Result<PathBuf, FetchError> {
        let root = self
            .local_root
            .as_ref()
            .ok_or_else(|| FetchError::NoLocalRoot(url.to_string()))?;
        let relative = urlencoding::decode(url.trim_start_matches('/'))
            .map_err(|e| FetchError::InvalidPayload(format!("{}: {}", url, e)))?;

        // Le chemin décodé doit rester sous la racine locale
        let relative = Path::new(relative.as_ref());
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(FetchError::InvalidPayload(format!(
                "{}: path escapes the local root",
                url
            )));
        }
        Ok(root.join(relative))
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> Result<reqwest::Response, FetchError> {
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get_bytes(&self, url: &str) -> Result<Fetched, FetchError> {
        if !is_remote(url) {
            let path = self.local_path(url)?;
            let bytes = tokio::fs::read(&path).await?;
            let last_modified = tokio::fs::metadata(&path)
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from);
            tracing::debug!(url, path = %path.display(), size = bytes.len(), "Read local resource");
            return Ok(Fetched {
                bytes: Bytes::from(bytes),
                mime_type: mime_type_for(url).to_string(),
                last_modified,
            });
        }

        let response = self.send(self.client.get(url), url).await?;

        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date);
        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|ct| ct.starts_with("audio/"))
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_string())
            .unwrap_or_else(|| mime_type_for(url).to_string());

        let bytes = response.bytes().await?;
        tracing::debug!(url, size = bytes.len(), "Downloaded resource");

        Ok(Fetched {
            bytes,
            mime_type,
            last_modified,
        })
    }

    async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        if !is_remote(url) {
            let bytes = tokio::fs::read(self.local_path(url)?).await?;
            return serde_json::from_slice(&bytes)
                .map_err(|e| FetchError::InvalidPayload(e.to_string()));
        }
        let response = self.send(self.client.get(url), url).await?;
        Ok(response.json::<Value>().await?)
    }

    async fn head_last_modified(&self, url: &str) -> Result<Option<DateTime<Utc>>, FetchError> {
        if !is_remote(url) {
            let metadata = tokio::fs::metadata(self.local_path(url)?).await?;
            return Ok(metadata.modified().ok().map(DateTime::<Utc>::from));
        }
        let response = self.send(self.client.head(url), url).await?;
        Ok(response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date))
    }
}

/// Builder pour [`HttpFetcher`]
#[derive(Debug)]
pub struct HttpFetcherBuilder {
    client: Option<Client>,
    timeout: Duration,
    user_agent: String,
    local_root: Option<PathBuf>,
}

impl Default for HttpFetcherBuilder {
    fn default() -> Self {
        Self {
            client: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            local_root: None,
        }
    }
}

impl HttpFetcherBuilder {
    /// Utilise un client reqwest existant (le timeout est alors ignoré)
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Timeout appliqué à chaque requête
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// En-tête User-Agent
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Racine des fichiers servis localement (URLs relatives)
    pub fn local_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.local_root = Some(root.into());
        self
    }

    pub fn build(self) -> Result<HttpFetcher, FetchError> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .user_agent(&self.user_agent)
                .timeout(self.timeout)
                .build()?,
        };

        Ok(HttpFetcher {
            client,
            local_root: self.local_root,
        })
    }
}
