//! Audio output seam.
//!
//! The engine never decodes audio. It hands an [`AudioSource`] to an
//! [`AudioOutput`] implementation (a desktop sink, a web view bridge, a test
//! double) and listens to the [`OutputEvent`]s that implementation reports.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// What the output should play.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSource {
    /// Fully buffered bytes (cache hit or mirror download).
    Bytes { data: Bytes, mime_type: String },
    /// A URL the output streams by itself.
    Stream { url: String },
}

impl AudioSource {
    pub fn is_buffered(&self) -> bool {
        matches!(self, AudioSource::Bytes { .. })
    }
}

/// Where the loaded source came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOrigin {
    Cache,
    Mirror,
    Network,
}

/// Notifications emitted by the output, delivered to the player over an mpsc channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent {
    Playing,
    Paused,
    Ended,
}

/// The audio element.
///
/// `load` replaces the current source and fails when the source cannot be
/// opened. `pause` must take effect immediately: track switches rely on it to
/// silence the previous track before resolving the next one.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    async fn load(&self, source: AudioSource) -> Result<()>;

    async fn play(&self) -> Result<()>;

    fn pause(&self);

    /// Seek within the loaded source, in seconds.
    fn seek(&self, seconds: f64);

    /// Current position in seconds.
    fn position(&self) -> f64;

    fn set_rate(&self, rate: f32);

    /// True only while audio is actually audible (not paused, not ended).
    fn is_playing(&self) -> bool;
}
