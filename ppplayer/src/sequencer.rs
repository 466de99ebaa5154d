//! Playback sequencer.
//!
//! Owns the playlist and the cursor, decides where each entry's bytes come
//! from and drives the [`AudioOutput`]. A single task owns the sequencer (see
//! [`crate::player`]), so no state here is shared.
//!
//! Source resolution for an entry, each step only tried when the previous one
//! is unavailable or fails:
//!
//! 1. cache hit under the entry's resource key;
//! 2. mirror content API, written back to the cache;
//! 3. direct stream of the resource URL, cached in the background under
//!    [`CachePolicy::CacheOnPlay`].

use crate::entry::PlaylistEntry;
use crate::error::{Error, Result};
use crate::events::{PlayerEvent, Selection};
use crate::index::IndexSet;
use crate::output::{AudioOutput, AudioSource, SourceOrigin};
use crate::persistence::StateStore;
use crate::playtime::PlayTimeTracker;
use crate::prefetch::{Prefetcher, DEFAULT_LOOKAHEAD};
use crate::resolver::{Resolver, SourceKind};
use crate::session::{today, SessionState, SessionStore};
use ppcache::{decode_mirror_payload, AudioCache, Fetched, Fetcher};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Playing,
    Looping,
    Advancing,
    Paused,
    /// Terminal idle state: the playlist ran out and nothing continued it.
    Exhausted,
}

/// Whether bytes streamed straight from the network are cached afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    #[default]
    CacheOnPlay,
    NoCacheFromNetwork,
}

impl FromStr for CachePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cache_on_play" => Ok(CachePolicy::CacheOnPlay),
            "no_cache_from_network" => Ok(CachePolicy::NoCacheFromNetwork),
            other => Err(Error::Other(anyhow::anyhow!("unknown cache policy '{}'", other))),
        }
    }
}

/// Default playback rate heuristic.
///
/// Content that is entirely listed in the legacy index plays at
/// `legacy_rate`; anything else starts at `default_rate`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedPolicy {
    pub default_rate: f32,
    pub legacy_rate: f32,
}

impl Default for SpeedPolicy {
    fn default() -> Self {
        Self {
            default_rate: 0.75,
            legacy_rate: 1.0,
        }
    }
}

impl SpeedPolicy {
    pub fn rate_for(&self, index: &IndexSet, playlist: &[PlaylistEntry]) -> f32 {
        if index.all_legacy(playlist) {
            self.legacy_rate
        } else {
            self.default_rate
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequencerOptions {
    pub loop_count: usize,
    pub continuous: bool,
    pub lookahead: usize,
    pub cache_policy: CachePolicy,
    pub speed: SpeedPolicy,
}

impl Default for SequencerOptions {
    fn default() -> Self {
        Self {
            loop_count: 1,
            continuous: false,
            lookahead: DEFAULT_LOOKAHEAD,
            cache_policy: CachePolicy::default(),
            speed: SpeedPolicy::default(),
        }
    }
}

/// `file_index == playlist.len()` marks an exhausted playlist.
/// `loop_index` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlaybackCursor {
    pub file_index: usize,
    pub loop_index: usize,
    pub is_playing: bool,
}

impl Default for PlaybackCursor {
    fn default() -> Self {
        Self {
            file_index: 0,
            loop_index: 1,
            is_playing: false,
        }
    }
}

/// Read-only view of the sequencer, for UIs and tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerSnapshot {
    pub state: PlaybackState,
    pub selection: Selection,
    pub playlist: Vec<PlaylistEntry>,
    pub cursor: PlaybackCursor,
    pub loop_count: usize,
    pub playback_rate: f32,
    pub continuous: bool,
    pub play_time_seconds: f64,
}

pub struct Sequencer {
    output: Arc<dyn AudioOutput>,
    prefetcher: Prefetcher,
    index: Arc<IndexSet>,
    session: SessionStore,
    playtime: PlayTimeTracker,
    events: broadcast::Sender<PlayerEvent>,
    options: SequencerOptions,

    selection: Selection,
    playlist: Vec<PlaylistEntry>,
    cursor: PlaybackCursor,
    loop_count: usize,
    playback_rate: f32,
    state: PlaybackState,
    loaded: Option<SourceOrigin>,
}

pub struct SequencerBuilder {
    output: Arc<dyn AudioOutput>,
    cache: Arc<AudioCache>,
    fetcher: Arc<dyn Fetcher>,
    resolver: Resolver,
    index: Option<Arc<IndexSet>>,
    state_store: Option<Arc<StateStore>>,
    options: SequencerOptions,
    playtime_tick: Option<Duration>,
}

impl SequencerBuilder {
    pub fn resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn index(mut self, index: impl Into<Arc<IndexSet>>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn state_store(mut self, store: Arc<StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    pub fn options(mut self, options: SequencerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn playtime_tick(mut self, tick: Duration) -> Self {
        self.playtime_tick = Some(tick);
        self
    }

    pub fn build(self) -> Result<Sequencer> {
        let store = match self.state_store {
            Some(store) => store,
            None => Arc::new(StateStore::open_in_memory()?),
        };
        let mut playtime = PlayTimeTracker::new(store.clone());
        if let Some(tick) = self.playtime_tick {
            playtime = playtime.with_tick(tick);
        }
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Sequencer {
            output: self.output,
            prefetcher: Prefetcher::new(self.cache, self.fetcher, self.resolver),
            index: self.index.unwrap_or_default(),
            session: SessionStore::new(store),
            playtime,
            events,
            selection: Selection::default(),
            playlist: Vec::new(),
            cursor: PlaybackCursor::default(),
            loop_count: self.options.loop_count.max(1),
            playback_rate: self.options.speed.default_rate,
            state: PlaybackState::Idle,
            loaded: None,
            options: self.options,
        })
    }
}

impl Sequencer {
    pub fn builder(
        output: Arc<dyn AudioOutput>,
        cache: Arc<AudioCache>,
        fetcher: Arc<dyn Fetcher>,
    ) -> SequencerBuilder {
        SequencerBuilder {
            output,
            cache,
            fetcher,
            resolver: Resolver::default(),
            index: None,
            state_store: None,
            options: SequencerOptions::default(),
            playtime_tick: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<PlayerEvent> {
        self.events.clone()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn cursor(&self) -> PlaybackCursor {
        self.cursor
    }

    pub fn playlist(&self) -> &[PlaylistEntry] {
        &self.playlist
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn loop_count(&self) -> usize {
        self.loop_count
    }

    pub fn playback_rate(&self) -> f32 {
        self.playback_rate
    }

    pub fn is_continuous(&self) -> bool {
        self.options.continuous
    }

    pub fn is_playing(&self) -> bool {
        self.cursor.is_playing
    }

    pub fn prefetcher(&self) -> &Prefetcher {
        &self.prefetcher
    }

    pub fn session_store(&self) -> &SessionStore {
        &self.session
    }

    pub fn playtime(&self) -> &PlayTimeTracker {
        &self.playtime
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            state: self.state,
            selection: self.selection.clone(),
            playlist: self.playlist.clone(),
            cursor: self.cursor,
            loop_count: self.loop_count,
            playback_rate: self.playback_rate,
            continuous: self.options.continuous,
            play_time_seconds: self.playtime.seconds(),
        }
    }

    fn emit(&self, event: PlayerEvent) {
        // No subscriber is fine.
        let _ = self.events.send(event);
    }

    /// Session record describing the current state.
    pub fn session_state(&self) -> SessionState {
        SessionState {
            textbook: self.selection.textbook.clone(),
            unit: self.selection.unit.clone(),
            section: self.selection.section.clone(),
            selected_files: self.playlist.clone(),
            current_index: self.cursor.file_index,
            current_offset_seconds: if self.loaded.is_some() {
                self.output.position()
            } else {
                0.0
            },
            is_playing: self.cursor.is_playing,
            loop_count: self.loop_count,
            playback_rate: self.playback_rate,
            saved_on_date: today(),
        }
    }

    pub fn save_session(&self) -> Result<()> {
        self.session.save(&self.session_state())
    }

    fn persist(&self) {
        if let Err(e) = self.save_session() {
            tracing::warn!("Failed to save playback state: {}", e);
        }
    }

    /// Starts `playlist` from its first entry.
    ///
    /// Fails with [`Error::EmptyPlaylist`] without touching the current
    /// playback. A loop count of 0 is treated as 1.
    pub async fn start(&mut self, playlist: Vec<PlaylistEntry>, loop_count: usize) -> Result<()> {
        let Some(first) = playlist.first() else {
            return Err(Error::EmptyPlaylist);
        };

        self.output.pause();
        self.playtime.stop();

        self.selection = Selection::of(first);
        self.playlist = playlist;
        self.loop_count = loop_count.max(1);
        self.cursor = PlaybackCursor {
            file_index: 0,
            loop_index: 1,
            is_playing: true,
        };
        self.playback_rate = self.options.speed.rate_for(&self.index, &self.playlist);
        self.playtime.load();

        tracing::info!(
            files = self.playlist.len(),
            loop_count = self.loop_count,
            rate = self.playback_rate,
            "Starting playback"
        );
        self.play_entry_at(0).await;
        Ok(())
    }

    async fn play_entry_at(&mut self, mut index: usize) {
        loop {
            if index >= self.playlist.len() {
                if self.continue_into_next_section() {
                    index = 0;
                    continue;
                }
                self.exhaust();
                return;
            }

            let entry = self.playlist[index].clone();
            self.cursor.file_index = index;
            self.cursor.loop_index = 1;
            self.loaded = None;

            match self.load_entry(&entry).await {
                Ok(origin) => {
                    self.loaded = Some(origin);
                    self.output.set_rate(self.playback_rate);
                    if let Err(e) = self.output.play().await {
                        tracing::warn!(entry = %entry, "Output refused to play: {}", e);
                        self.mark_unavailable(index, entry);
                        return;
                    }

                    self.cursor.is_playing = true;
                    self.state = PlaybackState::Playing;
                    self.playtime.start(self.output.clone());
                    tracing::info!(index, entry = %entry, origin = ?origin, "Playing");
                    self.emit(PlayerEvent::TrackStarted {
                        index,
                        entry,
                        origin,
                    });
                    self.persist();
                    self.prefetcher
                        .prefetch_next(&self.playlist, index, self.options.lookahead);
                    return;
                }
                Err(Error::InvalidEntry(reason)) => {
                    tracing::warn!(index, "Skipping invalid entry: {}", reason);
                    index += 1;
                }
                Err(e) => {
                    tracing::warn!(entry = %entry, "{}", e);
                    self.mark_unavailable(index, entry);
                    return;
                }
            }
        }
    }

    /// Loads `entry` into the output, trying every source in order.
    async fn load_entry(&self, entry: &PlaylistEntry) -> Result<SourceOrigin> {
        let resolver = self.prefetcher.resolver();
        let key = resolver.resource_key(entry)?;

        if let Some(record) = self.prefetcher.cache().get(&key).await {
            tracing::debug!(key = %key, "Cache hit");
            let source = AudioSource::Bytes {
                data: record.bytes,
                mime_type: record.mime_type,
            };
            match self.output.load(source).await {
                Ok(()) => return Ok(SourceOrigin::Cache),
                Err(e) => tracing::warn!(key = %key, "Output rejected cached bytes: {}", e),
            }
        } else {
            tracing::debug!(key = %key, "Cache miss");
        }

        if resolver.mirror_enabled() {
            match self.fetch_from_mirror(entry).await {
                Ok(fetched) => {
                    let source = AudioSource::Bytes {
                        data: fetched.bytes.clone(),
                        mime_type: fetched.mime_type.clone(),
                    };
                    match self.output.load(source).await {
                        Ok(()) => {
                            self.prefetcher.store(key, fetched);
                            return Ok(SourceOrigin::Mirror);
                        }
                        Err(e) => tracing::warn!(entry = %entry, "Output rejected mirror bytes: {}", e),
                    }
                }
                Err(e) => tracing::info!(entry = %entry, "Mirror failed, streaming directly: {}", e),
            }
        }

        match self.output.load(AudioSource::Stream { url: key.clone() }).await {
            Ok(()) => {
                match self.options.cache_policy {
                    CachePolicy::CacheOnPlay => {
                        self.prefetcher.prefetch(entry);
                    }
                    CachePolicy::NoCacheFromNetwork => {
                        tracing::info!(key = %key, "Not caching streamed file");
                    }
                }
                Ok(SourceOrigin::Network)
            }
            Err(e) => Err(Error::PlaybackUnavailable(format!("{}: {}", entry, e))),
        }
    }

    async fn fetch_from_mirror(&self, entry: &PlaylistEntry) -> Result<Fetched> {
        let url = self.prefetcher.resolver().resolve(entry, SourceKind::RemoteApi)?;
        let payload = self.prefetcher.fetcher().get_json(&url).await?;
        Ok(decode_mirror_payload(&payload, &entry.file_name)?)
    }

    fn mark_unavailable(&mut self, index: usize, entry: PlaylistEntry) {
        tracing::warn!(index, entry = %entry, "Playback unavailable, stopping");
        self.cursor.file_index = index;
        self.cursor.is_playing = false;
        self.state = PlaybackState::Idle;
        self.loaded = None;
        self.playtime.stop();
        self.emit(PlayerEvent::PlaybackUnavailable { index, entry });
        self.persist();
    }

    /// Replaces the playlist with the next section of the current unit.
    fn continue_into_next_section(&mut self) -> bool {
        if !self.options.continuous || self.selection.is_empty() {
            return false;
        }

        let Selection {
            textbook,
            unit,
            section,
        } = self.selection.clone();
        let current = self.index.current();
        let Some((next, _)) = current.next_section(&textbook, &unit, &section) else {
            tracing::info!(unit = %unit, "Continuous playback: no more sections in this unit");
            return false;
        };
        let next = next.to_string();
        let entries = current.entries(&textbook, &unit, &next);

        tracing::info!(from = %section, to = %next, "Continuous playback: moving to next section");
        self.selection.section = next.clone();
        self.playlist = entries;
        self.cursor.file_index = 0;
        self.cursor.loop_index = 1;
        self.emit(PlayerEvent::SectionContinued {
            section: next,
            files: self.playlist.len(),
        });
        self.persist();
        true
    }

    fn exhaust(&mut self) {
        self.cursor.file_index = self.playlist.len();
        self.cursor.loop_index = 1;
        self.cursor.is_playing = false;
        self.state = PlaybackState::Exhausted;
        self.loaded = None;
        self.playtime.stop();
        tracing::info!("Playback finished");
        self.emit(PlayerEvent::Exhausted);
        self.persist();
    }

    /// Output reported the end of the loaded source.
    ///
    /// An `Ended` that arrives while the output is audible belongs to a
    /// source that was already replaced (skip, restart) and is dropped.
    pub async fn on_track_ended(&mut self) {
        if !self.cursor.is_playing {
            tracing::debug!("Track ended while stopped, ignoring");
            return;
        }
        if self.output.is_playing() {
            tracing::debug!("Stale end-of-track notification, ignoring");
            return;
        }

        if self.cursor.loop_index < self.loop_count {
            self.cursor.loop_index += 1;
            self.state = PlaybackState::Looping;
            let index = self.cursor.file_index;
            self.emit(PlayerEvent::Looped {
                index,
                loop_index: self.cursor.loop_index,
            });

            self.output.seek(0.0);
            self.output.set_rate(self.playback_rate);
            if let Err(e) = self.output.play().await {
                tracing::warn!(index, "Output refused to replay: {}", e);
                let entry = self.playlist[index].clone();
                self.mark_unavailable(index, entry);
                return;
            }
            self.state = PlaybackState::Playing;
            self.persist();
        } else {
            self.state = PlaybackState::Advancing;
            let next = self.cursor.file_index + 1;
            self.play_entry_at(next).await;
        }
    }

    /// Output started producing audio.
    pub fn on_output_playing(&mut self) {
        if !self.playtime.is_running() {
            self.playtime.start(self.output.clone());
        }
        self.persist();
    }

    /// Output paused (by the user or the system).
    pub fn on_output_paused(&mut self) {
        self.persist();
        if !self.cursor.is_playing {
            self.playtime.stop();
        }
    }

    pub async fn next(&mut self) {
        if self.playlist.is_empty() {
            return;
        }
        self.output.pause();
        let target = (self.cursor.file_index + 1).min(self.playlist.len() - 1);
        self.play_entry_at(target).await;
    }

    pub async fn previous(&mut self) {
        if self.playlist.is_empty() {
            return;
        }
        self.output.pause();
        let target = self
            .cursor
            .file_index
            .saturating_sub(1)
            .min(self.playlist.len() - 1);
        self.play_entry_at(target).await;
    }

    pub fn pause(&mut self) {
        self.output.pause();
        if self.cursor.is_playing {
            self.state = PlaybackState::Paused;
        }
        self.cursor.is_playing = false;
        self.playtime.stop();
        self.emit(PlayerEvent::Paused {
            index: self.cursor.file_index,
        });
        self.persist();
    }

    /// Resumes the loaded source, or loads the current entry again.
    pub async fn resume(&mut self) {
        let index = self.cursor.file_index;
        if index >= self.playlist.len() {
            return;
        }
        if self.cursor.is_playing && self.output.is_playing() {
            return;
        }

        if self.loaded.is_none() {
            let loop_index = self.cursor.loop_index;
            self.play_entry_at(index).await;
            if self.cursor.is_playing && self.cursor.file_index == index {
                self.cursor.loop_index = loop_index.min(self.loop_count);
            }
            return;
        }

        self.output.set_rate(self.playback_rate);
        if let Err(e) = self.output.play().await {
            tracing::warn!(index, "Output refused to resume: {}", e);
            let entry = self.playlist[index].clone();
            self.mark_unavailable(index, entry);
            return;
        }
        self.cursor.is_playing = true;
        self.state = PlaybackState::Playing;
        self.playtime.start(self.output.clone());
        self.emit(PlayerEvent::Resumed { index });
        self.persist();
    }

    pub fn set_loop_count(&mut self, loop_count: usize) {
        self.loop_count = loop_count.max(1);
        if self.cursor.loop_index > self.loop_count {
            self.cursor.loop_index = self.loop_count;
        }
        self.persist();
    }

    pub fn set_continuous(&mut self, continuous: bool) {
        self.options.continuous = continuous;
    }

    pub fn set_playback_rate(&mut self, rate: f32) {
        if !rate.is_finite() || rate <= 0.0 {
            tracing::warn!(rate, "Ignoring invalid playback rate");
            return;
        }
        self.playback_rate = rate;
        self.output.set_rate(rate);
        self.persist();
    }

    /// Selection dropdown changed: stop and clear the playlist.
    pub fn change_selection(&mut self, textbook: &str, unit: &str, section: &str) {
        self.output.pause();
        self.playtime.stop();
        self.playlist.clear();
        self.cursor = PlaybackCursor::default();
        self.loaded = None;
        self.state = PlaybackState::Idle;
        self.selection = Selection::new(textbook, unit, section);
        self.emit(PlayerEvent::SelectionChanged {
            selection: self.selection.clone(),
        });
        self.persist();
    }

    /// Restores a saved session.
    ///
    /// A session saved while playing re-arms its entry at the saved offset
    /// but leaves the output paused; [`resume`](Self::resume) starts it.
    pub async fn restore(&mut self, state: &SessionState) -> Result<()> {
        self.output.pause();
        self.selection = Selection::new(&state.textbook, &state.unit, &state.section);
        self.playlist = state.selected_files.clone();
        self.loop_count = state.loop_count.max(1);
        self.playback_rate = if state.playback_rate.is_finite() && state.playback_rate > 0.0 {
            state.playback_rate
        } else {
            self.options.speed.rate_for(&self.index, &self.playlist)
        };

        let index = state.current_index.min(self.playlist.len());
        self.cursor = PlaybackCursor {
            file_index: index,
            loop_index: 1,
            is_playing: false,
        };
        self.state = PlaybackState::Idle;
        self.loaded = None;

        if !state.is_playing || index >= self.playlist.len() {
            return Ok(());
        }

        let entry = self.playlist[index].clone();
        match self.load_entry(&entry).await {
            Ok(origin) => {
                let offset = state.current_offset_seconds.max(0.0);
                self.loaded = Some(origin);
                self.output.set_rate(self.playback_rate);
                self.output.seek(offset);
                self.state = PlaybackState::Paused;
                tracing::info!(index, offset, entry = %entry, "Re-armed saved session");
                self.emit(PlayerEvent::Rearmed {
                    index,
                    offset_seconds: offset,
                });
            }
            Err(e) => tracing::warn!(entry = %entry, "Cannot re-arm saved entry: {}", e),
        }
        Ok(())
    }

    /// Final save, stops time tracking and waits for background downloads.
    pub async fn shutdown(&mut self) {
        self.persist();
        self.playtime.stop();
        self.prefetcher.wait_idle().await;
    }
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("state", &self.state)
            .field("selection", &self.selection)
            .field("cursor", &self.cursor)
            .field("files", &self.playlist.len())
            .field("loop_count", &self.loop_count)
            .finish()
    }
}
