#![allow(dead_code)]

use async_trait::async_trait;
use ppcache::{AudioCache, HttpFetcher};
use ppplayer::{
    AudioOutput, AudioSource, Error, Index, IndexSet, OutputEvent, PlayerEvent, PlaylistEntry,
    Resolver, Result, Sequencer, SequencerBuilder, SequencerOptions, StateStore,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};

pub const BOOK: &str = "Book 1";
pub const UNIT: &str = "Unit 1";

pub const INDEX_JSON: &str = r#"{
    "Book 1": {
        "Unit 1": {
            "Section A": ["01.mp3", "02.mp3", "03.mp3"],
            "Section B": {"files": ["01.mp3", "02.mp3", "03.mp3"]},
            "Section C": []
        }
    }
}"#;

pub fn entry(section: &str, file: &str) -> PlaylistEntry {
    PlaylistEntry::new(BOOK, UNIT, section, file)
}

pub fn key(entry: &PlaylistEntry) -> String {
    Resolver::default().resource_key(entry).unwrap()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Load(AudioSource),
    Play,
    Pause,
    Seek(f64),
    Rate(f32),
}

#[derive(Default)]
struct MockState {
    actions: Vec<Action>,
    loaded: Option<AudioSource>,
    playing: bool,
    position: f64,
    fail_streams: bool,
}

/// Audio output that records every call.
pub struct MockOutput {
    state: Mutex<MockState>,
    events: mpsc::Sender<OutputEvent>,
}

impl MockOutput {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<OutputEvent>) {
        let (events, rx) = mpsc::channel(64);
        let output = Arc::new(Self {
            state: Mutex::new(MockState::default()),
            events,
        });
        (output, rx)
    }

    pub fn fail_streams(&self, fail: bool) {
        self.state.lock().unwrap().fail_streams = fail;
    }

    pub fn actions(&self) -> Vec<Action> {
        self.state.lock().unwrap().actions.clone()
    }

    pub fn clear_actions(&self) {
        self.state.lock().unwrap().actions.clear();
    }

    pub fn loads(&self) -> Vec<AudioSource> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::Load(source) => Some(source),
                _ => None,
            })
            .collect()
    }

    pub fn plays(&self) -> usize {
        self.actions().iter().filter(|a| **a == Action::Play).count()
    }

    pub fn loaded(&self) -> Option<AudioSource> {
        self.state.lock().unwrap().loaded.clone()
    }

    pub fn set_position(&self, seconds: f64) {
        self.state.lock().unwrap().position = seconds;
    }

    /// Marks the source as ended without notifying anyone.
    pub fn end(&self) {
        let mut state = self.state.lock().unwrap();
        state.playing = false;
    }

    /// Ends the source and reports it on the event channel.
    pub async fn finish(&self) {
        self.end();
        let _ = self.events.send(OutputEvent::Ended).await;
    }
}

#[async_trait]
impl AudioOutput for MockOutput {
    async fn load(&self, source: AudioSource) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.actions.push(Action::Load(source.clone()));
        if state.fail_streams && !source.is_buffered() {
            return Err(Error::PlaybackUnavailable("stream refused".into()));
        }
        state.loaded = Some(source);
        state.playing = false;
        state.position = 0.0;
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.actions.push(Action::Play);
        if state.loaded.is_none() {
            return Err(Error::PlaybackUnavailable("nothing loaded".into()));
        }
        state.playing = true;
        Ok(())
    }

    fn pause(&self) {
        let mut state = self.state.lock().unwrap();
        state.actions.push(Action::Pause);
        state.playing = false;
    }

    fn seek(&self, seconds: f64) {
        let mut state = self.state.lock().unwrap();
        state.actions.push(Action::Seek(seconds));
        state.position = seconds;
    }

    fn position(&self) -> f64 {
        self.state.lock().unwrap().position
    }

    fn set_rate(&self, rate: f32) {
        self.state.lock().unwrap().actions.push(Action::Rate(rate));
    }

    fn is_playing(&self) -> bool {
        self.state.lock().unwrap().playing
    }
}

/// Temporary media root, cache and state database.
pub struct Fixture {
    pub dir: TempDir,
    pub media_root: PathBuf,
    pub cache: Arc<AudioCache>,
    pub fetcher: Arc<HttpFetcher>,
    pub store: Arc<StateStore>,
    pub output: Arc<MockOutput>,
    pub output_events: Option<mpsc::Receiver<OutputEvent>>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let media_root = dir.path().join("media");
        std::fs::create_dir_all(&media_root).unwrap();
        let cache = Arc::new(AudioCache::new(dir.path().join("cache")).unwrap());
        let fetcher = Arc::new(HttpFetcher::builder().local_root(&media_root).build().unwrap());
        let store = Arc::new(StateStore::open(&dir.path().join("state").join("state.db")).unwrap());
        let (output, output_events) = MockOutput::new();

        Self {
            dir,
            media_root,
            cache,
            fetcher,
            store,
            output,
            output_events: Some(output_events),
        }
    }

    /// Writes an audio file where the local URL of `entry` points.
    pub fn write_audio(&self, entry: &PlaylistEntry, bytes: &[u8]) {
        let path = self
            .media_root
            .join("audio")
            .join(&entry.textbook)
            .join(&entry.unit)
            .join(&entry.section)
            .join(&entry.file_name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    pub fn index(&self) -> IndexSet {
        IndexSet::new(Index::from_json(INDEX_JSON.as_bytes()).unwrap(), None)
    }

    pub fn builder(&self, options: SequencerOptions) -> SequencerBuilder {
        Sequencer::builder(self.output.clone(), self.cache.clone(), self.fetcher.clone())
            .index(self.index())
            .state_store(self.store.clone())
            .options(options)
    }

    pub fn sequencer(&self, options: SequencerOptions) -> Sequencer {
        self.builder(options).build().unwrap()
    }
}

pub fn drain(rx: &mut broadcast::Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
