//! Player task.
//!
//! The [`Sequencer`] is owned by a single tokio task. User commands arrive
//! over an mpsc channel from [`PlayerHandle`], output notifications over a
//! second channel fed by the [`AudioOutput`](crate::output::AudioOutput)
//! implementation. Output events are drained before commands so a command
//! always observes every transition the output already reported.

use crate::entry::PlaylistEntry;
use crate::error::{Error, Result};
use crate::events::{PlayerEvent, Selection};
use crate::output::OutputEvent;
use crate::sequencer::{PlayerSnapshot, Sequencer};
use crate::session::SessionState;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const COMMAND_CAPACITY: usize = 32;

/// Commands sent to the player task. Every command is acknowledged once applied.
#[derive(Debug)]
pub enum PlayerCommand {
    Start {
        playlist: Vec<PlaylistEntry>,
        loop_count: usize,
        reply: oneshot::Sender<Result<()>>,
    },
    Next {
        reply: oneshot::Sender<()>,
    },
    Previous {
        reply: oneshot::Sender<()>,
    },
    Pause {
        reply: oneshot::Sender<()>,
    },
    Resume {
        reply: oneshot::Sender<()>,
    },
    SetLoopCount {
        loop_count: usize,
        reply: oneshot::Sender<()>,
    },
    SetContinuous {
        continuous: bool,
        reply: oneshot::Sender<()>,
    },
    SetRate {
        rate: f32,
        reply: oneshot::Sender<()>,
    },
    ChangeSelection {
        selection: Selection,
        reply: oneshot::Sender<()>,
    },
    Restore {
        state: Box<SessionState>,
        reply: oneshot::Sender<Result<()>>,
    },
    Save {
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<PlayerSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

pub struct Player;

impl Player {
    /// Spawns the player task.
    ///
    /// `autosave`, when set, saves the session periodically while playing so
    /// the saved offset stays close to the audible position.
    pub fn spawn(
        sequencer: Sequencer,
        output_events: mpsc::Receiver<OutputEvent>,
        autosave: Option<Duration>,
    ) -> (PlayerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let events = sequencer.event_sender();
        let join = tokio::spawn(run(sequencer, rx, output_events, autosave));
        (PlayerHandle { tx, events }, join)
    }
}

async fn run(
    mut sequencer: Sequencer,
    mut commands: mpsc::Receiver<PlayerCommand>,
    mut output_events: mpsc::Receiver<OutputEvent>,
    autosave: Option<Duration>,
) {
    info!("Player started");

    // A zero period disables autosave.
    let period = autosave.filter(|p| !p.is_zero());
    let mut ticker = period.map(|p| tokio::time::interval_at(tokio::time::Instant::now() + p, p));
    let mut output_open = true;
    let mut shutdown_reply = None;

    loop {
        tokio::select! {
            biased;

            event = output_events.recv(), if output_open => match event {
                Some(event) => handle_output_event(&mut sequencer, event).await,
                None => {
                    debug!("Output event channel closed");
                    output_open = false;
                }
            },

            command = commands.recv() => match command {
                Some(PlayerCommand::Shutdown { reply }) => {
                    shutdown_reply = Some(reply);
                    break;
                }
                Some(command) => handle_command(&mut sequencer, command).await,
                None => break,
            },

            _ = async {
                match ticker.as_mut() {
                    Some(ticker) => {
                        ticker.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            } => {
                if sequencer.is_playing() {
                    if let Err(e) = sequencer.save_session() {
                        warn!("Autosave failed: {}", e);
                    }
                }
            }
        }
    }

    sequencer.shutdown().await;
    info!("Player stopped");
    if let Some(reply) = shutdown_reply {
        let _ = reply.send(());
    }
}

async fn handle_output_event(sequencer: &mut Sequencer, event: OutputEvent) {
    debug!(?event, "Output event");
    match event {
        OutputEvent::Playing => sequencer.on_output_playing(),
        OutputEvent::Paused => sequencer.on_output_paused(),
        OutputEvent::Ended => sequencer.on_track_ended().await,
    }
}

// A dropped receiver only means the caller stopped waiting.
async fn handle_command(sequencer: &mut Sequencer, command: PlayerCommand) {
    match command {
        PlayerCommand::Start {
            playlist,
            loop_count,
            reply,
        } => {
            let _ = reply.send(sequencer.start(playlist, loop_count).await);
        }
        PlayerCommand::Next { reply } => {
            sequencer.next().await;
            let _ = reply.send(());
        }
        PlayerCommand::Previous { reply } => {
            sequencer.previous().await;
            let _ = reply.send(());
        }
        PlayerCommand::Pause { reply } => {
            sequencer.pause();
            let _ = reply.send(());
        }
        PlayerCommand::Resume { reply } => {
            sequencer.resume().await;
            let _ = reply.send(());
        }
        PlayerCommand::SetLoopCount { loop_count, reply } => {
            sequencer.set_loop_count(loop_count);
            let _ = reply.send(());
        }
        PlayerCommand::SetContinuous { continuous, reply } => {
            sequencer.set_continuous(continuous);
            let _ = reply.send(());
        }
        PlayerCommand::SetRate { rate, reply } => {
            sequencer.set_playback_rate(rate);
            let _ = reply.send(());
        }
        PlayerCommand::ChangeSelection { selection, reply } => {
            sequencer.change_selection(&selection.textbook, &selection.unit, &selection.section);
            let _ = reply.send(());
        }
        PlayerCommand::Restore { state, reply } => {
            let _ = reply.send(sequencer.restore(&state).await);
        }
        PlayerCommand::Save { reply } => {
            let _ = reply.send(sequencer.save_session());
        }
        PlayerCommand::Snapshot { reply } => {
            let _ = reply.send(sequencer.snapshot());
        }
        PlayerCommand::Shutdown { reply } => {
            let _ = reply.send(());
        }
    }
}

/// Cloneable handle to the player task.
#[derive(Clone, Debug)]
pub struct PlayerHandle {
    tx: mpsc::Sender<PlayerCommand>,
    events: broadcast::Sender<PlayerEvent>,
}

impl PlayerHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> PlayerCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| Error::PlayerStopped)?;
        rx.await.map_err(|_| Error::PlayerStopped)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn start(&self, playlist: Vec<PlaylistEntry>, loop_count: usize) -> Result<()> {
        self.request(|reply| PlayerCommand::Start {
            playlist,
            loop_count,
            reply,
        })
        .await?
    }

    pub async fn next(&self) -> Result<()> {
        self.request(|reply| PlayerCommand::Next { reply }).await
    }

    pub async fn previous(&self) -> Result<()> {
        self.request(|reply| PlayerCommand::Previous { reply }).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(|reply| PlayerCommand::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.request(|reply| PlayerCommand::Resume { reply }).await
    }

    pub async fn set_loop_count(&self, loop_count: usize) -> Result<()> {
        self.request(|reply| PlayerCommand::SetLoopCount { loop_count, reply })
            .await
    }

    pub async fn set_continuous(&self, continuous: bool) -> Result<()> {
        self.request(|reply| PlayerCommand::SetContinuous { continuous, reply })
            .await
    }

    pub async fn set_playback_rate(&self, rate: f32) -> Result<()> {
        self.request(|reply| PlayerCommand::SetRate { rate, reply }).await
    }

    pub async fn change_selection(&self, selection: Selection) -> Result<()> {
        self.request(|reply| PlayerCommand::ChangeSelection { selection, reply })
            .await
    }

    pub async fn restore(&self, state: SessionState) -> Result<()> {
        self.request(|reply| PlayerCommand::Restore {
            state: Box::new(state),
            reply,
        })
        .await?
    }

    pub async fn save(&self) -> Result<()> {
        self.request(|reply| PlayerCommand::Save { reply }).await?
    }

    pub async fn snapshot(&self) -> Result<PlayerSnapshot> {
        self.request(|reply| PlayerCommand::Snapshot { reply }).await
    }

    /// Stops the task after a final save and waits for background downloads.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| PlayerCommand::Shutdown { reply }).await
    }
}
