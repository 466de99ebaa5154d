mod common;

use common::{entry, Fixture};
use ppplayer::{
    CachePolicy, Error, PlaybackState, Player, PlayerEvent, Selection, SequencerOptions,
    SessionStore,
};
use std::time::Duration;

fn options() -> SequencerOptions {
    SequencerOptions {
        cache_policy: CachePolicy::NoCacheFromNetwork,
        lookahead: 0,
        ..SequencerOptions::default()
    }
}

#[tokio::test]
async fn test_output_end_advances_playlist() {
    let mut fx = Fixture::new();
    let sequencer = fx.sequencer(options());
    let (player, task) = Player::spawn(sequencer, fx.output_events.take().unwrap(), None);
    let mut events = player.subscribe();

    player
        .start(vec![entry("Section A", "01.mp3"), entry("Section A", "02.mp3")], 1)
        .await
        .unwrap();
    fx.output.finish().await;

    let snapshot = player.snapshot().await.unwrap();
    assert_eq!(snapshot.cursor.file_index, 1);
    assert_eq!(snapshot.state, PlaybackState::Playing);

    assert!(matches!(
        events.recv().await.unwrap(),
        PlayerEvent::TrackStarted { index: 0, .. }
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        PlayerEvent::TrackStarted { index: 1, .. }
    ));

    player.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_commands_are_applied_in_order() {
    let mut fx = Fixture::new();
    let sequencer = fx.sequencer(options());
    let (player, _task) = Player::spawn(sequencer, fx.output_events.take().unwrap(), None);

    let result = player.start(Vec::new(), 1).await;
    assert!(matches!(result, Err(Error::EmptyPlaylist)));

    player
        .start(
            vec![
                entry("Section A", "01.mp3"),
                entry("Section A", "02.mp3"),
                entry("Section A", "03.mp3"),
            ],
            2,
        )
        .await
        .unwrap();
    player.next().await.unwrap();
    player.next().await.unwrap();
    player.previous().await.unwrap();
    player.set_loop_count(4).await.unwrap();
    player.set_continuous(true).await.unwrap();
    player.set_playback_rate(1.5).await.unwrap();
    player.pause().await.unwrap();

    let snapshot = player.snapshot().await.unwrap();
    assert_eq!(snapshot.cursor.file_index, 1);
    assert_eq!(snapshot.loop_count, 4);
    assert!(snapshot.continuous);
    assert_eq!(snapshot.playback_rate, 1.5);
    assert_eq!(snapshot.state, PlaybackState::Paused);

    player.resume().await.unwrap();
    assert!(player.snapshot().await.unwrap().cursor.is_playing);

    player
        .change_selection(Selection::new("Book 1", "Unit 1", "Section B"))
        .await
        .unwrap();
    let snapshot = player.snapshot().await.unwrap();
    assert!(snapshot.playlist.is_empty());
    assert_eq!(snapshot.selection.section, "Section B");

    player.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stopped_player_reports_error() {
    let mut fx = Fixture::new();
    let sequencer = fx.sequencer(options());
    let (player, task) = Player::spawn(sequencer, fx.output_events.take().unwrap(), None);

    player.shutdown().await.unwrap();
    task.await.unwrap();

    assert!(player.is_closed());
    assert!(matches!(player.next().await, Err(Error::PlayerStopped)));
}

#[tokio::test]
async fn test_autosave_records_position() {
    let mut fx = Fixture::new();
    let sequencer = fx.sequencer(options());
    let (player, _task) = Player::spawn(
        sequencer,
        fx.output_events.take().unwrap(),
        Some(Duration::from_millis(20)),
    );

    player.start(vec![entry("Section A", "01.mp3")], 1).await.unwrap();
    fx.output.set_position(42.0);
    tokio::time::sleep(Duration::from_millis(120)).await;

    let saved = SessionStore::new(fx.store.clone()).load().unwrap();
    assert_eq!(saved.current_offset_seconds, 42.0);
    assert!(saved.is_playing);

    player.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_restore_through_handle() {
    let mut fx = Fixture::new();
    let sequencer = fx.sequencer(options());
    let (player, _task) = Player::spawn(sequencer, fx.output_events.take().unwrap(), None);

    player
        .start(vec![entry("Section A", "01.mp3"), entry("Section A", "02.mp3")], 1)
        .await
        .unwrap();
    player.next().await.unwrap();
    player.save().await.unwrap();

    let saved = SessionStore::new(fx.store.clone()).load().unwrap();
    player.change_selection(Selection::default()).await.unwrap();
    player.restore(saved).await.unwrap();

    let snapshot = player.snapshot().await.unwrap();
    assert_eq!(snapshot.cursor.file_index, 1);
    assert_eq!(snapshot.state, PlaybackState::Paused);
    assert_eq!(snapshot.playlist.len(), 2);

    player.shutdown().await.unwrap();
}
