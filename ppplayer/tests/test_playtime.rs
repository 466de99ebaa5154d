mod common;

use chrono::{Duration as Days, Local};
use common::{entry, Fixture};
use ppplayer::persistence::DAILY_PLAY_TIME_KEY;
use ppplayer::{AudioOutput, CachePolicy, DailyPlayTime, PlayTimeTracker, SequencerOptions};
use std::time::Duration;

#[tokio::test]
async fn test_previous_day_total_is_reset() {
    let fx = Fixture::new();
    let yesterday = Local::now().date_naive() - Days::days(1);
    fx.store
        .put(
            DAILY_PLAY_TIME_KEY,
            &DailyPlayTime {
                date: yesterday,
                time: 500.0,
            },
        )
        .unwrap();

    let tracker = PlayTimeTracker::new(fx.store.clone());
    assert_eq!(tracker.seconds(), 0.0);

    let stored: DailyPlayTime = fx.store.get(DAILY_PLAY_TIME_KEY).unwrap().unwrap();
    assert_eq!(stored.date, Local::now().date_naive());
    assert_eq!(stored.time, 0.0);
}

#[tokio::test]
async fn test_ticks_only_while_playing() {
    let fx = Fixture::new();
    let mut tracker = PlayTimeTracker::new(fx.store.clone()).with_tick(Duration::from_millis(20));

    // Nothing loaded: the output is silent.
    tracker.start(fx.output.clone());
    tokio::time::sleep(Duration::from_millis(120)).await;
    tracker.stop();
    assert_eq!(tracker.seconds(), 0.0);

    fx.output
        .load(ppplayer::AudioSource::Stream { url: "audio/x.mp3".into() })
        .await
        .unwrap();
    fx.output.play().await.unwrap();
    tracker.start(fx.output.clone());
    assert!(tracker.is_running());
    tokio::time::sleep(Duration::from_millis(150)).await;
    tracker.stop();
    assert!(!tracker.is_running());

    let seconds = tracker.seconds();
    assert!(seconds >= 0.04, "only {} s counted", seconds);

    let stored: DailyPlayTime = fx.store.get(DAILY_PLAY_TIME_KEY).unwrap().unwrap();
    assert_eq!(stored.time, seconds);
}

#[tokio::test]
async fn test_sequencer_tracks_play_time() {
    let fx = Fixture::new();
    let mut sequencer = fx
        .builder(SequencerOptions {
            cache_policy: CachePolicy::NoCacheFromNetwork,
            lookahead: 0,
            ..SequencerOptions::default()
        })
        .playtime_tick(Duration::from_millis(20))
        .build()
        .unwrap();

    sequencer.start(vec![entry("Section A", "01.mp3")], 1).await.unwrap();
    assert!(sequencer.playtime().is_running());
    tokio::time::sleep(Duration::from_millis(150)).await;

    sequencer.pause();
    assert!(!sequencer.playtime().is_running());
    let counted = sequencer.snapshot().play_time_seconds;
    assert!(counted > 0.0);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(sequencer.snapshot().play_time_seconds, counted);
}
