//! Daily play-time accumulator.
//!
//! A periodic tick adds elapsed time while the output is audible and persists
//! the total under the `dailyPlayTime` record. The total is reset the first
//! time a new local date is observed.

use crate::output::AudioOutput;
use crate::persistence::{StateStore, DAILY_PLAY_TIME_KEY};
use crate::session::today;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Persisted record: `{date, time}` with `time` in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyPlayTime {
    pub date: NaiveDate,
    pub time: f64,
}

impl DailyPlayTime {
    pub fn empty_for(date: NaiveDate) -> Self {
        Self { date, time: 0.0 }
    }
}

/// Formats seconds as `HH:MM:SS`.
///
/// ```
/// assert_eq!(ppplayer::playtime::format_hms(3725.9), "01:02:05");
/// ```
pub fn format_hms(seconds: f64) -> String {
    let total = seconds.max(0.0).floor() as u64;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

fn persist(store: &StateStore, value: &DailyPlayTime) {
    if let Err(e) = store.put(DAILY_PLAY_TIME_KEY, value) {
        tracing::warn!("Failed to save daily play time: {}", e);
    }
}

pub struct PlayTimeTracker {
    store: Arc<StateStore>,
    current: Arc<Mutex<DailyPlayTime>>,
    tick: Duration,
    task: Option<JoinHandle<()>>,
}

impl PlayTimeTracker {
    pub fn new(store: Arc<StateStore>) -> Self {
        let tracker = Self {
            store,
            current: Arc::new(Mutex::new(DailyPlayTime::empty_for(today()))),
            tick: DEFAULT_TICK,
            task: None,
        };
        tracker.load();
        tracker
    }

    /// Overrides the tick period. Each tick adds exactly one period.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Reads the persisted total, resetting it when it belongs to another day.
    pub fn load(&self) -> DailyPlayTime {
        let today = today();
        let loaded = match self.store.get::<DailyPlayTime>(DAILY_PLAY_TIME_KEY) {
            Ok(Some(record)) if record.date == today => record,
            Ok(Some(record)) => {
                tracing::info!(previous = %record.date, "New day, resetting play time");
                let fresh = DailyPlayTime::empty_for(today);
                persist(&self.store, &fresh);
                fresh
            }
            Ok(None) => DailyPlayTime::empty_for(today),
            Err(e) => {
                tracing::warn!("Unreadable daily play time, starting from zero: {}", e);
                DailyPlayTime::empty_for(today)
            }
        };

        *self.current.lock().unwrap_or_else(|p| p.into_inner()) = loaded;
        loaded
    }

    /// (Re)starts the tick task.
    pub fn start(&mut self, output: Arc<dyn AudioOutput>) {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let store = self.store.clone();
        let current = self.current.clone();
        let period = self.tick;

        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                if !output.is_playing() {
                    continue;
                }
                let snapshot = {
                    let mut value = current.lock().unwrap_or_else(|p| p.into_inner());
                    let today = today();
                    if value.date != today {
                        *value = DailyPlayTime::empty_for(today);
                    }
                    value.time += period.as_secs_f64();
                    *value
                };
                persist(&store, &snapshot);
            }
        }));
    }

    /// Cancels the tick task and persists the total.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        persist(&self.store, &self.snapshot());
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    pub fn snapshot(&self) -> DailyPlayTime {
        *self.current.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn seconds(&self) -> f64 {
        self.snapshot().time
    }

    pub fn formatted(&self) -> String {
        format_hms(self.seconds())
    }
}

impl Drop for PlayTimeTracker {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for PlayTimeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayTimeTracker")
            .field("current", &self.snapshot())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(0.0), "00:00:00");
        assert_eq!(format_hms(59.99), "00:00:59");
        assert_eq!(format_hms(36000.0), "10:00:00");
    }

    #[test]
    fn test_same_day_record_is_kept() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        store
            .put(DAILY_PLAY_TIME_KEY, &DailyPlayTime { date: today(), time: 42.0 })
            .unwrap();
        let tracker = PlayTimeTracker::new(store);
        assert_eq!(tracker.seconds(), 42.0);
        assert_eq!(tracker.formatted(), "00:00:42");
    }
}
