//! Countdown that survives restarts: the start instant is persisted and the
//! remaining time is recomputed from it on every render.
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::watch;

use crate::audio::{AudioBackend, Sound};
use crate::document::Document;
use crate::store::{KvStore, KEY_START_TIME};

pub const DEFAULT_DURATION: f64 = 120.0;
pub const DEFAULT_URGENCY: f64 = 10.0;

/// Wall clock in epoch milliseconds.
pub fn now_ms() -> u64 {
  SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

pub fn remaining_time(duration: f64, elapsed_secs: f64) -> f64 {
  (duration - elapsed_secs).max(0.0)
}

pub fn format_remaining(remaining: f64) -> String {
  format!("{:.1}s Remaining", remaining)
}

pub struct TimerController {
  duration: f64,
  urgency: f64,
  start_time: Option<u64>,
  ticking: bool,
  times_up_played: bool,
  remaining_tx: watch::Sender<Option<f64>>,
}

impl TimerController {
  pub fn new(duration: f64, urgency: f64) -> Self {
    let (remaining_tx, _) = watch::channel(None);
    Self { duration, urgency, start_time: None, ticking: false, times_up_played: false, remaining_tx }
  }

  pub fn duration(&self) -> f64 {
    self.duration
  }

  /// Remaining time as last rendered, `None` while no start instant exists.
  pub fn subscribe(&self) -> watch::Receiver<Option<f64>> {
    self.remaining_tx.subscribe()
  }

  pub fn is_ticking(&self) -> bool {
    self.ticking
  }

  /// Begins a new run from `now`.
  pub fn start_timer(&mut self, store: &mut dyn KvStore, now: u64) {
    info!("Timer started at {}", now);
    store.set(KEY_START_TIME, now.to_string());
  }

  /// Start page: forget the run and show the full duration.
  pub fn clear_timer(&mut self, store: &mut dyn KvStore, doc: &mut Document, audio: &mut dyn AudioBackend) {
    store.remove(KEY_START_TIME);
    self.start_time = None;
    self.times_up_played = false;
    self.set_text(None, 0, doc, audio);
  }

  /// Results page: render once from the persisted start, then stay frozen.
  /// A frozen display never raises the terminal signal.
  pub fn load_paused_timer(&mut self, store: &dyn KvStore, doc: &mut Document, audio: &mut dyn AudioBackend, now: u64) {
    self.start_time = None;
    self.times_up_played = true;
    let start = read_start_time(store);
    self.set_text(start, now, doc, audio);
  }

  /// Active page: read the start (or begin now) and render; `tick` keeps it current.
  pub fn continue_timer(&mut self, store: &mut dyn KvStore, doc: &mut Document, audio: &mut dyn AudioBackend, now: u64) {
    self.times_up_played = false;
    let start = match read_start_time(store) {
      Some(start) => start,
      None => {
        self.start_timer(store, now);
        now
      }
    };
    info!("Continuing timer started at {} ({:.1}s elapsed)", start, now.saturating_sub(start) as f64 / 1000.0);
    self.start_time = Some(start);
    self.set_text(Some(start), now, doc, audio);
  }

  /// Periodic re-render while a page is counting down.
  pub fn tick(&mut self, doc: &mut Document, audio: &mut dyn AudioBackend, now: u64) {
    if let Some(start) = self.start_time {
      self.set_text(Some(start), now, doc, audio);
    }
  }

  pub fn set_text(&mut self, start: Option<u64>, now: u64, doc: &mut Document, audio: &mut dyn AudioBackend) {
    let Some(start) = start else {
      doc.timer_display.text = format!("{:.0}.0s Remaining", self.duration);
      doc.timer_display.flashing = false;
      self.stop_ticking(audio);
      self.remaining_tx.send_replace(None);
      return;
    };

    let elapsed = now.saturating_sub(start) as f64 / 1000.0;
    let remaining = remaining_time(self.duration, elapsed);
    doc.timer_display.text = format_remaining(remaining);

    if remaining > 0.0 && remaining <= self.urgency {
      doc.timer_display.flashing = true;
      self.start_ticking(audio);
    } else {
      doc.timer_display.flashing = false;
      self.stop_ticking(audio);
    }

    if remaining <= 0.0 && !self.times_up_played {
      info!("Time's up");
      doc.reveal_times_up();
      if let Err(e) = audio.play(Sound::TimesUp) {
        error!("Error playing sound: {}", e);
      }
      self.times_up_played = true;
      self.stop_ticking(audio);
    }

    self.remaining_tx.send_replace(Some(remaining));
  }

  fn start_ticking(&mut self, audio: &mut dyn AudioBackend) {
    if self.ticking {
      return;
    }
    self.ticking = true;
    if let Err(e) = audio.start_loop(Sound::Clock) {
      error!("Error playing clock sound: {}", e);
    }
  }

  fn stop_ticking(&mut self, audio: &mut dyn AudioBackend) {
    if self.ticking {
      audio.stop_loop(Sound::Clock);
      self.ticking = false;
    }
  }
}

pub fn read_start_time(store: &dyn KvStore) -> Option<u64> {
  store.get(KEY_START_TIME).and_then(|raw| raw.trim().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::audio::{AudioCall, RecordingAudio};
  use crate::store::MemoryStore;

  const T0: u64 = 1_700_000_000_000;

  fn setup() -> (TimerController, MemoryStore, Document, RecordingAudio) {
    (
      TimerController::new(DEFAULT_DURATION, DEFAULT_URGENCY),
      MemoryStore::new(),
      Document::new(true, (80, 24)),
      RecordingAudio::default(),
    )
  }

  #[test]
  fn test_remaining_time_property() {
    assert_eq!(remaining_time(120.0, 0.0), 120.0);
    for d in [0.5, 1.0, 59.9, 119.99, 120.0, 121.0, 10_000.0] {
      assert_eq!(remaining_time(120.0, d), (120.0 - d).max(0.0));
    }
  }

  #[test]
  fn test_clear_timer_shows_full_duration() {
    let (mut timer, mut store, mut doc, mut audio) = setup();
    store.set(KEY_START_TIME, T0.to_string());
    timer.clear_timer(&mut store, &mut doc, &mut audio);
    assert_eq!(store.get(KEY_START_TIME), None);
    assert_eq!(doc.timer_display.text, "120.0s Remaining");
    assert!(!doc.timer_display.flashing);
    assert_eq!(*timer.subscribe().borrow(), None);
  }

  #[test]
  fn test_urgency_at_five_seconds() {
    let (mut timer, mut store, mut doc, mut audio) = setup();
    store.set(KEY_START_TIME, T0.to_string());
    timer.continue_timer(&mut store, &mut doc, &mut audio, T0 + 115_000);
    assert_eq!(doc.timer_display.text, "5.0s Remaining");
    assert!(doc.timer_display.flashing);
    assert!(timer.is_ticking());

    timer.tick(&mut doc, &mut audio, T0 + 115_500);
    timer.tick(&mut doc, &mut audio, T0 + 116_000);
    assert_eq!(audio.count(&AudioCall::StartLoop(Sound::Clock)), 1);
  }

  #[test]
  fn test_urgency_window_includes_its_upper_bound() {
    let (mut timer, mut store, mut doc, mut audio) = setup();
    store.set(KEY_START_TIME, T0.to_string());
    timer.continue_timer(&mut store, &mut doc, &mut audio, T0 + 109_990);
    assert_eq!(*timer.subscribe().borrow(), Some(120.0 - 109.99));
    assert!(!doc.timer_display.flashing);
    assert!(!timer.is_ticking());

    timer.tick(&mut doc, &mut audio, T0 + 110_000);
    assert_eq!(doc.timer_display.text, "10.0s Remaining");
    assert!(doc.timer_display.flashing);
    assert_eq!(audio.count(&AudioCall::StartLoop(Sound::Clock)), 1);
  }

  #[test]
  fn test_outside_urgency_window_not_flashing() {
    let (mut timer, mut store, mut doc, mut audio) = setup();
    store.set(KEY_START_TIME, T0.to_string());
    timer.continue_timer(&mut store, &mut doc, &mut audio, T0 + 30_000);
    assert_eq!(doc.timer_display.text, "90.0s Remaining");
    assert!(!doc.timer_display.flashing);
    assert!(audio.calls.is_empty());
    assert_eq!(*timer.subscribe().borrow(), Some(90.0));
  }

  #[test]
  fn test_times_up_fires_once() {
    let (mut timer, mut store, mut doc, mut audio) = setup();
    store.set(KEY_START_TIME, T0.to_string());
    timer.continue_timer(&mut store, &mut doc, &mut audio, T0 + 119_000);
    assert!(timer.is_ticking());
    assert!(!doc.times_up_visible());

    timer.tick(&mut doc, &mut audio, T0 + 120_000);
    assert_eq!(doc.timer_display.text, "0.0s Remaining");
    assert!(doc.times_up_visible());
    assert!(!doc.timer_display.flashing);
    assert!(!timer.is_ticking());

    timer.tick(&mut doc, &mut audio, T0 + 125_000);
    timer.set_text(Some(T0), T0 + 130_000, &mut doc, &mut audio);
    assert_eq!(audio.count(&AudioCall::Play(Sound::TimesUp)), 1);
    assert_eq!(audio.count(&AudioCall::StopLoop(Sound::Clock)), 1);
  }

  #[test]
  fn test_audio_failure_does_not_stop_rendering() {
    let (mut timer, mut store, mut doc, mut audio) = setup();
    audio.fail = true;
    store.set(KEY_START_TIME, T0.to_string());
    timer.continue_timer(&mut store, &mut doc, &mut audio, T0 + 115_000);
    timer.tick(&mut doc, &mut audio, T0 + 120_000);
    assert_eq!(doc.timer_display.text, "0.0s Remaining");
    assert!(doc.times_up_visible());
  }

  #[test]
  fn test_continue_without_start_begins_now() {
    let (mut timer, mut store, mut doc, mut audio) = setup();
    timer.continue_timer(&mut store, &mut doc, &mut audio, T0);
    assert_eq!(store.get(KEY_START_TIME), Some(T0.to_string()));
    assert_eq!(doc.timer_display.text, "120.0s Remaining");
    timer.tick(&mut doc, &mut audio, T0 + 2_500);
    assert_eq!(doc.timer_display.text, "117.5s Remaining");
  }

  #[test]
  fn test_paused_timer_is_frozen() {
    let (mut timer, mut store, mut doc, mut audio) = setup();
    store.set(KEY_START_TIME, T0.to_string());
    timer.load_paused_timer(&store, &mut doc, &mut audio, T0 + 60_000);
    assert_eq!(doc.timer_display.text, "60.0s Remaining");
    timer.tick(&mut doc, &mut audio, T0 + 90_000);
    assert_eq!(doc.timer_display.text, "60.0s Remaining");
  }

  #[test]
  fn test_paused_timer_after_expiry_stays_silent() {
    let (mut timer, mut store, mut doc, mut audio) = setup();
    store.set(KEY_START_TIME, T0.to_string());
    timer.load_paused_timer(&store, &mut doc, &mut audio, T0 + 200_000);
    assert_eq!(doc.timer_display.text, "0.0s Remaining");
    assert!(!doc.times_up_visible());
    assert!(audio.calls.is_empty());
  }

  #[test]
  fn test_malformed_start_time_is_absent() {
    let mut store = MemoryStore::new();
    store.set(KEY_START_TIME, "yesterday".to_string());
    assert_eq!(read_start_time(&store), None);
  }
}
