//! Spawns distraction emails as the countdown crosses fixed thresholds and
//! keeps the open ones restorable across restarts.
use color_eyre::eyre::{eyre, Result};
use rand::Rng;
use tokio::sync::watch;

use crate::audio::AudioBackend;
use crate::document::{random_placement, Document, PLACEMENT_BUFFER};
use crate::email::Email;
use crate::session::{PopupInstance, Position, Session};
use crate::store::KvStore;
use crate::template::{parse_fragment, render, TemplateMode, TemplateSource};

pub const DEFAULT_THRESHOLDS: [u32; 6] = [110, 90, 70, 50, 30, 10];

pub struct PopupManager {
  emails: Vec<Email>,
  thresholds: Vec<u32>,
  template: TemplateSource,
  mode: TemplateMode,
  session: Session,
  remaining_rx: watch::Receiver<Option<f64>>,
  watching: bool,
}

impl PopupManager {
  pub fn new(
    emails: Vec<Email>,
    thresholds: Vec<u32>,
    template: TemplateSource,
    mode: TemplateMode,
    store: &dyn KvStore,
    remaining_rx: watch::Receiver<Option<f64>>,
  ) -> Self {
    let session = Session::load(store, emails.len());
    Self { emails, thresholds, template, mode, session, remaining_rx, watching: false }
  }

  pub fn session(&self) -> &Session {
    &self.session
  }

  pub fn is_watching(&self) -> bool {
    self.watching
  }

  /// Page load: reload the session, redraw open popups, then start watching.
  pub fn start<R: Rng + ?Sized>(&mut self, store: &mut dyn KvStore, doc: &mut Document, rng: &mut R) {
    self.session = Session::load(store, self.emails.len());
    self.restore_active_popups(store, doc, rng);
    self.watching = true;
  }

  pub fn stop(&mut self) {
    self.watching = false;
  }

  /// Clears the current run's thresholds and open popups.
  pub fn reset_run(&mut self, store: &mut dyn KvStore) {
    self.watching = false;
    self.session.reset_run(store);
  }

  pub fn restore_active_popups<R: Rng + ?Sized>(&mut self, store: &mut dyn KvStore, doc: &mut Document, rng: &mut R) {
    let popups = self.session.active_popups().to_vec();
    info!("Restoring {} active popups", popups.len());
    for popup in &popups {
      self.create_popup(store, doc, rng, popup, popup.position);
    }
  }

  /// Poll tick. Reads the latest published remaining time and spawns a popup
  /// for every threshold newly reached. Returns whether watching continues.
  pub fn poll<R: Rng + ?Sized>(
    &mut self,
    store: &mut dyn KvStore,
    doc: &mut Document,
    audio: &mut dyn AudioBackend,
    rng: &mut R,
  ) -> bool {
    if !self.watching {
      return false;
    }
    let Some(remaining) = *self.remaining_rx.borrow() else { return true };
    self.check_thresholds(remaining, store, doc, audio, rng);
    self.watching
  }

  pub fn check_thresholds<R: Rng + ?Sized>(
    &mut self,
    remaining: f64,
    store: &mut dyn KvStore,
    doc: &mut Document,
    audio: &mut dyn AudioBackend,
    rng: &mut R,
  ) {
    if remaining <= 0.0 {
      info!("Countdown finished, threshold watch stopped");
      self.watching = false;
      return;
    }
    for threshold in self.thresholds.clone() {
      if remaining <= threshold as f64 && !self.session.is_shown(threshold) {
        info!("Threshold {}s reached at {:.1}s remaining", threshold, remaining);
        self.show_distraction_popup(store, doc, audio, rng);
        self.session.mark_shown(store, threshold);
      }
    }
  }

  pub fn show_distraction_popup<R: Rng + ?Sized>(
    &mut self,
    store: &mut dyn KvStore,
    doc: &mut Document,
    audio: &mut dyn AudioBackend,
    rng: &mut R,
  ) {
    let Some(email) = self.session.take_next_email(store, &self.emails) else {
      warn!("No distraction emails configured");
      return;
    };
    let serial = self.session.mint_serial(store);
    let popup = PopupInstance::new(serial, email);
    self.session.push_popup(store, popup.clone());

    if let Err(e) = audio.play(popup.email.sound) {
      error!("Error playing sound: {}", e);
    }
    self.create_popup(store, doc, rng, &popup, None);
  }

  /// Renders `popup`; failures are logged and leave the page without it.
  pub fn create_popup<R: Rng + ?Sized>(
    &mut self,
    store: &mut dyn KvStore,
    doc: &mut Document,
    rng: &mut R,
    popup: &PopupInstance,
    position: Option<Position>,
  ) {
    if let Err(e) = self.try_create_popup(store, doc, rng, popup, position) {
      error!("Error creating popup {}: {}", popup.id, e);
    }
  }

  fn try_create_popup<R: Rng + ?Sized>(
    &mut self,
    store: &mut dyn KvStore,
    doc: &mut Document,
    rng: &mut R,
    popup: &PopupInstance,
    position: Option<Position>,
  ) -> Result<()> {
    let template = self.template.fetch()?;
    let text = render(&template, self.mode, &popup.overlay_id, &popup.content_id, &popup.email);
    let fragment = parse_fragment(&text)?;
    doc.insert_fragment(fragment);

    let viewport = doc.viewport();
    let element = doc
      .popup_mut(&popup.overlay_id)
      .ok_or(eyre!("Inserted popup {} not found", popup.overlay_id))?;
    element.visible = true;

    match position {
      Some(position) => element.position = position,
      None => {
        let position = random_placement(rng, viewport, element.size(), PLACEMENT_BUFFER);
        element.position = position;
        self.session.set_position(store, &popup.id, position);
      }
    }
    Ok(())
  }

  /// Close control: hide the overlay and forget the popup.
  pub fn dismiss(&mut self, store: &mut dyn KvStore, doc: &mut Document, overlay_id: &str) {
    doc.hide_popup(overlay_id);
    let id = self
      .session
      .active_popups()
      .iter()
      .find(|p| p.overlay_id == overlay_id)
      .map(|p| p.id.clone());
    if let Some(id) = id {
      info!("Dismissed popup {}", id);
      self.session.remove_popup(store, &id);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::audio::{AudioCall, RecordingAudio};
  use crate::email::distraction_emails;
  use crate::store::{MemoryStore, KEY_ACTIVE_POPUPS, KEY_EMAIL_INDEX};
  use rand::rngs::mock::StepRng;
  use std::collections::HashSet;
  use std::path::PathBuf;

  struct Rig {
    manager: PopupManager,
    store: MemoryStore,
    doc: Document,
    audio: RecordingAudio,
    rng: StepRng,
    tx: watch::Sender<Option<f64>>,
  }

  impl Rig {
    fn new() -> Self {
      Self::with_store(MemoryStore::new())
    }

    fn with_store(mut store: MemoryStore) -> Self {
      let (tx, rx) = watch::channel(None);
      let mut manager = PopupManager::new(
        distraction_emails(),
        DEFAULT_THRESHOLDS.to_vec(),
        TemplateSource::Builtin,
        TemplateMode::Structured,
        &store,
        rx,
      );
      let mut doc = Document::new(true, (120, 40));
      let mut rng = StepRng::new(0, 0);
      manager.start(&mut store, &mut doc, &mut rng);
      Self { manager, store, doc, audio: RecordingAudio::default(), rng, tx }
    }

    fn poll_at(&mut self, remaining: f64) -> bool {
      self.tx.send_replace(Some(remaining));
      self.manager.poll(&mut self.store, &mut self.doc, &mut self.audio, &mut self.rng)
    }

    fn active_ids(&self) -> Vec<String> {
      self.manager.session().active_popups().iter().map(|p| p.id.clone()).collect()
    }
  }

  #[test]
  fn test_crossing_threshold_spawns_once() {
    let mut rig = Rig::new();
    rig.poll_at(115.0);
    rig.poll_at(91.0);
    assert_eq!(rig.active_ids().len(), 1);
    let cursor = rig.manager.session().email_index();

    rig.poll_at(89.0);
    assert_eq!(rig.active_ids().len(), 2);
    assert_eq!(rig.manager.session().email_index(), cursor + 1);
    let spawned = &rig.manager.session().active_popups()[1];
    assert_eq!(spawned.email, distraction_emails()[cursor]);

    rig.poll_at(88.5);
    rig.poll_at(71.0);
    assert_eq!(rig.active_ids().len(), 2);
  }

  #[test]
  fn test_threshold_fires_when_remaining_equals_it() {
    let mut rig = Rig::new();
    rig.poll_at(110.0);
    assert_eq!(rig.manager.session().shown_thresholds(), &[110]);
    rig.poll_at(90.01);
    assert_eq!(rig.active_ids().len(), 1);
    rig.poll_at(90.0);
    assert_eq!(rig.manager.session().shown_thresholds(), &[110, 90]);
    assert_eq!(rig.active_ids().len(), 2);
  }

  #[test]
  fn test_no_signal_means_no_spawn() {
    let mut rig = Rig::new();
    assert!(rig.manager.poll(&mut rig.store, &mut rig.doc, &mut rig.audio, &mut rig.rng));
    assert!(rig.active_ids().is_empty());
  }

  #[test]
  fn test_jump_spawns_each_threshold_in_configured_order() {
    let mut rig = Rig::new();
    rig.poll_at(45.0);
    assert_eq!(rig.manager.session().shown_thresholds(), &[110, 90, 70, 50]);
    assert_eq!(rig.active_ids(), vec!["distraction_0", "distraction_1", "distraction_2", "distraction_3"]);
    let sounds: Vec<_> = rig.audio.calls.clone();
    let expected: Vec<_> = distraction_emails().iter().take(4).map(|e| AudioCall::Play(e.sound)).collect();
    assert_eq!(sounds, expected);
  }

  #[test]
  fn test_watch_stops_at_zero() {
    let mut rig = Rig::new();
    assert!(rig.poll_at(5.0));
    assert_eq!(rig.active_ids().len(), 6);
    assert!(!rig.poll_at(0.0));
    assert!(!rig.manager.is_watching());
    assert!(!rig.poll_at(0.0));
    assert_eq!(rig.active_ids().len(), 6);
  }

  #[test]
  fn test_spawned_popup_is_visible_and_placed() {
    let mut rig = Rig::new();
    rig.poll_at(100.0);
    let popup = rig.manager.session().active_popups()[0].clone();
    assert_eq!(popup.position, Some(Position { left: 2.0, top: 2.0 }));
    let element = rig.doc.popup(&popup.overlay_id).unwrap();
    assert!(element.visible);
    assert_eq!(element.content_id, popup.content_id);
    assert!(element.lines.iter().any(|l| l.contains(&popup.email.subject)));
    assert!(rig.store.get(KEY_ACTIVE_POPUPS).unwrap().contains("\"left\":2.0"));
  }

  #[test]
  fn test_dismiss_first_keeps_second() {
    let mut rig = Rig::new();
    rig.poll_at(100.0);
    rig.poll_at(80.0);
    let first = rig.manager.session().active_popups()[0].overlay_id.clone();
    rig.manager.dismiss(&mut rig.store, &mut rig.doc, &first);
    assert_eq!(rig.active_ids(), vec!["distraction_1"]);
    assert!(!rig.doc.popup(&first).unwrap().visible);
    assert_eq!(rig.doc.top_popup(), Some("distraction_1_overlay"));
  }

  #[test]
  fn test_dismiss_in_any_order() {
    let mut rig = Rig::new();
    rig.poll_at(60.0);
    rig.manager.dismiss(&mut rig.store, &mut rig.doc, "distraction_1_overlay");
    assert_eq!(rig.active_ids(), vec!["distraction_0", "distraction_2"]);
    rig.manager.dismiss(&mut rig.store, &mut rig.doc, "distraction_2_overlay");
    assert_eq!(rig.active_ids(), vec!["distraction_0"]);
    rig.manager.dismiss(&mut rig.store, &mut rig.doc, "distraction_9_overlay");
    assert_eq!(rig.active_ids(), vec!["distraction_0"]);
  }

  #[test]
  fn test_restore_reuses_position_without_sound() {
    let mut rig = Rig::new();
    rig.poll_at(100.0);
    let placed = rig.manager.session().active_popups()[0].clone();
    rig.manager.session.set_position(&mut rig.store, &placed.id, Position { left: 33.5, top: 7.25 });

    let mut restored = Rig::with_store(rig.store.clone());
    let element = restored.doc.popup(&placed.overlay_id).unwrap();
    assert!(element.visible);
    assert_eq!(element.position, Position { left: 33.5, top: 7.25 });
    assert!(restored.audio.calls.is_empty());

    restored.poll_at(95.0);
    assert_eq!(restored.active_ids().len(), 1);
  }

  #[test]
  fn test_template_failure_is_not_fatal() {
    let mut rig = Rig::new();
    rig.manager.template = TemplateSource::File(PathBuf::from("/nonexistent/template.txt"));
    assert!(rig.poll_at(100.0));
    assert_eq!(rig.active_ids().len(), 1);
    assert_eq!(rig.doc.visible_popups().count(), 0);
    assert!(rig.poll_at(85.0));
    assert_eq!(rig.manager.session().shown_thresholds(), &[110, 90]);
  }

  #[test]
  fn test_ids_stay_unique_after_cursor_wraps() {
    let mut store = MemoryStore::new();
    store.set(KEY_EMAIL_INDEX, "5".to_string());
    let mut rig = Rig::with_store(store);
    rig.poll_at(5.0);
    let ids = rig.active_ids();
    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(ids.len(), 6);
    assert_eq!(unique.len(), ids.len());
    assert_eq!(rig.manager.session().email_index(), 5);
    assert_eq!(rig.manager.session().active_popups()[0].email, distraction_emails()[5]);
  }

  #[test]
  fn test_reset_run_allows_thresholds_again() {
    let mut rig = Rig::new();
    rig.poll_at(100.0);
    rig.manager.reset_run(&mut rig.store);
    assert!(rig.active_ids().is_empty());
    let mut doc = Document::new(true, (120, 40));
    rig.manager.start(&mut rig.store, &mut doc, &mut rig.rng);
    rig.doc = doc;
    rig.poll_at(100.0);
    assert_eq!(rig.active_ids(), vec!["distraction_1"]);
  }
}
