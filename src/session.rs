//! Reload-surviving state of one distraction run.
//!
//! Loaded once from the store when a page starts and written back on every
//! mutation, so a restart resumes exactly where the previous process stopped.
//! Absent or malformed keys fall back to their defaults.
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::email::Email;
use crate::store::{
  KvStore, KEY_ACTIVE_POPUPS, KEY_EMAIL_INDEX, KEY_SHOWN_THRESHOLDS, KEY_SPAWN_COUNTER,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
  pub left: f64,
  pub top: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopupInstance {
  pub id: String,
  pub overlay_id: String,
  pub content_id: String,
  pub email: Email,
  pub position: Option<Position>,
}

impl PopupInstance {
  pub fn new(serial: u64, email: Email) -> Self {
    let id = format!("distraction_{}", serial);
    Self {
      overlay_id: format!("{}_overlay", id),
      content_id: format!("{}_content", id),
      id,
      email,
      position: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Session {
  email_index: usize,
  spawn_counter: u64,
  active_popups: Vec<PopupInstance>,
  shown_thresholds: Vec<u32>,
}

fn read_json<T: DeserializeOwned + Default>(store: &dyn KvStore, key: &str) -> T {
  match store.get(key) {
    Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
      warn!("Ignoring malformed '{}' ({}), using default", key, e);
      T::default()
    }),
    None => T::default(),
  }
}

fn write_json<T: Serialize + ?Sized>(store: &mut dyn KvStore, key: &str, value: &T) {
  match serde_json::to_string(value) {
    Ok(json) => store.set(key, json),
    Err(e) => error!("Failed to serialize '{}': {}", key, e),
  }
}

impl Session {
  pub fn load(store: &dyn KvStore, email_count: usize) -> Self {
    let email_index = store
      .get(KEY_EMAIL_INDEX)
      .and_then(|raw| raw.trim().parse::<usize>().ok())
      .unwrap_or(0);
    let spawn_counter = store
      .get(KEY_SPAWN_COUNTER)
      .and_then(|raw| raw.trim().parse::<u64>().ok())
      .unwrap_or(0);
    let session = Self {
      email_index: if email_count == 0 { 0 } else { email_index % email_count },
      spawn_counter,
      active_popups: read_json(store, KEY_ACTIVE_POPUPS),
      shown_thresholds: read_json(store, KEY_SHOWN_THRESHOLDS),
    };
    info!(
      "Session loaded: email index {}, {} active popups, thresholds shown {:?}",
      session.email_index,
      session.active_popups.len(),
      session.shown_thresholds
    );
    session
  }

  pub fn email_index(&self) -> usize {
    self.email_index
  }

  pub fn active_popups(&self) -> &[PopupInstance] {
    &self.active_popups
  }

  pub fn popup(&self, id: &str) -> Option<&PopupInstance> {
    self.active_popups.iter().find(|p| p.id == id)
  }

  pub fn is_shown(&self, threshold: u32) -> bool {
    self.shown_thresholds.contains(&threshold)
  }

  pub fn shown_thresholds(&self) -> &[u32] {
    &self.shown_thresholds
  }

  /// Returns the email under the cursor and advances the cursor, wrapping.
  pub fn take_next_email(&mut self, store: &mut dyn KvStore, emails: &[Email]) -> Option<Email> {
    let email = emails.get(self.email_index)?.clone();
    self.email_index = (self.email_index + 1) % emails.len();
    store.set(KEY_EMAIL_INDEX, self.email_index.to_string());
    Some(email)
  }

  /// Next value of the spawn counter; never reused, even across runs.
  pub fn mint_serial(&mut self, store: &mut dyn KvStore) -> u64 {
    let serial = self.spawn_counter;
    self.spawn_counter += 1;
    store.set(KEY_SPAWN_COUNTER, self.spawn_counter.to_string());
    serial
  }

  pub fn push_popup(&mut self, store: &mut dyn KvStore, popup: PopupInstance) {
    self.active_popups.push(popup);
    write_json(store, KEY_ACTIVE_POPUPS, &self.active_popups);
  }

  pub fn set_position(&mut self, store: &mut dyn KvStore, id: &str, position: Position) {
    if let Some(popup) = self.active_popups.iter_mut().find(|p| p.id == id) {
      popup.position = Some(position);
      write_json(store, KEY_ACTIVE_POPUPS, &self.active_popups);
    }
  }

  /// Drops the popup with `id`, keeping the others in order.
  pub fn remove_popup(&mut self, store: &mut dyn KvStore, id: &str) -> bool {
    let before = self.active_popups.len();
    self.active_popups.retain(|p| p.id != id);
    write_json(store, KEY_ACTIVE_POPUPS, &self.active_popups);
    self.active_popups.len() != before
  }

  pub fn mark_shown(&mut self, store: &mut dyn KvStore, threshold: u32) {
    if !self.is_shown(threshold) {
      self.shown_thresholds.push(threshold);
      write_json(store, KEY_SHOWN_THRESHOLDS, &self.shown_thresholds);
    }
  }

  /// Forgets the current run. The email cursor and spawn counter carry over.
  pub fn reset_run(&mut self, store: &mut dyn KvStore) {
    self.active_popups.clear();
    self.shown_thresholds.clear();
    store.remove(KEY_ACTIVE_POPUPS);
    store.remove(KEY_SHOWN_THRESHOLDS);
  }
}
