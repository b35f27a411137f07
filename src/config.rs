//! Settings from the ini file, overridden by the command line.
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, ValueEnum};

use crate::popup::DEFAULT_THRESHOLDS;
use crate::template::{TemplateMode, TemplateSource};
use crate::timer::{DEFAULT_DURATION, DEFAULT_URGENCY};

pub const CONF_FILE_NAME: &str = "inbox-panic.ini";
pub const CONF_SECTION: &str = "inbox-panic";
pub const DEFAULT_STATE_FILE: &str = "inbox-panic-state.json";
pub const DEFAULT_RENDER_INTERVAL_MS: u64 = 50;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_PLAYER: &str = "mpg123 -q";
pub const DEFAULT_LOOP_ARGS: &str = "--loop -1";
pub const DEFAULT_SOUNDS_DIR: &str = "sounds";

// Validation ranges
const MIN_DURATION: f64 = 1.0;
const MAX_DURATION: f64 = 3600.0;
const MIN_INTERVAL_MS: u64 = 10;
const MAX_INTERVAL_MS: u64 = 5000;

pub type IniMap = HashMap<String, HashMap<String, Option<String>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PageArg {
  Welcome,
  Active,
  Results,
}

#[derive(Parser, Debug)]
#[command(name = "inbox-panic")]
#[command(about = "Beat the countdown while the inbox tries to distract you")]
#[command(version)]
pub struct Args {
  /// Ini file to read settings from
  #[arg(short, long, default_value = CONF_FILE_NAME)]
  pub config: PathBuf,

  /// Page to open instead of resuming
  #[arg(short, long, value_enum)]
  pub page: Option<PageArg>,

  /// File holding the persisted game state
  #[arg(short, long)]
  pub state_file: Option<PathBuf>,

  /// Disable all sounds
  #[arg(short, long)]
  pub mute: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
  pub duration: f64,
  pub urgency: f64,
  pub thresholds: Vec<u32>,
  pub render_interval_ms: u64,
  pub poll_interval_ms: u64,
  pub template: TemplateSource,
  pub template_mode: TemplateMode,
  pub sounds_dir: PathBuf,
  pub player: String,
  pub loop_args: String,
  pub sound: bool,
  pub state_file: PathBuf,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      duration: DEFAULT_DURATION,
      urgency: DEFAULT_URGENCY,
      thresholds: DEFAULT_THRESHOLDS.to_vec(),
      render_interval_ms: DEFAULT_RENDER_INTERVAL_MS,
      poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
      template: TemplateSource::Builtin,
      template_mode: TemplateMode::default(),
      sounds_dir: PathBuf::from(DEFAULT_SOUNDS_DIR),
      player: DEFAULT_PLAYER.to_string(),
      loop_args: DEFAULT_LOOP_ARGS.to_string(),
      sound: true,
      state_file: PathBuf::from(DEFAULT_STATE_FILE),
    }
  }
}

fn reject<T: std::fmt::Debug>(name: &str, value: &str, reason: &str, default: T) -> T {
  warn!("Config value '{}' = '{}' {}, using default {:?}", name, value, reason, default);
  eprintln!("Warning: {} value '{}' {}, using default {:?}", name, value, reason, default);
  default
}

/// Parse and validate a seconds value
fn parse_seconds(value: &str, name: &str, min: f64, max: f64, default: f64) -> f64 {
  match value.trim().parse::<f64>() {
    Ok(secs) if secs >= min && secs <= max => secs,
    Ok(_) => reject(name, value, &format!("is out of range [{}, {}]", min, max), default),
    Err(e) => reject(name, value, &format!("is invalid ({})", e), default),
  }
}

fn parse_interval(value: &str, name: &str, default: u64) -> u64 {
  match value.trim().parse::<u64>() {
    Ok(ms) if (MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&ms) => ms,
    Ok(_) => reject(name, value, &format!("is out of range [{}, {}]", MIN_INTERVAL_MS, MAX_INTERVAL_MS), default),
    Err(e) => reject(name, value, &format!("is invalid ({})", e), default),
  }
}

/// Comma separated thresholds, kept in the given order.
fn parse_thresholds(value: &str, default: Vec<u32>) -> Vec<u32> {
  let parsed: Result<Vec<u32>, _> = value
    .split(',')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::parse::<u32>)
    .collect();
  match parsed {
    Ok(list) if !list.is_empty() => {
      let mut unique = Vec::with_capacity(list.len());
      for t in list {
        if !unique.contains(&t) {
          unique.push(t);
        }
      }
      unique
    }
    Ok(_) => reject("thresholds", value, "is empty", default),
    Err(e) => reject("thresholds", value, &format!("is invalid ({})", e), default),
  }
}

fn parse_bool(value: &str, name: &str, default: bool) -> bool {
  match value.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => true,
    "0" | "false" | "no" | "off" => false,
    _ => reject(name, value, "is not a boolean", default),
  }
}

impl Config {
  pub fn from_ini(inimap: &IniMap) -> Self {
    let mut config = Config::default();
    let Some(section) = inimap.get(CONF_SECTION) else {
      info!("No [{}] section, using defaults", CONF_SECTION);
      return config;
    };
    let get = |key: &str| section.get(key).and_then(|v| v.as_deref());

    if let Some(val) = get("duration") {
      config.duration = parse_seconds(val, "duration", MIN_DURATION, MAX_DURATION, DEFAULT_DURATION);
    }
    if let Some(val) = get("urgency") {
      config.urgency = parse_seconds(val, "urgency", 0.0, config.duration, DEFAULT_URGENCY.min(config.duration));
    }
    if let Some(val) = get("thresholds") {
      config.thresholds = parse_thresholds(val, DEFAULT_THRESHOLDS.to_vec());
    }
    if let Some(val) = get("render_interval_ms") {
      config.render_interval_ms = parse_interval(val, "render_interval_ms", DEFAULT_RENDER_INTERVAL_MS);
    }
    if let Some(val) = get("poll_interval_ms") {
      config.poll_interval_ms = parse_interval(val, "poll_interval_ms", DEFAULT_POLL_INTERVAL_MS);
    }
    if config.poll_interval_ms <= config.render_interval_ms {
      warn!(
        "poll_interval_ms ({}) should be coarser than render_interval_ms ({})",
        config.poll_interval_ms, config.render_interval_ms
      );
    }
    if let Some(val) = get("template") {
      config.template = TemplateSource::File(PathBuf::from(val.trim()));
    }
    if let Some(val) = get("template_mode") {
      config.template_mode = TemplateMode::from_str(val.trim())
        .unwrap_or_else(|_| reject("template_mode", val, "is unknown", TemplateMode::default()));
    }
    if let Some(val) = get("sounds_dir") {
      config.sounds_dir = PathBuf::from(val.trim());
    }
    if let Some(val) = get("player") {
      if val.trim().is_empty() {
        config.player = reject("player", val, "is empty", DEFAULT_PLAYER.to_string());
      } else {
        config.player = val.trim().to_string();
      }
    }
    if let Some(val) = get("loop_args") {
      config.loop_args = val.trim().to_string();
    }
    if let Some(val) = get("sound") {
      config.sound = parse_bool(val, "sound", true);
    }
    if let Some(val) = get("state_file") {
      config.state_file = PathBuf::from(val.trim());
    }
    config
  }

  pub fn apply_args(&mut self, args: &Args) {
    if let Some(path) = &args.state_file {
      self.state_file = path.clone();
    }
    if args.mute {
      self.sound = false;
    }
  }
}
