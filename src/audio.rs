//! Sound handles and playback backends.
//!
//! Playback is fire-and-forget: a backend reports failures (missing asset,
//! player not installed) as errors and callers log them and carry on.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoStaticStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr, Serialize, Deserialize)]
pub enum Sound {
  #[strum(serialize = "times-up.mp3")]
  TimesUp,
  #[strum(serialize = "clock.mp3")]
  Clock,
  #[strum(serialize = "youve-got-mail.mp3")]
  YouveGotMail,
  #[strum(serialize = "futuristic-ding.mp3")]
  FuturisticDing,
  #[strum(serialize = "four-bells.mp3")]
  FourBells,
  #[strum(serialize = "email.mp3")]
  Email,
  #[strum(serialize = "boing.mp3")]
  Boing,
  #[strum(serialize = "tune.mp3")]
  Tune,
}

impl Sound {
  pub fn file_name(self) -> &'static str {
    self.into()
  }

  pub fn path_in(self, dir: &Path) -> PathBuf {
    dir.join(self.file_name())
  }
}

pub trait AudioBackend {
  /// One-shot playback.
  fn play(&mut self, sound: Sound) -> Result<()>;
  /// Starts looping `sound`. Callers guarantee a loop is started at most once.
  fn start_loop(&mut self, sound: Sound) -> Result<()>;
  fn stop_loop(&mut self, sound: Sound);
}

impl<A: AudioBackend + ?Sized> AudioBackend for Box<A> {
  fn play(&mut self, sound: Sound) -> Result<()> {
    (**self).play(sound)
  }

  fn start_loop(&mut self, sound: Sound) -> Result<()> {
    (**self).start_loop(sound)
  }

  fn stop_loop(&mut self, sound: Sound) {
    (**self).stop_loop(sound)
  }
}

/// Plays sounds by spawning an external player process per sound.
pub struct CommandPlayer {
  program: String,
  args: Vec<String>,
  loop_args: Vec<String>,
  sounds_dir: PathBuf,
  one_shots: Vec<Child>,
  loops: HashMap<Sound, Child>,
}

impl CommandPlayer {
  /// `command` is the player invocation, e.g. `mpg123 -q`; the sound path is appended.
  pub fn new(command: &str, loop_args: &str, sounds_dir: impl Into<PathBuf>) -> Result<Self> {
    let mut parts = command.split_whitespace().map(str::to_string);
    let program = parts.next().ok_or(eyre!("Empty audio player command"))?;
    Ok(Self {
      program,
      args: parts.collect(),
      loop_args: loop_args.split_whitespace().map(str::to_string).collect(),
      sounds_dir: sounds_dir.into(),
      one_shots: Vec::new(),
      loops: HashMap::new(),
    })
  }

  fn spawn(&self, sound: Sound, looping: bool) -> Result<Child> {
    let path = sound.path_in(&self.sounds_dir);
    if !path.exists() {
      return Err(eyre!("Sound asset {} not found", path.display()));
    }
    let mut cmd = Command::new(&self.program);
    cmd.args(&self.args);
    if looping {
      cmd.args(&self.loop_args);
    }
    let child = cmd
      .arg(&path)
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .spawn()
      .map_err(|e| eyre!("Failed to start {} for {}: {}", self.program, path.display(), e))?;
    Ok(child)
  }

  fn reap(&mut self) {
    self.one_shots.retain_mut(|child| matches!(child.try_wait(), Ok(None)));
  }
}

impl AudioBackend for CommandPlayer {
  fn play(&mut self, sound: Sound) -> Result<()> {
    self.reap();
    let child = self.spawn(sound, false)?;
    self.one_shots.push(child);
    Ok(())
  }

  fn start_loop(&mut self, sound: Sound) -> Result<()> {
    let child = self.spawn(sound, true)?;
    if let Some(mut old) = self.loops.insert(sound, child) {
      let _ = old.kill();
      let _ = old.wait();
    }
    Ok(())
  }

  fn stop_loop(&mut self, sound: Sound) {
    if let Some(mut child) = self.loops.remove(&sound) {
      if let Err(e) = child.kill() {
        debug!("Loop for {} already ended: {}", sound.file_name(), e);
      }
      let _ = child.wait();
    }
  }
}

impl Drop for CommandPlayer {
  fn drop(&mut self) {
    for (_, mut child) in self.loops.drain() {
      let _ = child.kill();
      let _ = child.wait();
    }
  }
}

/// Backend used when sound is disabled.
#[derive(Debug, Default)]
pub struct Muted;

impl AudioBackend for Muted {
  fn play(&mut self, sound: Sound) -> Result<()> {
    debug!("Muted: {}", sound.file_name());
    Ok(())
  }

  fn start_loop(&mut self, sound: Sound) -> Result<()> {
    debug!("Muted loop: {}", sound.file_name());
    Ok(())
  }

  fn stop_loop(&mut self, _sound: Sound) {}
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioCall {
  Play(Sound),
  StartLoop(Sound),
  StopLoop(Sound),
}

/// Records every call; `fail` makes playback calls return errors.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingAudio {
  pub calls: Vec<AudioCall>,
  pub fail: bool,
}

#[cfg(test)]
impl RecordingAudio {
  pub fn count(&self, call: &AudioCall) -> usize {
    self.calls.iter().filter(|c| *c == call).count()
  }
}

#[cfg(test)]
impl AudioBackend for RecordingAudio {
  fn play(&mut self, sound: Sound) -> Result<()> {
    self.calls.push(AudioCall::Play(sound));
    if self.fail { Err(eyre!("playback blocked")) } else { Ok(()) }
  }

  fn start_loop(&mut self, sound: Sound) -> Result<()> {
    self.calls.push(AudioCall::StartLoop(sound));
    if self.fail { Err(eyre!("playback blocked")) } else { Ok(()) }
  }

  fn stop_loop(&mut self, sound: Sound) {
    self.calls.push(AudioCall::StopLoop(sound));
  }
}
