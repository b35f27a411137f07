/////////////////////
/// INBOX PANIC - the countdown that keeps getting interrupted
///
/// You have two minutes to fix the database. Your inbox has other plans:
/// as the clock runs down, emails from the intern, the CTO and worse pop up
/// at random spots on the screen until you close them.
/// - 'space' starts the countdown on the welcome page
/// - 'x' closes the top email (or click its [x])
/// - 'enter' shows the results once time is up
/// - 'r' plays again from the results page
/// - 'q' quits; relaunching resumes the running countdown
///
pub const APP_VERSION: &str = "INBOX PANIC V0.1.0";

// UI
const FLASH_PERIOD_MS: u64 = 500;             // Urgency flash half-period
const TIMES_UP_WIDTH: u16 = 40;
const TIMES_UP_HEIGHT: u16 = 7;

use std::time::Duration;
#[macro_use] extern crate log;
extern crate simplelog;
use simplelog::*;
use std::fs::File;
#[macro_use]
extern crate ini;

mod audio;
mod config;
mod document;
mod email;
mod popup;
mod session;
mod store;
mod template;
mod timer;

use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use futures::{FutureExt, StreamExt};
use ratatui::{backend::CrosstermBackend as Backend, prelude::*, widgets::*, widgets::block::Title};
use strum::EnumIs;
use tui_big_text::BigText;
use crossterm::event::{KeyEvent, KeyCode, MouseButton, MouseEvent, MouseEventKind};
use rand::thread_rng;
use build_time::{build_time_local};

use audio::{AudioBackend, CommandPlayer, Muted};
use config::{Args, PageArg};
use document::{Document, Element, PopupElement, CLOSE_GLYPH};
use popup::PopupManager;
use store::{FileStore, KvStore};
use timer::{now_ms, read_start_time, TimerController};

#[derive(Clone, Debug)]
pub enum Event {
  Error,
  Tick,
  Poll,
  Key(KeyEvent),
  Mouse(MouseEvent),
  Resize(u16, u16),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumIs)]
enum AppState {
  #[default]
  Running,
  Quitting,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumIs)]
enum Page {
  #[default]
  Welcome,
  Active,
  Results,
}

impl Page {
  /// Page to open at launch: an explicit request wins, otherwise resume a running countdown.
  fn at_launch(requested: Option<PageArg>, store: &dyn KvStore) -> Self {
    match requested {
      Some(PageArg::Welcome) => Page::Welcome,
      Some(PageArg::Active) => Page::Active,
      Some(PageArg::Results) => Page::Results,
      None if read_start_time(store).is_some() => Page::Active,
      None => Page::Welcome,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Message {
  Start,
  CloseTop,
  CloseAt(u16, u16),
  ShowResults,
  PlayAgain,
  Tick,
  Poll,
  Resize(u16, u16),
  Quit,
  Nothing,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let args = Args::parse();
  init_logging();

  // Load config from ini file
  info!("Reading config from {}", args.config.display());
  let config_path = args.config.to_string_lossy().to_string();
  let inimap = match ini!(safe config_path.as_str()) {
    Ok(map) => map,
    Err(error) => {
      eprintln!("Warning: Couldn't load config file '{}': {}", args.config.display(), error);
      eprintln!("Continuing with default values.");
      info!("Using default configuration");
      std::collections::HashMap::new()
    }
  };
  let mut config = config::Config::from_ini(&inimap);
  config.apply_args(&args);
  info!("{:?}", config);

  let store = FileStore::open(&config.state_file);
  let audio: Box<dyn AudioBackend> = if config.sound {
    match CommandPlayer::new(&config.player, &config.loop_args, &config.sounds_dir) {
      Ok(player) => Box::new(player),
      Err(e) => {
        warn!("Audio disabled: {}", e);
        Box::new(Muted)
      }
    }
  } else {
    Box::new(Muted)
  };

  let viewport = crossterm::terminal::size().unwrap_or((80, 24));
  let page = Page::at_launch(args.page, &store);
  let mut app = DistractionApp::new(config, store, audio, viewport);
  app.open(page, now_ms());
  app.run().await
}

fn init_logging() {
  let mut loggers: Vec<Box<dyn SharedLogger>> = vec![
    TermLogger::new(LevelFilter::Warn, Config::default(), TerminalMode::Mixed, ColorChoice::Auto),
  ];
  match File::create("inbox-panic.log") {
    Ok(log_file) => loggers.push(WriteLogger::new(LevelFilter::Info, Config::default(), log_file)),
    Err(e) => {
      eprintln!("Warning: Could not create log file: {}", e);
      eprintln!("Continuing with terminal logging only.");
    }
  }
  CombinedLogger::init(loggers).unwrap_or_else(|e| {
    eprintln!("Warning: Could not initialize logger: {}", e);
  });
  info!("Logging for {} initialized", APP_VERSION);
}

struct DistractionApp<S: KvStore, A: AudioBackend> {
  state: AppState,
  page: Page,
  config: config::Config,
  store: S,
  audio: A,
  doc: Document,
  timer: TimerController,
  popups: PopupManager,
}

impl<S: KvStore, A: AudioBackend> DistractionApp<S, A> {
  fn new(config: config::Config, store: S, audio: A, viewport: (u16, u16)) -> Self {
    let timer = TimerController::new(config.duration, config.urgency);
    let popups = PopupManager::new(
      email::distraction_emails(),
      config.thresholds.clone(),
      config.template.clone(),
      config.template_mode,
      &store,
      timer.subscribe(),
    );
    Self {
      state: Default::default(),
      page: Default::default(),
      doc: Document::new(false, viewport),
      config,
      store,
      audio,
      timer,
      popups,
    }
  }

  /// Loads `page` from scratch, like navigating to it.
  fn open(&mut self, page: Page, now: u64) {
    info!("Opening {:?} page", page);
    self.page = page;
    self.doc = Document::new(page.is_active(), self.doc.viewport());
    match page {
      Page::Welcome => {
        self.popups.reset_run(&mut self.store);
        self.timer.clear_timer(&mut self.store, &mut self.doc, &mut self.audio);
      }
      Page::Active => {
        self.timer.continue_timer(&mut self.store, &mut self.doc, &mut self.audio, now);
        self.popups.start(&mut self.store, &mut self.doc, &mut thread_rng());
      }
      Page::Results => {
        self.popups.stop();
        self.timer.load_paused_timer(&self.store, &mut self.doc, &mut self.audio, now);
      }
    }
  }

  async fn run(&mut self) -> Result<()> {
    let mut tui = Tui::new()?;
    tui.enter(self.config.render_interval_ms, self.config.poll_interval_ms)?;
    while !self.state.is_quitting() {
      let now = now_ms();
      tui.draw(|f| self.ui(f, now))?;
      let event = tui.next().await.ok_or(eyre!("Unable to get event"))?; // blocks until next event
      let message = self.handle_event(event);
      self.update(message, now_ms());
    }
    tui.exit()?;
    println!("Thanks for using {} (built: {})\n", APP_VERSION, build_time_local!("%Y-%b-%d at %H:%M:%S"));
    Ok(())
  }

  // Event handler (keyboard, mouse, ticks)
  fn handle_event(&self, event: Event) -> Message {
    match event {
      Event::Key(key) => match (self.page, key.code) {
        (_, KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc) => Message::Quit,
        (Page::Welcome, KeyCode::Char(' ') | KeyCode::Enter) => Message::Start,
        (Page::Active, KeyCode::Char('x') | KeyCode::Char('X')) => Message::CloseTop,
        (Page::Active, KeyCode::Enter) => Message::ShowResults,
        (Page::Results, KeyCode::Char(' ') | KeyCode::Enter | KeyCode::Char('r') | KeyCode::Char('R')) => {
          Message::PlayAgain
        }
        _ => Message::Nothing,
      },
      Event::Mouse(mouse) => match mouse.kind {
        MouseEventKind::Down(MouseButton::Left) if self.page.is_active() => Message::CloseAt(mouse.column, mouse.row),
        _ => Message::Nothing,
      },
      Event::Resize(width, height) => Message::Resize(width, height),
      Event::Tick => Message::Tick,
      Event::Poll => Message::Poll,
      Event::Error => Message::Nothing,
    }
  }

  fn update(&mut self, message: Message, now: u64) {
    match message {
      Message::Start => {
        self.timer.start_timer(&mut self.store, now);
        self.open(Page::Active, now);
      }
      Message::CloseTop => {
        if let Some(id) = self.doc.top_popup().map(str::to_string) {
          self.popups.dismiss(&mut self.store, &mut self.doc, &id);
        }
      }
      Message::CloseAt(column, row) => {
        if let Some(id) = self.doc.close_control_at(column, row).map(str::to_string) {
          self.popups.dismiss(&mut self.store, &mut self.doc, &id);
        }
      }
      Message::ShowResults => {
        if self.doc.times_up_visible() {
          self.open(Page::Results, now);
        }
      }
      Message::PlayAgain => self.open(Page::Welcome, now),
      Message::Tick => {
        if self.page.is_active() {
          self.timer.tick(&mut self.doc, &mut self.audio, now);
        }
      }
      Message::Poll => {
        if self.page.is_active() {
          self.popups.poll(&mut self.store, &mut self.doc, &mut self.audio, &mut thread_rng());
        }
      }
      Message::Resize(width, height) => self.doc.set_viewport(width, height),
      Message::Quit => self.quit(),
      Message::Nothing => {}
    }
  }

  fn quit(&mut self) {
    self.popups.stop();
    self.state = AppState::Quitting;
  }

  fn ui(&mut self, f: &mut Frame, now: u64) {
    let area = f.size();
    self.doc.set_viewport(area.width, area.height);
    let layout = self.layout(area);
    f.render_widget(self.title_paragraph(), layout[0]);
    f.render_widget(self.timer_big_text(now), layout[1]);
    f.render_widget(self.display_paragraph(), layout[2]);
    f.render_widget(self.story_paragraph(), layout[3]);
    f.render_widget(self.help_paragraph(), layout[4]);

    let viewport = self.doc.viewport();
    for element in self.doc.elements() {
      match element {
        Element::Popup(popup) if popup.visible => render_popup(f, popup, viewport),
        Element::TimesUpContainer { visible: true } => render_times_up(f, area),
        _ => {}
      }
    }
  }

  fn layout(&self, area: Rect) -> Vec<Rect> {
    let layout = Layout::default()
      .direction(Direction::Vertical)
      .constraints(vec![
        Constraint::Length(3), // top bar
        Constraint::Length(9), // big timer
        Constraint::Length(2), // timer display
        Constraint::Length(3), // story
        Constraint::Length(2), // help
      ])
      .split(area);

    layout.to_vec()
  }

  fn title_paragraph(&self) -> Paragraph<'_> {
    let title_text = Line::from(vec![APP_VERSION.into(), " - ".into(), "don't check your email".dim()]);
    Paragraph::new(title_text).gray()
  }

  fn timer_big_text(&self, now: u64) -> BigText<'_> {
    let display = &self.doc.timer_display;
    let style = if display.flashing {
      if (now / FLASH_PERIOD_MS) % 2 == 0 { Style::new().white() } else { Style::new().red() }
    } else {
      match self.page {
        Page::Welcome => Style::new().blue(),
        Page::Active => Style::new().green(),
        Page::Results => Style::new().gray(),
      }
    };
    let seconds = display.text.split_whitespace().next().unwrap_or_default().to_string();
    let lines = vec![seconds.into()];
    tui_big_text::BigTextBuilder::default()
      .lines(lines)
      .style(style)
      .build()
      .expect("lines is set, so BigText build cannot fail")
  }

  fn display_paragraph(&self) -> Paragraph<'_> {
    let display = &self.doc.timer_display;
    let style = if display.flashing { Style::new().red().bold() } else { Style::new().white() };
    Paragraph::new(Line::from(Span::styled(display.text.as_str(), style)))
  }

  fn story_paragraph(&self) -> Paragraph<'_> {
    let story = match self.page {
      Page::Welcome => format!(
        "The production database is on fire and you have {:.0} seconds to fix it. Whatever lands in your inbox, stay focused.",
        self.timer.duration()
      ),
      Page::Active => "Fix the database! Close every distraction before it eats your focus.".to_string(),
      Page::Results => "That's all the time you had. How did you do?".to_string(),
    };
    Paragraph::new(story).gray().wrap(Wrap { trim: true })
  }

  fn help_paragraph(&self) -> Paragraph<'_> {
    let help_text = match self.page {
      Page::Welcome => Line::from(vec!["space ".into(), "start".dim(), " : q ".into(), "quit".dim()]),
      Page::Active => {
        let mut spans = vec!["x ".into(), "close email".dim()];
        if self.doc.times_up_visible() {
          spans.extend(vec![" : enter ".into(), "results".dim()]);
        }
        spans.extend(vec![" : q ".into(), "quit".dim()]);
        Line::from(spans)
      }
      Page::Results => Line::from(vec!["space ".into(), "play again".dim(), " : q ".into(), "quit".dim()]),
    };
    Paragraph::new(help_text).gray()
  }
}

fn render_popup(f: &mut Frame, popup: &PopupElement, viewport: (u16, u16)) {
  let (x, y, width, height) = popup.rect(viewport);
  if width == 0 || height == 0 {
    return;
  }
  let area = Rect::new(x, y, width, height);
  let mut block = Block::default()
    .borders(Borders::ALL)
    .border_style(Style::new().yellow())
    .title(Title::from(CLOSE_GLYPH).alignment(Alignment::Right));
  if let Some(title) = &popup.title {
    block = block.title(title.as_str());
  }
  let lines: Vec<Line> = popup.lines.iter().map(|l| Line::from(l.as_str())).collect();
  f.render_widget(Clear, area);
  f.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_times_up(f: &mut Frame, area: Rect) {
  let width = TIMES_UP_WIDTH.min(area.width);
  let height = TIMES_UP_HEIGHT.min(area.height);
  let popup_area = Rect::new(
    area.x + (area.width - width) / 2,
    area.y + (area.height - height) / 2,
    width,
    height,
  );
  let block = Block::default().borders(Borders::ALL).border_style(Style::new().red()).title("TIME'S UP");
  let text = vec![
    Line::from(""),
    Line::from("Time's up!".red().bold()),
    Line::from(""),
    Line::from(vec!["enter ".into(), "see your results".dim()]),
  ];
  f.render_widget(Clear, popup_area);
  f.render_widget(Paragraph::new(text).alignment(Alignment::Center).block(block), popup_area);
}

struct Tui {
  pub terminal: Terminal<Backend<std::io::Stderr>>,
  pub task: tokio::task::JoinHandle<()>,
  pub cancellation_token: tokio_util::sync::CancellationToken,
  pub event_rx: tokio::sync::mpsc::UnboundedReceiver<Event>,
  pub event_tx: tokio::sync::mpsc::UnboundedSender<Event>,
}

impl Tui {
  fn new() -> Result<Tui> {
    let mut terminal = ratatui::Terminal::new(Backend::new(std::io::stderr()))?;
    terminal.clear()?;
    let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
    let cancellation_token = tokio_util::sync::CancellationToken::new();
    let task = tokio::spawn(async {});
    Ok(Self { terminal, task, cancellation_token, event_rx, event_tx })
  }

  pub async fn next(&mut self) -> Option<Event> {
    self.event_rx.recv().await
  }

  pub fn enter(&mut self, render_ms: u64, poll_ms: u64) -> Result<()> {
    crossterm::terminal::enable_raw_mode()?;
    crossterm::execute!(
      std::io::stderr(),
      crossterm::terminal::EnterAlternateScreen,
      crossterm::event::EnableMouseCapture,
      crossterm::cursor::Hide
    )?;
    self.start(render_ms, poll_ms);
    Ok(())
  }

  pub fn exit(&self) -> Result<()> {
    self.stop()?;
    crossterm::execute!(
      std::io::stderr(),
      crossterm::event::DisableMouseCapture,
      crossterm::terminal::LeaveAlternateScreen,
      crossterm::cursor::Show
    )?;
    crossterm::terminal::disable_raw_mode()?;
    Ok(())
  }

  pub fn cancel(&self) {
    self.cancellation_token.cancel();
  }

  pub fn stop(&self) -> Result<()> {
    self.cancel();
    let mut counter = 0;
    while !self.task.is_finished() {
      std::thread::sleep(Duration::from_millis(250));
      counter += 1;
      if counter > 5 {
        self.task.abort();
      }
      if counter > 10 {
        log::error!("Failed to abort task for unknown reason");
        return Err(eyre!("Unable to abort task"));
      }
    }
    Ok(())
  }

  /// Spawns the event task: terminal input plus the render and poll ticks.
  pub fn start(&mut self, render_ms: u64, poll_ms: u64) {
    let render_rate = Duration::from_millis(render_ms);
    let poll_rate = Duration::from_millis(poll_ms);
    self.cancel();
    self.cancellation_token = tokio_util::sync::CancellationToken::new();
    let _cancellation_token = self.cancellation_token.clone();
    let _event_tx = self.event_tx.clone();
    self.task = tokio::spawn(async move {
      let mut reader = crossterm::event::EventStream::new();
      let mut render_interval = tokio::time::interval(render_rate);
      let mut poll_interval = tokio::time::interval(poll_rate);
      loop {
        let render_delay = render_interval.tick();
        let poll_delay = poll_interval.tick();
        let crossterm_event = reader.next().fuse();
        let event = tokio::select! {
          _ = _cancellation_token.cancelled() => {
            break;
          }
          maybe_event = crossterm_event => {
            match maybe_event {
              Some(Ok(crossterm::event::Event::Key(key))) if key.kind == crossterm::event::KeyEventKind::Press => {
                Some(Event::Key(key))
              }
              Some(Ok(crossterm::event::Event::Mouse(mouse))) => Some(Event::Mouse(mouse)),
              Some(Ok(crossterm::event::Event::Resize(width, height))) => Some(Event::Resize(width, height)),
              Some(Ok(_)) => None,
              Some(Err(_)) => Some(Event::Error),
              None => None,
            }
          },
          _ = render_delay => Some(Event::Tick),
          _ = poll_delay => Some(Event::Poll),
        };
        if let Some(event) = event {
          if let Err(e) = _event_tx.send(event) {
            log::error!("Failed to send event: {}", e);
          }
        }
      }
    });
  }
}

impl std::ops::Deref for Tui {
  type Target = ratatui::Terminal<Backend<std::io::Stderr>>;

  fn deref(&self) -> &Self::Target {
    &self.terminal
  }
}

impl std::ops::DerefMut for Tui {
  fn deref_mut(&mut self) -> &mut Self::Target {
    &mut self.terminal
  }
}

impl Drop for Tui {
  fn drop(&mut self) {
    if let Err(e) = self.exit() {
      eprintln!("Error during cleanup: {}", e);
      // Don't panic in Drop - just log the error
    }
  }
}
