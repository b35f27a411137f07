//! What is on screen: the timer display, inserted popups and the "time's up"
//! container. The draw pass renders this model; later elements sit on top.
use rand::Rng;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::session::Position;
use crate::template::Fragment;

pub const PLACEMENT_BUFFER: f64 = 2.0;    // Cells kept clear on every edge
const POPUP_MAX_TEXT_WIDTH: usize = 56;
const POPUP_CHROME: u16 = 2;              // Border on each axis
pub const CLOSE_GLYPH: &str = "[x]";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TimerDisplay {
  pub text: String,
  pub flashing: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PopupElement {
  pub overlay_id: String,
  pub content_id: String,
  pub title: Option<String>,
  pub lines: Vec<String>,
  pub visible: bool,
  pub position: Position,
}

impl PopupElement {
  fn from_fragment(fragment: Fragment) -> Self {
    Self {
      overlay_id: fragment.overlay_id,
      content_id: fragment.content_id,
      title: fragment.title,
      lines: wrap_lines(&fragment.lines, POPUP_MAX_TEXT_WIDTH),
      visible: false,
      position: Position { left: 0.0, top: 0.0 },
    }
  }

  /// Rendered size in cells, border included.
  pub fn size(&self) -> (u16, u16) {
    let text_width = self.lines.iter().map(|l| l.width()).max().unwrap_or(0);
    let title_width = self.title.as_deref().map_or(0, UnicodeWidthStr::width) + CLOSE_GLYPH.len() + 2;
    let width = text_width.max(title_width).min(u16::MAX as usize - 2) as u16 + POPUP_CHROME;
    let height = (self.lines.len().min(u16::MAX as usize - 2)) as u16 + POPUP_CHROME;
    (width, height)
  }

  /// Screen rectangle as `(x, y, width, height)`, clipped to the viewport.
  pub fn rect(&self, viewport: (u16, u16)) -> (u16, u16, u16, u16) {
    let (vw, vh) = viewport;
    let x = (self.position.left.max(0.0).floor() as u16).min(vw);
    let y = (self.position.top.max(0.0).floor() as u16).min(vh);
    let (w, h) = self.size();
    (x, y, w.min(vw - x), h.min(vh - y))
  }

  fn close_hit(&self, viewport: (u16, u16), column: u16, row: u16) -> bool {
    let (x, y, w, h) = self.rect(viewport);
    let glyph = CLOSE_GLYPH.len() as u16;
    if w < glyph + 2 || h == 0 {
      return false;
    }
    let right = x + w - 1;
    row == y && column >= right - glyph && column < right
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
  Popup(PopupElement),
  TimesUpContainer { visible: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
  pub timer_display: TimerDisplay,
  elements: Vec<Element>,
  viewport: (u16, u16),
}

impl Document {
  /// `with_times_up` adds the terminal container, which is also the insertion anchor.
  pub fn new(with_times_up: bool, viewport: (u16, u16)) -> Self {
    let elements = if with_times_up { vec![Element::TimesUpContainer { visible: false }] } else { Vec::new() };
    Self { timer_display: TimerDisplay::default(), elements, viewport }
  }

  pub fn viewport(&self) -> (u16, u16) {
    self.viewport
  }

  pub fn set_viewport(&mut self, width: u16, height: u16) {
    self.viewport = (width, height);
  }

  pub fn elements(&self) -> &[Element] {
    &self.elements
  }

  fn anchor_index(&self) -> Option<usize> {
    self.elements.iter().position(|e| matches!(e, Element::TimesUpContainer { .. }))
  }

  /// Inserts before the times-up container when there is one, else at the end.
  pub fn insert_fragment(&mut self, fragment: Fragment) {
    let element = Element::Popup(PopupElement::from_fragment(fragment));
    match self.anchor_index() {
      Some(index) => self.elements.insert(index, element),
      None => self.elements.push(element),
    }
  }

  /// First element carrying `overlay_id`, mirroring id lookup in a page.
  pub fn popup_mut(&mut self, overlay_id: &str) -> Option<&mut PopupElement> {
    self.elements.iter_mut().find_map(|e| match e {
      Element::Popup(p) if p.overlay_id == overlay_id => Some(p),
      _ => None,
    })
  }

  pub fn popup(&self, overlay_id: &str) -> Option<&PopupElement> {
    self.elements.iter().find_map(|e| match e {
      Element::Popup(p) if p.overlay_id == overlay_id => Some(p),
      _ => None,
    })
  }

  pub fn visible_popups(&self) -> impl Iterator<Item = &PopupElement> {
    self.elements.iter().filter_map(|e| match e {
      Element::Popup(p) if p.visible => Some(p),
      _ => None,
    })
  }

  pub fn hide_popup(&mut self, overlay_id: &str) {
    if let Some(popup) = self.popup_mut(overlay_id) {
      popup.visible = false;
    }
  }

  /// Overlay id of the top-most visible popup.
  pub fn top_popup(&self) -> Option<&str> {
    self.visible_popups().last().map(|p| p.overlay_id.as_str())
  }

  /// Overlay id of the top-most visible popup whose close control is at the cell.
  pub fn close_control_at(&self, column: u16, row: u16) -> Option<&str> {
    let viewport = self.viewport;
    self.visible_popups()
      .filter(|p| p.close_hit(viewport, column, row))
      .last()
      .map(|p| p.overlay_id.as_str())
  }

  pub fn reveal_times_up(&mut self) {
    for element in self.elements.iter_mut() {
      if let Element::TimesUpContainer { visible } = element {
        *visible = true;
      }
    }
  }

  pub fn times_up_visible(&self) -> bool {
    self.elements.iter().any(|e| matches!(e, Element::TimesUpContainer { visible: true }))
  }
}

/// Uniform placement inside the viewport inset by `buffer`; the buffer wins
/// when the popup does not fit.
pub fn random_placement<R: Rng + ?Sized>(rng: &mut R, viewport: (u16, u16), size: (u16, u16), buffer: f64) -> Position {
  let (vw, vh) = (viewport.0 as f64, viewport.1 as f64);
  let (pw, ph) = (size.0 as f64, size.1 as f64);
  let max_left = buffer.max(vw - pw - buffer);
  let max_top = buffer.max(vh - ph - buffer);
  let left = rng.gen::<f64>() * (max_left - buffer) + buffer;
  let top = rng.gen::<f64>() * (max_top - buffer) + buffer;
  Position { left, top }
}

/// Greedy word wrap by display width; words wider than `width` are split.
pub fn wrap_lines(lines: &[String], width: usize) -> Vec<String> {
  let mut out = Vec::new();
  for line in lines {
    if line.width() <= width {
      out.push(line.clone());
      continue;
    }
    let mut current = String::new();
    for word in line.split_whitespace() {
      let mut word = word.to_string();
      while word.width() > width {
        if !current.is_empty() {
          out.push(std::mem::take(&mut current));
        }
        let (head, tail) = split_at_width(&word, width);
        out.push(head.to_string());
        word = tail.to_string();
      }
      let needed = current.width() + usize::from(!current.is_empty()) + word.width();
      if needed > width && !current.is_empty() {
        out.push(std::mem::take(&mut current));
      }
      if !current.is_empty() {
        current.push(' ');
      }
      current.push_str(&word);
    }
    if !current.is_empty() {
      out.push(current);
    }
  }
  out
}

/// Longest prefix fitting in `width` cells, never empty.
fn split_at_width(word: &str, width: usize) -> (&str, &str) {
  let mut used = 0;
  for (index, c) in word.char_indices() {
    let w = c.width().unwrap_or(0);
    if used + w > width && index > 0 {
      return word.split_at(index);
    }
    used += w;
  }
  (word, "")
}
