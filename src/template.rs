//! Popup template fetching, substitution and parsing.
//!
//! A fragment is text with directive lines (`@overlay`, `@content`,
//! `@title`) followed by the body. The body may contain the placeholders
//! `{{subject}}`, `{{from}}`, `{{body}}` and `{{signature}}`.
use std::fs;
use std::path::PathBuf;

use color_eyre::eyre::{eyre, Result};
use strum::EnumString;

use crate::email::Email;

pub const OVERLAY_ELEMENT_ID: &str = "distractionPopup";
pub const CONTENT_ELEMENT_ID: &str = "distractionPopupContent";

pub const BUILTIN_TEMPLATE: &str = include_str!("../assets/distraction_email.txt");
const FIELDS: [&str; 4] = ["subject", "from", "body", "signature"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
  Builtin,
  File(PathBuf),
}

impl TemplateSource {
  pub fn fetch(&self) -> Result<String> {
    match self {
      TemplateSource::Builtin => Ok(BUILTIN_TEMPLATE.to_string()),
      TemplateSource::File(path) => fs::read_to_string(path)
        .map_err(|e| eyre!("Unable to fetch template {}: {}", path.display(), e)),
    }
  }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum TemplateMode {
  /// Every placeholder filled once from a parsed template; values escaped.
  #[default]
  Structured,
  /// First occurrence of each placeholder replaced verbatim, in field order.
  Literal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
  Text(&'a str),
  Field(&'a str),
}

fn segments(template: &str) -> Vec<Segment<'_>> {
  let mut out = Vec::new();
  let mut rest = template;
  while let Some(open) = rest.find("{{") {
    let after = &rest[open + 2..];
    match after.find("}}") {
      Some(close) if FIELDS.contains(&&after[..close]) => {
        if open > 0 {
          out.push(Segment::Text(&rest[..open]));
        }
        out.push(Segment::Field(&after[..close]));
        rest = &after[close + 2..];
      }
      _ => {
        out.push(Segment::Text(&rest[..open + 2]));
        rest = after;
      }
    }
  }
  if !rest.is_empty() {
    out.push(Segment::Text(rest));
  }
  out
}

fn field<'e>(email: &'e Email, name: &str) -> &'e str {
  match name {
    "subject" => &email.subject,
    "from" => &email.from,
    "body" => &email.body,
    "signature" => &email.signature,
    _ => "",
  }
}

/// Escapes terminal control characters so email text cannot drive the terminal.
pub fn escape(value: &str) -> String {
  let mut out = String::with_capacity(value.len());
  for c in value.chars() {
    if c.is_control() && c != '\n' {
      out.extend(c.escape_default());
    } else {
      out.push(c);
    }
  }
  out
}

/// Produces the fragment for one popup instance.
pub fn render(template: &str, mode: TemplateMode, overlay_id: &str, content_id: &str, email: &Email) -> String {
  let template = template
    .replacen(&format!("@overlay {}", OVERLAY_ELEMENT_ID), &format!("@overlay {}", overlay_id), 1)
    .replacen(&format!("@content {}", CONTENT_ELEMENT_ID), &format!("@content {}", content_id), 1);

  match mode {
    TemplateMode::Literal => FIELDS.iter().fold(template, |acc, name| {
      acc.replacen(&format!("{{{{{}}}}}", name), field(email, name), 1)
    }),
    TemplateMode::Structured => segments(&template)
      .into_iter()
      .map(|segment| match segment {
        Segment::Text(text) => text.to_string(),
        Segment::Field(name) => escape(field(email, name)),
      })
      .collect(),
  }
}

/// A rendered fragment, ready to be inserted into the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
  pub overlay_id: String,
  pub content_id: String,
  pub title: Option<String>,
  pub lines: Vec<String>,
}

pub fn parse_fragment(text: &str) -> Result<Fragment> {
  let mut overlay_id = None;
  let mut content_id = None;
  let mut title = None;
  let mut lines = text.lines().peekable();

  while let Some(&line) = lines.peek() {
    let Some(directive) = line.strip_prefix('@') else { break };
    let (name, value) = directive.split_once(' ').unwrap_or((directive, ""));
    let value = value.trim().to_string();
    match name {
      "overlay" => overlay_id = Some(value),
      "content" => content_id = Some(value),
      "title" => title = Some(value),
      other => warn!("Unknown template directive '@{}'", other),
    }
    lines.next();
  }

  let overlay_id = overlay_id.filter(|id| !id.is_empty()).ok_or(eyre!("Template has no overlay element"))?;
  let content_id = content_id.filter(|id| !id.is_empty()).ok_or(eyre!("Template has no content element"))?;
  let mut body: Vec<String> = lines.map(str::to_string).collect();
  while body.last().map_or(false, |l| l.trim().is_empty()) {
    body.pop();
  }
  Ok(Fragment { overlay_id, content_id, title, lines: body })
}
