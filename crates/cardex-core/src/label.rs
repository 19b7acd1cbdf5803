//! Label sets for multi-valued contact fields.
//!
//! A label set is what vCard spreads over `TYPE=` parameters, `PREF=` (or
//! `TYPE=pref` in 3.0) and the vendor `X-ABLABEL` side-channel. In the model
//! it is a single value: an unordered set of type tags, an optional
//! preference rank and at most one free-text label.

use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ─── Field identity ──────────────────────────────────────────────────────────

/// Which labeled field a [`LabelSet`] belongs to. Determines which tokens
/// count as standard type tags when a label string is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabeledField {
  Phone,
  Email,
  Address,
  Webpage,
  Messaging,
  Private,
}

impl LabeledField {
  pub const ALL: [Self; 6] = [
    Self::Phone,
    Self::Email,
    Self::Address,
    Self::Webpage,
    Self::Messaging,
    Self::Private,
  ];

  /// Standard type tags for this field across vCard 3.0 and 4.0.
  pub fn standard_types(self) -> &'static [&'static str] {
    match self {
      Self::Phone => &[
        "bbs", "car", "cell", "fax", "home", "isdn", "modem", "msg", "pager",
        "pcs", "text", "textphone", "video", "voice", "work",
      ],
      Self::Email => &["home", "internet", "work", "x400"],
      Self::Address => &["dom", "intl", "home", "parcel", "postal", "work"],
      Self::Webpage | Self::Private => &["home", "work"],
      Self::Messaging => &["business", "home", "personal", "work"],
    }
  }

  /// Label shown for an entry that carries no label at all.
  pub fn default_label(self) -> &'static str {
    match self {
      Self::Phone => "voice",
      Self::Email => "internet",
      _ => "home",
    }
  }

  fn is_standard(self, token: &str) -> bool {
    self.standard_types().contains(&token)
  }
}

// ─── LabelSet ────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct LabelSet {
  /// Lower-cased type tags, e.g. `home`, `cell`, `x-school`.
  pub types:  BTreeSet<String>,
  /// Preference rank; 1 is most preferred.
  pub pref:   Option<u8>,
  /// Free-text label (vendor `X-ABLABEL`).
  pub custom: Option<String>,
}

impl LabelSet {
  pub fn new() -> Self { Self::default() }

  /// Builder-style helper adding one type tag.
  pub fn with_type(mut self, tag: &str) -> Self {
    self.types.insert(tag.to_lowercase());
    self
  }

  pub fn with_pref(mut self, rank: u8) -> Self {
    self.pref = Some(rank);
    self
  }

  pub fn with_custom(mut self, label: impl Into<String>) -> Self {
    self.custom = Some(label.into());
    self
  }

  pub fn is_empty(&self) -> bool {
    self.types.is_empty() && self.pref.is_none() && self.custom.is_none()
  }

  pub fn is_preferred(&self) -> bool { self.pref.is_some() }

  /// Parse a comma-separated label string such as `"work, cell, pref"` or
  /// `"Grandma, pref=2"`.
  ///
  /// `pref` / `pref=N` set the preference, standard tags for `field` and
  /// any `x-` token become types, and at most one remaining token becomes
  /// the free-text label. A double-quoted token (`"Mum, Dad"`, with `\"`
  /// and `\\` escapes) is always the free-text label.
  pub fn parse(field: LabeledField, s: &str) -> Result<Self> {
    let mut label = LabelSet::new();
    let mut seen_any = false;

    for piece in split_label(s)? {
      seen_any = true;
      let token = piece.text;
      let lower = token.to_lowercase();

      if piece.quoted {
        if label.custom.is_some() {
          return Err(Error::MultipleCustomLabels(s.to_string()));
        }
        label.custom = Some(token);
      } else if lower == "pref" {
        label.pref = Some(1);
      } else if let Some(rank) = lower.strip_prefix("pref=") {
        let rank: u8 = rank
          .trim()
          .parse()
          .ok()
          .filter(|r| *r > 0)
          .ok_or_else(|| Error::InvalidPreference(token.clone()))?;
        label.pref = Some(rank);
      } else if field.is_standard(&lower) {
        label.types.insert(lower);
      } else if lower.starts_with("x-") {
        if !is_type_tag(&lower) {
          return Err(Error::InvalidTypeTag(token));
        }
        label.types.insert(lower);
      } else if label.custom.is_some() {
        return Err(Error::MultipleCustomLabels(s.to_string()));
      } else {
        label.custom = Some(token);
      }
    }

    if !seen_any {
      return Err(Error::EmptyLabel);
    }
    Ok(label)
  }

  /// Render as a label string; the inverse of [`LabelSet::parse`].
  /// Empty sets render as the empty string.
  pub fn render(&self) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(custom) = &self.custom {
      if custom_needs_quotes(custom) {
        let escaped = custom.replace('\\', "\\\\").replace('"', "\\\"");
        parts.push(format!("\"{escaped}\""));
      } else {
        parts.push(custom.clone());
      }
    }
    parts.extend(self.types.iter().cloned());
    match self.pref {
      Some(1) => parts.push("pref".to_string()),
      Some(n) => parts.push(format!("pref={n}")),
      None => {}
    }
    parts.join(", ")
  }

  /// Like [`LabelSet::render`], but falls back to the field default.
  pub fn render_or_default(&self, field: LabeledField) -> String {
    if self.is_empty() {
      field.default_label().to_string()
    } else {
      self.render()
    }
  }
}

/// One comma-separated piece of a label string.
struct Piece {
  text:   String,
  quoted: bool,
}

fn split_label(s: &str) -> Result<Vec<Piece>> {
  let malformed = || Error::MalformedLabel(s.to_string());
  let mut pieces = Vec::new();
  let mut chars = s.chars().peekable();

  while chars.peek().is_some() {
    while chars.next_if(|c| c.is_whitespace()).is_some() {}
    if chars.next_if_eq(&'"').is_some() {
      let mut text = String::new();
      loop {
        match chars.next().ok_or_else(malformed)? {
          '"' => break,
          '\\' => text.push(chars.next().ok_or_else(malformed)?),
          c => text.push(c),
        }
      }
      while chars.next_if(|c| c.is_whitespace()).is_some() {}
      if chars.next().is_some_and(|c| c != ',') {
        return Err(malformed());
      }
      pieces.push(Piece { text, quoted: true });
    } else {
      let mut text = String::new();
      for c in chars.by_ref() {
        if c == ',' {
          break;
        }
        text.push(c);
      }
      let text = text.trim();
      if !text.is_empty() {
        pieces.push(Piece {
          text:   text.to_string(),
          quoted: false,
        });
      }
    }
  }
  Ok(pieces)
}

/// Type tags end up unquoted in `TYPE=` parameters.
fn is_type_tag(tag: &str) -> bool {
  tag.len() > 2 && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// A free-text label that would not read back as itself when written bare.
fn custom_needs_quotes(custom: &str) -> bool {
  let lower = custom.to_lowercase();
  custom.is_empty()
    || custom.trim() != custom
    || custom.contains([',', '"'])
    || lower == "pref"
    || lower.starts_with("pref=")
    || lower.starts_with("x-")
    || LabeledField::ALL.iter().any(|f| f.is_standard(&lower))
}

impl fmt::Display for LabelSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.render())
  }
}

// ─── Labeled values ──────────────────────────────────────────────────────────

/// One entry of a labeled multi-field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labeled<T> {
  pub label: LabelSet,
  pub value: T,
}

impl<T> Labeled<T> {
  pub fn new(label: LabelSet, value: T) -> Self { Self { label, value } }

  pub fn unlabeled(value: T) -> Self { Self::new(LabelSet::new(), value) }
}

/// Group entries by label, keeping the first-seen order of labels and the
/// original order of values within each label.
pub fn group_by_label<T>(entries: &[Labeled<T>]) -> Vec<(&LabelSet, Vec<&T>)> {
  let mut groups: Vec<(&LabelSet, Vec<&T>)> = Vec::new();
  for entry in entries {
    match groups.iter_mut().find(|(label, _)| **label == entry.label) {
      Some((_, values)) => values.push(&entry.value),
      None => groups.push((&entry.label, vec![&entry.value])),
    }
  }
  groups
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_standard_types_and_pref() {
    let label = LabelSet::parse(LabeledField::Phone, "Work, CELL, pref").unwrap();
    assert!(label.types.contains("work"));
    assert!(label.types.contains("cell"));
    assert_eq!(label.pref, Some(1));
    assert_eq!(label.custom, None);
  }

  #[test]
  fn parse_ranked_pref_and_custom_label() {
    let label = LabelSet::parse(LabeledField::Email, "Grandma, pref=3").unwrap();
    assert_eq!(label.custom.as_deref(), Some("Grandma"));
    assert_eq!(label.pref, Some(3));
    assert!(label.types.is_empty());
  }

  #[test]
  fn x_tokens_stay_types() {
    let label = LabelSet::parse(LabeledField::Address, "x-school").unwrap();
    assert!(label.types.contains("x-school"));
    assert!(label.custom.is_none());
  }

  #[test]
  fn x_tokens_must_be_plain() {
    for bad in ["x-a:b", "x-a;b", "x-\"q\"", "x-two words"] {
      assert!(
        matches!(
          LabelSet::parse(LabeledField::Phone, bad),
          Err(Error::InvalidTypeTag(_))
        ),
        "{bad}"
      );
    }
  }

  #[test]
  fn quoted_token_is_always_custom() {
    let label = LabelSet::parse(LabeledField::Phone, r#""Mum, Dad", cell"#).unwrap();
    assert_eq!(label.custom.as_deref(), Some("Mum, Dad"));
    assert!(label.types.contains("cell"));

    let label = LabelSet::parse(LabeledField::Phone, r#""home""#).unwrap();
    assert_eq!(label.custom.as_deref(), Some("home"));
    assert!(label.types.is_empty());

    assert!(matches!(
      LabelSet::parse(LabeledField::Phone, r#""open, cell"#),
      Err(Error::MalformedLabel(_))
    ));
  }

  #[test]
  fn awkward_custom_labels_read_back_unchanged() {
    for custom in ["Mum, Dad", "home", "Pref", "pref=2", "x-boat", r#"the "big" one"#, " pad"] {
      let label = LabelSet::new().with_custom(custom).with_type("work");
      let back = LabelSet::parse(LabeledField::Phone, &label.render()).unwrap();
      assert_eq!(back, label, "{custom:?}");
    }
    // Plain labels stay unquoted.
    assert_eq!(LabelSet::new().with_custom("Grandma").render(), "Grandma");
  }

  #[test]
  fn two_custom_labels_rejected() {
    let err = LabelSet::parse(LabeledField::Phone, "Mum, Dad").unwrap_err();
    assert!(matches!(err, Error::MultipleCustomLabels(_)));
  }

  #[test]
  fn empty_label_rejected() {
    assert!(matches!(
      LabelSet::parse(LabeledField::Email, " , "),
      Err(Error::EmptyLabel)
    ));
  }

  #[test]
  fn zero_pref_rejected() {
    assert!(matches!(
      LabelSet::parse(LabeledField::Email, "home, pref=0"),
      Err(Error::InvalidPreference(_))
    ));
  }

  #[test]
  fn render_then_parse_is_identity() {
    let label = LabelSet::new()
      .with_type("home")
      .with_type("voice")
      .with_custom("Cabin")
      .with_pref(2);
    assert_eq!(label.render(), "Cabin, home, voice, pref=2");
    let back = LabelSet::parse(LabeledField::Phone, &label.render()).unwrap();
    assert_eq!(back, label);
  }

  #[test]
  fn empty_set_uses_field_default() {
    assert_eq!(LabelSet::new().render_or_default(LabeledField::Phone), "voice");
    assert_eq!(LabelSet::new().render_or_default(LabeledField::Email), "internet");
  }

  #[test]
  fn grouping_keeps_first_seen_order() {
    let home = LabelSet::new().with_type("home");
    let work = LabelSet::new().with_type("work");
    let entries = vec![
      Labeled::new(work.clone(), "w1"),
      Labeled::new(home.clone(), "h1"),
      Labeled::new(work.clone(), "w2"),
    ];
    let groups = group_by_label(&entries);
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].0, &work);
    assert_eq!(groups[0].1, vec![&"w1", &"w2"]);
    assert_eq!(groups[1].1, vec![&"h1"]);
  }
}
