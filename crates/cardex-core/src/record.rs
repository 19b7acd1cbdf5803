//! The contact record and its component types.
//!
//! A [`ContactRecord`] is a closed set of typed fields plus an opaque list of
//! [`RawProperty`] values the model does not interpret. The codec must
//! re-emit the latter verbatim, which is what makes round trips lossless.

use std::{collections::BTreeMap, fmt, path::PathBuf, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  date::Date,
  error::{Error, Result},
  label::Labeled,
};

// ─── Version ─────────────────────────────────────────────────────────────────

/// The two supported vCard revisions.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum Version {
  #[default]
  #[serde(rename = "3.0")]
  V3,
  #[serde(rename = "4.0")]
  V4,
}

impl Version {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::V3 => "3.0",
      Self::V4 => "4.0",
    }
  }

  pub fn is_v4(self) -> bool { self == Self::V4 }
}

impl FromStr for Version {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim() {
      "3.0" => Ok(Self::V3),
      "4.0" => Ok(Self::V4),
      other => Err(Error::InvalidVersion(other.to_string())),
    }
  }
}

impl fmt::Display for Version {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── Kind ────────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
  #[default]
  Individual,
  Group,
  Organisation,
  Location,
  /// A KIND value this crate does not know; the raw property is preserved.
  Unspecified,
}

impl Kind {
  /// Map a `KIND` property value. Unknown tokens yield `None`.
  pub fn from_token(token: &str) -> Option<Self> {
    match token.trim().to_ascii_lowercase().as_str() {
      "individual" => Some(Self::Individual),
      "group" => Some(Self::Group),
      "org" => Some(Self::Organisation),
      "location" => Some(Self::Location),
      _ => None,
    }
  }

  /// The `KIND` property value, if this kind has one.
  pub fn token(self) -> Option<&'static str> {
    match self {
      Self::Individual => Some("individual"),
      Self::Group => Some("group"),
      Self::Organisation => Some("org"),
      Self::Location => Some("location"),
      Self::Unspecified => None,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Individual => "individual",
      Self::Group => "group",
      Self::Organisation => "organisation",
      Self::Location => "location",
      Self::Unspecified => "unspecified",
    }
  }
}

impl FromStr for Kind {
  type Err = Error;

  /// Accepts both the human name (`organisation`) and the vCard token (`org`).
  fn from_str(s: &str) -> Result<Self> {
    let lower = s.trim().to_ascii_lowercase();
    match lower.as_str() {
      "organisation" | "organization" => Ok(Self::Organisation),
      "unspecified" => Ok(Self::Unspecified),
      other => Self::from_token(other)
        .ok_or_else(|| Error::InvalidKind(s.trim().to_string())),
    }
  }
}

// ─── Name display policy ─────────────────────────────────────────────────────

/// Which name form is shown when a record has both a structured name and a
/// formatted name that disagree. Search by name always considers all forms.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum NamePolicy {
  #[default]
  FormattedName,
  /// "First Additional Last".
  FirstName,
  /// "Last, First Additional".
  LastName,
}

// ─── Structured values ───────────────────────────────────────────────────────

/// The `N` property.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredName {
  pub prefix:     String,
  pub first:      String,
  pub additional: String,
  pub last:       String,
  pub suffix:     String,
}

impl StructuredName {
  pub fn is_empty(&self) -> bool {
    self.components().iter().all(|c| c.is_empty())
  }

  /// Components in display order: prefix, first, additional, last, suffix.
  pub fn components(&self) -> [&str; 5] {
    [
      self.prefix.as_str(),
      self.first.as_str(),
      self.additional.as_str(),
      self.last.as_str(),
      self.suffix.as_str(),
    ]
  }
}

/// One `ORG` property: the organisation name followed by unit names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organisation {
  pub name:  String,
  pub units: Vec<String>,
}

impl Organisation {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name:  name.into(),
      units: Vec::new(),
    }
  }
}

impl fmt::Display for Organisation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.name)?;
    for unit in &self.units {
      write!(f, ", {unit}")?;
    }
    Ok(())
  }
}

/// The `ADR` property.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostAddress {
  pub po_box:      String,
  pub extended:    Vec<String>,
  /// One entry per physical street line.
  pub street:      Vec<String>,
  pub locality:    String,
  pub region:      String,
  pub postal_code: String,
  pub country:     String,
}

impl PostAddress {
  pub fn is_empty(&self) -> bool {
    self.po_box.is_empty()
      && self.extended.iter().all(String::is_empty)
      && self.street.iter().all(String::is_empty)
      && self.locality.is_empty()
      && self.region.is_empty()
      && self.postal_code.is_empty()
      && self.country.is_empty()
  }

  /// Every non-empty component, in ADR order.
  pub fn parts(&self) -> Vec<&str> {
    let mut parts = vec![self.po_box.as_str()];
    parts.extend(self.extended.iter().map(String::as_str));
    parts.extend(self.street.iter().map(String::as_str));
    parts.extend([
      self.locality.as_str(),
      self.region.as_str(),
      self.postal_code.as_str(),
      self.country.as_str(),
    ]);
    parts.retain(|p| !p.is_empty());
    parts
  }
}

// ─── Unrecognized properties ─────────────────────────────────────────────────

/// A property parameter exactly as it appeared; `value` is `None` for a bare
/// token such as the `HOME` in `TEL;HOME:...`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawParam {
  pub name:  String,
  pub value: Option<String>,
}

/// A property the model does not interpret. Stored with its value still in
/// wire encoding so it can be written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawProperty {
  pub group:  Option<String>,
  pub name:   String,
  pub params: Vec<RawParam>,
  pub value:  String,
}

impl RawProperty {
  pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
    Self {
      group:  None,
      name:   name.into(),
      params: Vec::new(),
      value:  value.into(),
    }
  }

  pub fn is_named(&self, name: &str) -> bool {
    self.name.eq_ignore_ascii_case(name)
  }
}

impl fmt::Display for RawProperty {
  /// The unfolded content line.
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(group) = &self.group {
      write!(f, "{group}.")?;
    }
    f.write_str(&self.name)?;
    for param in &self.params {
      match &param.value {
        Some(value) => write!(f, ";{}={}", param.name, value)?,
        None => write!(f, ";{}", param.name)?,
      }
    }
    write!(f, ":{}", self.value)
  }
}

// ─── ContactRecord ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
  pub uid:            String,
  pub version:        Version,
  pub kind:           Kind,
  pub name:           StructuredName,
  pub formatted_name: String,
  pub nicknames:      Vec<String>,
  pub organisations:  Vec<Organisation>,
  pub titles:         Vec<String>,
  pub roles:          Vec<String>,
  pub phones:         Vec<Labeled<String>>,
  pub emails:         Vec<Labeled<String>>,
  pub addresses:      Vec<Labeled<PostAddress>>,
  pub webpages:       Vec<Labeled<String>>,
  pub messaging:      Vec<Labeled<String>>,
  /// Configured `X-<NAME>` extension fields, keyed by configured name.
  pub private:        BTreeMap<String, Vec<Labeled<String>>>,
  pub birthday:       Option<Date>,
  pub anniversary:    Option<Date>,
  pub categories:     Vec<String>,
  pub notes:          Vec<String>,
  pub unrecognized:   Vec<RawProperty>,
  /// Backing file; `None` until the record is loaded or first saved.
  pub source:         Option<PathBuf>,
  pub revision:       Option<DateTime<Utc>>,
}

impl ContactRecord {
  /// An empty record with a freshly generated uid.
  pub fn new(version: Version) -> Self {
    Self::with_uid(Uuid::new_v4().to_string(), version)
  }

  pub fn with_uid(uid: impl Into<String>, version: Version) -> Self {
    Self {
      uid: uid.into(),
      version,
      kind: Kind::default(),
      name: StructuredName::default(),
      formatted_name: String::new(),
      nicknames: Vec::new(),
      organisations: Vec::new(),
      titles: Vec::new(),
      roles: Vec::new(),
      phones: Vec::new(),
      emails: Vec::new(),
      addresses: Vec::new(),
      webpages: Vec::new(),
      messaging: Vec::new(),
      private: BTreeMap::new(),
      birthday: None,
      anniversary: None,
      categories: Vec::new(),
      notes: Vec::new(),
      unrecognized: Vec::new(),
      source: None,
      revision: None,
    }
  }

  pub fn note(&self) -> Option<&str> { self.notes.first().map(String::as_str) }

  /// "First Additional Last", skipping empty components.
  pub fn first_name_last_name(&self) -> String {
    let name = &self.name;
    join_nonempty(
      &[name.first.as_str(), name.additional.as_str(), name.last.as_str()],
      " ",
    )
  }

  /// "Last, First Additional", or whichever half exists.
  pub fn last_name_first_name(&self) -> String {
    let given = join_nonempty(
      &[self.name.first.as_str(), self.name.additional.as_str()],
      " ",
    );
    join_nonempty(&[self.name.last.as_str(), given.as_str()], ", ")
  }

  /// The formatted name derived from the structured name, falling back to
  /// the first organisation.
  pub fn synthesize_formatted_name(&self) -> String {
    let from_name = join_nonempty(&self.name.components(), " ");
    if !from_name.is_empty() {
      return from_name;
    }
    self
      .organisations
      .first()
      .map(|org| org.name.clone())
      .unwrap_or_default()
  }

  /// Fill `formatted_name` from the other name fields when it is empty.
  pub fn ensure_formatted_name(&mut self) {
    if self.formatted_name.trim().is_empty() {
      self.formatted_name = self.synthesize_formatted_name();
    }
  }

  pub fn display_name(&self, policy: NamePolicy) -> String {
    let preferred = match policy {
      NamePolicy::FormattedName => self.formatted_name.clone(),
      NamePolicy::FirstName => self.first_name_last_name(),
      NamePolicy::LastName => self.last_name_first_name(),
    };
    if !preferred.is_empty() {
      return preferred;
    }
    if !self.formatted_name.is_empty() {
      return self.formatted_name.clone();
    }
    self.synthesize_formatted_name()
  }

  /// True if the record carries something that identifies it by name.
  pub fn has_name(&self) -> bool {
    !self.name.first.trim().is_empty()
      || !self.name.last.trim().is_empty()
      || !self.formatted_name.trim().is_empty()
      || self.organisations.iter().any(|o| !o.name.trim().is_empty())
  }

  /// Remove unrecognized properties with any of the given names
  /// (case-insensitive).
  pub fn drop_unrecognized(&mut self, names: &[&str]) {
    self
      .unrecognized
      .retain(|prop| !names.iter().any(|n| prop.is_named(n)));
  }
}

// ─── Merging ─────────────────────────────────────────────────────────────────

/// Properties a record holds at most once; the merge target's win.
const SINGLE_RAW: [&str; 10] = [
  "VERSION", "UID", "FN", "N", "KIND", "X-KIND", "BDAY", "ANNIVERSARY",
  "X-ANNIVERSARY", "REV",
];

impl ContactRecord {
  /// Fold `other` into this record.
  ///
  /// Empty name parts, a missing formatted name and missing dates are taken
  /// from `other`; list entries whose values this record lacks are appended
  /// in `other`'s order. Uid, version, kind and backing file stay this
  /// record's, and a date `other` holds that this version cannot write is
  /// left out.
  pub fn merge_from(&mut self, other: &ContactRecord) {
    let name = &mut self.name;
    for (mine, theirs) in [
      (&mut name.prefix, &other.name.prefix),
      (&mut name.first, &other.name.first),
      (&mut name.additional, &other.name.additional),
      (&mut name.last, &other.name.last),
      (&mut name.suffix, &other.name.suffix),
      (&mut self.formatted_name, &other.formatted_name),
    ] {
      if mine.trim().is_empty() {
        mine.clone_from(theirs);
      }
    }

    append_missing(&mut self.nicknames, &other.nicknames);
    append_missing(&mut self.organisations, &other.organisations);
    append_missing(&mut self.titles, &other.titles);
    append_missing(&mut self.roles, &other.roles);
    append_missing_values(&mut self.phones, &other.phones);
    append_missing_values(&mut self.emails, &other.emails);
    append_missing_values(&mut self.addresses, &other.addresses);
    append_missing_values(&mut self.webpages, &other.webpages);
    append_missing_values(&mut self.messaging, &other.messaging);
    for (key, entries) in &other.private {
      append_missing_values(self.private.entry(key.clone()).or_default(), entries);
    }
    append_missing(&mut self.categories, &other.categories);
    append_missing(&mut self.notes, &other.notes);

    let writable = |date: &Option<Date>| {
      date
        .clone()
        .filter(|d| self.version.is_v4() || !d.requires_v4())
    };
    if self.birthday.is_none() {
      self.birthday = writable(&other.birthday);
    }
    if self.anniversary.is_none() {
      self.anniversary = writable(&other.anniversary);
    }

    let extra: Vec<RawProperty> = other
      .unrecognized
      .iter()
      .filter(|p| !SINGLE_RAW.iter().any(|n| p.is_named(n)))
      .filter(|p| !self.unrecognized.contains(p))
      .cloned()
      .collect();
    self.unrecognized.extend(extra);
  }
}

fn append_missing<T: Clone + PartialEq>(mine: &mut Vec<T>, theirs: &[T]) {
  for item in theirs {
    if !mine.contains(item) {
      mine.push(item.clone());
    }
  }
}

/// Like [`append_missing`], but an entry counts as present when its value
/// is, whatever its label.
fn append_missing_values<T: Clone + PartialEq>(
  mine: &mut Vec<Labeled<T>>,
  theirs: &[Labeled<T>],
) {
  for entry in theirs {
    if !mine.iter().any(|m| m.value == entry.value) {
      mine.push(entry.clone());
    }
  }
}

fn join_nonempty(parts: &[&str], sep: &str) -> String {
  parts
    .iter()
    .map(|p| p.trim())
    .filter(|p| !p.is_empty())
    .collect::<Vec<_>>()
    .join(sep)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  fn jane() -> ContactRecord {
    let mut r = ContactRecord::with_uid("u1", Version::V4);
    r.name = StructuredName {
      prefix:     "Dr.".into(),
      first:      "Jane".into(),
      additional: "Q".into(),
      last:       "Public".into(),
      suffix:     String::new(),
    };
    r
  }

  #[test]
  fn version_parses_and_renders() {
    assert_eq!("4.0".parse::<Version>().unwrap(), Version::V4);
    assert_eq!(Version::V3.to_string(), "3.0");
    assert!(matches!(
      "2.1".parse::<Version>(),
      Err(Error::InvalidVersion(v)) if v == "2.1"
    ));
  }

  #[test]
  fn kind_accepts_name_and_token() {
    assert_eq!("org".parse::<Kind>().unwrap(), Kind::Organisation);
    assert_eq!("Organisation".parse::<Kind>().unwrap(), Kind::Organisation);
    assert_eq!(Kind::from_token("robot"), None);
    assert!("robot".parse::<Kind>().is_err());
  }

  #[test]
  fn new_records_get_distinct_uids() {
    let a = ContactRecord::new(Version::V3);
    let b = ContactRecord::new(Version::V3);
    assert_ne!(a.uid, b.uid);
    assert!(!a.uid.is_empty());
  }

  #[test]
  fn name_forms() {
    let r = jane();
    assert_eq!(r.first_name_last_name(), "Jane Q Public");
    assert_eq!(r.last_name_first_name(), "Public, Jane Q");
    assert_eq!(r.synthesize_formatted_name(), "Dr. Jane Q Public");
  }

  #[test]
  fn formatted_name_falls_back_to_organisation() {
    let mut r = ContactRecord::with_uid("u2", Version::V3);
    r.organisations.push(Organisation::new("Acme"));
    r.ensure_formatted_name();
    assert_eq!(r.formatted_name, "Acme");
    assert!(r.has_name());
  }

  #[test]
  fn display_policy_selects_name_form() {
    let mut r = jane();
    r.formatted_name = "Janie".into();
    assert_eq!(r.display_name(NamePolicy::FormattedName), "Janie");
    assert_eq!(r.display_name(NamePolicy::FirstName), "Jane Q Public");
    assert_eq!(r.display_name(NamePolicy::LastName), "Public, Jane Q");

    let mut only_fn = ContactRecord::with_uid("u3", Version::V4);
    only_fn.formatted_name = "Mononym".into();
    assert_eq!(only_fn.display_name(NamePolicy::LastName), "Mononym");
  }

  #[test]
  fn raw_property_renders_as_content_line() {
    let prop = RawProperty {
      group:  Some("item1".into()),
      name:   "X-FOO".into(),
      params: vec![
        RawParam {
          name:  "TYPE".into(),
          value: Some("a,b".into()),
        },
        RawParam {
          name:  "HOME".into(),
          value: None,
        },
      ],
      value:  "bar\\,baz".into(),
    };
    assert_eq!(prop.to_string(), "item1.X-FOO;TYPE=a,b;HOME:bar\\,baz");
  }

  #[test]
  fn merge_fills_gaps_and_appends_new_entries() {
    use crate::label::LabelSet;

    let mut target = jane();
    target.name.prefix.clear();
    target.phones = vec![Labeled::new(LabelSet::new().with_type("home"), "111".into())];
    target.birthday = Some(Date::Partial { month: 1, day: 2 });

    let mut source = ContactRecord::with_uid("u2", Version::V4);
    source.name.first = "Janet".into();
    source.name.prefix = "Prof.".into();
    source.formatted_name = "Janet".into();
    source.phones = vec![
      Labeled::new(LabelSet::new().with_type("cell"), "111".into()),
      Labeled::new(LabelSet::new().with_type("work"), "222".into()),
    ];
    source.emails = vec![Labeled::unlabeled("j@example.org".into())];
    source.anniversary = Some(Date::Text("spring".into()));
    source.unrecognized = vec![
      RawProperty::new("X-FOO", "bar"),
      RawProperty::new("REV", "20200101T000000Z"),
    ];

    target.merge_from(&source);
    assert_eq!(target.uid, "u1");
    assert_eq!(target.name.first, "Jane");
    assert_eq!(target.name.prefix, "Prof.");
    assert_eq!(target.formatted_name, "Janet");
    let phones: Vec<&str> = target.phones.iter().map(|p| p.value.as_str()).collect();
    assert_eq!(phones, ["111", "222"]);
    assert_eq!(target.phones[0].label, LabelSet::new().with_type("home"));
    assert_eq!(target.emails.len(), 1);
    assert_eq!(target.birthday, Some(Date::Partial { month: 1, day: 2 }));
    assert_eq!(target.anniversary, Some(Date::Text("spring".into())));
    assert_eq!(target.unrecognized, vec![RawProperty::new("X-FOO", "bar")]);
  }

  #[test]
  fn merge_skips_dates_the_version_cannot_hold() {
    let mut target = ContactRecord::with_uid("u1", Version::V3);
    let mut source = ContactRecord::with_uid("u2", Version::V4);
    source.birthday = Some(Date::Partial { month: 3, day: 4 });
    target.merge_from(&source);
    assert_eq!(target.birthday, None);
  }

  #[test]
  fn drop_unrecognized_is_case_insensitive() {
    let mut r = jane();
    r.unrecognized.push(RawProperty::new("BDAY", "circa"));
    r.unrecognized.push(RawProperty::new("X-KEEP", "1"));
    r.drop_unrecognized(&["bday"]);
    assert_eq!(r.unrecognized.len(), 1);
    assert_eq!(r.unrecognized[0].name, "X-KEEP");
  }
}
