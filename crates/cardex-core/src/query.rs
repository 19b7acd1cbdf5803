//! Search terms and their evaluation against a [`ContactRecord`].
//!
//! Each command-line term is classified on its own:
//!
//! - `field:needle` where `field` (lower-cased, spaces to underscores) is a
//!   known searchable field becomes a field-scoped term;
//! - `name:needle` searches formatted name, name components and nicknames;
//! - anything else, including `unknown:needle`, is a free term matched
//!   against the whole rendered record.
//!
//! Terms combine with AND. Matching is case-insensitive substring search.

use std::fmt;

use crate::{
  label::Labeled,
  record::{ContactRecord, Kind},
};

// ─── Fields ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchField {
  FormattedName,
  Nicknames,
  Organisations,
  Titles,
  Roles,
  PhoneNumbers,
  Emails,
  PostAddresses,
  Webpages,
  Messaging,
  Categories,
  Notes,
  Birthday,
  Anniversary,
  Kind,
  Uid,
  Private,
}

impl SearchField {
  pub const ALL: [SearchField; 17] = [
    Self::FormattedName,
    Self::Nicknames,
    Self::Organisations,
    Self::Titles,
    Self::Roles,
    Self::PhoneNumbers,
    Self::Emails,
    Self::PostAddresses,
    Self::Webpages,
    Self::Messaging,
    Self::Categories,
    Self::Notes,
    Self::Birthday,
    Self::Anniversary,
    Self::Kind,
    Self::Uid,
    Self::Private,
  ];

  pub fn name(self) -> &'static str {
    match self {
      Self::FormattedName => "formatted_name",
      Self::Nicknames => "nicknames",
      Self::Organisations => "organisations",
      Self::Titles => "titles",
      Self::Roles => "roles",
      Self::PhoneNumbers => "phone_numbers",
      Self::Emails => "emails",
      Self::PostAddresses => "post_addresses",
      Self::Webpages => "webpages",
      Self::Messaging => "messaging",
      Self::Categories => "categories",
      Self::Notes => "notes",
      Self::Birthday => "birthday",
      Self::Anniversary => "anniversary",
      Self::Kind => "kind",
      Self::Uid => "uid",
      Self::Private => "private",
    }
  }

  /// Look up a field by its normalised name.
  pub fn from_name(name: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|f| f.name() == name)
  }

  /// Whether the rendered text of this field is always a substring-wise
  /// subset of the raw file text. Kind names, dates and phone digit
  /// matching are derived, so they are not.
  fn renders_verbatim(self) -> bool {
    !matches!(
      self,
      Self::Kind | Self::Birthday | Self::Anniversary | Self::PhoneNumbers
    )
  }

  /// Everything the field shows: label strings and values.
  fn texts(self, record: &ContactRecord) -> Vec<String> {
    match self {
      Self::FormattedName => vec![record.formatted_name.clone()],
      Self::Nicknames => record.nicknames.clone(),
      Self::Organisations => record
        .organisations
        .iter()
        .flat_map(|o| std::iter::once(&o.name).chain(&o.units))
        .cloned()
        .collect(),
      Self::Titles => record.titles.clone(),
      Self::Roles => record.roles.clone(),
      Self::PhoneNumbers => labeled_texts(&record.phones, |v| vec![v.clone()]),
      Self::Emails => labeled_texts(&record.emails, |v| vec![v.clone()]),
      Self::PostAddresses => labeled_texts(&record.addresses, |a| {
        a.parts().into_iter().map(str::to_string).collect()
      }),
      Self::Webpages => labeled_texts(&record.webpages, |v| vec![v.clone()]),
      Self::Messaging => labeled_texts(&record.messaging, |v| vec![v.clone()]),
      Self::Categories => record.categories.clone(),
      Self::Notes => record.notes.clone(),
      Self::Birthday => date_texts(record.birthday.as_ref()),
      Self::Anniversary => date_texts(record.anniversary.as_ref()),
      Self::Kind => {
        let mut texts = vec![record.kind.as_str().to_string()];
        texts.extend(record.kind.token().map(str::to_string));
        texts
      }
      Self::Uid => vec![record.uid.clone()],
      Self::Private => record
        .private
        .iter()
        .flat_map(|(name, entries)| {
          std::iter::once(name.clone())
            .chain(labeled_texts(entries, |v| vec![v.clone()]))
        })
        .collect(),
    }
  }
}

impl fmt::Display for SearchField {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

fn labeled_texts<T>(
  entries: &[Labeled<T>],
  values: impl Fn(&T) -> Vec<String>,
) -> Vec<String> {
  let mut texts = Vec::new();
  for entry in entries {
    if !entry.label.is_empty() {
      texts.push(entry.label.render());
    }
    texts.extend(values(&entry.value));
  }
  texts
}

fn date_texts(date: Option<&crate::Date>) -> Vec<String> {
  date
    .map(|d| vec![d.to_string(), d.to_template_string()])
    .unwrap_or_default()
}

// ─── Terms ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryTerm {
  /// `name:needle`.
  Name(String),
  /// `phone_numbers:needle`, which also compares digits only.
  Phone { needle: String, digits: String },
  Field { field: SearchField, needle: String },
  Free(String),
}

impl QueryTerm {
  /// Classify one command-line term.
  pub fn classify(term: &str) -> Self {
    if let Some((prefix, rest)) = term.split_once(':') {
      let field = prefix.trim().to_lowercase().replace(' ', "_");
      let needle = rest.to_lowercase();
      if field == "name" {
        return Self::Name(needle);
      }
      match SearchField::from_name(&field) {
        Some(SearchField::PhoneNumbers) => {
          return Self::Phone {
            digits: strip_phone_number(&needle),
            needle,
          };
        }
        Some(field) => return Self::Field { field, needle },
        None => {}
      }
    }
    Self::Free(term.to_lowercase())
  }

  pub fn matches(&self, record: &ContactRecord) -> bool {
    match self {
      Self::Name(needle) => name_texts(record)
        .iter()
        .any(|t| t.to_lowercase().contains(needle.as_str())),
      Self::Phone { needle, digits } => record.phones.iter().any(|entry| {
        entry.label.render().to_lowercase().contains(needle.as_str())
          || entry.value.to_lowercase().contains(needle.as_str())
          || phone_digits_match(digits, &strip_phone_number(&entry.value))
      }),
      Self::Field { field, needle } => field
        .texts(record)
        .iter()
        .any(|t| t.to_lowercase().contains(needle.as_str())),
      Self::Free(needle) => searchable_text(record).contains(needle.as_str()),
    }
  }

  /// The needle to look for in raw file text, if this term can be checked
  /// there without parsing.
  fn raw_needle(&self) -> Option<&str> {
    let needle = match self {
      Self::Name(needle) | Self::Free(needle) => needle,
      Self::Field { field, needle } if field.renders_verbatim() => needle,
      _ => return None,
    };
    is_raw_safe(needle).then_some(needle.as_str())
  }
}

impl fmt::Display for QueryTerm {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Name(n) => write!(f, "name:{n}"),
      Self::Phone { needle, .. } => write!(f, "phone_numbers:{needle}"),
      Self::Field { field, needle } => write!(f, "{field}:{needle}"),
      Self::Free(n) => f.write_str(n),
    }
  }
}

/// A raw needle must not contain characters the record renderer could have
/// introduced or that the wire format escapes.
fn is_raw_safe(needle: &str) -> bool {
  needle
    .chars()
    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '+'))
}

fn name_texts(record: &ContactRecord) -> Vec<String> {
  let mut texts = vec![
    record.formatted_name.clone(),
    record.first_name_last_name(),
    record.last_name_first_name(),
  ];
  texts.extend(record.name.components().iter().map(|c| c.to_string()));
  texts.extend(record.nicknames.iter().cloned());
  texts
}

/// Lower-cased text of every interpreted field, one value per line.
///
/// Only data present in the record is rendered: no headings, no default
/// labels, and no kind for individuals.
pub fn searchable_text(record: &ContactRecord) -> String {
  let mut lines: Vec<String> = Vec::new();
  lines.extend(record.name.components().iter().map(|c| c.to_string()));
  for field in SearchField::ALL {
    match field {
      SearchField::Kind => {
        if !matches!(record.kind, Kind::Individual | Kind::Unspecified) {
          lines.extend(record.kind.token().map(str::to_string));
        }
      }
      SearchField::Birthday => {
        lines.extend(record.birthday.as_ref().map(|d| d.to_string()))
      }
      SearchField::Anniversary => {
        lines.extend(record.anniversary.as_ref().map(|d| d.to_string()))
      }
      other => lines.extend(other.texts(record)),
    }
  }
  lines.retain(|l| !l.is_empty());
  lines.join("\n").to_lowercase()
}

// ─── Phone digits ────────────────────────────────────────────────────────────

fn strip_phone_number(number: &str) -> String {
  number
    .chars()
    .filter(|c| c.is_ascii_digit() || *c == '+')
    .collect()
}

/// Compare a stripped search term against a stripped number, treating a
/// leading `0` (national) and a leading `+` (international) as compatible.
fn phone_digits_match(term: &str, number: &str) -> bool {
  if term.is_empty() {
    return false;
  }
  if term.starts_with('+') && number.starts_with('+') {
    return number.contains(term);
  }
  if term.starts_with('+') && number.starts_with('0') {
    // The term is taken to be a complete international number.
    return term.contains(&number[1..]);
  }
  if term.starts_with('0') && number.starts_with('+') && term.len() >= 5 {
    // Shorter terms keep their leading zero to avoid false positives.
    return number.contains(&term[1..]);
  }
  number.contains(term)
}

// ─── Query ───────────────────────────────────────────────────────────────────

/// A conjunction of [`QueryTerm`]s. The empty query matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
  terms: Vec<QueryTerm>,
}

impl Query {
  pub fn parse<S: AsRef<str>>(terms: &[S]) -> Self {
    Self {
      terms: terms
        .iter()
        .map(|t| QueryTerm::classify(t.as_ref()))
        .collect(),
    }
  }

  /// The query that matches every record.
  pub fn any() -> Self { Self::default() }

  pub fn terms(&self) -> &[QueryTerm] { &self.terms }

  pub fn is_empty(&self) -> bool { self.terms.is_empty() }

  pub fn matches(&self, record: &ContactRecord) -> bool {
    self.terms.iter().all(|t| t.matches(record))
  }

  /// Conservative check on unparsed file text: `false` only if no record
  /// parsed from `raw` could match. Terms that cannot be judged on raw text
  /// are treated as matching.
  pub fn may_match_raw(&self, raw: &str) -> bool {
    let lower = raw.to_lowercase();
    if lower.contains("quoted-printable") {
      return true;
    }
    let text = unfold(&lower);
    // Timestamps are searched in their RFC 3339 form, which the file may
    // not spell the same way.
    if has_timestamp_date(&text) {
      return true;
    }
    self
      .terms
      .iter()
      .filter_map(QueryTerm::raw_needle)
      .all(|needle| text.contains(needle))
  }
}

impl fmt::Display for Query {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let terms: Vec<String> = self.terms.iter().map(|t| t.to_string()).collect();
    f.write_str(&terms.join(" "))
  }
}

/// Undo content-line folding so a needle split across lines is still found.
fn unfold(text: &str) -> String {
  text
    .replace("\r\n ", "")
    .replace("\r\n\t", "")
    .replace("\n ", "")
    .replace("\n\t", "")
}

/// Whether a `BDAY` or `ANNIVERSARY` line in lower-cased, unfolded text
/// carries a time of day.
fn has_timestamp_date(text: &str) -> bool {
  text.lines().any(|line| {
    let Some((head, value)) = line.split_once(':') else {
      return false;
    };
    let name = head.split(';').next().unwrap_or_default();
    let name = name.rsplit('.').next().unwrap_or_default();
    matches!(name.trim(), "bday" | "anniversary" | "x-anniversary")
      && value
        .as_bytes()
        .windows(2)
        .any(|w| w[0] == b't' && w[1].is_ascii_digit())
  })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    label::LabelSet,
    record::{Organisation, StructuredName, Version},
  };

  fn john() -> ContactRecord {
    let mut r = ContactRecord::with_uid("abc-123", Version::V3);
    r.name = StructuredName {
      first: "John".into(),
      last: "Doe".into(),
      ..Default::default()
    };
    r.formatted_name = "John Doe".into();
    r.nicknames.push("Jack".into());
    r.emails.push(Labeled::new(
      LabelSet::new().with_type("work"),
      "john@example.org".to_string(),
    ));
    r.phones.push(Labeled::new(
      LabelSet::new().with_type("home"),
      "+49 123 456789".to_string(),
    ));
    r.organisations.push(Organisation::new("Acme"));
    r
  }

  // ── Classification ─────────────────────────────────────────────────────────

  #[test]
  fn known_field_becomes_scoped() {
    assert_eq!(
      QueryTerm::classify("Emails:Example.org"),
      QueryTerm::Field {
        field:  SearchField::Emails,
        needle: "example.org".into(),
      }
    );
    assert_eq!(
      QueryTerm::classify("post addresses:berlin"),
      QueryTerm::Field {
        field:  SearchField::PostAddresses,
        needle: "berlin".into(),
      }
    );
  }

  #[test]
  fn unknown_field_degrades_to_free_term() {
    assert_eq!(
      QueryTerm::classify("emailx:foo"),
      QueryTerm::Free("emailx:foo".into())
    );
  }

  #[test]
  fn name_components_are_not_scoped_fields() {
    assert_eq!(
      QueryTerm::classify("first_name:john"),
      QueryTerm::Free("first_name:john".into())
    );
  }

  // ── Matching ───────────────────────────────────────────────────────────────

  #[test]
  fn and_semantics() {
    let r = john();
    assert!(Query::parse(&["name:john", "emails:example.org"]).matches(&r));
    assert!(!Query::parse(&["name:john", "emails:example.com"]).matches(&r));
    assert!(!Query::parse(&["name:mary", "emails:example.org"]).matches(&r));
  }

  #[test]
  fn name_covers_nicknames_and_components() {
    let r = john();
    assert!(Query::parse(&["name:jack"]).matches(&r));
    assert!(Query::parse(&["name:doe, john"]).matches(&r));
    assert!(!Query::parse(&["name:acme"]).matches(&r));
  }

  #[test]
  fn scoped_term_matches_labels_but_not_other_fields() {
    let r = john();
    assert!(Query::parse(&["emails:work"]).matches(&r));
    assert!(!Query::parse(&["emails:acme"]).matches(&r));
    assert!(Query::parse(&["organisations:acme"]).matches(&r));
  }

  #[test]
  fn free_term_searches_everything() {
    let r = john();
    assert!(Query::parse(&["ACME"]).matches(&r));
    assert!(Query::parse(&["abc-1"]).matches(&r));
    assert!(!Query::parse(&["emailx:foo"]).matches(&r));
  }

  #[test]
  fn free_term_with_literal_colon() {
    let mut r = john();
    r.notes.push("see emailx:foo for details".into());
    assert!(Query::parse(&["emailx:foo"]).matches(&r));
  }

  #[test]
  fn empty_query_matches_everything() {
    assert!(Query::any().matches(&john()));
  }

  #[test]
  fn phone_digits_ignore_formatting() {
    let r = john();
    assert!(Query::parse(&["phone_numbers:123456"]).matches(&r));
    assert!(Query::parse(&["phone_numbers:+49123456789"]).matches(&r));
    assert!(Query::parse(&["phone_numbers:0123456789"]).matches(&r));
    assert!(!Query::parse(&["phone_numbers:999"]).matches(&r));
  }

  #[test]
  fn kind_is_searchable_by_name_and_token() {
    let mut r = john();
    r.kind = Kind::Organisation;
    assert!(Query::parse(&["kind:organisation"]).matches(&r));
    assert!(Query::parse(&["kind:org"]).matches(&r));
  }

  #[test]
  fn matching_is_repeatable() {
    let r = john();
    let q = Query::parse(&["name:john", "work"]);
    assert_eq!(q.matches(&r), q.matches(&r));
    assert!(q.matches(&r));
  }

  // ── Raw pre-filter ─────────────────────────────────────────────────────────

  #[test]
  fn raw_filter_rejects_missing_needle() {
    let raw = "BEGIN:VCARD\r\nVERSION:3.0\r\nFN:John Doe\r\nEND:VCARD\r\n";
    assert!(Query::parse(&["john"]).may_match_raw(raw));
    assert!(!Query::parse(&["mary"]).may_match_raw(raw));
  }

  #[test]
  fn raw_filter_sees_through_folding() {
    let raw = "BEGIN:VCARD\r\nNOTE:abcdef\r\n ghij\r\nEND:VCARD\r\n";
    assert!(Query::parse(&["efgh"]).may_match_raw(raw));
  }

  #[test]
  fn raw_filter_passes_terms_it_cannot_judge() {
    let raw = "BEGIN:VCARD\r\nKIND:org\r\nBDAY:19900315\r\nEND:VCARD\r\n";
    assert!(Query::parse(&["kind:organisation"]).may_match_raw(raw));
    assert!(Query::parse(&["1990-03"]).may_match_raw(raw));
    assert!(Query::parse(&["phone_numbers:0123"]).may_match_raw(raw));
  }

  #[test]
  fn raw_filter_passes_files_with_timestamp_dates() {
    let basic = "BEGIN:VCARD\r\nBDAY:19900315T103000\r\nEND:VCARD\r\n";
    assert!(Query::parse(&["00z"]).may_match_raw(basic));
    let grouped = "BEGIN:VCARD\r\nitem2.X-ANNIVERSARY;VALUE=date-time:20100601T1200Z\r\n";
    assert!(Query::parse(&["+00"]).may_match_raw(grouped));

    let date_only = "BEGIN:VCARD\r\nBDAY:19900315\r\nNOTE:t1\r\nEND:VCARD\r\n";
    assert!(!Query::parse(&["00z"]).may_match_raw(date_only));
  }

  #[test]
  fn raw_filter_passes_quoted_printable_files() {
    let raw = "BEGIN:VCARD\r\nFN;ENCODING=QUOTED-PRINTABLE:=4A=6F\r\nEND:VCARD";
    assert!(Query::parse(&["jo"]).may_match_raw(raw));
  }
}
