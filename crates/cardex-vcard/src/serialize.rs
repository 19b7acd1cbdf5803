//! vCard 4.0 and 3.0 serializer.
//!
//! Produces CRLF line endings and folds at 75 octets per RFC 6350 §3.2.
//! Both versions share one body writer; the version only matters for dates,
//! preference encoding and a few property names.

use std::collections::HashSet;

use cardex_core::{
  ContactRecord, Date, Kind, LabelSet, Labeled, PostAddress, Version,
};
use chrono::{DateTime, FixedOffset};

use crate::error::{Error, Result};

// ─── RFC 6350 line folding ───────────────────────────────────────────────────

/// Emit `s` as one logical line, folding at 75 octets with CRLF + SP
/// continuation.
pub(crate) fn fold_line(s: &str) -> String {
  if s.len() <= 75 {
    return format!("{s}\r\n");
  }

  let mut result = String::new();
  let total = s.len();
  let mut pos = 0usize;
  let mut first = true;

  while pos < total {
    let limit = if first { 75 } else { 74 };
    let end = if pos + limit >= total {
      total
    } else {
      // Walk back to the nearest valid UTF-8 char boundary
      let mut e = pos + limit;
      while e > pos && !s.is_char_boundary(e) {
        e -= 1;
      }
      e
    };

    if !first {
      result.push(' ');
    }
    result.push_str(&s[pos..end]);
    result.push_str("\r\n");
    pos = end;
    first = false;
  }

  result
}

// ─── Value escaping ──────────────────────────────────────────────────────────

/// Escape a full property value: `\`, `,`, `;`, `\n`.
pub(crate) fn escape_value(s: &str) -> String {
  s.replace('\\', "\\\\")
    .replace(',', "\\,")
    .replace(';', "\\;")
    .replace('\n', "\\n")
}

/// Escape one `;`-delimited component (N field): `\`, `;`, `\n`.
/// Commas are list separators within a component and are not escaped here.
fn escape_component(s: &str) -> String {
  s.replace('\\', "\\\\")
    .replace(';', "\\;")
    .replace('\n', "\\n")
}

/// Join list items into one component, escaping each item fully.
fn escape_list(items: &[String]) -> String {
  items
    .iter()
    .map(|i| escape_value(i))
    .collect::<Vec<_>>()
    .join(",")
}

// ─── Dates ───────────────────────────────────────────────────────────────────

fn format_timestamp(ts: &DateTime<FixedOffset>, v4: bool) -> String {
  let utc = ts.offset().local_minus_utc() == 0;
  match (v4, utc) {
    (true, true) => ts.format("%Y%m%dT%H%M%SZ").to_string(),
    (true, false) => ts.format("%Y%m%dT%H%M%S%z").to_string(),
    (false, true) => ts.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
    (false, false) => ts.format("%Y-%m-%dT%H:%M:%S%:z").to_string(),
  }
}

/// `(params, value)` for a date property.
fn format_date(
  property: &str,
  date: &Date,
  version: Version,
) -> Result<(String, String)> {
  let v4 = version.is_v4();
  match date {
    Date::Full(d) if v4 => Ok((String::new(), d.format("%Y%m%d").to_string())),
    Date::Full(d) => Ok((String::new(), d.format("%Y-%m-%d").to_string())),
    Date::Timestamp(ts) => Ok((String::new(), format_timestamp(ts, v4))),
    Date::Partial { month, day } if v4 => {
      Ok((String::new(), format!("--{month:02}{day:02}")))
    }
    Date::Text(text) if v4 => Ok((";VALUE=text".to_string(), escape_value(text))),
    Date::Partial { .. } => Err(Error::UnsupportedVersionFeature {
      feature: format!("{property} without a year"),
    }),
    Date::Text(_) => Err(Error::UnsupportedVersionFeature {
      feature: format!("{property} as free text"),
    }),
  }
}

// ─── Labels ──────────────────────────────────────────────────────────────────

/// Parameter string for a label set, e.g. `;TYPE=home,cell;PREF=1`.
fn label_params(property: &str, label: &LabelSet, version: Version) -> Result<String> {
  let mut types: Vec<String> = label.types.iter().cloned().collect();
  let mut pref = String::new();
  match (label.pref, version) {
    (None, _) => {}
    (Some(rank), Version::V4) => pref = format!(";PREF={rank}"),
    (Some(1), Version::V3) => types.push("pref".to_string()),
    (Some(rank), Version::V3) => {
      return Err(Error::UnsupportedVersionFeature {
        feature: format!("{property} preference rank {rank}"),
      });
    }
  }
  let mut params = String::new();
  if !types.is_empty() {
    params.push_str(";TYPE=");
    params.push_str(&types.join(","));
  }
  params.push_str(&pref);
  Ok(params)
}

/// Hands out `itemN` group names that do not collide with groups already
/// used by preserved properties.
struct GroupNames {
  taken: HashSet<String>,
  next:  usize,
}

impl GroupNames {
  fn new(record: &ContactRecord) -> Self {
    Self {
      taken: record
        .unrecognized
        .iter()
        .filter_map(|p| p.group.as_deref())
        .map(str::to_ascii_lowercase)
        .collect(),
      next:  1,
    }
  }

  fn allocate(&mut self) -> String {
    loop {
      let name = format!("item{}", self.next);
      self.next += 1;
      if self.taken.insert(name.clone()) {
        return name;
      }
    }
  }
}

struct Writer {
  version: Version,
  groups:  GroupNames,
  out:     String,
}

impl Writer {
  fn line(&mut self, s: &str) { self.out.push_str(&fold_line(s)); }

  /// One labeled property; a free-text label travels as a grouped
  /// `X-ABLABEL` next to it.
  fn labeled(
    &mut self,
    property: &str,
    label: &LabelSet,
    extra_params: &str,
    value: &str,
  ) -> Result<()> {
    let params = label_params(property, label, self.version)?;
    match &label.custom {
      Some(custom) => {
        let group = self.groups.allocate();
        self.line(&format!("{group}.{property}{extra_params}{params}:{value}"));
        self.line(&format!("{group}.X-ABLABEL:{}", escape_value(custom)));
      }
      None => self.line(&format!("{property}{extra_params}{params}:{value}")),
    }
    Ok(())
  }

  fn labeled_texts(&mut self, property: &str, entries: &[Labeled<String>]) -> Result<()> {
    for entry in entries {
      self.labeled(property, &entry.label, "", &escape_value(&entry.value))?;
    }
    Ok(())
  }

  fn texts(&mut self, property: &str, values: &[String]) {
    for value in values {
      self.line(&format!("{property}:{}", escape_value(value)));
    }
  }

  fn date(&mut self, property: &str, date: &Date) -> Result<()> {
    let (params, value) = format_date(property, date, self.version)?;
    self.line(&format!("{property}{params}:{value}"));
    Ok(())
  }
}

fn address_value(a: &PostAddress) -> String {
  [
    escape_value(&a.po_box),
    escape_list(&a.extended),
    escape_list(&a.street),
    escape_value(&a.locality),
    escape_value(&a.region),
    escape_value(&a.postal_code),
    escape_value(&a.country),
  ]
  .join(";")
}

// ─── Serializer ──────────────────────────────────────────────────────────────

/// Serialize `record` as a vCard of the given `version`.
///
/// Fails with [`Error::UnsupportedVersionFeature`] rather than writing
/// 4.0-only content into a 3.0 document.
pub fn serialize(record: &ContactRecord, version: Version) -> Result<String> {
  let v4 = version.is_v4();
  let mut w = Writer {
    version,
    groups: GroupNames::new(record),
    out: String::new(),
  };

  w.line("BEGIN:VCARD");
  w.line(&format!("VERSION:{version}"));
  if !record.uid.is_empty() {
    w.line(&format!("UID:{}", escape_value(&record.uid)));
  }

  // ── Identity ────────────────────────────────────────────────────────────
  w.line(&format!("FN:{}", escape_value(&record.formatted_name)));
  // 3.0 requires N even when empty
  if !v4 || !record.name.is_empty() {
    let n = &record.name;
    w.line(&format!(
      "N:{};{};{};{};{}",
      escape_component(&n.last),
      escape_component(&n.first),
      escape_component(&n.additional),
      escape_component(&n.prefix),
      escape_component(&n.suffix),
    ));
  }
  if record.kind != Kind::Individual
    && let Some(token) = record.kind.token()
  {
    let property = if v4 { "KIND" } else { "X-KIND" };
    w.line(&format!("{property}:{token}"));
  }
  w.texts("NICKNAME", &record.nicknames);

  // ── Organisation ────────────────────────────────────────────────────────
  for org in &record.organisations {
    let mut parts = vec![escape_value(&org.name)];
    parts.extend(org.units.iter().map(|u| escape_value(u)));
    w.line(&format!("ORG:{}", parts.join(";")));
  }
  w.texts("TITLE", &record.titles);
  w.texts("ROLE", &record.roles);

  // ── Contact methods ─────────────────────────────────────────────────────
  for tel in &record.phones {
    let (extra, value) = if v4 {
      (";VALUE=uri", format!("tel:{}", escape_value(&tel.value)))
    } else {
      ("", escape_value(&tel.value))
    };
    w.labeled("TEL", &tel.label, extra, &value)?;
  }
  w.labeled_texts("EMAIL", &record.emails)?;
  for adr in &record.addresses {
    w.labeled("ADR", &adr.label, "", &address_value(&adr.value))?;
  }
  w.labeled_texts("URL", &record.webpages)?;
  w.labeled_texts("IMPP", &record.messaging)?;
  for (name, entries) in &record.private {
    w.labeled_texts(&format!("X-{}", name.to_ascii_uppercase()), entries)?;
  }

  // ── Dates ───────────────────────────────────────────────────────────────
  if let Some(bday) = &record.birthday {
    w.date("BDAY", bday)?;
  }
  if let Some(anniversary) = &record.anniversary {
    w.date(if v4 { "ANNIVERSARY" } else { "X-ANNIVERSARY" }, anniversary)?;
  }

  // ── Misc ────────────────────────────────────────────────────────────────
  if !record.categories.is_empty() {
    w.line(&format!("CATEGORIES:{}", escape_list(&record.categories)));
  }
  w.texts("NOTE", &record.notes);
  if let Some(rev) = &record.revision {
    let rev = if v4 {
      rev.format("%Y%m%dT%H%M%SZ")
    } else {
      rev.format("%Y-%m-%dT%H:%M:%SZ")
    };
    w.line(&format!("REV:{rev}"));
  }

  // ── Preserved properties, grouped ones kept together ────────────────────
  let mut order: Vec<Option<String>> = Vec::new();
  for prop in &record.unrecognized {
    let key = prop.group.as_deref().map(str::to_ascii_lowercase);
    if !order.contains(&key) {
      order.push(key);
    }
  }
  for key in &order {
    for prop in record
      .unrecognized
      .iter()
      .filter(|p| p.group.as_deref().map(str::to_ascii_lowercase) == *key)
    {
      w.line(&prop.to_string());
    }
  }

  w.line("END:VCARD");
  Ok(w.out)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
