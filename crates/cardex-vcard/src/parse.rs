//! vCard 3.0 / 4.0 content-line parser.
//!
//! Pipeline:
//!   raw &str
//!     └─ unfold_lines()           → Vec<(line number, logical line)>
//!          └─ parse_content_line() → ContentLine
//!               └─ pair_ablabels()  → free-text labels by line index
//!                    └─ CardBuilder  → ContactRecord

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use cardex_core::{
  ContactRecord, Date, Kind, LabelSet, Labeled, Organisation, PostAddress,
  RawParam, RawProperty, StructuredName, Version,
};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};

use crate::{
  ParseOptions, Parsed, Warning,
  error::{Error, Result},
};

// ─── Content-line representation ─────────────────────────────────────────────

struct ContentLine {
  line:   usize,
  group:  Option<String>,
  /// Property name as written.
  name:   String,
  /// Parameters as written, quotes included.
  params: Vec<RawParam>,
  /// Value still in wire encoding.
  value:  String,
}

impl ContentLine {
  fn upper_name(&self) -> String { self.name.to_ascii_uppercase() }

  /// Comma-separated values of every parameter called `name`.
  fn param_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
    self
      .params
      .iter()
      .filter(move |p| p.name.eq_ignore_ascii_case(name))
      .filter_map(|p| p.value.as_deref())
      .flat_map(split_param_list)
  }

  fn has_param_value(&self, name: &str, value: &str) -> bool {
    self.param_values(name).any(|v| v.eq_ignore_ascii_case(value))
  }

  fn has_bare_param(&self, token: &str) -> bool {
    self
      .params
      .iter()
      .any(|p| p.value.is_none() && p.name.eq_ignore_ascii_case(token))
  }

  fn is_quoted_printable(&self) -> bool {
    self.has_param_value("ENCODING", "QUOTED-PRINTABLE")
      || self.has_bare_param("QUOTED-PRINTABLE")
  }

  fn is_base64(&self) -> bool {
    self.has_param_value("ENCODING", "B")
      || self.has_param_value("ENCODING", "BASE64")
      || self.has_bare_param("BASE64")
  }

  /// The value with transfer encoding removed, still backslash-escaped.
  fn decoded_value(&self) -> String {
    if self.is_quoted_printable() {
      decode_quoted_printable(&self.value)
    } else {
      self.value.clone()
    }
  }

  fn into_raw(self) -> RawProperty {
    RawProperty {
      group:  self.group,
      name:   self.name,
      params: self.params,
      value:  self.value,
    }
  }
}

// ─── Low-level helpers ───────────────────────────────────────────────────────

/// Join CRLF+SP (or LF+SP / LF+HT) continuation lines (RFC 6350 §3.2).
/// Tolerates bare LF line endings. Each logical line carries the 1-based
/// number of the physical line it starts on.
pub(crate) fn unfold_lines(s: &str) -> Vec<(usize, String)> {
  let mut lines: Vec<(usize, String)> = Vec::new();
  for (idx, raw) in s.split('\n').enumerate() {
    let line = raw.strip_suffix('\r').unwrap_or(raw);
    if let Some(rest) = line.strip_prefix([' ', '\t']) {
      if let Some((_, last)) = lines.last_mut() {
        last.push_str(rest);
      }
      // a continuation with no prior line is discarded
    } else {
      lines.push((idx + 1, line.to_string()));
    }
  }
  lines.retain(|(_, l)| !l.trim().is_empty());
  lines
}

/// Find the first `:` that is not inside a double-quoted string.
fn find_unquoted_colon(s: &str) -> Option<usize> {
  let mut in_quotes = false;
  for (i, c) in s.char_indices() {
    match c {
      '"' => in_quotes = !in_quotes,
      ':' if !in_quotes => return Some(i),
      _ => {}
    }
  }
  None
}

/// Split on `;` while respecting double-quoted strings.
fn split_semicolons_respecting_quotes(s: &str) -> Vec<&str> {
  let mut result = Vec::new();
  let mut start = 0usize;
  let mut in_quotes = false;
  for (i, c) in s.char_indices() {
    match c {
      '"' => in_quotes = !in_quotes,
      ';' if !in_quotes => {
        result.push(&s[start..i]);
        start = i + 1;
      }
      _ => {}
    }
  }
  result.push(&s[start..]);
  result
}

/// Split a parameter value list (`A,B` or `"A,B"`) into trimmed items.
fn split_param_list(value: &str) -> impl Iterator<Item = &str> {
  value
    .split(',')
    .map(|v| v.trim().trim_matches('"').trim())
    .filter(|v| !v.is_empty())
}

/// Split on `sep` where it is not backslash-escaped.
pub(crate) fn split_unescaped(s: &str, sep: char) -> Vec<&str> {
  let mut parts = Vec::new();
  let mut start = 0usize;
  let mut escaped = false;
  for (i, c) in s.char_indices() {
    if escaped {
      escaped = false;
    } else if c == '\\' {
      escaped = true;
    } else if c == sep {
      parts.push(&s[start..i]);
      start = i + c.len_utf8();
    }
  }
  parts.push(&s[start..]);
  parts
}

fn is_token(s: &str) -> bool {
  !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

pub(crate) fn unescape_value(s: &str) -> String {
  let mut result = String::with_capacity(s.len());
  let mut chars = s.chars();
  while let Some(c) = chars.next() {
    if c == '\\' {
      match chars.next() {
        Some('n') | Some('N') => result.push('\n'),
        Some('\\') => result.push('\\'),
        Some(',') => result.push(','),
        Some(';') => result.push(';'),
        Some(other) => {
          result.push('\\');
          result.push(other);
        }
        None => result.push('\\'),
      }
    } else {
      result.push(c);
    }
  }
  result
}

/// Minimal decoder for `ENCODING=QUOTED-PRINTABLE`.
fn decode_quoted_printable(s: &str) -> String {
  let bytes = s.as_bytes();
  let mut result: Vec<u8> = Vec::with_capacity(bytes.len());
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] == b'='
      && let Some(byte) = s
        .get(i + 1..i + 3)
        .and_then(|hex| u8::from_str_radix(hex, 16).ok())
    {
      result.push(byte);
      i += 3;
      continue;
    }
    result.push(bytes[i]);
    i += 1;
  }
  String::from_utf8_lossy(&result).into_owned()
}

// ─── Dates ───────────────────────────────────────────────────────────────────

/// Parse a wire-format date: `YYYYMMDD`, `YYYY-MM-DD`, `--MMDD`, `--MM-DD`,
/// or a date-time in basic or extended form. `None` if nothing fits.
pub(crate) fn parse_wire_date(value: &str) -> Option<Date> {
  let v = value.trim();
  if let Some(rest) = v.strip_prefix("--") {
    let digits: String = rest.chars().filter(|c| *c != '-').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
      return None;
    }
    return Date::partial(digits[..2].parse().ok()?, digits[2..].parse().ok()?);
  }
  for fmt in ["%Y%m%d", "%Y-%m-%d"] {
    if let Ok(d) = NaiveDate::parse_from_str(v, fmt) {
      return Some(Date::Full(d));
    }
  }
  parse_wire_timestamp(v).map(Date::Timestamp)
}

pub(crate) fn parse_wire_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
  let v = value.trim();
  let zoned = match v.strip_suffix(['Z', 'z']) {
    Some(stripped) => format!("{stripped}+0000"),
    None => v.to_string(),
  };
  for fmt in ["%Y%m%dT%H%M%S%z", "%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%dT%H:%M:%S%:z"] {
    if let Ok(ts) = DateTime::parse_from_str(&zoned, fmt) {
      return Some(ts);
    }
  }
  // No zone given: read as UTC.
  for fmt in ["%Y%m%dT%H%M%S", "%Y-%m-%dT%H:%M:%S"] {
    if let Ok(naive) = NaiveDateTime::parse_from_str(v, fmt) {
      return Some(naive.and_utc().fixed_offset());
    }
  }
  None
}

// ─── Content-line parser ─────────────────────────────────────────────────────

fn parse_content_line(line: usize, text: &str) -> Result<ContentLine> {
  let malformed = || Error::MalformedContentLine {
    line,
    content: text.to_string(),
  };

  let colon_pos = find_unquoted_colon(text).ok_or_else(malformed)?;
  let head = &text[..colon_pos];
  let value = text[colon_pos + 1..].to_string();

  let tokens = split_semicolons_respecting_quotes(head);
  let (group, name) = match tokens[0].trim().split_once('.') {
    Some((group, name)) => (Some(group.to_string()), name.to_string()),
    None => (None, tokens[0].trim().to_string()),
  };
  if !is_token(&name) || group.as_deref().is_some_and(|g| !is_token(g)) {
    return Err(malformed());
  }

  let params = tokens[1..]
    .iter()
    .map(|t| t.trim())
    .filter(|t| !t.is_empty())
    .map(|t| match t.split_once('=') {
      Some((n, v)) => RawParam {
        name:  n.trim().to_string(),
        value: Some(v.trim().to_string()),
      },
      None => RawParam {
        name:  t.to_string(),
        value: None,
      },
    })
    .collect();

  Ok(ContentLine {
    line,
    group,
    name,
    params,
    value,
  })
}

// ─── X-ABLABEL pairing ───────────────────────────────────────────────────────

const LABELED_PROPERTIES: [&str; 5] = ["TEL", "EMAIL", "ADR", "URL", "IMPP"];

/// Find groups holding exactly one labeled property and one `X-ABLABEL`.
/// Returns the free-text label per property index, and the indices of the
/// consumed `X-ABLABEL` lines.
fn pair_ablabels(
  lines: &[ContentLine],
  is_private: impl Fn(&str) -> bool,
) -> (HashMap<usize, String>, Vec<usize>) {
  let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
  for (idx, cl) in lines.iter().enumerate() {
    if let Some(group) = &cl.group {
      groups.entry(group.to_ascii_lowercase()).or_default().push(idx);
    }
  }

  let mut labels = HashMap::new();
  let mut consumed = Vec::new();
  for members in groups.values() {
    let [a, b] = members.as_slice() else { continue };
    let (label_idx, prop_idx) = match (
      lines[*a].name.eq_ignore_ascii_case("X-ABLABEL"),
      lines[*b].name.eq_ignore_ascii_case("X-ABLABEL"),
    ) {
      (true, false) => (*a, *b),
      (false, true) => (*b, *a),
      _ => continue,
    };
    let prop = lines[prop_idx].upper_name();
    if LABELED_PROPERTIES.contains(&prop.as_str()) || is_private(&prop) {
      let text = unescape_value(&lines[label_idx].decoded_value());
      labels.insert(prop_idx, text);
      consumed.push(label_idx);
    }
  }
  (labels, consumed)
}

// ─── Record builder ──────────────────────────────────────────────────────────

/// Properties where only the last occurrence counts.
const SINGLE_VALUED: [&str; 8] =
  ["VERSION", "UID", "FN", "N", "KIND", "BDAY", "ANNIVERSARY", "REV"];

struct CardBuilder<'o> {
  record:   ContactRecord,
  options:  &'o ParseOptions,
  warnings: Vec<Warning>,
  seen:     HashMap<&'static str, usize>,
}

impl<'o> CardBuilder<'o> {
  fn new(version: Version, options: &'o ParseOptions) -> Self {
    Self {
      record: ContactRecord::with_uid(String::new(), version),
      options,
      warnings: Vec::new(),
      seen: HashMap::new(),
    }
  }

  /// Record an occurrence of a single-valued property; warn on repeats.
  fn single(&mut self, property: &'static str, line: usize) {
    if let Some(first) = self.seen.insert(property, line) {
      tracing::warn!(
        property,
        first_line = first,
        line,
        "repeated single-valued property, keeping the last one"
      );
      self.warnings.push(Warning::RepeatedProperty {
        property: property.to_string(),
        line,
      });
    }
  }

  fn private_key(&self, upper_name: &str) -> Option<String> {
    let suffix = upper_name.strip_prefix("X-")?;
    self
      .options
      .private_objects
      .iter()
      .find(|p| p.eq_ignore_ascii_case(suffix))
      .cloned()
  }

  fn label_set(&self, cl: &ContentLine, custom: Option<String>) -> LabelSet {
    let mut label = LabelSet::new();
    label.custom = custom;
    for param in &cl.params {
      match &param.value {
        Some(value) if param.name.eq_ignore_ascii_case("TYPE") => {
          for tag in split_param_list(value) {
            insert_type(&mut label, tag);
          }
        }
        Some(value) if param.name.eq_ignore_ascii_case("PREF") => {
          // 3.0 has no ranks; any PREF there means "preferred".
          let rank = if self.record.version.is_v4() {
            value.trim_matches('"').trim().parse::<u8>().ok().filter(|r| *r > 0)
          } else {
            Some(1)
          };
          if rank.is_some() {
            label.pref = rank;
          }
        }
        None if !is_transfer_token(&param.name) => {
          insert_type(&mut label, &param.name)
        }
        _ => {}
      }
    }
    label
  }

  fn apply(&mut self, cl: ContentLine, custom: Option<String>) -> Result<()> {
    let upper = cl.upper_name();
    let value = cl.decoded_value();
    let text = || unescape_value(&value);

    match upper.as_str() {
      "VERSION" => {}

      "UID" => {
        self.single("UID", cl.line);
        self.record.uid = text().trim().to_string();
      }

      // ── Name ─────────────────────────────────────────────────────────────
      "FN" => {
        self.single("FN", cl.line);
        self.record.formatted_name = text();
      }
      "N" => {
        self.single("N", cl.line);
        let parts: Vec<String> =
          split_unescaped(&value, ';').into_iter().map(unescape_value).collect();
        let part = |i: usize| parts.get(i).cloned().unwrap_or_default();
        // family;given;additional;prefix;suffix
        self.record.name = StructuredName {
          last:       part(0),
          first:      part(1),
          additional: part(2),
          prefix:     part(3),
          suffix:     part(4),
        };
      }
      "NICKNAME" => {
        self.record.nicknames.extend(list_values(&value));
      }

      "KIND" | "X-KIND" => {
        self.single("KIND", cl.line);
        match Kind::from_token(&text()) {
          Some(kind) => self.record.kind = kind,
          None => {
            self.record.kind = Kind::Unspecified;
            self.record.unrecognized.push(cl.into_raw());
          }
        }
      }

      // ── Org / role ───────────────────────────────────────────────────────
      "ORG" => {
        let mut parts =
          split_unescaped(&value, ';').into_iter().map(unescape_value);
        let name = parts.next().unwrap_or_default();
        self.record.organisations.push(Organisation {
          name,
          units: parts.collect(),
        });
      }
      "TITLE" => self.record.titles.push(text()),
      "ROLE" => self.record.roles.push(text()),

      // ── Labeled fields ───────────────────────────────────────────────────
      "TEL" => {
        let number = text();
        let number = strip_tel_scheme(number.trim()).to_string();
        let label = self.label_set(&cl, custom);
        self.record.phones.push(Labeled::new(label, number));
      }
      "EMAIL" => {
        let label = self.label_set(&cl, custom);
        self.record.emails.push(Labeled::new(label, text().trim().to_string()));
      }
      "URL" => {
        let label = self.label_set(&cl, custom);
        self.record.webpages.push(Labeled::new(label, text().trim().to_string()));
      }
      "IMPP" => {
        let label = self.label_set(&cl, custom);
        self.record.messaging.push(Labeled::new(label, text().trim().to_string()));
      }
      "ADR" => {
        let label = self.label_set(&cl, custom);
        let parts = split_unescaped(&value, ';');
        let single = |i: usize| parts.get(i).map(|p| unescape_value(p)).unwrap_or_default();
        let lines = |i: usize| parts.get(i).map(|p| list_values(p)).unwrap_or_default();
        // pobox;ext;street;locality;region;code;country
        let address = PostAddress {
          po_box:      single(0),
          extended:    lines(1),
          street:      lines(2),
          locality:    single(3),
          region:      single(4),
          postal_code: single(5),
          country:     single(6),
        };
        self.record.addresses.push(Labeled::new(label, address));
      }

      // ── Dates ────────────────────────────────────────────────────────────
      "BDAY" => {
        if let Some(date) = self.date_value(&cl, &value) {
          self.single("BDAY", cl.line);
          self.record.birthday = Some(date);
        } else {
          self.record.unrecognized.push(cl.into_raw());
        }
      }
      "ANNIVERSARY" | "X-ANNIVERSARY" => {
        if let Some(date) = self.date_value(&cl, &value) {
          self.single("ANNIVERSARY", cl.line);
          self.record.anniversary = Some(date);
        } else {
          self.record.unrecognized.push(cl.into_raw());
        }
      }
      "REV" => match parse_wire_timestamp(&value) {
        Some(ts) => {
          self.single("REV", cl.line);
          self.record.revision = Some(ts.with_timezone(&Utc));
        }
        None => self.record.unrecognized.push(cl.into_raw()),
      },

      // ── Misc ─────────────────────────────────────────────────────────────
      "CATEGORIES" => {
        self.record.categories.extend(list_values(&value));
      }
      "NOTE" => self.record.notes.push(text()),

      other => {
        if let Some(key) = self.private_key(other) {
          let label = self.label_set(&cl, custom);
          self
            .record
            .private
            .entry(key)
            .or_default()
            .push(Labeled::new(label, text()));
        } else {
          if cl.is_base64() {
            let payload: String =
              cl.value.chars().filter(|c| !c.is_whitespace()).collect();
            if STANDARD.decode(payload.as_bytes()).is_err() {
              return Err(Error::InvalidEncoding {
                line:     cl.line,
                property: cl.name,
              });
            }
          }
          self.record.unrecognized.push(cl.into_raw());
        }
      }
    }
    Ok(())
  }

  /// `None` when the value is not a date this card's version can hold; the
  /// caller then keeps the property verbatim.
  fn date_value(&self, cl: &ContentLine, value: &str) -> Option<Date> {
    let date = if cl.has_param_value("VALUE", "text") {
      let text = unescape_value(value).trim().to_string();
      (!text.is_empty()).then_some(Date::Text(text))
    } else {
      parse_wire_date(value)
    };
    date.filter(|d| self.record.version.is_v4() || !d.requires_v4())
  }
}

fn insert_type(label: &mut LabelSet, tag: &str) {
  let tag = tag.trim().to_lowercase();
  if tag == "pref" {
    label.pref.get_or_insert(1);
  } else if !tag.is_empty() {
    label.types.insert(tag);
  }
}

/// vCard 2.1-style bare parameters that describe encoding, not type.
fn is_transfer_token(token: &str) -> bool {
  ["QUOTED-PRINTABLE", "BASE64", "8BIT", "7BIT"]
    .iter()
    .any(|t| t.eq_ignore_ascii_case(token))
}

fn strip_tel_scheme(number: &str) -> &str {
  match number.get(..4) {
    Some(scheme) if scheme.eq_ignore_ascii_case("tel:") => &number[4..],
    _ => number,
  }
}

/// Comma-separated text list, unescaped, empty items dropped.
fn list_values(value: &str) -> Vec<String> {
  split_unescaped(value, ',')
    .into_iter()
    .map(|v| unescape_value(v.trim()))
    .filter(|v| !v.is_empty())
    .collect()
}

// ─── Core parser ─────────────────────────────────────────────────────────────

/// Parse exactly one vCard from `input`.
pub fn parse_one(input: &str, options: &ParseOptions) -> Result<Parsed> {
  let lines = unfold_lines(input);

  let start = lines
    .iter()
    .position(|(_, l)| l.trim().eq_ignore_ascii_case("BEGIN:VCARD"))
    .ok_or(Error::MissingEnvelope)?;
  let end = lines
    .iter()
    .rposition(|(_, l)| l.trim().eq_ignore_ascii_case("END:VCARD"))
    .ok_or(Error::MissingEnvelope)?;
  if end <= start {
    return Err(Error::MissingEnvelope);
  }

  let mut content = Vec::with_capacity(end - start);
  for (line, text) in &lines[start + 1..end] {
    let cl = parse_content_line(*line, text)?;
    // A second card inside the envelope is not one record.
    if cl.name.eq_ignore_ascii_case("BEGIN") || cl.name.eq_ignore_ascii_case("END") {
      return Err(Error::MalformedContentLine {
        line:    *line,
        content: text.clone(),
      });
    }
    content.push(cl);
  }

  // ── Version first: it decides how PREF and dates are read ────────────────
  let mut warnings = Vec::new();
  let versions: Vec<&ContentLine> =
    content.iter().filter(|cl| cl.name.eq_ignore_ascii_case("VERSION")).collect();
  let version = match versions.last() {
    Some(cl) => {
      let raw = cl.value.trim();
      raw
        .parse::<Version>()
        .map_err(|_| Error::UnsupportedVersion(raw.to_string()))?
    }
    None => {
      tracing::warn!("vCard has no VERSION, reading it as 3.0");
      warnings.push(Warning::MissingVersion);
      Version::V3
    }
  };

  let mut builder = CardBuilder::new(version, options);
  builder.warnings = warnings;
  for cl in &versions {
    builder.single("VERSION", cl.line);
  }

  let (mut labels, consumed) =
    pair_ablabels(&content, |name| builder.private_key(name).is_some());

  for (idx, cl) in content.into_iter().enumerate() {
    if consumed.contains(&idx) {
      continue;
    }
    let custom = labels.remove(&idx);
    builder.apply(cl, custom)?;
  }

  let CardBuilder {
    mut record,
    mut warnings,
    ..
  } = builder;

  record.ensure_formatted_name();
  if record.uid.is_empty() {
    tracing::warn!(name = %record.formatted_name, "vCard has no UID");
    warnings.push(Warning::MissingUid);
  }

  Ok(Parsed { record, warnings })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
