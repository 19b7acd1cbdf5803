//! vCard 3.0 / 4.0 codec for cardex.
//!
//! Converts between vCard text and [`cardex_core::ContactRecord`]. Pure
//! synchronous; no filesystem access.
//!
//! # Quick start
//!
//! ```no_run
//! use cardex_vcard::{ParseOptions, parse};
//!
//! let vcard = "BEGIN:VCARD\r\nVERSION:4.0\r\nFN:Alice Smith\r\nEND:VCARD\r\n";
//! let parsed = parse(vcard, &ParseOptions::default()).unwrap();
//! println!("{} ({} warnings)", parsed.record.formatted_name, parsed.warnings.len());
//! ```

pub mod error;
mod parse;
mod serialize;

use std::fmt;

use cardex_core::{ContactRecord, Version};
pub use error::{Error, Result};

// ─── Public types ────────────────────────────────────────────────────────────

/// Knobs that change how properties are interpreted.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
  /// Names of `X-<NAME>` extension properties to read as labeled private
  /// fields instead of keeping them verbatim.
  pub private_objects: Vec<String>,
}

/// A record plus everything that was off about its source text.
#[derive(Debug, Clone)]
pub struct Parsed {
  pub record:   ContactRecord,
  pub warnings: Vec<Warning>,
}

/// Non-fatal problems found while parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
  /// No `VERSION` line; the card was read as 3.0.
  MissingVersion,
  /// No `UID` line; the record's uid is empty.
  MissingUid,
  /// A single-valued property appeared again at `line`; the last one won.
  RepeatedProperty { property: String, line: usize },
}

impl fmt::Display for Warning {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::MissingVersion => f.write_str("no VERSION, read as 3.0"),
      Self::MissingUid => f.write_str("no UID"),
      Self::RepeatedProperty { property, line } => {
        write!(f, "line {line}: repeated {property}, kept the last one")
      }
    }
  }
}

// ─── Public API ──────────────────────────────────────────────────────────────

/// Parse a single vCard from `input`.
///
/// Text outside the `BEGIN:VCARD` / `END:VCARD` envelope is ignored; a second
/// card inside the envelope is an error.
pub fn parse(input: &str, options: &ParseOptions) -> Result<Parsed> {
  parse::parse_one(input, options)
}

/// Serialize `record` as `version` (CRLF line endings, folded at 75 octets).
///
/// The record's own [`ContactRecord::version`] is not consulted, so callers
/// can convert between versions.
pub fn serialize(record: &ContactRecord, version: Version) -> Result<String> {
  serialize::serialize(record, version)
}

// ─── Round-trip test ─────────────────────────────────────────────────────────

#[cfg(test)]
mod roundtrip_tests {
  use cardex_core::{
    Date, Kind, LabelSet, Labeled, Organisation, PostAddress, RawParam,
    RawProperty,
  };
  use chrono::{DateTime, NaiveDate, TimeZone, Utc};
  use pretty_assertions::assert_eq;

  use super::{test_helpers::make_record, *};

  fn options() -> ParseOptions {
    ParseOptions {
      private_objects: vec!["Jabber".to_string()],
    }
  }

  fn rich_record(version: Version) -> ContactRecord {
    let mut r = make_record(version);
    r.name.prefix = "Dr.".into();
    r.formatted_name = "Dr. Alice Smith".into();
    r.nicknames = vec!["Al".into(), "Ally".into()];
    r.organisations = vec![Organisation {
      name:  "Acme, Inc.".into(),
      units: vec!["R&D".into()],
    }];
    r.titles = vec!["Engineer".into()];
    r.phones = vec![
      Labeled::new(LabelSet::new().with_type("home"), "555-0100".into()),
      Labeled::new(
        LabelSet::new().with_type("home").with_pref(1),
        "555-0101".into(),
      ),
      Labeled::new(LabelSet::new().with_custom("Cabin"), "555-0102".into()),
    ];
    r.emails = vec![Labeled::new(
      LabelSet::new().with_type("work"),
      "alice@example.com".into(),
    )];
    r.addresses = vec![Labeled::new(
      LabelSet::new().with_type("home"),
      PostAddress {
        street: vec!["1 Main St".into(), "Apt 2".into()],
        locality: "Springfield".into(),
        postal_code: "12345".into(),
        country: "USA".into(),
        ..Default::default()
      },
    )];
    r.webpages = vec![Labeled::unlabeled("https://example.com".into())];
    r.private.insert(
      "Jabber".into(),
      vec![Labeled::new(LabelSet::new().with_type("work"), "al@jabber.org".into())],
    );
    r.birthday = Some(Date::Full(NaiveDate::from_ymd_opt(1990, 3, 15).unwrap()));
    r.categories = vec!["friends".into(), "work".into()];
    r.notes = vec!["Line one\nline two; with, punctuation".into()];
    r.revision = Some(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
    r.unrecognized = vec![RawProperty {
      group:  None,
      name:   "X-SOCIALPROFILE".into(),
      params: vec![RawParam {
        name:  "TYPE".into(),
        value: Some("twitter".into()),
      }],
      value:  "https://twitter.com/alice".into(),
    }];
    r
  }

  #[test]
  fn rich_record_survives_both_versions() {
    for version in [Version::V3, Version::V4] {
      let record = rich_record(version);
      let text = serialize(&record, version).unwrap();
      let parsed = parse(&text, &options()).unwrap();
      assert_eq!(parsed.warnings, vec![]);
      assert_eq!(parsed.record, record);
    }
  }

  #[test]
  fn serialization_is_stable() {
    let record = rich_record(Version::V4);
    let first = serialize(&record, Version::V4).unwrap();
    let reparsed = parse(&first, &options()).unwrap().record;
    let second = serialize(&reparsed, Version::V4).unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn v4_only_content_round_trips_in_v4() {
    let mut record = make_record(Version::V4);
    record.kind = Kind::Group;
    record.birthday = Some(Date::Partial { month: 2, day: 29 });
    record.anniversary = Some(Date::Text("spring of '99".into()));
    let text = serialize(&record, Version::V4).unwrap();
    let parsed = parse(&text, &ParseOptions::default()).unwrap();
    assert_eq!(parsed.record, record);
  }

  #[test]
  fn v4_record_with_ranks_cannot_downgrade() {
    let mut record = make_record(Version::V4);
    record.emails = vec![Labeled::new(LabelSet::new().with_pref(3), "a@b.c".into())];
    assert!(matches!(
      serialize(&record, Version::V3),
      Err(Error::UnsupportedVersionFeature { .. })
    ));
  }

  #[test]
  fn timestamp_birthday_keeps_offset() {
    let mut record = make_record(Version::V4);
    let ts = DateTime::parse_from_rfc3339("1990-03-15T10:30:00+02:00").unwrap();
    record.birthday = Some(Date::Timestamp(ts));
    for version in [Version::V3, Version::V4] {
      record.version = version;
      let text = serialize(&record, version).unwrap();
      let parsed = parse(&text, &ParseOptions::default()).unwrap();
      assert_eq!(parsed.record.birthday, record.birthday, "{text}");
    }
  }

  #[test]
  fn apple_export_reads_and_writes_back_labels() {
    let input = "BEGIN:VCARD\r\n\
                 VERSION:3.0\r\n\
                 UID:apple-1\r\n\
                 FN:Bob\r\n\
                 N:;Bob;;;\r\n\
                 item1.EMAIL;type=INTERNET:bob@example.com\r\n\
                 item1.X-ABLABEL:_$!<Other>!$_\r\n\
                 END:VCARD\r\n";
    let parsed = parse(input, &ParseOptions::default()).unwrap();
    let email = &parsed.record.emails[0];
    assert_eq!(email.label.custom.as_deref(), Some("_$!<Other>!$_"));

    let out = serialize(&parsed.record, Version::V3).unwrap();
    assert!(out.contains("item1.EMAIL;TYPE=internet:bob@example.com\r\n"), "{out}");
    assert!(out.contains("item1.X-ABLABEL:_$!<Other>!$_\r\n"), "{out}");
  }

  #[test]
  fn v3_card_with_v4_date_forms_keeps_them_verbatim() {
    let input = "BEGIN:VCARD\r\n\
                 VERSION:3.0\r\n\
                 UID:old-1\r\n\
                 FN:Carol\r\n\
                 N:;Carol;;;\r\n\
                 BDAY:--0315\r\n\
                 X-ANNIVERSARY;VALUE=text:spring\r\n\
                 END:VCARD\r\n";
    let record = parse(input, &ParseOptions::default()).unwrap().record;
    assert_eq!(record.birthday, None);
    assert_eq!(record.anniversary, None);
    let names: Vec<&str> =
      record.unrecognized.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["BDAY", "X-ANNIVERSARY"]);

    let out = serialize(&record, record.version).unwrap();
    assert!(out.contains("BDAY:--0315\r\n"), "{out}");
    let again = parse(&out, &ParseOptions::default()).unwrap().record;
    assert_eq!(again, record);
  }
}

// ─── Shared test helpers ─────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod test_helpers {
  use cardex_core::{ContactRecord, Version};

  /// A minimal named record with a fixed uid.
  pub(crate) fn make_record(version: Version) -> ContactRecord {
    let mut r = ContactRecord::with_uid("test-uid-1", version);
    r.name.first = "Alice".into();
    r.name.last = "Smith".into();
    r.formatted_name = "Alice Smith".into();
    r
  }
}
