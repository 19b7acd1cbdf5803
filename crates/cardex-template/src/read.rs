//! Template → record mapping, with field-qualified validation errors.

use std::collections::BTreeMap;

use cardex_core::{
  ContactRecord, Date, Kind, LabelSet, Labeled, LabeledField, Organisation,
  PostAddress, Version,
};
use chrono::{SubsecRound, Utc};
use serde_yaml::{Mapping, Value};

use crate::{
  ADDITIONAL, ADDRESS, ADDRESS_KEYS, ANNIVERSARY, BIRTHDAY, CATEGORIES,
  EMAILS, FIELDS, FIRST_NAME, FORMATTED_NAME, KIND, LAST_NAME, MESSAGING,
  NICKNAME, NOTE, ORGANISATION, PHONE, PREFIX, PRIVATE, ROLE, SUFFIX,
  TemplateOptions, TITLE, WEBPAGE,
  error::{Error, Result},
};

pub(crate) fn apply(
  doc: &Mapping,
  existing: Option<&ContactRecord>,
  options: &TemplateOptions,
) -> Result<ContactRecord> {
  for key in doc.keys() {
    match key.as_str() {
      Some(k) if FIELDS.contains(&k) => {}
      Some(k) => return Err(Error::validation(k, "unknown field")),
      None => {
        return Err(Error::validation(
          "template",
          "field names must be strings",
        ));
      }
    }
  }

  let mut record = match existing {
    Some(r) => r.clone(),
    None => ContactRecord::new(options.version),
  };

  // ── Names ────────────────────────────────────────────────────────────────
  if let Some(v) = doc.get(PREFIX) {
    record.name.prefix = scalar(PREFIX, v)?;
  }
  if let Some(v) = doc.get(FIRST_NAME) {
    record.name.first = scalar(FIRST_NAME, v)?;
  }
  if let Some(v) = doc.get(ADDITIONAL) {
    record.name.additional = scalar(ADDITIONAL, v)?;
  }
  if let Some(v) = doc.get(LAST_NAME) {
    record.name.last = scalar(LAST_NAME, v)?;
  }
  if let Some(v) = doc.get(SUFFIX) {
    record.name.suffix = scalar(SUFFIX, v)?;
  }
  if let Some(v) = doc.get(FORMATTED_NAME) {
    record.formatted_name = scalar(FORMATTED_NAME, v)?;
  }
  if let Some(v) = doc.get(NICKNAME) {
    record.nicknames = string_list(NICKNAME, v)?;
  }

  // ── Organisation ─────────────────────────────────────────────────────────
  if let Some(v) = doc.get(ORGANISATION) {
    record.organisations = organisations(v)?;
  }
  if let Some(v) = doc.get(TITLE) {
    record.titles = string_list(TITLE, v)?;
  }
  if let Some(v) = doc.get(ROLE) {
    record.roles = string_list(ROLE, v)?;
  }
  if let Some(v) = doc.get(KIND) {
    let raw = scalar(KIND, v)?;
    let kind = if raw.is_empty() {
      Kind::Individual
    } else {
      raw
        .parse::<Kind>()
        .map_err(|e| Error::validation(KIND, e.to_string()))?
    };
    if kind != record.kind {
      // Only a loaded card's foreign KIND value can be carried as unspecified.
      if kind == Kind::Unspecified {
        return Err(Error::validation(
          KIND,
          "unspecified cannot be chosen; use individual, group, organisation \
           or location",
        ));
      }
      record.drop_unrecognized(&["KIND", "X-KIND"]);
      record.kind = kind;
    }
  }

  // ── Labeled fields ───────────────────────────────────────────────────────
  if let Some(v) = doc.get(PHONE) {
    record.phones = labeled_strings(PHONE, LabeledField::Phone, v)?;
  }
  if let Some(v) = doc.get(EMAILS) {
    record.emails = labeled_strings(EMAILS, LabeledField::Email, v)?;
  }
  if let Some(v) = doc.get(ADDRESS) {
    record.addresses = addresses(v)?;
  }
  if let Some(v) = doc.get(WEBPAGE) {
    record.webpages = labeled_strings(WEBPAGE, LabeledField::Webpage, v)?;
  }
  if let Some(v) = doc.get(MESSAGING) {
    record.messaging = labeled_strings(MESSAGING, LabeledField::Messaging, v)?;
  }
  if let Some(v) = doc.get(PRIVATE) {
    record.private = private(v, &options.private_objects)?;
  }

  // ── Dates ────────────────────────────────────────────────────────────────
  if let Some(v) = doc.get(BIRTHDAY) {
    record.birthday = date(BIRTHDAY, v, record.version)?;
    if record.birthday.is_some() {
      record.drop_unrecognized(&["BDAY"]);
    }
  }
  if let Some(v) = doc.get(ANNIVERSARY) {
    record.anniversary = date(ANNIVERSARY, v, record.version)?;
    if record.anniversary.is_some() {
      record.drop_unrecognized(&["ANNIVERSARY", "X-ANNIVERSARY"]);
    }
  }

  // ── Misc ─────────────────────────────────────────────────────────────────
  if let Some(v) = doc.get(CATEGORIES) {
    record.categories = string_list(CATEGORIES, v)?;
  }
  if let Some(v) = doc.get(NOTE) {
    record.notes = string_list(NOTE, v)?;
  }

  if !record.has_name() {
    return Err(Error::validation(
      "name",
      "a contact needs a first name, last name, formatted name or organisation",
    ));
  }
  record.ensure_formatted_name();
  record.revision = Some(Utc::now().trunc_subsecs(0));
  Ok(record)
}

// ─── Scalars and lists ───────────────────────────────────────────────────────

fn scalar_value(value: &Value) -> Option<String> {
  match value {
    Value::Null => Some(String::new()),
    Value::String(s) => Some(s.trim().to_string()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

fn scalar(field: &str, value: &Value) -> Result<String> {
  scalar_value(value)
    .ok_or_else(|| Error::validation(field, "expected a single value"))
}

/// A value or a list of values; empty items are dropped.
fn string_list(field: &str, value: &Value) -> Result<Vec<String>> {
  let items = match value {
    Value::Sequence(items) => items.as_slice(),
    other => std::slice::from_ref(other),
  };
  let mut out = Vec::with_capacity(items.len());
  for item in items {
    let s = scalar_value(item).ok_or_else(|| {
      Error::validation(field, "expected a value or a list of values")
    })?;
    if !s.is_empty() {
      out.push(s);
    }
  }
  Ok(out)
}

fn organisations(value: &Value) -> Result<Vec<Organisation>> {
  let items = match value {
    Value::Sequence(items) => items.as_slice(),
    other => std::slice::from_ref(other),
  };
  let mut out = Vec::new();
  for item in items {
    // A nested list is one organisation followed by its units.
    let mut parts = string_list(ORGANISATION, item)?.into_iter();
    if let Some(name) = parts.next() {
      out.push(Organisation {
        name,
        units: parts.collect(),
      });
    }
  }
  Ok(out)
}

fn date(field: &str, value: &Value, version: Version) -> Result<Option<Date>> {
  let raw = scalar(field, value)?;
  if raw.is_empty() {
    return Ok(None);
  }
  let date = Date::parse_template(&raw).ok_or_else(|| {
    Error::validation(
      field,
      format!(
        "{raw:?} is not a date; use YYYY-MM-DD, YYYY-MM-DDTHH:MM:SS+HH:MM, \
         --MM-DD or \"text= ...\""
      ),
    )
  })?;
  if date.requires_v4() && version == Version::V3 {
    return Err(Error::validation(
      field,
      "dates without a year and free-text dates need vCard 4.0",
    ));
  }
  Ok(Some(date))
}

// ─── Labeled fields ──────────────────────────────────────────────────────────

/// Walk a labeled field: a plain list (or single value) of unlabeled
/// entries, or a mapping from label string to one value or a list.
fn labeled<T>(
  field: &str,
  kind: LabeledField,
  value: &Value,
  mut read: impl FnMut(&Value) -> Result<Option<T>>,
) -> Result<Vec<Labeled<T>>> {
  let mut out = Vec::new();
  match value {
    Value::Mapping(groups) => {
      for (label, values) in groups {
        let label = label
          .as_str()
          .ok_or_else(|| Error::validation(field, "labels must be strings"))?;
        let label = LabelSet::parse(kind, label).map_err(|e| {
          Error::validation(field, format!("label {label:?}: {e}"))
        })?;
        let items = match values {
          Value::Sequence(items) => items.as_slice(),
          other => std::slice::from_ref(other),
        };
        for item in items {
          if let Some(v) = read(item)? {
            out.push(Labeled::new(label.clone(), v));
          }
        }
      }
    }
    Value::Sequence(items) => {
      for item in items {
        if let Some(v) = read(item)? {
          out.push(Labeled::unlabeled(v));
        }
      }
    }
    other => {
      if let Some(v) = read(other)? {
        out.push(Labeled::unlabeled(v));
      }
    }
  }
  Ok(out)
}

fn labeled_strings(
  field: &str,
  kind: LabeledField,
  value: &Value,
) -> Result<Vec<Labeled<String>>> {
  labeled(field, kind, value, |item| {
    let s = scalar_value(item)
      .ok_or_else(|| Error::validation(field, "expected a single value per entry"))?;
    Ok((!s.is_empty()).then_some(s))
  })
}

fn addresses(value: &Value) -> Result<Vec<Labeled<PostAddress>>> {
  labeled(ADDRESS, LabeledField::Address, value, address)
}

fn address(value: &Value) -> Result<Option<PostAddress>> {
  let parts = match value {
    Value::Null => return Ok(None),
    Value::Mapping(parts) => parts,
    _ => {
      return Err(Error::validation(
        ADDRESS,
        "each address must be a mapping of Box, Extended, Street, Code, City, \
         Region and Country",
      ));
    }
  };
  for key in parts.keys() {
    if !key.as_str().is_some_and(|k| ADDRESS_KEYS.contains(&k)) {
      return Err(Error::validation(
        ADDRESS,
        format!("unknown address part {}", describe(key)),
      ));
    }
  }
  let single = |key: &str| match parts.get(key) {
    Some(v) => scalar(&format!("{ADDRESS}.{key}"), v),
    None => Ok(String::new()),
  };
  let lines = |key: &str| match parts.get(key) {
    Some(v) => string_list(&format!("{ADDRESS}.{key}"), v),
    None => Ok(Vec::new()),
  };
  let address = PostAddress {
    po_box:      single("Box")?,
    extended:    lines("Extended")?,
    street:      lines("Street")?,
    postal_code: single("Code")?,
    locality:    single("City")?,
    region:      single("Region")?,
    country:     single("Country")?,
  };
  Ok((!address.is_empty()).then_some(address))
}

fn private(
  value: &Value,
  configured: &[String],
) -> Result<BTreeMap<String, Vec<Labeled<String>>>> {
  let mut out = BTreeMap::new();
  let groups = match value {
    Value::Null => return Ok(out),
    Value::Mapping(groups) => groups,
    _ => {
      return Err(Error::validation(
        PRIVATE,
        "expected a mapping from private field name to values",
      ));
    }
  };
  for (key, values) in groups {
    let name = key
      .as_str()
      .and_then(|k| configured.iter().find(|c| c.eq_ignore_ascii_case(k)))
      .ok_or_else(|| {
        Error::validation(
          PRIVATE,
          format!(
            "{} is not a configured private field (configured: {})",
            describe(key),
            configured.join(", ")
          ),
        )
      })?;
    let field = format!("{PRIVATE}.{name}");
    let entries = labeled_strings(&field, LabeledField::Private, values)?;
    if !entries.is_empty() {
      out.insert(name.clone(), entries);
    }
  }
  Ok(out)
}

fn describe(key: &Value) -> String {
  match key.as_str() {
    Some(k) => format!("{k:?}"),
    None => "(non-string key)".to_string(),
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use cardex_core::RawProperty;
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::Template;

  fn doc(yaml: &str) -> Mapping {
    match serde_yaml::from_str(yaml).unwrap() {
      Value::Mapping(m) => m,
      other => panic!("not a mapping: {other:?}"),
    }
  }

  fn opts() -> TemplateOptions {
    TemplateOptions {
      version:         Version::V3,
      private_objects: vec!["Jabber".into()],
    }
  }

  fn validation_field(err: Error) -> String {
    match err {
      Error::Validation { field, .. } => field,
      other => panic!("expected validation error, got {other}"),
    }
  }

  #[test]
  fn labeled_mapping_keeps_duplicates_in_order() {
    let r = apply(
      &doc("First name: A\nPhone:\n  home: ['1', '2']\n  work, pref: '3'\n"),
      None,
      &opts(),
    )
    .unwrap();
    let values: Vec<&str> = r.phones.iter().map(|p| p.value.as_str()).collect();
    assert_eq!(values, ["1", "2", "3"]);
    assert_eq!(r.phones[0].label, r.phones[1].label);
    assert_eq!(r.phones[2].label, LabelSet::new().with_type("work").with_pref(1));
  }

  #[test]
  fn numbers_are_read_as_text() {
    let r = apply(
      &doc("First name: A\nPhone: 5550100\nAddress:\n  home:\n    Code: 12345\n"),
      None,
      &opts(),
    )
    .unwrap();
    assert_eq!(r.phones[0].value, "5550100");
    assert_eq!(r.addresses[0].value.postal_code, "12345");
  }

  #[test]
  fn free_text_label_is_kept() {
    let r = apply(&doc("First name: A\nEmails:\n  Grandma: g@x.org\n"), None, &opts())
      .unwrap();
    assert_eq!(r.emails[0].label.custom.as_deref(), Some("Grandma"));
  }

  #[test]
  fn two_free_text_labels_are_a_validation_error() {
    let err = apply(&doc("First name: A\nPhone:\n  Boat, Cabin: '1'\n"), None, &opts())
      .unwrap_err();
    assert_eq!(validation_field(err), "Phone");
  }

  #[test]
  fn type_tag_with_delimiters_is_a_validation_error() {
    let err = apply(&doc("First name: A\nPhone:\n  'x-a:b': '555'\n"), None, &opts())
      .unwrap_err();
    assert_eq!(validation_field(err), "Phone");
  }

  #[test]
  fn list_under_name_field_is_rejected() {
    let err = apply(&doc("First name: [A, B]\n"), None, &opts()).unwrap_err();
    assert_eq!(validation_field(err), "First name");
  }

  #[test]
  fn unknown_field_is_rejected() {
    let err = apply(&doc("First name: A\nEmial: x\n"), None, &opts()).unwrap_err();
    assert_eq!(validation_field(err), "Emial");
  }

  #[test]
  fn unknown_address_part_is_rejected() {
    let err = apply(
      &doc("First name: A\nAddress:\n  home:\n    Town: X\n"),
      None,
      &opts(),
    )
    .unwrap_err();
    assert_eq!(validation_field(err), "Address");
  }

  #[test]
  fn unconfigured_private_key_is_rejected() {
    let err = apply(&doc("First name: A\nPrivate:\n  Skype: me\n"), None, &opts())
      .unwrap_err();
    assert_eq!(validation_field(err), "Private");
  }

  #[test]
  fn private_key_uses_configured_spelling() {
    let r = apply(&doc("First name: A\nPrivate:\n  jabber: me@j.org\n"), None, &opts())
      .unwrap();
    assert_eq!(r.private["Jabber"][0].value, "me@j.org");
  }

  #[test]
  fn v4_only_dates_rejected_for_v3_records() {
    let err = apply(&doc("First name: A\nBirthday: --03-15\n"), None, &opts())
      .unwrap_err();
    assert_eq!(validation_field(err), "Birthday");

    let v4 = TemplateOptions {
      version: Version::V4,
      ..opts()
    };
    let r = apply(&doc("First name: A\nBirthday: --03-15\n"), None, &v4).unwrap();
    assert_eq!(r.birthday, Some(Date::Partial { month: 3, day: 15 }));
  }

  #[test]
  fn unspecified_kind_only_survives_from_a_loaded_card() {
    let err = apply(&doc("First name: A\nKind: unspecified\n"), None, &opts())
      .unwrap_err();
    assert_eq!(validation_field(err), "Kind");

    let mut existing = ContactRecord::with_uid("u", Version::V4);
    existing.name.first = "A".into();
    existing.kind = Kind::Unspecified;
    existing.unrecognized = vec![RawProperty::new("KIND", "robot")];
    let kept = apply(&doc("Kind: unspecified\n"), Some(&existing), &opts()).unwrap();
    assert_eq!(kept.kind, Kind::Unspecified);
    assert_eq!(kept.unrecognized, existing.unrecognized);

    let changed = apply(&doc("Kind: group\n"), Some(&existing), &opts()).unwrap();
    assert_eq!(changed.kind, Kind::Group);
    assert!(changed.unrecognized.is_empty());
  }

  #[test]
  fn bad_date_is_a_validation_error() {
    let err = apply(&doc("First name: A\nAnniversary: soon\n"), None, &opts())
      .unwrap_err();
    assert_eq!(validation_field(err), "Anniversary");

    let err = apply(
      &doc("First name: A\nBirthday: 1990-03-15T10:30:00.5Z\n"),
      None,
      &opts(),
    )
    .unwrap_err();
    assert_eq!(validation_field(err), "Birthday");
  }

  #[test]
  fn edit_carries_identity_and_unrecognized() {
    let mut existing = ContactRecord::with_uid("keep-me", Version::V4);
    existing.name.first = "Old".into();
    existing.formatted_name = "Old".into();
    existing.source = Some("/tmp/a.vcf".into());
    existing.unrecognized = vec![RawProperty::new("X-FOO", "bar")];
    existing.titles = vec!["Boss".into()];

    let r = apply(&doc("First name: New\nFormatted name: New\n"), Some(&existing), &opts())
      .unwrap();
    assert_eq!(r.uid, "keep-me");
    assert_eq!(r.version, Version::V4);
    assert_eq!(r.source, existing.source);
    assert_eq!(r.unrecognized, existing.unrecognized);
    // Absent keys leave fields alone.
    assert_eq!(r.titles, vec!["Boss".to_string()]);
    assert_eq!(r.formatted_name, "New");
  }

  #[test]
  fn present_keys_replace_not_merge() {
    let mut existing = ContactRecord::with_uid("u", Version::V3);
    existing.name.first = "A".into();
    existing.emails = vec![Labeled::unlabeled("old@x.org".into())];
    let r = apply(&doc("Emails: new@x.org\n"), Some(&existing), &opts()).unwrap();
    assert_eq!(r.emails, vec![Labeled::unlabeled("new@x.org".to_string())]);

    let r = apply(&doc("Emails:\n"), Some(&existing), &opts()).unwrap();
    assert!(r.emails.is_empty());
  }

  #[test]
  fn new_birthday_replaces_unparsed_one() {
    let mut existing = ContactRecord::with_uid("u", Version::V3);
    existing.name.first = "A".into();
    existing.unrecognized = vec![RawProperty::new("BDAY", "sometime")];

    let kept = apply(&doc("Birthday:\n"), Some(&existing), &opts()).unwrap();
    assert_eq!(kept.unrecognized.len(), 1);

    let replaced = apply(&doc("Birthday: 1990-01-02\n"), Some(&existing), &opts()).unwrap();
    assert!(replaced.unrecognized.is_empty());
  }

  #[test]
  fn formatted_name_synthesized_when_blank() {
    let r = apply(
      &doc("Formatted name:\nFirst name: Ada\nLast name: Lovelace\n"),
      None,
      &opts(),
    )
    .unwrap();
    assert_eq!(r.formatted_name, "Ada Lovelace");
  }

  #[test]
  fn organisation_alone_is_enough() {
    let r = apply(&doc("Organisation: [[Acme, Sales]]\n"), None, &opts()).unwrap();
    assert_eq!(r.organisations[0].units, vec!["Sales".to_string()]);
    assert_eq!(r.formatted_name, "Acme");
  }

  #[test]
  fn template_lookup_after_round_trip() {
    let r = apply(&doc("First name: A\nEmails:\n  work: a@w.org\n"), None, &opts())
      .unwrap();
    let t = Template::from_record(&r, &[]);
    assert_eq!(t.lookup("emails.work.0").unwrap(), "a@w.org");
  }
}
