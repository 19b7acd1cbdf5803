//! Record → template mapping.

use cardex_core::{
  ContactRecord, Date, Labeled, LabeledField, Organisation, PostAddress,
};
use serde_yaml::{Mapping, Value};

use crate::{
  ADDITIONAL, ADDRESS, ADDRESS_KEYS, ANNIVERSARY, BIRTHDAY, CATEGORIES,
  EMAILS, FIRST_NAME, FORMATTED_NAME, KIND, LAST_NAME, MESSAGING, NICKNAME,
  NOTE, ORGANISATION, PHONE, PREFIX, PRIVATE, ROLE, SUFFIX, TITLE, WEBPAGE,
};

pub(crate) fn record_to_mapping(
  record: &ContactRecord,
  private_objects: &[String],
) -> Mapping {
  let mut m = Mapping::new();
  let mut put = |key: &str, value: Value| {
    m.insert(Value::String(key.to_string()), value);
  };

  put(FORMATTED_NAME, scalar(&record.formatted_name));
  put(PREFIX, scalar(&record.name.prefix));
  put(FIRST_NAME, scalar(&record.name.first));
  put(ADDITIONAL, scalar(&record.name.additional));
  put(LAST_NAME, scalar(&record.name.last));
  put(SUFFIX, scalar(&record.name.suffix));
  put(NICKNAME, one_or_many(strings(&record.nicknames)));
  put(ORGANISATION, organisations(&record.organisations));
  put(TITLE, one_or_many(strings(&record.titles)));
  put(ROLE, one_or_many(strings(&record.roles)));
  put(KIND, Value::String(record.kind.as_str().to_string()));

  put(PHONE, labeled(&record.phones, LabeledField::Phone, text));
  put(EMAILS, labeled(&record.emails, LabeledField::Email, text));
  put(ADDRESS, labeled(&record.addresses, LabeledField::Address, address));
  put(WEBPAGE, labeled(&record.webpages, LabeledField::Webpage, text));
  put(MESSAGING, labeled(&record.messaging, LabeledField::Messaging, text));

  put(BIRTHDAY, date(record.birthday.as_ref()));
  put(ANNIVERSARY, date(record.anniversary.as_ref()));
  put(CATEGORIES, one_or_many(strings(&record.categories)));
  put(NOTE, one_or_many(strings(&record.notes)));

  if !private_objects.is_empty() {
    let mut private = Mapping::new();
    for name in private_objects {
      let entries = record
        .private
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, entries)| entries.as_slice())
        .unwrap_or_default();
      private.insert(
        Value::String(name.clone()),
        labeled(entries, LabeledField::Private, text),
      );
    }
    put(PRIVATE, Value::Mapping(private));
  }

  m
}

// ─── Value shapes ────────────────────────────────────────────────────────────

fn scalar(s: &str) -> Value {
  if s.is_empty() {
    Value::Null
  } else {
    Value::String(s.to_string())
  }
}

fn text(s: &String) -> Value { Value::String(s.clone()) }

fn strings(values: &[String]) -> Vec<Value> {
  values.iter().map(|v| Value::String(v.clone())).collect()
}

/// Nothing → null, one plain value → that value, otherwise a list. A lone
/// mapping stays wrapped in a list so it cannot be mistaken for labels.
fn one_or_many(mut values: Vec<Value>) -> Value {
  match values.len() {
    0 => Value::Null,
    1 if !values[0].is_mapping() => values.remove(0),
    _ => Value::Sequence(values),
  }
}

fn organisations(orgs: &[Organisation]) -> Value {
  let values = orgs
    .iter()
    .map(|org| {
      if org.units.is_empty() {
        Value::String(org.name.clone())
      } else {
        let mut parts = vec![Value::String(org.name.clone())];
        parts.extend(strings(&org.units));
        Value::Sequence(parts)
      }
    })
    .collect::<Vec<_>>();
  // A single org with units must stay nested, or it reads as several orgs.
  match values.as_slice() {
    [Value::Sequence(_)] => Value::Sequence(values),
    _ => one_or_many(values),
  }
}

fn date(date: Option<&Date>) -> Value {
  date.map_or(Value::Null, |d| Value::String(d.to_template_string()))
}

/// Sub-values of one address. Empty parts stay as empty strings so that
/// dotted paths can tell "empty" from "missing".
fn address(a: &PostAddress) -> Value {
  let lines = |lines: &[String]| match lines {
    [] => Value::String(String::new()),
    [one] => Value::String(one.clone()),
    many => Value::Sequence(strings(many)),
  };
  let parts = [
    Value::String(a.po_box.clone()),
    lines(&a.extended),
    lines(&a.street),
    Value::String(a.postal_code.clone()),
    Value::String(a.locality.clone()),
    Value::String(a.region.clone()),
    Value::String(a.country.clone()),
  ];
  let mut m = Mapping::new();
  for (key, value) in ADDRESS_KEYS.iter().zip(parts) {
    m.insert(Value::String(key.to_string()), value);
  }
  Value::Mapping(m)
}

/// A labeled field: a plain list when no entry carries a label, otherwise
/// a mapping from label string to value(s). Unlabeled entries mixed with
/// labeled ones are listed under the field's default label.
fn labeled<T>(
  entries: &[Labeled<T>],
  field: LabeledField,
  render: impl Fn(&T) -> Value,
) -> Value {
  if entries.iter().all(|e| e.label.is_empty()) {
    return one_or_many(entries.iter().map(|e| render(&e.value)).collect());
  }

  let mut groups: Vec<(String, Vec<Value>)> = Vec::new();
  for entry in entries {
    let key = entry.label.render_or_default(field);
    let value = render(&entry.value);
    match groups.iter_mut().find(|(k, _)| *k == key) {
      Some((_, values)) => values.push(value),
      None => groups.push((key, vec![value])),
    }
  }

  let mut m = Mapping::new();
  for (key, mut values) in groups {
    let value = if values.len() == 1 {
      values.remove(0)
    } else {
      Value::Sequence(values)
    };
    m.insert(Value::String(key), value);
  }
  Value::Mapping(m)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
