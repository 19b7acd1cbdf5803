//! Dotted-path lookup into a template (`emails.work.0`, `address.home.0.city`).

use serde_yaml::{Mapping, Value};

use crate::{
  error::{Error, Result},
  normalize,
};

pub(crate) fn lookup(doc: &Mapping, path: &str) -> Result<String> {
  let not_found = || Error::FieldNotFound {
    path: path.to_string(),
  };

  let mut segments = path.split('.');
  let first = segments.next().filter(|s| !s.trim().is_empty()).ok_or_else(not_found)?;
  let mut current = find_key(doc, first).ok_or_else(not_found)?;

  for segment in segments {
    current = match current {
      Value::Mapping(m) => find_key(m, segment)
        .or_else(|| (segment.trim() == "0").then_some(current)),
      Value::Sequence(items) => {
        segment.trim().parse::<usize>().ok().and_then(|i| items.get(i))
      }
      // A single value stands for a one-element list
      Value::String(_) | Value::Number(_) | Value::Bool(_)
        if segment.trim() == "0" =>
      {
        Some(current)
      }
      _ => None,
    }
    .ok_or_else(not_found)?;
  }

  render(current)
}

fn find_key<'a>(m: &'a Mapping, segment: &str) -> Option<&'a Value> {
  let wanted = normalize(segment);
  m.iter()
    .find(|(k, _)| k.as_str().is_some_and(|k| normalize(k) == wanted))
    .map(|(_, v)| v)
}

fn scalar(value: &Value) -> Option<String> {
  match value {
    Value::Null => Some(String::new()),
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

/// Scalars print as-is, lists of scalars comma-joined, anything else as YAML.
fn render(value: &Value) -> Result<String> {
  if let Some(s) = scalar(value) {
    return Ok(s);
  }
  if let Value::Sequence(items) = value
    && let Some(parts) = items.iter().map(scalar).collect::<Option<Vec<_>>>()
  {
    return Ok(parts.join(", "));
  }
  Ok(serde_yaml::to_string(value)?.trim_end().to_string())
}

#[cfg(test)]
mod tests {
  use cardex_core::{
    ContactRecord, LabelSet, Labeled, Organisation, PostAddress, Version,
  };

  use crate::{Error, Template};

  fn template() -> Template {
    let mut r = ContactRecord::with_uid("u", Version::V3);
    r.name.first = "Jane".into();
    r.formatted_name = "Jane".into();
    r.emails = vec![
      Labeled::new(LabelSet::new().with_type("work"), "a@w.org".into()),
      Labeled::new(LabelSet::new().with_type("work"), "b@w.org".into()),
      Labeled::new(LabelSet::new().with_type("home"), "c@h.org".into()),
    ];
    r.addresses = vec![Labeled::new(
      LabelSet::new().with_type("home"),
      PostAddress {
        locality: "Town".into(),
        ..Default::default()
      },
    )];
    r.organisations = vec![Organisation::new("Acme")];
    Template::from_record(&r, &[])
  }

  #[test]
  fn resolves_labels_and_indices() {
    let t = template();
    assert_eq!(t.lookup("emails.work.1").unwrap(), "b@w.org");
    assert_eq!(t.lookup("Emails.home.0").unwrap(), "c@h.org");
    assert_eq!(t.lookup("address.home.city").unwrap(), "Town");
    assert_eq!(t.lookup("address.home.0.city").unwrap(), "Town");
    assert_eq!(t.lookup("first_name").unwrap(), "Jane");
  }

  #[test]
  fn single_value_acts_as_index_zero() {
    let t = template();
    assert_eq!(t.lookup("organisation.0").unwrap(), "Acme");
    assert!(t.lookup("organisation.1").is_err());
  }

  #[test]
  fn lists_are_comma_joined() {
    assert_eq!(template().lookup("emails.work").unwrap(), "a@w.org, b@w.org");
  }

  #[test]
  fn empty_differs_from_missing() {
    let t = template();
    assert_eq!(t.lookup("last_name").unwrap(), "");
    assert_eq!(t.lookup("address.home.region").unwrap(), "");
    for path in ["emails.cell", "emails.work.7", "nope", "", "address.home.town"] {
      assert!(
        matches!(t.lookup(path), Err(Error::FieldNotFound { .. })),
        "{path}"
      );
    }
  }
}
