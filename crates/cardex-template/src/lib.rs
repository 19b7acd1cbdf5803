//! YAML edit templates for cardex contacts.
//!
//! A [`Template`] is the human-editable form of a
//! [`ContactRecord`](cardex_core::ContactRecord): a YAML mapping whose
//! top-level keys are readable field names (`First name`, `Emails`, ...).
//! Records are rendered into templates for display and editing, and edited
//! templates are read back into records. Dotted paths (`emails.work.0`)
//! address single values for scripting.

pub mod error;
mod path;
mod read;
mod render;

use cardex_core::{ContactRecord, Version};
pub use error::{Error, Result};
use serde_yaml::{Mapping, Value};

// ─── Field names ─────────────────────────────────────────────────────────────

pub(crate) const FORMATTED_NAME: &str = "Formatted name";
pub(crate) const PREFIX: &str = "Prefix";
pub(crate) const FIRST_NAME: &str = "First name";
pub(crate) const ADDITIONAL: &str = "Additional";
pub(crate) const LAST_NAME: &str = "Last name";
pub(crate) const SUFFIX: &str = "Suffix";
pub(crate) const NICKNAME: &str = "Nickname";
pub(crate) const ORGANISATION: &str = "Organisation";
pub(crate) const TITLE: &str = "Title";
pub(crate) const ROLE: &str = "Role";
pub(crate) const KIND: &str = "Kind";
pub(crate) const PHONE: &str = "Phone";
pub(crate) const EMAILS: &str = "Emails";
pub(crate) const ADDRESS: &str = "Address";
pub(crate) const WEBPAGE: &str = "Webpage";
pub(crate) const MESSAGING: &str = "Messaging";
pub(crate) const BIRTHDAY: &str = "Birthday";
pub(crate) const ANNIVERSARY: &str = "Anniversary";
pub(crate) const CATEGORIES: &str = "Categories";
pub(crate) const NOTE: &str = "Note";
pub(crate) const PRIVATE: &str = "Private";

/// Top-level template keys in rendering order.
pub const FIELDS: [&str; 21] = [
  FORMATTED_NAME,
  PREFIX,
  FIRST_NAME,
  ADDITIONAL,
  LAST_NAME,
  SUFFIX,
  NICKNAME,
  ORGANISATION,
  TITLE,
  ROLE,
  KIND,
  PHONE,
  EMAILS,
  ADDRESS,
  WEBPAGE,
  MESSAGING,
  BIRTHDAY,
  ANNIVERSARY,
  CATEGORIES,
  NOTE,
  PRIVATE,
];

/// Sub-keys of one post address.
pub(crate) const ADDRESS_KEYS: [&str; 7] =
  ["Box", "Extended", "Street", "Code", "City", "Region", "Country"];

/// Scripting form of a key: lower case, spaces as underscores.
pub(crate) fn normalize(key: &str) -> String {
  key.trim().to_lowercase().replace(' ', "_")
}

// ─── Template ────────────────────────────────────────────────────────────────

/// Settings for reading a template back into a record.
#[derive(Debug, Clone, Default)]
pub struct TemplateOptions {
  /// Version given to records created from scratch. Edits keep the
  /// existing record's version.
  pub version:         Version,
  /// Configured `X-<NAME>` extension fields allowed under `Private`.
  pub private_objects: Vec<String>,
}

/// A parsed or rendered template document.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
  doc: Mapping,
}

impl Template {
  /// Render `record`. The `Private` section is present only when
  /// `private_objects` is non-empty.
  pub fn from_record(record: &ContactRecord, private_objects: &[String]) -> Self {
    Self {
      doc: render::record_to_mapping(record, private_objects),
    }
  }

  /// Parse YAML text produced (and possibly edited) by a user.
  pub fn parse(text: &str) -> Result<Self> {
    match serde_yaml::from_str::<Value>(text)? {
      Value::Mapping(doc) => Ok(Self { doc }),
      Value::Null => Err(Error::validation("template", "template is empty")),
      _ => Err(Error::validation(
        "template",
        "expected a mapping of field names to values",
      )),
    }
  }

  pub fn to_yaml(&self) -> Result<String> {
    let yaml = serde_yaml::to_string(&self.doc)?;
    // Leave empty keys blank so they are easy to fill in. A string that
    // really ends in ": null" is always quoted, so only nulls match here.
    let mut out = String::with_capacity(yaml.len());
    for line in yaml.lines() {
      match line.strip_suffix(" null") {
        Some(key) if key.ends_with(':') => out.push_str(key),
        _ => out.push_str(line),
      }
      out.push('\n');
    }
    Ok(out)
  }

  /// Top-level field names in scripting form (`first_name`, `emails`, ...).
  pub fn field_names(&self) -> Vec<String> {
    self
      .doc
      .keys()
      .filter_map(Value::as_str)
      .map(normalize)
      .collect()
  }

  /// Resolve a dotted path such as `emails.work.0` or `address.home.0.city`
  /// to its value.
  ///
  /// An existing but empty field yields `Ok("")`; a path that leads
  /// nowhere is [`Error::FieldNotFound`].
  pub fn lookup(&self, path: &str) -> Result<String> { path::lookup(&self.doc, path) }

  /// Read the template into a record.
  ///
  /// With `existing`, the uid, version, backing file and unrecognized
  /// properties are carried over, and fields whose keys are missing from
  /// the template are left untouched. Fields that are present replace the
  /// record's value wholesale.
  pub fn apply(
    &self,
    existing: Option<&ContactRecord>,
    options: &TemplateOptions,
  ) -> Result<ContactRecord> {
    read::apply(&self.doc, existing, options)
  }
}

/// Render `record` as a template.
pub fn to_template(record: &ContactRecord, private_objects: &[String]) -> Template {
  Template::from_record(record, private_objects)
}

/// Read `template` into a new record, or into a copy of `existing`.
pub fn from_template(
  template: &Template,
  existing: Option<&ContactRecord>,
  options: &TemplateOptions,
) -> Result<ContactRecord> {
  template.apply(existing, options)
}

/// A blank, commented template for creating a contact in an editor.
pub fn new_contact_template(private_objects: &[String]) -> String {
  let mut out = String::from(
    "# New contact\n\
     #\n\
     # A contact needs a first name, a last name, a formatted name or an\n\
     # organisation. Every other key may be left empty.\n\
     #\n\
     # Phone, Emails, Address, Webpage, Messaging and Private take either a\n\
     # list of values or a mapping from label to one value or a list. A\n\
     # label is comma-separated: types such as home, work or cell, then\n\
     # pref or pref=N, and at most one free-text label.\n\
     #\n\
     # Dates: YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS+HH:MM. vCard 4.0 also\n\
     # allows --MM-DD and free text written as \"text= ...\".\n\
     \n\
     Formatted name:\n\
     Prefix:\n\
     First name:\n\
     Additional:\n\
     Last name:\n\
     Suffix:\n\
     Nickname:\n\
     # Organisation with units: [Company, Department]\n\
     Organisation:\n\
     Title:\n\
     Role:\n\
     # individual, group, organisation or location\n\
     Kind: individual\n\
     \n\
     Phone:\n\
     \x20 cell:\n\
     \x20 home:\n\
     Emails:\n\
     \x20 home:\n\
     \x20 work:\n\
     Address:\n\
     \x20 home:\n\
     \x20   Box:\n\
     \x20   Extended:\n\
     \x20   Street:\n\
     \x20   Code:\n\
     \x20   City:\n\
     \x20   Region:\n\
     \x20   Country:\n\
     Webpage:\n\
     Messaging:\n\
     \n\
     Birthday:\n\
     Anniversary:\n\
     Categories:\n\
     Note:\n",
  );
  if !private_objects.is_empty() {
    out.push_str("\nPrivate:\n");
    for name in private_objects {
      out.push_str(&format!("  {name}:\n"));
    }
  }
  out
}

// ─── Tests ───────────────────────────────────────────────────────────────────
