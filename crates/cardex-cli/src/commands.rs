//! Subcommand implementations.

use std::{
  collections::BTreeMap,
  fs,
  io::{self, BufRead, Read, Write},
  path::Path,
};

use anyhow::{Context as _, Result, bail};
use cardex_core::{
  ContactRecord, LabeledField, Labeled, NamePolicy, Query, Version,
};
use cardex_store::{
  Collection, Contact, FsStorage, LoadOptions, edit_record, edit_vcard,
};
use cardex_vcard::ParseOptions;
use cardex_template::{
  Template, TemplateOptions, from_template, new_contact_template, to_template,
};

use crate::{config::Settings, editor::ExternalEditor};

pub struct App {
  settings: Settings,
  /// Address books given with `-a`; empty means all of them.
  scope:    Vec<String>,
}

impl App {
  pub fn new(settings: Settings, scope: Vec<String>) -> Result<Self> {
    let known = settings.book_names();
    for name in &scope {
      if !known.contains(name) {
        bail!("unknown address book {name:?}; configured: {}", known.join(", "));
      }
    }
    Ok(Self { settings, scope })
  }

  // ── Loading and selection ──────────────────────────────────────────────────

  fn load(&self, search: Option<&Query>) -> Result<Collection> {
    let options = LoadOptions {
      skip_unparsable: self.settings.skip_unparsable,
      private_objects: self.settings.private_objects.clone(),
      prefilter:       search.filter(|_| self.settings.search_in_source_files).cloned(),
    };
    Collection::load(&self.settings.books, &options).context("loading address books")
  }

  fn find<'c>(&self, collection: &'c Collection, query: &Query) -> Vec<&'c Contact> {
    if self.scope.is_empty() {
      collection.find(query)
    } else {
      collection.find_in(&self.scope, query)
    }
  }

  fn in_scope(&self, contact: &Contact) -> bool {
    self.scope.is_empty() || self.scope.contains(&contact.book)
  }

  /// The one contact `terms` designate. A single term is first tried as a
  /// uid prefix, then everything is taken as a search.
  fn pick<'c>(&self, collection: &'c Collection, terms: &[String]) -> Result<&'c Contact> {
    if let [term] = terms {
      let by_uid: Vec<&Contact> = collection
        .by_uid_prefix(term)
        .into_iter()
        .filter(|c| self.in_scope(c))
        .collect();
      if let [one] = by_uid.as_slice() {
        return Ok(*one);
      }
    }

    let query = Query::parse(terms);
    let found = self.find(collection, &query);
    match found.as_slice() {
      [one] => Ok(*one),
      [] => Err(cardex_store::Error::NotFound(query.to_string()).into()),
      many => {
        eprintln!("Several contacts match:");
        for c in many {
          eprintln!(
            "  {}  ({})",
            c.record.display_name(self.settings.display),
            c.path.display()
          );
        }
        Err(
          cardex_store::Error::AmbiguousSelection {
            query: query.to_string(),
            count: many.len(),
          }
          .into(),
        )
      }
    }
  }

  /// The book new contacts go to: the first `-a`, else the first configured.
  fn target_book(&self) -> Result<String> {
    self
      .scope
      .first()
      .cloned()
      .or_else(|| self.settings.books.first().map(|b| b.name.clone()))
      .context("no address book to write to")
  }

  fn template_options(&self, version: Version) -> TemplateOptions {
    TemplateOptions {
      version,
      private_objects: self.settings.private_objects.clone(),
    }
  }

  // ── Read-only commands ─────────────────────────────────────────────────────

  pub fn list(&self, terms: &[String], json: bool) -> Result<()> {
    let query = Query::parse(terms);
    let collection = self.load(Some(&query))?;
    let mut found = self.find(&collection, &query);
    sort_for_display(&mut found, self.settings.display);

    let mut out = io::stdout().lock();
    if json {
      serde_json::to_writer_pretty(&mut out, &found).context("writing JSON")?;
      writeln!(out)?;
      return Ok(());
    }
    if found.is_empty() {
      eprintln!("No contacts found.");
      return Ok(());
    }
    let short = collection.short_uids();
    for row in list_rows(&found, &short, self.settings.display) {
      writeln!(out, "{row}")?;
    }
    Ok(())
  }

  pub fn show(&self, terms: &[String], vcard: bool) -> Result<()> {
    let collection = self.load(Some(&Query::parse(terms)))?;
    let contact = self.pick(&collection, terms)?;
    let text = if vcard {
      cardex_vcard::serialize(&contact.record, contact.record.version)?
    } else {
      format!(
        "# {} ({})\n{}",
        contact.path.display(),
        contact.book,
        to_template(&contact.record, &self.settings.private_objects).to_yaml()?
      )
    };
    print!("{text}");
    Ok(())
  }

  pub fn field(&self, path: &str, terms: &[String]) -> Result<()> {
    let collection = self.load(Some(&Query::parse(terms)))?;
    let contact = self.pick(&collection, terms)?;
    let value = to_template(&contact.record, &self.settings.private_objects)
      .lookup(path)
      .with_context(|| format!("{} has no field {path}", contact.record.formatted_name))?;
    println!("{value}");
    Ok(())
  }

  pub fn fields(&self) -> Result<()> {
    let blank = ContactRecord::with_uid("", self.settings.default_version);
    for name in Template::from_record(&blank, &self.settings.private_objects).field_names() {
      println!("{name}");
    }
    Ok(())
  }

  pub fn template(&self) -> Result<()> {
    print!("{}", new_contact_template(&self.settings.private_objects));
    Ok(())
  }

  pub fn addressbooks(&self) -> Result<()> {
    for book in &self.settings.books {
      if self.scope.is_empty() || self.scope.contains(&book.name) {
        println!("{}\t{}", book.name, book.path.display());
      }
    }
    Ok(())
  }

  /// Contacts with a birthday, in calendar order.
  pub fn birthdays(&self, terms: &[String]) -> Result<()> {
    let query = Query::parse(terms);
    let collection = self.load(Some(&query))?;
    let found = self.find(&collection, &query);
    print_rows(birthday_rows(&found, self.settings.display), "No birthdays found.")
  }

  pub fn phones(&self, terms: &[String]) -> Result<()> {
    self.listing(terms, phone_entries, "No phone numbers found.")
  }

  pub fn emails(&self, terms: &[String]) -> Result<()> {
    self.listing(terms, email_entries, "No email addresses found.")
  }

  pub fn post_addresses(&self, terms: &[String]) -> Result<()> {
    self.listing(terms, address_entries, "No post addresses found.")
  }

  fn listing(&self, terms: &[String], entries: EntryFn, empty: &str) -> Result<()> {
    let query = Query::parse(terms);
    let collection = self.load(Some(&query))?;
    let mut found = self.find(&collection, &query);
    sort_for_display(&mut found, self.settings.display);
    print_rows(entry_rows(&found, self.settings.display, entries), empty)
  }

  // ── Mutating commands ──────────────────────────────────────────────────────

  pub fn new_contact(&self, input: Option<&Path>, version: Option<Version>) -> Result<()> {
    let book = self.target_book()?;
    let options =
      self.template_options(version.unwrap_or(self.settings.default_version));

    let record = match input {
      Some(path) => {
        let template = Template::parse(&read_input(path)?)?;
        from_template(&template, None, &options)?
      }
      None => {
        let editor = ExternalEditor::new(&self.settings.editor);
        let blank = new_contact_template(&self.settings.private_objects);
        match edit_record(&editor, &blank, None, &options, &mut ask_retry)? {
          Some(record) => record,
          None => {
            eprintln!("Canceled, nothing was written.");
            return Ok(());
          }
        }
      }
    };

    let mut collection = self.load(None)?;
    let created = collection.create(&book, record, &FsStorage)?;
    println!(
      "Created {} in {book} ({})",
      created.record.formatted_name,
      created.path.display()
    );
    Ok(())
  }

  pub fn edit(&self, terms: &[String], input: Option<&Path>, vcard: bool) -> Result<()> {
    let mut collection = self.load(Some(&Query::parse(terms)))?;
    let contact = self.pick(&collection, terms)?;
    let path = contact.path.clone();
    let existing = contact.record.clone();
    let options = self.template_options(existing.version);

    let record = match input {
      Some(file) => {
        let template = Template::parse(&read_input(file)?)?;
        Some(from_template(&template, Some(&existing), &options)?)
      }
      None if vcard => {
        let editor = ExternalEditor::new(&self.settings.editor).for_vcard();
        let parse_options = ParseOptions {
          private_objects: self.settings.private_objects.clone(),
        };
        edit_vcard(&editor, &existing, &parse_options, &mut ask_retry)?
      }
      None => {
        let editor = ExternalEditor::new(&self.settings.editor);
        let initial =
          to_template(&existing, &self.settings.private_objects).to_yaml()?;
        edit_record(&editor, &initial, Some(&existing), &options, &mut ask_retry)?
      }
    };
    let Some(record) = record else {
      eprintln!("No changes.");
      return Ok(());
    };

    let updated = collection.update(&path, record, &FsStorage)?;
    println!("Updated {}", updated.record.formatted_name);
    Ok(())
  }

  pub fn remove(&self, terms: &[String], force: bool) -> Result<()> {
    let mut collection = self.load(Some(&Query::parse(terms)))?;
    let contact = self.pick(&collection, terms)?;
    let path = contact.path.clone();
    let prompt = format!(
      "Remove {} from {}?",
      contact.record.display_name(self.settings.display),
      contact.book
    );
    if !force && !confirm(&prompt)? {
      eprintln!("Canceled.");
      return Ok(());
    }
    let removed = collection.remove(&path, &FsStorage)?;
    println!("Removed {}", removed.record.formatted_name);
    Ok(())
  }

  /// Fold the `source` contact into the `target` one, let the user review
  /// the result in the editor, then delete the source.
  pub fn merge(&self, source: &[String], target: &[String], force: bool) -> Result<()> {
    let mut collection = self.load(None)?;
    let from = self.pick(&collection, source)?;
    let into = self.pick(&collection, target)?;
    if from.path == into.path {
      bail!("source and target are the same contact");
    }
    let (source_path, target_path) = (from.path.clone(), into.path.clone());
    let source_name = from.record.display_name(self.settings.display);

    let mut proposal = into.record.clone();
    proposal.merge_from(&from.record);
    let options = self.template_options(proposal.version);
    let editor = ExternalEditor::new(&self.settings.editor);
    let initial = to_template(&proposal, &self.settings.private_objects).to_yaml()?;
    // Leaving the editor without changes keeps the proposal as it is.
    let record = edit_record(&editor, &initial, Some(&proposal), &options, &mut ask_retry)?
      .unwrap_or(proposal);

    let prompt = format!(
      "Merge {source_name} into {} and remove {source_name}?",
      record.display_name(self.settings.display)
    );
    if !force && !confirm(&prompt)? {
      eprintln!("Canceled.");
      return Ok(());
    }
    let merged = collection
      .update(&target_path, record, &FsStorage)?
      .record
      .formatted_name
      .clone();
    collection.remove(&source_path, &FsStorage)?;
    println!("Merged {source_name} into {merged}");
    Ok(())
  }

  pub fn copy(&self, terms: &[String], target: &str) -> Result<()> {
    // All books are loaded so the target's uids are known.
    let mut collection = self.load(None)?;
    let path = self.pick(&collection, terms)?.path.clone();
    let copy = collection.copy_to(&path, target, &FsStorage)?;
    println!("Copied {} to {target}", copy.record.formatted_name);
    Ok(())
  }

  pub fn move_to(&self, terms: &[String], target: &str) -> Result<()> {
    let mut collection = self.load(None)?;
    let path = self.pick(&collection, terms)?.path.clone();
    let moved = collection.move_to(&path, target, &FsStorage)?;
    println!("Moved {} to {target}", moved.record.formatted_name);
    Ok(())
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Ask whether to re-open the editor after a rejected template.
fn ask_retry(error: &cardex_store::Error) -> bool {
  eprintln!("{error}");
  confirm("Open the editor again?").unwrap_or(false)
}

fn sort_for_display(contacts: &mut [&Contact], policy: NamePolicy) {
  contacts.sort_by_cached_key(|c| c.record.display_name(policy).to_lowercase());
}

/// One tab-separated line per contact: index, name, first phone, first
/// email, address book and short uid.
fn list_rows(
  contacts: &[&Contact],
  short_uids: &BTreeMap<String, String>,
  policy: NamePolicy,
) -> Vec<String> {
  contacts
    .iter()
    .enumerate()
    .map(|(i, c)| {
      let r = &c.record;
      let first = |entries: &[cardex_core::Labeled<String>]| {
        entries
          .iter()
          .find(|e| e.label.is_preferred())
          .or_else(|| entries.first())
          .map(|e| format!("{}: {}", e.label, e.value))
          .unwrap_or_default()
      };
      let uid = short_uids.get(&r.uid).map(String::as_str).unwrap_or("");
      format!(
        "{}\t{}\t{}\t{}\t{}\t{}",
        i + 1,
        r.display_name(policy),
        first(&r.phones),
        first(&r.emails),
        c.book,
        uid
      )
    })
    .collect()
}

/// `(label, value)` pairs of one labeled field of a record.
type EntryFn = fn(&ContactRecord) -> Vec<(String, String)>;

fn labeled_entries<T>(
  entries: &[Labeled<T>],
  field: LabeledField,
  show: impl Fn(&T) -> String,
) -> Vec<(String, String)> {
  entries
    .iter()
    .map(|e| (e.label.render_or_default(field), show(&e.value)))
    .collect()
}

fn phone_entries(r: &ContactRecord) -> Vec<(String, String)> {
  labeled_entries(&r.phones, LabeledField::Phone, String::clone)
}

fn email_entries(r: &ContactRecord) -> Vec<(String, String)> {
  labeled_entries(&r.emails, LabeledField::Email, String::clone)
}

fn address_entries(r: &ContactRecord) -> Vec<(String, String)> {
  labeled_entries(&r.addresses, LabeledField::Address, |a| a.parts().join(", "))
}

/// One tab-separated `name, label, value` line per entry, in the order of
/// `contacts`.
fn entry_rows(contacts: &[&Contact], policy: NamePolicy, entries: EntryFn) -> Vec<String> {
  contacts
    .iter()
    .flat_map(|c| {
      let name = c.record.display_name(policy);
      entries(&c.record)
        .into_iter()
        .map(move |(label, value)| format!("{name}\t{label}\t{value}"))
    })
    .collect()
}

/// `name, birthday` lines ordered by month and day, whatever the year.
/// Free-text birthdays come last.
fn birthday_rows(contacts: &[&Contact], policy: NamePolicy) -> Vec<String> {
  let mut dated: Vec<_> = contacts
    .iter()
    .filter_map(|c| {
      let birthday = c.record.birthday.as_ref()?;
      Some((birthday.month_day(), c.record.display_name(policy), birthday))
    })
    .collect();
  dated.sort_by_cached_key(|(md, name, _)| (md.is_none(), *md, name.to_lowercase()));
  dated
    .into_iter()
    .map(|(_, name, birthday)| format!("{name}\t{birthday}"))
    .collect()
}

fn print_rows(rows: Vec<String>, empty: &str) -> Result<()> {
  if rows.is_empty() {
    eprintln!("{empty}");
    return Ok(());
  }
  let mut out = io::stdout().lock();
  for row in rows {
    writeln!(out, "{row}")?;
  }
  Ok(())
}

fn read_input(path: &Path) -> Result<String> {
  if path == Path::new("-") {
    let mut text = String::new();
    io::stdin()
      .read_to_string(&mut text)
      .context("reading template from stdin")?;
    return Ok(text);
  }
  fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn confirm(prompt: &str) -> Result<bool> {
  eprint!("{prompt} [y/N] ");
  io::stderr().flush()?;
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use cardex_core::{Date, LabelSet, PostAddress};
  use pretty_assertions::assert_eq;

  use super::*;

  fn contact(uid: &str, first: &str, last: &str) -> Contact {
    let mut record = ContactRecord::with_uid(uid, Version::V3);
    record.name.first = first.into();
    record.name.last = last.into();
    record.ensure_formatted_name();
    Contact {
      book: "b".into(),
      path: PathBuf::from(format!("/b/{uid}.vcf")),
      record,
    }
  }

  #[test]
  fn sorts_by_chosen_name_form() {
    let a = contact("1", "Zed", "Adams");
    let b = contact("2", "amy", "Young");
    let mut list = vec![&a, &b];

    sort_for_display(&mut list, NamePolicy::FirstName);
    assert_eq!(list[0].record.uid, "2");
    sort_for_display(&mut list, NamePolicy::LastName);
    assert_eq!(list[0].record.uid, "1");
  }

  #[test]
  fn birthdays_follow_the_calendar() {
    let mut a = contact("1", "Ann", "Old");
    a.record.birthday = Date::parse_template("1950-12-01");
    let mut b = contact("2", "Ben", "Young");
    b.record.birthday = Date::parse_template("2001-02-28");
    let mut c = contact("3", "Cy", "Nodate");
    c.record.birthday = Some(Date::Text("spring".into()));
    let mut d = contact("4", "Di", "Partial");
    d.record.birthday = Some(Date::Partial { month: 2, day: 3 });
    let e = contact("5", "Ed", "None");

    let rows = birthday_rows(&[&a, &b, &c, &d, &e], NamePolicy::FormattedName);
    assert_eq!(rows, [
      "Di Partial\t--02-03",
      "Ben Young\t2001-02-28",
      "Ann Old\t1950-12-01",
      "Cy Nodate\tspring",
    ]);
  }

  #[test]
  fn entry_rows_list_every_value_with_its_label() {
    let mut c = contact("abc", "Jo", "Doe");
    c.record.phones = vec![
      Labeled::new(LabelSet::new().with_type("cell").with_pref(1), "222".into()),
      Labeled::unlabeled("333".into()),
    ];
    c.record.addresses = vec![Labeled::new(
      LabelSet::new().with_type("home"),
      PostAddress {
        street: vec!["1 Main St".into()],
        locality: "Town".into(),
        ..Default::default()
      },
    )];
    let other = contact("def", "No", "Phone");

    let phones = entry_rows(&[&c, &other], NamePolicy::LastName, phone_entries);
    assert_eq!(phones, ["Doe, Jo\tcell, pref\t222", "Doe, Jo\tvoice\t333"]);
    let addresses = entry_rows(&[&c], NamePolicy::FormattedName, address_entries);
    assert_eq!(addresses, ["Jo Doe\thome\t1 Main St, Town"]);
    assert!(entry_rows(&[&c], NamePolicy::FormattedName, email_entries).is_empty());
  }

  #[test]
  fn rows_prefer_preferred_entries() {
    let mut c = contact("abc", "Jo", "Doe");
    c.record.phones = vec![
      Labeled::new(LabelSet::new().with_type("home"), "111".into()),
      Labeled::new(LabelSet::new().with_type("cell").with_pref(1), "222".into()),
    ];
    let short = BTreeMap::from([("abc".to_string(), "a".to_string())]);
    let rows = list_rows(&[&c], &short, NamePolicy::FormattedName);
    assert_eq!(rows.len(), 1);
    let cols: Vec<&str> = rows[0].split('\t').collect();
    assert_eq!(cols[0], "1");
    assert_eq!(cols[1], "Jo Doe");
    assert!(cols[2].ends_with(": 222"), "{}", cols[2]);
    assert_eq!(cols[3], "");
    assert_eq!(&cols[4..], ["b", "a"]);
  }
}
