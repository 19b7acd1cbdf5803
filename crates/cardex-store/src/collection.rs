//! Loaded address books and the operations on them.

use std::{
  collections::BTreeMap,
  fmt, fs,
  path::{Path, PathBuf},
};

use cardex_core::{ContactRecord, Query};
use cardex_vcard::{ParseOptions, Warning};
use serde::Serialize;
use uuid::Uuid;

use crate::{
  error::{Error, Result},
  storage::Storage,
};

// ─── Configuration ───────────────────────────────────────────────────────────

/// One configured address book: a name and a directory of `*.vcf` files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookConfig {
  pub name: String,
  pub path: PathBuf,
}

impl BookConfig {
  pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
    Self {
      name: name.into(),
      path: path.into(),
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
  /// Skip files that fail to read or parse instead of failing the load.
  pub skip_unparsable: bool,
  /// Configured `X-<NAME>` extension fields.
  pub private_objects: Vec<String>,
  /// Only parse files whose raw text could match this query.
  pub prefilter:       Option<Query>,
}

// ─── Warnings ────────────────────────────────────────────────────────────────

/// Non-fatal findings from a load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionWarning {
  DuplicateUid { uid: String, paths: Vec<PathBuf> },
  SkippedFile { path: PathBuf, reason: String },
  RepeatedProperty { path: PathBuf, property: String },
  MissingUid { path: PathBuf },
  MissingVersion { path: PathBuf },
}

impl fmt::Display for CollectionWarning {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::DuplicateUid { uid, paths } => {
        let paths: Vec<String> =
          paths.iter().map(|p| p.display().to_string()).collect();
        write!(f, "uid {uid} is shared by {}", paths.join(", "))
      }
      Self::SkippedFile { path, reason } => {
        write!(f, "skipped {}: {reason}", path.display())
      }
      Self::RepeatedProperty { path, property } => {
        write!(f, "{}: repeated {property}, kept the last one", path.display())
      }
      Self::MissingUid { path } => write!(f, "{}: no UID", path.display()),
      Self::MissingVersion { path } => {
        write!(f, "{}: no VERSION, read as 3.0", path.display())
      }
    }
  }
}

// ─── Collection ──────────────────────────────────────────────────────────────

/// A loaded card and where it lives.
#[derive(Debug, Clone, Serialize)]
pub struct Contact {
  pub book:   String,
  pub path:   PathBuf,
  pub record: ContactRecord,
}

/// All loaded contacts of the configured address books, in book order and
/// then file-name order.
#[derive(Debug, Clone, Default)]
pub struct Collection {
  books:           Vec<BookConfig>,
  contacts:        Vec<Contact>,
  warnings:        Vec<CollectionWarning>,
  private_objects: Vec<String>,
}

impl Collection {
  /// Load every `*.vcf` file of `books`.
  ///
  /// A file that cannot be read or parsed fails the whole load with
  /// [`Error::Parse`] / [`Error::Io`] unless `skip_unparsable` is set, in
  /// which case it is reported as [`CollectionWarning::SkippedFile`].
  pub fn load(books: &[BookConfig], options: &LoadOptions) -> Result<Self> {
    let parse_options = ParseOptions {
      private_objects: options.private_objects.clone(),
    };
    let mut collection = Self {
      books:           books.to_vec(),
      contacts:        Vec::new(),
      warnings:        Vec::new(),
      private_objects: options.private_objects.clone(),
    };

    for book in books {
      let files = vcf_files(&book.path)?;
      tracing::debug!(book = %book.name, files = files.len(), "loading address book");
      let mut filtered = 0usize;

      for path in files {
        let text = match fs::read_to_string(&path) {
          Ok(text) => text,
          Err(e) if options.skip_unparsable => {
            collection.skip(path, e.to_string());
            continue;
          }
          Err(e) => return Err(Error::io(path, e)),
        };

        // Files without a card envelope are never filtered out, so they
        // fail or get skipped the same way with or without a pre-filter.
        if let Some(query) = &options.prefilter
          && has_envelope(&text)
          && !query.may_match_raw(&text)
        {
          filtered += 1;
          continue;
        }

        let parsed = match cardex_vcard::parse(&text, &parse_options) {
          Ok(parsed) => parsed,
          Err(e) if options.skip_unparsable => {
            collection.skip(path, e.to_string());
            continue;
          }
          Err(source) => {
            return Err(Error::Parse {
              path,
              book: book.name.clone(),
              source,
            });
          }
        };

        for warning in parsed.warnings {
          collection.warnings.push(match warning {
            Warning::MissingVersion => CollectionWarning::MissingVersion {
              path: path.clone(),
            },
            Warning::MissingUid => {
              CollectionWarning::MissingUid { path: path.clone() }
            }
            Warning::RepeatedProperty { property, .. } => {
              CollectionWarning::RepeatedProperty {
                path: path.clone(),
                property,
              }
            }
          });
        }

        let mut record = parsed.record;
        record.source = Some(path.clone());
        collection.contacts.push(Contact {
          book: book.name.clone(),
          path,
          record,
        });
      }

      if filtered > 0 {
        tracing::debug!(book = %book.name, filtered, "skipped files by raw pre-filter");
      }
    }

    collection.check_duplicate_uids();
    tracing::debug!(contacts = collection.contacts.len(), "collection loaded");
    Ok(collection)
  }

  fn skip(&mut self, path: PathBuf, reason: String) {
    tracing::warn!(path = %path.display(), %reason, "skipping unparsable file");
    self.warnings.push(CollectionWarning::SkippedFile { path, reason });
  }

  fn check_duplicate_uids(&mut self) {
    let mut by_uid: BTreeMap<&str, Vec<PathBuf>> = BTreeMap::new();
    for contact in &self.contacts {
      if !contact.record.uid.is_empty() {
        by_uid
          .entry(contact.record.uid.as_str())
          .or_default()
          .push(contact.path.clone());
      }
    }
    let duplicates: Vec<CollectionWarning> = by_uid
      .into_iter()
      .filter(|(_, paths)| paths.len() > 1)
      .map(|(uid, paths)| {
        tracing::warn!(uid, count = paths.len(), "duplicate uid");
        CollectionWarning::DuplicateUid {
          uid: uid.to_string(),
          paths,
        }
      })
      .collect();
    self.warnings.extend(duplicates);
  }

  // ── Accessors ──────────────────────────────────────────────────────────────

  pub fn books(&self) -> &[BookConfig] { &self.books }

  pub fn book(&self, name: &str) -> Result<&BookConfig> {
    self
      .books
      .iter()
      .find(|b| b.name == name)
      .ok_or_else(|| Error::UnknownAddressBook(name.to_string()))
  }

  pub fn contacts(&self) -> &[Contact] { &self.contacts }

  pub fn warnings(&self) -> &[CollectionWarning] { &self.warnings }

  pub fn private_objects(&self) -> &[String] { &self.private_objects }

  // ── Lookup ─────────────────────────────────────────────────────────────────

  /// Contacts matching `query`, in collection order.
  pub fn find(&self, query: &Query) -> Vec<&Contact> {
    self
      .contacts
      .iter()
      .filter(|c| query.matches(&c.record))
      .collect()
  }

  /// Like [`Collection::find`], restricted to the named address books.
  pub fn find_in(&self, books: &[String], query: &Query) -> Vec<&Contact> {
    self
      .find(query)
      .into_iter()
      .filter(|c| books.iter().any(|b| *b == c.book))
      .collect()
  }

  /// The single contact with this exact uid.
  pub fn by_uid(&self, uid: &str) -> Result<&Contact> {
    let matches: Vec<&Contact> =
      self.contacts.iter().filter(|c| c.record.uid == uid).collect();
    exactly_one(uid, matches)
  }

  pub fn by_path(&self, path: &Path) -> Result<&Contact> {
    self
      .contacts
      .iter()
      .find(|c| c.path == path)
      .ok_or_else(|| Error::NotFound(path.display().to_string()))
  }

  /// Contacts whose uid starts with `prefix`.
  pub fn by_uid_prefix(&self, prefix: &str) -> Vec<&Contact> {
    self
      .contacts
      .iter()
      .filter(|c| !prefix.is_empty() && c.record.uid.starts_with(prefix))
      .collect()
  }

  /// The single contact matching `query`.
  pub fn select_one(&self, query: &Query) -> Result<&Contact> {
    exactly_one(&query.to_string(), self.find(query))
  }

  /// Shortest prefix of every uid that tells it apart from all others,
  /// keyed by full uid.
  pub fn short_uids(&self) -> BTreeMap<String, String> {
    let mut uids: Vec<&str> = self
      .contacts
      .iter()
      .map(|c| c.record.uid.as_str())
      .filter(|u| !u.is_empty())
      .collect();
    uids.sort_unstable();
    uids.dedup();

    let mut out = BTreeMap::new();
    for (i, uid) in uids.iter().enumerate() {
      let before = i.checked_sub(1).map_or(0, |j| common_prefix(uids[j], uid));
      let after = uids.get(i + 1).map_or(0, |next| common_prefix(uid, next));
      let len = before.max(after) + 1;
      let short: String = uid.chars().take(len).collect();
      out.insert(uid.to_string(), short);
    }
    out
  }

  // ── Mutation ───────────────────────────────────────────────────────────────
  //
  // Each operation serializes first and touches storage last, so a record
  // that cannot be written leaves the disk as it was.

  /// Write a new contact into `book` as `<uid>.vcf`.
  pub fn create(
    &mut self,
    book: &str,
    mut record: ContactRecord,
    storage: &dyn Storage,
  ) -> Result<&Contact> {
    let dir = self.book(book)?.path.clone();
    if record.uid.is_empty() {
      record.uid = Uuid::new_v4().to_string();
    }
    let path = dir.join(format!("{}.vcf", file_stem(&record.uid)));
    record.source = Some(path.clone());
    let text = cardex_vcard::serialize(&record, record.version)?;
    storage.write_new(&path, &text)?;
    tracing::debug!(book, path = %path.display(), "created contact");

    self.contacts.push(Contact {
      book: book.to_string(),
      path,
      record,
    });
    Ok(&self.contacts[self.contacts.len() - 1])
  }

  /// Replace the card at `path` with `record`.
  pub fn update(
    &mut self,
    path: &Path,
    mut record: ContactRecord,
    storage: &dyn Storage,
  ) -> Result<&Contact> {
    let idx = self.index_of(path)?;
    record.source = Some(path.to_path_buf());
    let text = cardex_vcard::serialize(&record, record.version)?;
    storage.replace(path, &text)?;
    tracing::debug!(path = %path.display(), "updated contact");

    self.contacts[idx].record = record;
    Ok(&self.contacts[idx])
  }

  /// Write a copy of the card at `path` into `target` under a fresh uid.
  pub fn copy_to(
    &mut self,
    path: &Path,
    target: &str,
    storage: &dyn Storage,
  ) -> Result<&Contact> {
    let source = &self.contacts[self.index_of(path)?];
    if source.book == target {
      return Err(Error::SameAddressBook(target.to_string()));
    }
    let mut record = source.record.clone();
    record.uid = Uuid::new_v4().to_string();
    self.create(target, record, storage)
  }

  /// Move the card at `path` into `target`, keeping its uid. The source
  /// file is removed only once the new one is written.
  pub fn move_to(
    &mut self,
    path: &Path,
    target: &str,
    storage: &dyn Storage,
  ) -> Result<&Contact> {
    let idx = self.index_of(path)?;
    let source = &self.contacts[idx];
    if source.book == target {
      return Err(Error::SameAddressBook(target.to_string()));
    }
    let mut record = source.record.clone();
    if record.uid.is_empty() {
      record.uid = Uuid::new_v4().to_string();
    }
    let dir = self.book(target)?.path.clone();
    let new_path = dir.join(format!("{}.vcf", file_stem(&record.uid)));
    record.source = Some(new_path.clone());
    let text = cardex_vcard::serialize(&record, record.version)?;

    storage.write_new(&new_path, &text)?;
    storage.remove(path)?;
    tracing::debug!(
      from = %path.display(),
      to = %new_path.display(),
      "moved contact"
    );

    let contact = &mut self.contacts[idx];
    contact.book = target.to_string();
    contact.path = new_path;
    contact.record = record;
    Ok(&self.contacts[idx])
  }

  /// Delete the card at `path`.
  pub fn remove(&mut self, path: &Path, storage: &dyn Storage) -> Result<Contact> {
    let idx = self.index_of(path)?;
    storage.remove(path)?;
    Ok(self.contacts.remove(idx))
  }

  fn index_of(&self, path: &Path) -> Result<usize> {
    self
      .contacts
      .iter()
      .position(|c| c.path == path)
      .ok_or_else(|| Error::NotFound(path.display().to_string()))
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn vcf_files(dir: &Path) -> Result<Vec<PathBuf>> {
  let entries = fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
  let mut files = Vec::new();
  for entry in entries {
    let path = entry.map_err(|e| Error::io(dir, e))?.path();
    let is_vcf = path
      .extension()
      .and_then(|e| e.to_str())
      .is_some_and(|e| e.eq_ignore_ascii_case("vcf"));
    if is_vcf && path.is_file() {
      files.push(path);
    }
  }
  files.sort();
  Ok(files)
}

/// `BEGIN:VCARD` first and `END:VCARD` last, ignoring case and blank lines.
fn has_envelope(text: &str) -> bool {
  let text = text.trim_start_matches('\u{feff}').trim();
  let starts = text
    .get(..11)
    .is_some_and(|head| head.eq_ignore_ascii_case("begin:vcard"));
  let ends = text
    .len()
    .checked_sub(9)
    .and_then(|i| text.get(i..))
    .is_some_and(|tail| tail.eq_ignore_ascii_case("end:vcard"));
  starts && ends
}

fn exactly_one<'a>(what: &str, mut matches: Vec<&'a Contact>) -> Result<&'a Contact> {
  match matches.len() {
    0 => Err(Error::NotFound(what.to_string())),
    1 => Ok(matches.remove(0)),
    count => Err(Error::AmbiguousSelection {
      query: what.to_string(),
      count,
    }),
  }
}

/// Length in chars of the common prefix of `a` and `b`.
fn common_prefix(a: &str, b: &str) -> usize {
  a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}

/// A uid made safe for use as a file name.
fn file_stem(uid: &str) -> String {
  uid
    .chars()
    .map(|c| match c {
      '/' | '\\' | '\0' => '_',
      c => c,
    })
    .collect()
}

