//! Configuration file and environment overrides.
//!
//! The file is TOML, read with the `config` crate and layered under
//! `CARDEX_<SECTION>__<KEY>` environment variables:
//!
//! ```toml
//! [addressbooks.family]
//! path = "~/contacts/family"
//!
//! [general]
//! default_version = "4.0"
//! editor = "nvim"
//! display = "last_name"
//!
//! [vcard]
//! private_objects = ["Jabber"]
//! ```

use std::{
  collections::BTreeMap,
  env,
  path::{Path, PathBuf},
};

use anyhow::{Context as _, Result, bail, ensure};
use cardex_core::{NamePolicy, Version};
use cardex_store::BookConfig;
use serde::Deserialize;

// ─── File shape ──────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
  addressbooks: BTreeMap<String, BookSection>,
  general:      GeneralSection,
  vcard:        VcardSection,
}

#[derive(Debug, Deserialize)]
struct BookSection {
  path: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GeneralSection {
  default_version:        Version,
  editor:                 Option<String>,
  skip_unparsable:        bool,
  search_in_source_files: bool,
  display:                NamePolicy,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VcardSection {
  private_objects: Vec<String>,
}

// ─── Resolved settings ───────────────────────────────────────────────────────

/// Validated configuration with paths expanded.
#[derive(Debug, Clone)]
pub struct Settings {
  pub books:                  Vec<BookConfig>,
  pub default_version:        Version,
  pub editor:                 String,
  pub skip_unparsable:        bool,
  pub search_in_source_files: bool,
  pub display:                NamePolicy,
  pub private_objects:        Vec<String>,
}

/// The config file to read: `--config`, else `$CARDEX_CONFIG`, else
/// `$XDG_CONFIG_HOME/cardex/config.toml`.
pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
  if let Some(path) = explicit {
    return Ok(path.to_path_buf());
  }
  if let Some(path) = env::var_os("CARDEX_CONFIG").filter(|p| !p.is_empty()) {
    return Ok(PathBuf::from(path));
  }
  let base = match env::var_os("XDG_CONFIG_HOME").filter(|p| !p.is_empty()) {
    Some(dir) => PathBuf::from(dir),
    None => {
      let home = env::var_os("HOME").context("neither XDG_CONFIG_HOME nor HOME is set")?;
      PathBuf::from(home).join(".config")
    }
  };
  Ok(base.join("cardex").join("config.toml"))
}

/// Read and validate the config file at `path`.
pub fn load(path: &Path) -> Result<Settings> {
  let raw = config::Config::builder()
    .add_source(config::File::from(path.to_path_buf()).format(config::FileFormat::Toml))
    .add_source(
      config::Environment::with_prefix("CARDEX")
        .prefix_separator("_")
        .separator("__"),
    )
    .build()
    .with_context(|| format!("reading config file {}", path.display()))?;
  let file: ConfigFile = raw
    .try_deserialize()
    .with_context(|| format!("invalid config file {}", path.display()))?;
  tracing::debug!(path = %path.display(), books = file.addressbooks.len(), "loaded config");
  Settings::resolve(file, &|name| env::var(name).ok())
}

impl Settings {
  fn resolve(file: ConfigFile, var: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
    ensure!(
      !file.addressbooks.is_empty(),
      "no address books configured; add an [addressbooks.<name>] section"
    );
    for name in &file.vcard.private_objects {
      check_private_object(name)?;
    }

    let mut books = Vec::with_capacity(file.addressbooks.len());
    for (name, section) in file.addressbooks {
      let path = expand_path(&section.path, var);
      if !path.is_dir() {
        bail!("address book {name}: {} is not a directory", path.display());
      }
      books.push(BookConfig::new(name, path));
    }

    let editor = file
      .general
      .editor
      .filter(|e| !e.trim().is_empty())
      .or_else(|| var("EDITOR").filter(|e| !e.trim().is_empty()))
      .unwrap_or_else(|| "vi".to_string());

    Ok(Self {
      books,
      default_version: file.general.default_version,
      editor,
      skip_unparsable: file.general.skip_unparsable,
      search_in_source_files: file.general.search_in_source_files,
      display: file.general.display,
      private_objects: file.vcard.private_objects,
    })
  }

  pub fn book_names(&self) -> Vec<String> {
    self.books.iter().map(|b| b.name.clone()).collect()
  }
}

/// Private object names become `X-<NAME>` property names.
fn check_private_object(name: &str) -> Result<()> {
  let allowed = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
  if name.is_empty() || !allowed || name.starts_with('-') || name.ends_with('-') {
    bail!(
      "invalid private object name {name:?}: use letters, digits and '-', \
       not at the start or end"
    );
  }
  Ok(())
}

/// Expand a leading `~` and `$NAME` / `${NAME}` references. Unknown
/// variables are left as written.
fn expand_path(raw: &str, var: &dyn Fn(&str) -> Option<String>) -> PathBuf {
  let mut out = String::with_capacity(raw.len());
  let mut rest = raw;

  if (rest == "~" || rest.starts_with("~/"))
    && let Some(home) = var("HOME")
  {
    out.push_str(&home);
    rest = &rest[1..];
  }

  while let Some(i) = rest.find('$') {
    out.push_str(&rest[..i]);
    let after = &rest[i + 1..];
    let (name, tail) = match after.strip_prefix('{') {
      Some(braced) => match braced.find('}') {
        Some(end) => (&braced[..end], &braced[end + 1..]),
        None => ("", after),
      },
      None => {
        let end = after
          .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
          .unwrap_or(after.len());
        (&after[..end], &after[end..])
      }
    };
    match Some(name).filter(|n| !n.is_empty()).and_then(var) {
      Some(value) => {
        out.push_str(&value);
        rest = tail;
      }
      None => {
        out.push('$');
        rest = after;
      }
    }
  }
  out.push_str(rest);
  PathBuf::from(out)
}

#[cfg(test)]
mod tests {
  use std::fs;

  use pretty_assertions::assert_eq;

  use super::*;

  fn vars(name: &str) -> Option<String> {
    match name {
      "HOME" => Some("/home/ada".into()),
      "BOOKS" => Some("/srv/books".into()),
      _ => None,
    }
  }

  fn file(books: &[(&str, &Path)]) -> ConfigFile {
    ConfigFile {
      addressbooks: books
        .iter()
        .map(|(name, path)| {
          (name.to_string(), BookSection {
            path: path.display().to_string(),
          })
        })
        .collect(),
      ..Default::default()
    }
  }

  #[test]
  fn expands_home_and_variables() {
    assert_eq!(expand_path("~/c", &vars), PathBuf::from("/home/ada/c"));
    assert_eq!(expand_path("~", &vars), PathBuf::from("/home/ada"));
    assert_eq!(expand_path("$BOOKS/work", &vars), PathBuf::from("/srv/books/work"));
    assert_eq!(expand_path("${BOOKS}x", &vars), PathBuf::from("/srv/booksx"));
    assert_eq!(expand_path("a/~/b", &vars), PathBuf::from("a/~/b"));
  }

  #[test]
  fn unknown_variables_stay() {
    assert_eq!(expand_path("$NOPE/x", &vars), PathBuf::from("$NOPE/x"));
    assert_eq!(expand_path("${NOPE}/x", &vars), PathBuf::from("${NOPE}/x"));
    assert_eq!(expand_path("cost$", &vars), PathBuf::from("cost$"));
  }

  #[test]
  fn private_object_names() {
    for ok in ["Jabber", "Skype-ID", "x1"] {
      assert!(check_private_object(ok).is_ok(), "{ok}");
    }
    for bad in ["", "-Lead", "Trail-", "has space", "Ünï"] {
      assert!(check_private_object(bad).is_err(), "{bad}");
    }
  }

  #[test]
  fn needs_at_least_one_book() {
    let err = Settings::resolve(ConfigFile::default(), &vars).unwrap_err();
    assert!(err.to_string().contains("no address books"));
  }

  #[test]
  fn book_directories_must_exist() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");
    assert!(Settings::resolve(file(&[("a", &missing)]), &vars).is_err());
  }

  #[test]
  fn defaults_apply() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::resolve(file(&[("a", dir.path())]), &vars).unwrap();
    assert_eq!(settings.default_version, Version::V3);
    assert_eq!(settings.editor, "vi");
    assert_eq!(settings.display, NamePolicy::FormattedName);
    assert!(!settings.skip_unparsable);
    assert_eq!(settings.book_names(), ["a"]);
  }

  #[test]
  fn editor_falls_back_to_environment() {
    let dir = tempfile::tempdir().unwrap();
    let env = |name: &str| (name == "EDITOR").then(|| "nano".to_string());
    let settings = Settings::resolve(file(&[("a", dir.path())]), &env).unwrap();
    assert_eq!(settings.editor, "nano");
  }

  #[test]
  fn reads_a_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let family = dir.path().join("family");
    fs::create_dir(&family).unwrap();
    let config = dir.path().join("config.toml");
    fs::write(
      &config,
      format!(
        "[addressbooks.family]\npath = {:?}\n\n\
         [general]\ndefault_version = \"4.0\"\neditor = \"ed\"\n\
         display = \"last_name\"\nskip_unparsable = true\n\n\
         [vcard]\nprivate_objects = [\"Jabber\"]\n",
        family.display().to_string()
      ),
    )
    .unwrap();

    let settings = load(&config).unwrap();
    assert_eq!(settings.books[0].name, "family");
    assert_eq!(settings.books[0].path, family);
    assert_eq!(settings.default_version, Version::V4);
    assert_eq!(settings.editor, "ed");
    assert_eq!(settings.display, NamePolicy::LastName);
    assert!(settings.skip_unparsable);
    assert_eq!(settings.private_objects, ["Jabber"]);
  }

  #[test]
  fn rejects_bad_private_object_in_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    fs::write(
      &config,
      format!(
        "[addressbooks.a]\npath = {:?}\n[vcard]\nprivate_objects = [\"-x\"]\n",
        dir.path().display().to_string()
      ),
    )
    .unwrap();
    assert!(load(&config).is_err());
  }
}
