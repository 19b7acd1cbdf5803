//! Runs the user's editor on a temporary template file.

use std::{
  fs,
  io::{self, Write},
  path::Path,
  process::Command,
  time::SystemTime,
};

use cardex_store::{EditOutcome, Editor, Error};

pub struct ExternalEditor {
  command: String,
  /// File name suffix, so the editor picks the right syntax.
  suffix:  &'static str,
}

impl ExternalEditor {
  /// `command` may carry arguments (`"code --wait"`); the file path is
  /// appended.
  pub fn new(command: impl Into<String>) -> Self {
    Self {
      command: command.into(),
      suffix:  ".yaml",
    }
  }

  /// Edit vCard text instead of a template.
  pub fn for_vcard(mut self) -> Self {
    self.suffix = ".vcf";
    self
  }
}

impl Editor for ExternalEditor {
  fn edit(&self, text: &str) -> cardex_store::Result<EditOutcome> {
    let mut file = tempfile::Builder::new()
      .prefix("cardex-")
      .suffix(self.suffix)
      .tempfile()
      .map_err(Error::Editor)?;
    file
      .write_all(text.as_bytes())
      .and_then(|()| file.flush())
      .map_err(Error::Editor)?;
    let before = modified(file.path()).map_err(Error::Editor)?;

    let mut words = self.command.split_whitespace();
    let program = words.next().ok_or_else(|| {
      Error::Editor(io::Error::new(io::ErrorKind::InvalidInput, "no editor configured"))
    })?;
    tracing::debug!(editor = %self.command, path = %file.path().display(), "launching editor");
    let status = Command::new(program)
      .args(words)
      .arg(file.path())
      .status()
      .map_err(Error::Editor)?;
    if !status.success() {
      return Err(Error::Editor(io::Error::other(format!(
        "{program} exited with {status}"
      ))));
    }

    let after = modified(file.path()).map_err(Error::Editor)?;
    let edited = fs::read_to_string(file.path()).map_err(Error::Editor)?;
    // Timestamps can be too coarse to see a quick save, so compare text too.
    if before == after && edited == text {
      Ok(EditOutcome::Unchanged)
    } else {
      Ok(EditOutcome::Edited(edited))
    }
  }
}

fn modified(path: &Path) -> io::Result<SystemTime> { fs::metadata(path)?.modified() }
