//! The edit-a-template (or edit-the-vCard) step, with the editor itself
//! behind a trait.

use cardex_core::ContactRecord;
use cardex_template::{Template, TemplateOptions};
use cardex_vcard::ParseOptions;

use crate::error::{Error, Result};

/// What came back from the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
  /// The user left without saving a change.
  Unchanged,
  Edited(String),
}

/// Something that lets a user change a piece of text, usually an external
/// editor process.
pub trait Editor {
  fn edit(&self, text: &str) -> Result<EditOutcome>;
}

/// Hand `initial` to `editor` and read the result back into a record.
///
/// `Ok(None)` means the user left without changing anything. When the
/// edited text is rejected, `retry` sees the error and decides whether the
/// editor opens again on the rejected text; if it declines, the error is
/// returned. Nothing on disk has been touched either way.
pub fn edit_record(
  editor: &dyn Editor,
  initial: &str,
  existing: Option<&ContactRecord>,
  options: &TemplateOptions,
  retry: &mut dyn FnMut(&Error) -> bool,
) -> Result<Option<ContactRecord>> {
  edit_loop(editor, initial, retry, |text| {
    Ok(Template::parse(text)?.apply(existing, options)?)
  })
}

/// Like [`edit_record`], but on the card's vCard text. The uid cannot be
/// changed this way.
pub fn edit_vcard(
  editor: &dyn Editor,
  existing: &ContactRecord,
  options: &ParseOptions,
  retry: &mut dyn FnMut(&Error) -> bool,
) -> Result<Option<ContactRecord>> {
  let initial = cardex_vcard::serialize(existing, existing.version)?;
  edit_loop(editor, &initial, retry, |text| {
    let mut record = cardex_vcard::parse(text, options)?.record;
    if record.uid != existing.uid {
      return Err(Error::UidChanged {
        from: existing.uid.clone(),
        to:   record.uid,
      });
    }
    record.source.clone_from(&existing.source);
    Ok(record)
  })
}

fn edit_loop(
  editor: &dyn Editor,
  initial: &str,
  retry: &mut dyn FnMut(&Error) -> bool,
  mut read: impl FnMut(&str) -> Result<ContactRecord>,
) -> Result<Option<ContactRecord>> {
  let mut text = initial.to_string();
  loop {
    text = match editor.edit(&text)? {
      EditOutcome::Unchanged => return Ok(None),
      EditOutcome::Edited(edited) if edited == initial => return Ok(None),
      EditOutcome::Edited(edited) => edited,
    };
    match read(&text) {
      Ok(record) => return Ok(Some(record)),
      Err(e) if retry(&e) => {
        tracing::debug!(error = %e, "edit rejected, editing again");
      }
      Err(e) => return Err(e),
    }
  }
}

#[cfg(test)]
pub(crate) mod fake {
  use std::cell::RefCell;

  use super::*;

  /// Replays canned edits.
  pub(crate) struct ScriptedEditor {
    pub(crate) edits: RefCell<Vec<EditOutcome>>,
    pub(crate) seen:  RefCell<Vec<String>>,
  }

  impl ScriptedEditor {
    pub(crate) fn new(edits: Vec<EditOutcome>) -> Self {
      Self {
        edits: RefCell::new(edits),
        seen:  RefCell::new(Vec::new()),
      }
    }
  }

  impl Editor for ScriptedEditor {
    fn edit(&self, text: &str) -> Result<EditOutcome> {
      self.seen.borrow_mut().push(text.to_string());
      let mut edits = self.edits.borrow_mut();
      Ok(if edits.is_empty() {
        EditOutcome::Unchanged
      } else {
        edits.remove(0)
      })
    }
  }
}
