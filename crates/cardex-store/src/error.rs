//! Error type for `cardex-store`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("error when parsing {} in address book {book}: {source}", path.display())]
  Parse {
    path:   PathBuf,
    book:   String,
    #[source]
    source: cardex_vcard::Error,
  },

  #[error("{}: {source}", path.display())]
  Io {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("codec error: {0}")]
  Codec(#[from] cardex_vcard::Error),

  #[error("template error: {0}")]
  Template(#[from] cardex_template::Error),

  #[error("editor failed: {0}")]
  Editor(#[source] std::io::Error),

  #[error("no contact found for {0:?}")]
  NotFound(String),

  #[error("{count} contacts match {query:?}, expected exactly one")]
  AmbiguousSelection { query: String, count: usize },

  #[error("unknown address book {0:?}")]
  UnknownAddressBook(String),

  #[error("address book {0:?} already contains this contact")]
  SameAddressBook(String),

  #[error("{} already exists", .0.display())]
  AlreadyExists(PathBuf),

  #[error("the uid cannot be changed (was {from:?}, now {to:?})")]
  UidChanged { from: String, to: String },
}

impl Error {
  pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    Self::Io {
      path: path.into(),
      source,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
