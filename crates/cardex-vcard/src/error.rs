//! Error types for the cardex-vcard codec.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("vCard missing BEGIN/END:VCARD envelope")]
  MissingEnvelope,

  #[error("line {line}: malformed content-line: {content}")]
  MalformedContentLine { line: usize, content: String },

  #[error("line {line}: {property} has an invalid base64 payload")]
  InvalidEncoding { line: usize, property: String },

  #[error("unsupported vCard version {0:?}")]
  UnsupportedVersion(String),

  #[error("{feature} cannot be written as vCard 3.0")]
  UnsupportedVersionFeature { feature: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
