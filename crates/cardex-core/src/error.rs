//! Error types for `cardex-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unsupported vCard version: {0:?} (expected 3.0 or 4.0)")]
  InvalidVersion(String),

  #[error("unknown contact kind: {0:?}")]
  InvalidKind(String),

  #[error("empty label")]
  EmptyLabel,

  #[error("label {0:?} has more than one free-text label")]
  MultipleCustomLabels(String),

  #[error("invalid preference in label: {0:?}")]
  InvalidPreference(String),

  #[error("label {0:?} has an unterminated or misplaced quote")]
  MalformedLabel(String),

  #[error("type tag {0:?} may only contain letters, digits and '-'")]
  InvalidTypeTag(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
