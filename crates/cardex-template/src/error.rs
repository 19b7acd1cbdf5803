//! Error types for `cardex-template`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("template is not valid YAML: {0}")]
  Yaml(#[from] serde_yaml::Error),

  #[error("{field}: {message}")]
  Validation { field: String, message: String },

  #[error("field not found: {path}")]
  FieldNotFound { path: String },
}

impl Error {
  pub(crate) fn validation(
    field: impl Into<String>,
    message: impl Into<String>,
  ) -> Self {
    Self::Validation {
      field:   field.into(),
      message: message.into(),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
