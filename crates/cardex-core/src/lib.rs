//! Record model and query engine for the cardex contact manager.
//!
//! This crate is pure and never touches the filesystem. The codec lives in
//! `cardex-vcard`, the YAML template in `cardex-template`, and everything
//! that touches disk in `cardex-store`.

pub mod date;
pub mod error;
pub mod label;
pub mod query;
pub mod record;

pub use date::Date;
pub use error::{Error, Result};
pub use label::{LabelSet, Labeled, LabeledField};
pub use query::{Query, QueryTerm, SearchField, searchable_text};
pub use record::{
  ContactRecord, Kind, NamePolicy, Organisation, PostAddress, RawParam,
  RawProperty, StructuredName, Version,
};
