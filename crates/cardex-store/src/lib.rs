//! Address books on disk for cardex.
//!
//! An address book is a directory holding one vCard per `*.vcf` file. A
//! [`Collection`] loads the configured books, answers queries, and performs
//! create / update / copy / move / remove through a [`Storage`]. Every
//! mutation serializes the record in memory before storage is touched.

mod collection;
mod editor;
mod storage;

pub mod error;

pub use collection::{
  BookConfig, Collection, CollectionWarning, Contact, LoadOptions,
};
pub use editor::{EditOutcome, Editor, edit_record, edit_vcard};
pub use error::{Error, Result};
pub use storage::{FsStorage, Storage, write_atomic};
