//! `cardex`: manage vCard address books from the command line.
//!
//! # Usage
//!
//! ```
//! cardex list doe
//! cardex show emails:example.org
//! cardex field emails.work.0 "John Doe"
//! cardex new -a family
//! cardex edit --input contact.yaml 1a2b
//! cardex move --to work "Jane"
//! cardex merge --target "Jane Doe" jdoe
//! cardex birthdays
//! ```

mod commands;
mod config;
mod editor;

use std::path::PathBuf;

use anyhow::Result;
use cardex_core::Version;
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "cardex", version, about = "vCard address books on the command line")]
struct Cli {
  /// Path to the TOML config file.
  #[arg(short, long, value_name = "FILE", global = true)]
  config: Option<PathBuf>,

  /// Restrict to this address book. May be repeated.
  #[arg(short = 'a', long = "addressbook", value_name = "NAME", global = true)]
  addressbooks: Vec<String>,

  /// Report unparsable files and continue instead of failing.
  #[arg(long, global = true)]
  skip_unparsable: bool,

  /// Only parse files whose raw text could match the search.
  #[arg(long, global = true)]
  search_in_source_files: bool,

  /// Log debug output to stderr.
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List contacts matching a search.
  #[command(alias = "ls")]
  List {
    /// Print the matching records as JSON.
    #[arg(long)]
    json: bool,
    terms: Vec<String>,
  },
  /// Show one contact.
  Show {
    /// Print the vCard instead of the template.
    #[arg(long)]
    vcard: bool,
    #[arg(required = true)]
    terms: Vec<String>,
  },
  /// Print one field of a contact, addressed by a dotted path.
  Field {
    /// For example `emails.work.0` or `address.home.city`.
    path: String,
    #[arg(required = true)]
    terms: Vec<String>,
  },
  /// List the field names usable with `field`.
  Fields,
  /// Print a blank template for `new --input`.
  Template,
  /// Create a contact in an editor or from a template file.
  #[command(alias = "add")]
  New {
    /// Read the template from FILE (`-` for stdin) instead of an editor.
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,
    /// vCard version of the new contact.
    #[arg(long, value_name = "VERSION")]
    vcard_version: Option<Version>,
  },
  /// Edit a contact in an editor or from a template file.
  #[command(alias = "modify")]
  Edit {
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,
    /// Edit the raw vCard instead of the template.
    #[arg(long, conflicts_with = "input")]
    vcard: bool,
    #[arg(required = true)]
    terms: Vec<String>,
  },
  /// Merge one contact into another and delete the first.
  Merge {
    /// Search for the contact that is kept.
    #[arg(short, long, value_name = "SEARCH")]
    target: String,
    /// Do not ask for confirmation.
    #[arg(short, long)]
    force: bool,
    /// Search for the contact that is merged away.
    #[arg(required = true)]
    terms: Vec<String>,
  },
  /// Delete a contact.
  #[command(alias = "rm")]
  Remove {
    /// Do not ask for confirmation.
    #[arg(short, long)]
    force: bool,
    #[arg(required = true)]
    terms: Vec<String>,
  },
  /// Copy a contact into another address book under a new uid.
  #[command(alias = "cp")]
  Copy {
    #[arg(long, value_name = "NAME")]
    to: String,
    #[arg(required = true)]
    terms: Vec<String>,
  },
  /// Move a contact into another address book.
  #[command(alias = "mv")]
  Move {
    #[arg(long, value_name = "NAME")]
    to: String,
    #[arg(required = true)]
    terms: Vec<String>,
  },
  /// List birthdays in calendar order.
  #[command(alias = "bdays")]
  Birthdays { terms: Vec<String> },
  /// List phone numbers.
  #[command(alias = "phones")]
  Phone { terms: Vec<String> },
  /// List email addresses.
  #[command(alias = "emails")]
  Email { terms: Vec<String> },
  /// List post addresses.
  #[command(alias = "post")]
  Postaddress { terms: Vec<String> },
  /// List the configured address books.
  #[command(alias = "abooks")]
  Addressbooks,
}

// ─── Entry point ─────────────────────────────────────────────────────────────

fn main() -> Result<()> {
  let cli = Cli::parse();

  let level = if cli.verbose { LevelFilter::DEBUG } else { LevelFilter::WARN };
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy(),
    )
    .init();

  let path = config::config_path(cli.config.as_deref())?;
  let mut settings = config::load(&path)?;
  // Flags can only switch these on.
  settings.skip_unparsable |= cli.skip_unparsable;
  settings.search_in_source_files |= cli.search_in_source_files;

  let app = commands::App::new(settings, cli.addressbooks)?;
  match cli.command {
    Command::List { json, terms } => app.list(&terms, json),
    Command::Show { vcard, terms } => app.show(&terms, vcard),
    Command::Field { path, terms } => app.field(&path, &terms),
    Command::Fields => app.fields(),
    Command::Template => app.template(),
    Command::New {
      input,
      vcard_version,
    } => app.new_contact(input.as_deref(), vcard_version),
    Command::Edit {
      input,
      vcard,
      terms,
    } => app.edit(&terms, input.as_deref(), vcard),
    Command::Merge {
      target,
      force,
      terms,
    } => app.merge(&terms, &[target], force),
    Command::Remove { force, terms } => app.remove(&terms, force),
    Command::Copy { to, terms } => app.copy(&terms, &to),
    Command::Move { to, terms } => app.move_to(&terms, &to),
    Command::Birthdays { terms } => app.birthdays(&terms),
    Command::Phone { terms } => app.phones(&terms),
    Command::Email { terms } => app.emails(&terms),
    Command::Postaddress { terms } => app.post_addresses(&terms),
    Command::Addressbooks => app.addressbooks(),
  }
}
