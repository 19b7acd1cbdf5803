//! Backing-file primitives.
//!
//! Every write goes to a temporary sibling first and is renamed (or, for
//! new cards, hard-linked) into place, so a crash or a concurrent reader
//! never sees a half-written card.

use std::{
  fs::{self, OpenOptions},
  io::{self, Write},
  path::{Path, PathBuf},
};

use crate::error::{Error, Result};

/// Where serialized cards end up. Mutations call this only after the
/// record has been validated and serialized in memory.
pub trait Storage {
  /// Create `path`, failing with [`Error::AlreadyExists`] if it is taken.
  fn write_new(&self, path: &Path, contents: &str) -> Result<()>;

  /// Atomically replace the contents of `path`.
  fn replace(&self, path: &Path, contents: &str) -> Result<()>;

  fn remove(&self, path: &Path) -> Result<()>;
}

/// [`Storage`] on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStorage;

impl Storage for FsStorage {
  fn write_new(&self, path: &Path, contents: &str) -> Result<()> {
    let (temp_path, parent) = write_temp(path, contents.as_bytes())?;
    // Linking fails if the name is taken, even by a writer that got there
    // after any check we could make.
    let linked = fs::hard_link(&temp_path, path);
    let _ = fs::remove_file(&temp_path);
    match linked {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
        return Err(Error::AlreadyExists(path.to_path_buf()));
      }
      Err(e) => return Err(Error::io(path, e)),
    }
    sync_dir(parent);
    tracing::debug!(path = %path.display(), bytes = contents.len(), "created card");
    Ok(())
  }

  fn replace(&self, path: &Path, contents: &str) -> Result<()> {
    write_atomic(path, contents.as_bytes())
  }

  fn remove(&self, path: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|e| Error::io(path, e))?;
    tracing::debug!(path = %path.display(), "removed card");
    Ok(())
  }
}

/// Write `data` to a fresh temporary file next to `target`, fsync it, then
/// rename it over `target` and fsync the directory.
pub fn write_atomic(target: &Path, data: &[u8]) -> Result<()> {
  let (temp_path, parent) = write_temp(target, data)?;
  if let Err(e) = fs::rename(&temp_path, target) {
    let _ = fs::remove_file(&temp_path);
    return Err(Error::io(target, e));
  }
  sync_dir(parent);
  tracing::debug!(path = %target.display(), bytes = data.len(), "wrote card");
  Ok(())
}

/// Write and fsync `data` in a new hidden sibling of `target`. Returns the
/// temporary path and the directory both live in.
fn write_temp<'a>(target: &'a Path, data: &[u8]) -> Result<(PathBuf, &'a Path)> {
  let parent = target.parent().ok_or_else(|| {
    Error::io(
      target,
      io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"),
    )
  })?;
  let name = target
    .file_name()
    .and_then(|n| n.to_str())
    .unwrap_or("cardex");

  let mut counter: u32 = 0;
  let (temp_path, mut file) = loop {
    let candidate: PathBuf = if counter == 0 {
      parent.join(format!(".{name}.tmp"))
    } else {
      parent.join(format!(".{name}.{counter}.tmp"))
    };
    match OpenOptions::new().write(true).create_new(true).open(&candidate) {
      Ok(file) => break (candidate, file),
      Err(e) if e.kind() == io::ErrorKind::AlreadyExists => counter += 1,
      Err(e) => return Err(Error::io(candidate, e)),
    }
  };

  let written = file.write_all(data).and_then(|()| file.sync_all());
  drop(file);
  if let Err(e) = written {
    let _ = fs::remove_file(&temp_path);
    return Err(Error::io(temp_path, e));
  }
  Ok((temp_path, parent))
}

fn sync_dir(dir: &Path) {
  if let Ok(dir) = fs::File::open(dir) {
    let _ = dir.sync_all();
  }
}
