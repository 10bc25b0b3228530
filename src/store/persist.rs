//! Snapshot file handling for the session store.
//!
//! The whole store is written to `<file>.tmp` and then renamed over the real
//! file, so a crash or a failed write leaves the previous snapshot intact.

use super::session::Session;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type SessionMap = BTreeMap<String, Session>;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid session data in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PersistError + '_ {
    move |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Path of the scratch file used while writing a snapshot.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Read a snapshot. `Ok(None)` when the file does not exist.
pub fn load(path: &Path) -> Result<Option<SessionMap>, PersistError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path)(e)),
    };
    let sessions = serde_json::from_str(&contents).map_err(|source| PersistError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(sessions))
}

/// Write a snapshot atomically.
pub fn save(path: &Path, sessions: &SessionMap) -> Result<(), PersistError> {
    let tmp = temp_path(path);
    let result = write_then_rename(path, &tmp, sessions);
    if result.is_err() && tmp.exists() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_then_rename(path: &Path, tmp: &Path, sessions: &SessionMap) -> Result<(), PersistError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    let file = File::create(tmp).map_err(io_err(tmp))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, sessions).map_err(|source| PersistError::Json {
        path: tmp.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(io_err(tmp))?;
    writer.get_ref().sync_all().map_err(io_err(tmp))?;
    drop(writer);

    fs::rename(tmp, path).map_err(io_err(path))
}
