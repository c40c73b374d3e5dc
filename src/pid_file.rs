//! Plain-text pid file holding the decimal id of the running worker.
use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use crate::error::ServiceError;

/// A pid read back from disk together with the time it was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidRecord {
    pub pid: u32,
    /// Modification time of the file in seconds since the Unix epoch.
    pub written_at: Option<u64>,
}

/// Pid file at a configured location.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrites the file with `pid`, creating parent directories as needed.
    pub fn write(&self, pid: u32) -> Result<(), ServiceError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| self.error(source))?;
        }
        fs::write(&self.path, pid.to_string()).map_err(|source| self.error(source))
    }

    /// Reads the recorded pid. A missing file yields `Ok(None)`.
    pub fn read(&self) -> Result<Option<PidRecord>, ServiceError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.error(source)),
        };

        let pid = contents.trim().parse::<u32>().map_err(|err| {
            self.error(io::Error::new(
                ErrorKind::InvalidData,
                format!("'{}' is not a process id: {err}", contents.trim()),
            ))
        })?;

        let written_at = fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_secs());

        Ok(Some(PidRecord { pid, written_at }))
    }

    /// Deletes the file. Removing a file that does not exist succeeds.
    pub fn remove(&self) -> Result<(), ServiceError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(self.error(source)),
        }
    }

    fn error(&self, source: io::Error) -> ServiceError {
        ServiceError::PidFileError {
            path: self.path.clone(),
            source,
        }
    }
}
