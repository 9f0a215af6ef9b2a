use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// `.uidvalidity`: two decimal integers separated by newlines
/// (`uidvalidity\n next_uid\n`), read whole and rewritten whole on every
/// mutation (spec.md §4.3).
pub struct FileBackend {
    path: PathBuf,
    uidvalidity: u64,
    next_uid: u32,
}

impl FileBackend {
    pub fn open(path: &Path, create: bool) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_contents(path, &contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && create => {
                let backend = FileBackend {
                    path: path.to_path_buf(),
                    uidvalidity: now_secs()?,
                    next_uid: 0,
                };
                backend.persist()?;
                Ok(backend)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::FolderMissingError(path.display().to_string()))
            }
            Err(e) => Err(Error::ReadUidValidityError(e, path.to_path_buf())),
        }
    }

    fn from_contents(path: &Path, contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            let backend = FileBackend {
                path: path.to_path_buf(),
                uidvalidity: now_secs()?,
                next_uid: 0,
            };
            backend.persist()?;
            return Ok(backend);
        }

        let mut lines = contents.lines();
        let uidvalidity = lines
            .next()
            .and_then(|l| l.trim().parse::<u64>().ok())
            .ok_or_else(|| Error::CorruptUidValidityError(path.to_path_buf()))?;
        let next_uid = lines
            .next()
            .and_then(|l| l.trim().parse::<u32>().ok())
            .ok_or_else(|| Error::CorruptUidValidityError(path.to_path_buf()))?;

        Ok(FileBackend {
            path: path.to_path_buf(),
            uidvalidity,
            next_uid,
        })
    }

    pub fn uidvalidity(&self) -> u64 {
        self.uidvalidity
    }

    pub fn next_uid(&self) -> u32 {
        self.next_uid
    }

    pub fn obtain_uid(&mut self) -> Result<u32> {
        self.next_uid += 1;
        self.persist()?;
        Ok(self.next_uid)
    }

    fn persist(&self) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| Error::WriteUidValidityError(e, self.path.clone()))?;
        write!(file, "{}\n{}\n", self.uidvalidity, self.next_uid)
            .map_err(|e| Error::WriteUidValidityError(e, self.path.clone()))?;
        file.sync_data()
            .map_err(|e| Error::WriteUidValidityError(e, self.path.clone()))?;
        Ok(())
    }
}

fn now_secs() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(Error::ClockError)?
        .as_secs())
}
