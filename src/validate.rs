use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::{trace, warn};

use crate::error::{Error, Result};

pub const CUR: &str = "cur";
pub const NEW: &str = "new";
pub const TMP: &str = "tmp";

const STALE_TMP_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Which of `cur`/`new`/`tmp` were freshly created by this call to
/// [`validate`]. The scanner (C4) uses this to skip the mtime-revalidation
/// sleep for directories it knows nobody else could have raced with yet.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Freshness {
    pub cur: bool,
    pub new: bool,
    pub tmp: bool,
}

/// Ensures `path/{cur,new,tmp}` exist, creating missing ones (and missing
/// parents) when `create` is true. `cur/` is the presence marker: if it's
/// absent and `create` is false, the folder does not exist.
///
/// On every call, `tmp/` is swept of regular files older than 24h.
pub fn validate(path: &Path, create: bool) -> Result<Freshness> {
    let cur = path.join(CUR);
    let new = path.join(NEW);
    let tmp = path.join(TMP);

    if !cur.is_dir() && !create {
        return Err(Error::FolderMissingError(path.display().to_string()));
    }

    let mut freshness = Freshness::default();
    for (dir, flag) in [(&cur, &mut freshness.cur), (&new, &mut freshness.new), (&tmp, &mut freshness.tmp)] {
        if !dir.is_dir() {
            fs::create_dir_all(dir).map_err(|e| Error::CreateFolderError(e, dir.clone()))?;
            *flag = true;
            trace!("created {}", dir.display());
        }
    }

    sweep_tmp(&tmp)?;

    Ok(freshness)
}

/// Unlinks regular files in `tmp/` whose ctime/mtime is older than 24h
/// (invariant 4: stale deliveries are never referenced by the message
/// list).
pub fn sweep_tmp(tmp: &PathBuf) -> Result<()> {
    let entries = match fs::read_dir(tmp) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::ReadDirError(e, tmp.clone())),
    };

    for entry in entries {
        let entry = entry.map_err(|e| Error::ReadDirError(e, tmp.clone()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let metadata = match path.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        let age = match metadata.modified().and_then(|m| {
            SystemTime::now()
                .duration_since(m)
                .map_err(|_| std::io::Error::other("clock skew"))
        }) {
            Ok(age) => age,
            Err(_) => continue,
        };
        if age > STALE_TMP_AGE {
            warn!("sweeping stale tmp file {}", path.display());
            let _ = fs::remove_file(&path);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_subdirs_and_reports_freshness() {
        let root = tempdir().unwrap();
        let path = root.path().join("Foo");
        let fresh = validate(&path, true).unwrap();
        assert!(fresh.cur && fresh.new && fresh.tmp);
        assert!(path.join(CUR).is_dir());
        assert!(path.join(NEW).is_dir());
        assert!(path.join(TMP).is_dir());
    }

    #[test]
    fn missing_folder_without_create_is_an_error() {
        let root = tempdir().unwrap();
        let path = root.path().join("Nope");
        assert!(validate(&path, false).is_err());
    }

    #[test]
    fn existing_subdirs_are_not_reported_fresh() {
        let root = tempdir().unwrap();
        let path = root.path().join("Foo");
        validate(&path, true).unwrap();
        let fresh = validate(&path, true).unwrap();
        assert!(!fresh.cur && !fresh.new && !fresh.tmp);
    }

    #[test]
    fn fresh_tmp_files_survive_a_sweep() {
        let root = tempdir().unwrap();
        let path = root.path().join("Foo");
        validate(&path, true).unwrap();

        let fresh = path.join(TMP).join("fresh");
        fs::write(&fresh, b"x").unwrap();

        validate(&path, true).unwrap();
        assert!(fresh.exists());
    }
}
