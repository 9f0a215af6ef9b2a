//! C3: UID-validity store. Two interchangeable backends (plain file,
//! hash DB) behind one interface, guarded by a deferred-unlock advisory
//! lock (spec.md §4.3).

mod db;
mod file;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use log::{debug, trace};

use crate::config::UidBackend;
use crate::error::{Error, Result};

const UNLOCK_AFTER: Duration = Duration::from_secs(2);

/// How the in-memory `next_uid` counter should change after allocating a
/// fresh UID.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UidValidity {
    pub uidvalidity: u64,
    pub next_uid: u32,
}

enum Backend {
    File(file::FileBackend),
    Db(db::DbBackend),
}

/// Owns the advisory lock and the `(uidvalidity, next_uid)` pair for one
/// open folder. Dropped (and thus unlocked) when the folder is
/// deselected; also unlocks early if [`UidStore::poll_timer`] finds the
/// 2s deferred-unlock deadline has passed.
pub struct UidStore {
    backend: Backend,
    lock_file: std::fs::File,
    locked: bool,
    unlock_deadline: Option<Instant>,
}

impl UidStore {
    /// Opens the UID-validity resource for `folder_path`, selecting the
    /// backend from `kind`. `create` allows initializing a fresh
    /// uidvalidity when the artifact doesn't exist yet.
    pub fn open(folder_path: &Path, kind: UidBackend, create: bool) -> Result<Self> {
        let (backend, lock_path) = match kind {
            UidBackend::FilenameEmbedded => {
                let path = folder_path.join(".uidvalidity");
                (Backend::File(file::FileBackend::open(&path, create)?), path)
            }
            UidBackend::HashDb => {
                let path = folder_path.join(".isyncuidmap.db");
                (Backend::Db(db::DbBackend::open(&path, create)?), path)
            }
        };

        let lock_file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| Error::LockError(e, lock_path.clone()))?;

        let mut store = UidStore {
            backend,
            lock_file,
            locked: false,
            unlock_deadline: None,
        };
        store.touch()?;
        Ok(store)
    }

    pub fn uidvalidity(&self) -> u64 {
        match &self.backend {
            Backend::File(b) => b.uidvalidity(),
            Backend::Db(b) => b.uidvalidity(),
        }
    }

    pub fn next_uid(&self) -> u32 {
        match &self.backend {
            Backend::File(b) => b.next_uid(),
            Backend::Db(b) => b.next_uid(),
        }
    }

    /// Allocates the next UID and persists the advanced counter under
    /// the lock (spec.md §4.3 "Allocation").
    pub fn obtain_uid(&mut self) -> Result<u32> {
        self.touch()?;
        let uid = match &mut self.backend {
            Backend::File(b) => b.obtain_uid()?,
            Backend::Db(b) => b.obtain_uid()?,
        };
        debug!("allocated uid {uid}");
        Ok(uid)
    }

    /// DB-mode-only: inserts the `stem -> uid` mapping. A no-op for the
    /// filename backend, which encodes the UID in the rename instead.
    pub fn insert_mapping(&mut self, stem: &str, uid: u32) -> Result<()> {
        self.touch()?;
        if let Backend::Db(b) = &mut self.backend {
            b.insert(stem, uid)?;
        }
        Ok(())
    }

    /// DB-mode-only lookup of a filename stem; always `None` for the
    /// filename backend (the scanner parses `,U=` directly instead).
    pub fn lookup(&mut self, stem: &str) -> Result<Option<u32>> {
        self.touch()?;
        match &self.backend {
            Backend::Db(b) => b.lookup(stem),
            Backend::File(_) => Ok(None),
        }
    }

    /// DB-mode-only: records that `stem` was observed in this scan pass,
    /// for step 6's garbage collection.
    pub fn mark_seen(&mut self, stem: &str) -> Result<()> {
        if let Backend::Db(b) = &mut self.backend {
            b.mark_seen(stem)?;
        }
        Ok(())
    }

    /// DB-mode-only: deletes every non-`UIDVALIDITY` key not marked seen
    /// this pass, then clears the transient seen set (spec.md §4.4
    /// step 6).
    pub fn garbage_collect(&mut self) -> Result<()> {
        self.touch()?;
        if let Backend::Db(b) = &mut self.backend {
            b.garbage_collect()?;
        }
        Ok(())
    }

    pub fn remove_mapping(&mut self, stem: &str) -> Result<()> {
        self.touch()?;
        if let Backend::Db(b) = &mut self.backend {
            b.remove(stem)?;
        }
        Ok(())
    }

    /// Re-acquires the lock if it was released and resets the
    /// deferred-unlock deadline to 2s from now. Any operation within the
    /// window reuses the existing lock epoch rather than re-acquiring.
    fn touch(&mut self) -> Result<()> {
        if !self.locked {
            self.lock_file
                .lock_exclusive()
                .map_err(|e| Error::LockError(e, PathBuf::new()))?;
            self.locked = true;
            trace!("acquired uidvalidity lock");
        }
        self.unlock_deadline = Some(Instant::now() + UNLOCK_AFTER);
        Ok(())
    }

    /// Releases the lock if the deferred-unlock deadline has passed.
    /// This is the non-blocking half of spec.md §5's timer contract: a
    /// host event loop calls this on its own schedule rather than this
    /// driver spawning a thread.
    pub fn poll_timer(&mut self) -> Result<()> {
        if let Some(deadline) = self.unlock_deadline {
            if Instant::now() >= deadline && self.locked {
                self.lock_file.unlock().ok();
                self.locked = false;
                self.unlock_deadline = None;
                if let Backend::Db(b) = &mut self.backend {
                    b.close_if_idle();
                }
                trace!("released uidvalidity lock after deferred-unlock window");
            }
        }
        Ok(())
    }
}

impl Drop for UidStore {
    fn drop(&mut self) {
        if self.locked {
            let _ = self.lock_file.unlock();
        }
    }
}
