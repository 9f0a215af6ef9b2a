use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};

/// `.isyncuidmap.db`: a small SQLite file holding the reserved
/// `UIDVALIDITY` row and, per message, a `stem -> uid` row. The
/// spec-internal transient "seen" set from spec.md §4.4 step 6 lives in
/// its own table in the same file rather than a second bespoke store.
pub struct DbBackend {
    path: PathBuf,
    conn: Option<Connection>,
    uidvalidity: u64,
    next_uid: u32,
}

impl DbBackend {
    pub fn open(path: &Path, create: bool) -> Result<Self> {
        if !create && !path.exists() {
            return Err(Error::FolderMissingError(path.display().to_string()));
        }

        let conn = Connection::open(path).map_err(|e| Error::OpenDbError(e, path.to_path_buf()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS uid_meta (id INTEGER PRIMARY KEY CHECK (id = 0), uidvalidity INTEGER NOT NULL, next_uid INTEGER NOT NULL);
             CREATE TABLE IF NOT EXISTS uid_map (stem TEXT PRIMARY KEY, uid INTEGER NOT NULL);
             CREATE TABLE IF NOT EXISTS uid_map_seen (stem TEXT PRIMARY KEY);",
        )
        .map_err(Error::DbError)?;

        let existing: Option<(i64, i64)> = conn
            .query_row("SELECT uidvalidity, next_uid FROM uid_meta WHERE id = 0", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()
            .map_err(Error::DbError)?;

        let (uidvalidity, next_uid) = match existing {
            Some((uidvalidity, next_uid)) => (uidvalidity as u64, next_uid as u32),
            None => {
                let uidvalidity = now_secs()?;
                conn.execute(
                    "INSERT INTO uid_meta (id, uidvalidity, next_uid) VALUES (0, ?1, 0)",
                    params![uidvalidity as i64],
                )
                .map_err(Error::DbError)?;
                (uidvalidity, 0)
            }
        };

        Ok(DbBackend {
            path: path.to_path_buf(),
            conn: Some(conn),
            uidvalidity,
            next_uid,
        })
    }

    fn conn(&self) -> &Connection {
        self.conn.as_ref().expect("db handle reopened lazily by UidStore::touch")
    }

    pub fn uidvalidity(&self) -> u64 {
        self.uidvalidity
    }

    pub fn next_uid(&self) -> u32 {
        self.next_uid
    }

    pub fn obtain_uid(&mut self) -> Result<u32> {
        self.reopen_if_closed()?;
        self.next_uid += 1;
        self.conn()
            .execute(
                "UPDATE uid_meta SET next_uid = ?1 WHERE id = 0",
                params![self.next_uid],
            )
            .map_err(Error::DbError)?;
        Ok(self.next_uid)
    }

    pub fn insert(&mut self, stem: &str, uid: u32) -> Result<()> {
        self.reopen_if_closed()?;
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO uid_map (stem, uid) VALUES (?1, ?2)",
                params![stem, uid],
            )
            .map_err(Error::DbError)?;
        Ok(())
    }

    pub fn lookup(&self, stem: &str) -> Result<Option<u32>> {
        self.conn()
            .query_row("SELECT uid FROM uid_map WHERE stem = ?1", params![stem], |row| row.get::<_, i64>(0))
            .optional()
            .map(|opt| opt.map(|uid| uid as u32))
            .map_err(Error::DbError)
    }

    pub fn mark_seen(&mut self, stem: &str) -> Result<()> {
        self.reopen_if_closed()?;
        self.conn()
            .execute("INSERT OR REPLACE INTO uid_map_seen (stem) VALUES (?1)", params![stem])
            .map_err(Error::DbError)?;
        Ok(())
    }

    pub fn remove(&mut self, stem: &str) -> Result<()> {
        self.reopen_if_closed()?;
        self.conn()
            .execute("DELETE FROM uid_map WHERE stem = ?1", params![stem])
            .map_err(Error::DbError)?;
        Ok(())
    }

    /// Deletes every `uid_map` row not present in `uid_map_seen`, then
    /// clears the seen set for the next pass.
    pub fn garbage_collect(&mut self) -> Result<()> {
        self.reopen_if_closed()?;
        let conn = self.conn();
        conn.execute(
            "DELETE FROM uid_map WHERE stem NOT IN (SELECT stem FROM uid_map_seen)",
            [],
        )
        .map_err(Error::DbError)?;
        conn.execute("DELETE FROM uid_map_seen", []).map_err(Error::DbError)?;
        Ok(())
    }

    /// The DB handle is closed when the deferred-unlock timer fires
    /// (spec.md §4.3); it is lazily reopened on the next mutation.
    pub fn close_if_idle(&mut self) {
        self.conn = None;
    }

    fn reopen_if_closed(&mut self) -> Result<()> {
        if self.conn.is_none() {
            let conn = Connection::open(&self.path).map_err(|e| Error::OpenDbError(e, self.path.clone()))?;
            self.conn = Some(conn);
        }
        Ok(())
    }
}

fn now_secs() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(Error::ClockError)?
        .as_secs())
}
