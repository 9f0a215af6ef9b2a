//! C7: message operations. Fetch, append, flag, trash, and expunge, each
//! a single filesystem attempt; the retry-on-vanish loop that wraps them
//! lives in [`crate::store`], which has the context (message list,
//! UID store) needed to decide whether a rescan changes the answer.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use log::{info, trace};

use crate::config::{StoreConfig, UidBackend};
use crate::error::{Error, Result};
use crate::filename::{self, ParsedName};
use crate::flag::FlagSet;
use crate::ids;
use crate::message::Message;
use crate::uidstore::UidStore;
use crate::validate::{self, CUR, NEW, TMP};

pub fn message_parent(folder: &Path, recent: bool) -> PathBuf {
    folder.join(if recent { NEW } else { CUR })
}

pub fn message_path(folder: &Path, message: &Message) -> PathBuf {
    message_parent(folder, message.status.recent).join(&message.filename)
}

/// Reads a message's full body and fills in `date`/`flags` if they
/// haven't been loaded yet (spec.md §4.6 "Fetch").
pub fn fetch(folder: &Path, config: &StoreConfig, message: &mut Message) -> Result<Vec<u8>> {
    let path = message_path(folder, message);
    let metadata = fs::metadata(&path).map_err(|e| open_error(e, &path, message))?;
    let mut file = File::open(&path).map_err(|e| open_error(e, &path, message))?;

    let size = metadata.len() as usize;
    let mut buf = Vec::with_capacity(size);
    file.read_to_end(&mut buf).map_err(|e| Error::ReadMessageError(e, path.clone()))?;
    if buf.len() < size {
        return Err(Error::ShortReadError(path));
    }

    if message.date.is_none() {
        let mtime = metadata.modified().ok();
        message.date = mtime.and_then(|m| m.duration_since(UNIX_EPOCH).ok()).map(|d| d.as_secs() as i64);
    }

    if !message.status.flags_loaded {
        let parsed = filename::parse(&message.filename, config.info_delimiter);
        message.flags = parsed.flags;
        message.status.flags_loaded = true;
    }

    Ok(buf)
}

/// Generates a fresh delivery base name, writes `body` into `tmp/`, then
/// atomically renames into `new/` or `cur/` (spec.md §4.6 "Append").
/// `cur/` is chosen iff the `Seen` flag is set — a documented concession
/// to client interoperability, not Maildir-conforming.
#[allow(clippy::too_many_arguments)]
pub fn store_msg(
    folder: &Path,
    config: &StoreConfig,
    uidstore: &mut UidStore,
    body: &[u8],
    flags: FlagSet,
    to_trash: bool,
    date: Option<i64>,
    use_fsync: bool,
) -> Result<Message> {
    let unique = ids::generate_unique_name()?;

    let mut uid = Message::UNASSIGNED;
    let mut basename = unique.clone();
    if !to_trash {
        uid = uidstore.obtain_uid()?;
        if config.uid_backend() == UidBackend::FilenameEmbedded {
            basename = filename::inject_uid(&unique, uid);
        }
    }

    let info = filename::info_suffix(config.info_delimiter, flags);
    let full_name = format!("{basename}{info}");

    let tmp_path = folder.join(TMP).join(&full_name);
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(&tmp_path)
        .or_else(|e| retry_after_creating_trash(folder, e, &tmp_path))
        .map_err(|e| Error::WriteMessageError(e, tmp_path.clone()))?;

    let write_result = (|| -> io::Result<()> {
        file.write_all(body)?;
        if use_fsync {
            file.sync_all()?;
        }
        Ok(())
    })();

    if let Err(e) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(Error::WriteMessageError(e, tmp_path));
    }
    drop(file);

    if !to_trash && config.uid_backend() == UidBackend::HashDb {
        let stem = filename::stem_up_to_info(&full_name, config.info_delimiter);
        uidstore.insert_mapping(stem, uid)?;
    }

    let recent = !flags.contains(crate::flag::Flag::Seen);
    let dest_dir = message_parent(folder, recent);
    let dest_path = dest_dir.join(&full_name);

    fs::rename(&tmp_path, &dest_path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        Error::RenameError(tmp_path.clone(), dest_path.clone(), e)
    })?;

    if let Some(secs) = date {
        if secs != 0 {
            set_times(&dest_path, secs);
        }
    }

    trace!("stored message {full_name} in {}", dest_dir.display());

    let mut message = Message::new(full_name, recent);
    message.uid = uid;
    message.flags = flags;
    message.status.flags_loaded = true;
    message.size = body.len() as u64;
    message.date = date;
    Ok(message)
}

fn retry_after_creating_trash(folder: &Path, err: io::Error, tmp_path: &Path) -> io::Result<File> {
    if err.kind() != io::ErrorKind::NotFound {
        return Err(err);
    }
    // Only meaningful when `folder` is the trash and its tmp/ doesn't
    // exist yet; validate-with-create it and retry exactly once.
    validate::validate(folder, true).map_err(|_| err)?;
    OpenOptions::new().write(true).create_new(true).mode(0o600).open(tmp_path)
}

fn set_times(path: &Path, secs: i64) {
    let when = UNIX_EPOCH + std::time::Duration::from_secs(secs.max(0) as u64);
    if let Ok(file) = OpenOptions::new().write(true).open(path) {
        let _ = file.set_modified(when);
    }
}

/// Renames the message's file to reflect `add`/`del`, in sorted flag
/// order; a no-op (no rename) when nothing actually changes (spec.md §8
/// idempotence property).
pub fn set_flags(folder: &Path, config: &StoreConfig, message: &mut Message, add: FlagSet, del: FlagSet) -> Result<()> {
    let next = message.flags.union(add).difference(del);
    if next == message.flags {
        return Ok(());
    }

    let parsed: ParsedName = filename::parse(&message.filename, config.info_delimiter);
    let prefix = &message.filename[..message.filename.len() - trailing_info_len(&message.filename, &parsed, config.info_delimiter)];
    let new_filename = format!("{prefix}{}", filename::info_suffix(config.info_delimiter, next));

    let old_path = message_parent(folder, message.status.recent).join(&message.filename);
    let new_path = message_parent(folder, false).join(&new_filename);

    fs::rename(&old_path, &new_path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound && !old_path.exists() {
            Error::MessageGoneError(message.filename.clone())
        } else {
            Error::RenameError(old_path, new_path, e)
        }
    })?;

    message.filename = new_filename;
    message.flags = next;
    message.status.flags_loaded = true;
    message.status.recent = false;
    Ok(())
}

fn trailing_info_len(filename: &str, parsed: &ParsedName, delim: char) -> usize {
    if parsed.has_info {
        filename.len() - filename.rfind(delim).unwrap_or(filename.len())
    } else {
        0
    }
}

/// Moves the message into the trash folder's `cur/` or `new/` (mirroring
/// its current recency), retrying trash creation once on `ENOENT`
/// (spec.md §4.6 "Trash").
pub fn trash(folder: &Path, trash_folder: &Path, message: &Message) -> Result<()> {
    let src = message_path(folder, message);
    let dest_dir = message_parent(trash_folder, message.status.recent);
    let dest = dest_dir.join(&message.filename);

    match fs::rename(&src, &dest) {
        Ok(()) => {
            info!("trashed message {}", message.filename);
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound && !src.exists() => {
            Err(Error::MessageGoneError(message.filename.clone()))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            validate::validate(trash_folder, true)?;
            fs::rename(&src, &dest).map_err(|e| Error::RenameError(src, dest, e))?;
            Ok(())
        }
        Err(e) => Err(Error::RenameError(src, dest, e)),
    }
}

fn io_to_error(e: io::Error, path: &Path, ctor: fn(io::Error, PathBuf) -> Error) -> Error {
    ctor(e, path.to_path_buf())
}

/// `ENOENT` opening a message file means it vanished out from under us
/// (raced trash/expunge); surfaced as [`Error::MessageGoneError`] so the
/// caller's retry-on-vanish loop can rescan instead of reporting a bogus
/// I/O failure for a message that no longer exists.
fn open_error(e: io::Error, path: &Path, message: &Message) -> Error {
    if e.kind() == io::ErrorKind::NotFound {
        Error::MessageGoneError(message.filename.clone())
    } else {
        io_to_error(e, path, Error::OpenMessageError)
    }
}

/// Removes a message's file; `ENOENT` is reported distinctly so the
/// caller's retry-on-vanish loop can decide whether to treat it as
/// already-expunged.
pub fn unlink(folder: &Path, message: &Message) -> Result<()> {
    let path = message_path(folder, message);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::MessageGoneError(message.filename.clone())),
        Err(e) => Err(Error::RemoveMessageError(e, path)),
    }
}

/// Unlinks the UID-validity artifacts and removes `tmp`, `new`, `cur` in
/// that order (`cur` last, since it is the presence marker — an
/// interrupted deletion can always be resumed) (spec.md §4.6 "Delete
/// box").
pub fn delete_box(folder: &Path) -> Result<()> {
    validate::sweep_tmp(&folder.join(TMP))?;

    let _ = fs::remove_file(folder.join(".uidvalidity"));
    let _ = fs::remove_file(folder.join(".isyncuidmap.db"));

    for dir in [TMP, NEW, CUR] {
        let path = folder.join(dir);
        match fs::remove_dir(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::ReadDirError(e, path)),
        }
    }
    info!("deleted folder {}", folder.display());
    Ok(())
}

/// Attempts the outer directory removal, tolerating `NotFound` and
/// `DirectoryNotEmpty` (intentionally preserves user subfolders).
pub fn finish_delete_box(folder: &Path) -> Result<()> {
    match fs::remove_dir(folder) {
        Ok(()) => Ok(()),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc_enotempty()) => Ok(()),
        Err(e) => Err(Error::ReadDirError(e, folder.to_path_buf())),
    }
}

#[cfg(unix)]
fn libc_enotempty() -> i32 {
    39 // ENOTEMPTY on Linux; tolerated rather than linked against libc for one constant.
}
#[cfg(not(unix))]
fn libc_enotempty() -> i32 {
    -1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uidstore::UidStore;
    use crate::validate;
    use tempfile::tempdir;

    fn config() -> StoreConfig {
        let mut c = StoreConfig::new("t", "/unused");
        c.info_delimiter = ':';
        c
    }

    #[test]
    fn store_then_fetch_round_trips_body_and_flags() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("Foo");
        validate::validate(&folder, true).unwrap();
        let config = config();
        let mut uidstore = UidStore::open(&folder, config.uid_backend(), true).unwrap();

        let flags: FlagSet = [crate::flag::Flag::Seen].into_iter().collect();
        let mut message = store_msg(&folder, &config, &mut uidstore, b"hello\n", flags, false, None, false).unwrap();
        assert_eq!(message.uid, 1);
        assert!(!message.status.recent);

        let body = fetch(&folder, &config, &mut message).unwrap();
        assert_eq!(body, b"hello\n");
        assert!(message.flags.contains(crate::flag::Flag::Seen));
    }

    #[test]
    fn unseen_message_lands_in_new() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("Foo");
        validate::validate(&folder, true).unwrap();
        let config = config();
        let mut uidstore = UidStore::open(&folder, config.uid_backend(), true).unwrap();

        let message = store_msg(&folder, &config, &mut uidstore, b"hi", FlagSet::EMPTY, false, None, false).unwrap();
        assert!(message.status.recent);
        assert!(message_path(&folder, &message).starts_with(folder.join(NEW)));
    }

    #[test]
    fn set_flags_is_idempotent_on_no_change() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("Foo");
        validate::validate(&folder, true).unwrap();
        let config = config();
        let mut uidstore = UidStore::open(&folder, config.uid_backend(), true).unwrap();
        let mut message = store_msg(&folder, &config, &mut uidstore, b"hi", FlagSet::EMPTY, false, None, false).unwrap();

        let before = message.filename.clone();
        set_flags(&folder, &config, &mut message, FlagSet::EMPTY, FlagSet::EMPTY).unwrap();
        assert_eq!(message.filename, before);
    }

    #[test]
    fn set_flags_renames_into_sorted_order() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("Foo");
        validate::validate(&folder, true).unwrap();
        let config = config();
        let mut uidstore = UidStore::open(&folder, config.uid_backend(), true).unwrap();
        let seen: FlagSet = [crate::flag::Flag::Seen].into_iter().collect();
        let mut message = store_msg(&folder, &config, &mut uidstore, b"hi", seen, false, None, false).unwrap();

        let flagged: FlagSet = [crate::flag::Flag::Flagged].into_iter().collect();
        set_flags(&folder, &config, &mut message, flagged, seen).unwrap();
        assert!(message.filename.ends_with(":2,F"));
        assert!(message_path(&folder, &message).exists());
    }

    #[test]
    fn delete_box_removes_cur_last() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("Foo");
        validate::validate(&folder, true).unwrap();
        delete_box(&folder).unwrap();
        assert!(!folder.join(TMP).exists());
        assert!(!folder.join(NEW).exists());
        assert!(!folder.join(CUR).exists());
        finish_delete_box(&folder).unwrap();
        assert!(!folder.exists());
    }
}
