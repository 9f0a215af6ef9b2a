//! C8: the driver facade. A synchronous stand-in for the callback-based
//! `driver_t` table (`parse_store`/`alloc_store`/`open_box`/... in
//! `driver.h`): this module owns the currently-selected folder's message
//! list and UID store, and exposes one method per driver entry point.
//! There is no IO outstanding across calls — every method here runs to
//! completion before returning, so the "callback" is just the return
//! value.

use std::collections::HashSet;
use std::path::PathBuf;

use log::{debug, info};

use crate::config::{StoreConfig, UidBackend};
use crate::error::{Error, FailState, Result};
use crate::filename;
use crate::flag::{Flag, FlagSet};
use crate::list::{self, ListScope};
use crate::message::Message;
use crate::ops;
use crate::path;
use crate::scan::{self, ScanParams};
use crate::uidstore::UidStore;
use crate::validate::{self, Freshness};

/// Mirrors the `OPEN_*` bits a sync engine passes to `prepare_load_box`
/// (`driver.h`): which message attributes and operations the upcoming
/// pass needs. Spelled out as plain `u16` constants rather than pulling
/// in a bitflags crate for eight bits nothing else in this driver needs.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OpenFlags(u16);

impl OpenFlags {
    pub const EMPTY: OpenFlags = OpenFlags(0);
    pub const OLD: OpenFlags = OpenFlags(1 << 0);
    pub const NEW: OpenFlags = OpenFlags(1 << 1);
    pub const FLAGS: OpenFlags = OpenFlags(1 << 2);
    pub const SIZE: OpenFlags = OpenFlags(1 << 3);
    pub const EXPUNGE: OpenFlags = OpenFlags(1 << 5);
    pub const SETFLAGS: OpenFlags = OpenFlags(1 << 6);
    pub const APPEND: OpenFlags = OpenFlags(1 << 7);
    pub const FIND: OpenFlags = OpenFlags(1 << 8);

    pub fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | other.0)
    }
}

impl std::ops::BitOr for OpenFlags {
    type Output = OpenFlags;
    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        self.union(rhs)
    }
}

/// A store bound to a configuration, with at most one folder selected at
/// a time (spec.md §4.1 — no concurrent folder access).
pub struct Store {
    config: StoreConfig,
    current: Option<PathBuf>,
    uidstore: Option<UidStore>,
    messages: Vec<Message>,
    opts: OpenFlags,
    last_freshness: Freshness,
    canceled: bool,
}

impl Store {
    /// `alloc_store`: cheap, infallible construction from a parsed
    /// configuration.
    pub fn alloc(config: StoreConfig) -> Self {
        Store {
            config,
            current: None,
            uidstore: None,
            messages: Vec::new(),
            opts: OpenFlags::EMPTY,
            last_freshness: Freshness::default(),
            canceled: false,
        }
    }

    /// `connect_store`: a no-op for a local filesystem driver, kept for
    /// symmetry with the driver contract (spec.md §6).
    pub fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    /// `free_store`: nothing is held open between folder selections, so
    /// this just drops the in-memory state.
    pub fn free(self) {}

    /// `cancel_store`: marks the store canceled so further calls report
    /// [`Error::CanceledError`] instead of silently proceeding.
    pub fn cancel(&mut self) {
        self.canceled = true;
        self.current = None;
        self.uidstore = None;
        self.messages.clear();
    }

    fn check_canceled(&self) -> Result<()> {
        if self.canceled {
            return Err(Error::CanceledError);
        }
        Ok(())
    }

    /// `list_store`.
    pub fn list(&self, scope: ListScope) -> Result<Vec<String>> {
        self.check_canceled()?;
        list::list(&self.config, scope)
    }

    /// `select_box`: resolves the logical name to an on-disk path without
    /// touching it yet.
    pub fn select_box(&mut self, name: &str) -> Result<()> {
        self.check_canceled()?;
        let resolved = path::resolve(&self.config, name)?;
        self.current = Some(resolved);
        self.uidstore = None;
        self.messages.clear();
        Ok(())
    }

    fn selected_path(&self) -> Result<PathBuf> {
        self.current.clone().ok_or(Error::NoBoxSelectedError)
    }

    /// `create_box`.
    pub fn create_box(&mut self) -> Result<()> {
        self.check_canceled()?;
        let path = self.selected_path()?;
        validate::validate(&path, true)?;
        info!("created folder {}", path.display());
        Ok(())
    }

    /// `open_box`: validates the folder exists (without creating) and
    /// opens its UID store. The freshness report is held until
    /// `load_box` so the scanner knows which directories were just
    /// created and can skip the revalidation sleep for them.
    pub fn open_box(&mut self) -> Result<()> {
        self.check_canceled()?;
        let path = self.selected_path()?;
        self.last_freshness = validate::validate(&path, false)?;
        self.uidstore = Some(UidStore::open(&path, self.config.uid_backend(), true)?);
        Ok(())
    }

    /// `confirm_box_empty`.
    pub fn confirm_box_empty(&self) -> Result<bool> {
        self.check_canceled()?;
        Ok(self.messages.is_empty())
    }

    /// `delete_box`: the folder must be confirmed empty by the caller
    /// first, matching the driver contract's division of responsibility.
    pub fn delete_box(&mut self) -> Result<()> {
        self.check_canceled()?;
        let path = self.selected_path()?;
        self.uidstore = None;
        ops::delete_box(&path)
    }

    /// `finish_delete_box`.
    pub fn finish_delete_box(&mut self) -> Result<()> {
        self.check_canceled()?;
        let path = self.selected_path()?;
        ops::finish_delete_box(&path)
    }

    /// `prepare_load_box`: widens the requested operation set per the
    /// driver contract — `SETFLAGS` implies `OLD` (you need the old
    /// filename to rename it), and `EXPUNGE` implies `OLD | NEW | FLAGS`
    /// (you need every message's flags to know what to expunge).
    pub fn prepare_load(&mut self, mut opts: OpenFlags) -> Result<()> {
        self.check_canceled()?;
        if opts.contains(OpenFlags::SETFLAGS) {
            opts = opts.union(OpenFlags::OLD);
        }
        if opts.contains(OpenFlags::EXPUNGE) {
            opts = opts.union(OpenFlags::OLD).union(OpenFlags::NEW).union(OpenFlags::FLAGS);
        }
        self.opts = opts;
        Ok(())
    }

    /// `load_box`: runs the scanner with parameters derived from the
    /// widened opts and the caller's UID range.
    pub fn load_box(&mut self, minuid: u32, maxuid: u32, newuid: u32, excluded: HashSet<u32>) -> Result<()> {
        self.check_canceled()?;
        let path = self.selected_path()?;
        let opts = self.opts;
        let freshness = self.last_freshness;
        let uidstore = self.uidstore.as_mut().ok_or(Error::NoBoxSelectedError)?;

        let params = ScanParams {
            minuid,
            maxuid,
            newuid,
            excluded,
            zero_delay: false,
            want_flags: opts.contains(OpenFlags::FLAGS),
            want_size: opts.contains(OpenFlags::SIZE),
            want_tuid: opts.contains(OpenFlags::FIND),
        };

        let messages = scan::scan(&path, &self.config, uidstore, freshness, &params)?;
        debug!("loaded {} messages from {}", messages.len(), path.display());
        self.messages = messages;
        self.last_freshness = Freshness::default();
        Ok(())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    fn message_mut(&mut self, uid: u32) -> Result<&mut Message> {
        self.messages
            .iter_mut()
            .find(|m| m.uid == uid)
            .ok_or(Error::MessageGoneError(uid.to_string()))
    }

    /// Runs `op` against the message with the given UID; on
    /// [`Error::MessageGoneError`], rescans the folder once and retries
    /// exactly once more before surfacing the error (spec.md §4.6, §9 —
    /// the retry-on-vanish idiom shared by every message operation).
    fn retry_on_vanish<T>(&mut self, uid: u32, mut op: impl FnMut(&mut Store, &mut Message) -> Result<T>) -> Result<T> {
        let mut message = self.message_mut(uid)?.clone();
        match op(self, &mut message) {
            Ok(value) => {
                *self.message_mut(uid)? = message;
                return Ok(value);
            }
            Err(Error::MessageGoneError(_)) => {}
            Err(e) => return Err(e),
        }

        self.rescan()?;
        let mut message = self.message_mut(uid)?.clone();
        let value = op(self, &mut message)?;
        *self.message_mut(uid)? = message;
        Ok(value)
    }

    fn rescan(&mut self) -> Result<()> {
        let path = self.selected_path()?;
        let opts = self.opts;
        let uidstore = self.uidstore.as_mut().ok_or(Error::NoBoxSelectedError)?;
        let params = ScanParams {
            minuid: 0,
            maxuid: u32::MAX,
            newuid: u32::MAX,
            excluded: HashSet::new(),
            zero_delay: false,
            want_flags: true,
            want_size: opts.contains(OpenFlags::SIZE),
            want_tuid: opts.contains(OpenFlags::FIND),
        };
        self.messages = scan::scan(&path, &self.config, uidstore, Freshness::default(), &params)?;
        Ok(())
    }

    /// `fetch_msg`.
    pub fn fetch_msg(&mut self, uid: u32) -> Result<Vec<u8>> {
        self.check_canceled()?;
        self.retry_on_vanish(uid, |store, message| {
            let path = store.selected_path()?;
            ops::fetch(&path, &store.config, message)
        })
    }

    /// `store_msg`: appends `body` to the current mailbox or to trash.
    pub fn store_msg(&mut self, body: &[u8], flags: FlagSet, to_trash: bool, date: Option<i64>) -> Result<Message> {
        self.check_canceled()?;
        let path = if to_trash { self.trash_path()? } else { self.selected_path()? };
        let uidstore = self.uidstore.as_mut().ok_or(Error::NoBoxSelectedError)?;
        let message = ops::store_msg(&path, &self.config, uidstore, body, flags, to_trash, date, false)?;
        if !to_trash {
            self.messages.push(message.clone());
        }
        Ok(message)
    }

    fn trash_path(&self) -> Result<PathBuf> {
        let name = self.config.trash.as_deref().ok_or(Error::NoTrashError)?;
        path::resolve(&self.config, name)
    }

    /// `find_new_msgs`: unreachable on this driver. UIDs are committed
    /// synchronously inside `store_msg`, so there is never a window
    /// where a caller needs to index newly appeared messages separately
    /// (spec.md §6; see DESIGN.md for the Open Question this resolves).
    pub fn find_new_msgs(&mut self, _newuid: u32) -> Result<()> {
        Err(Error::ContractViolationError)
    }

    /// `set_msg_flags`.
    pub fn set_msg_flags(&mut self, uid: u32, add: FlagSet, del: FlagSet) -> Result<()> {
        self.check_canceled()?;
        self.retry_on_vanish(uid, move |store, message| {
            let path = store.selected_path()?;
            ops::set_flags(&path, &store.config, message, add, del)
        })
    }

    /// `trash_msg`.
    pub fn trash_msg(&mut self, uid: u32) -> Result<()> {
        self.check_canceled()?;
        let trash = self.trash_path()?;
        self.retry_on_vanish(uid, move |store, message| {
            let path = store.selected_path()?;
            ops::trash(&path, &trash, message)
        })?;
        self.messages.retain(|m| m.uid != uid);
        Ok(())
    }

    /// `close_box`: expunges every message carrying the `Deleted` flag,
    /// tolerating one that has already vanished.
    pub fn close_box(&mut self) -> Result<()> {
        self.check_canceled()?;
        let path = self.selected_path()?;
        let deleted_uids: Vec<u32> = self.messages.iter().filter(|m| m.flags.contains(Flag::Deleted)).map(|m| m.uid).collect();

        for uid in deleted_uids {
            let message = self.message_mut(uid)?.clone();
            match ops::unlink(&path, &message) {
                Ok(()) | Err(Error::MessageGoneError(_)) => {}
                Err(e) => return Err(e),
            }
            if self.config.uid_backend() == UidBackend::HashDb {
                if let Some(uidstore) = self.uidstore.as_mut() {
                    let stem = filename::stem_up_to_info(&message.filename, self.config.info_delimiter);
                    uidstore.remove_mapping(stem)?;
                }
            }
            self.messages.retain(|m| m.uid != uid);
        }
        Ok(())
    }

    /// `cancel_cmds`: nothing is ever in flight between calls, so this is
    /// a no-op beyond the cancellation flag set by [`Store::cancel`].
    pub fn cancel_cmds(&mut self) {}

    /// `commit_cmds`: every `set_msg_flags` call already wrote its rename
    /// synchronously, so there's nothing batched to flush here beyond
    /// polling the deferred-unlock timer.
    pub fn commit_cmds(&mut self) -> Result<()> {
        self.poll_timers()
    }

    /// A host event loop drives the deferred-unlock timer by calling this
    /// periodically (spec.md §5) — distinct from `commit_cmds` so a
    /// caller that never mutates flags still gets the lock released
    /// promptly.
    pub fn poll_timers(&mut self) -> Result<()> {
        if let Some(uidstore) = self.uidstore.as_mut() {
            uidstore.poll_timer()?;
        }
        Ok(())
    }

    /// `memory_usage`: always 0 — nothing is cached beyond the current
    /// folder's message list, which the driver contract doesn't count.
    pub fn memory_usage(&self) -> usize {
        0
    }

    /// `fail_state`: a misconfigured Maildir store is never worth
    /// retrying without operator intervention.
    pub fn fail_state(_config: &StoreConfig) -> FailState {
        FailState::Final
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(inbox: &std::path::Path) -> StoreConfig {
        let mut c = StoreConfig::new("t", inbox);
        c.info_delimiter = ':';
        c
    }

    #[test]
    fn create_open_load_and_append_round_trip() {
        let dir = tempdir().unwrap();
        let inbox = dir.path().join("Inbox");
        let mut store = Store::alloc(config(&inbox));

        store.select_box("INBOX").unwrap();
        store.create_box().unwrap();
        store.open_box().unwrap();
        store.load_box(0, u32::MAX, u32::MAX, HashSet::new()).unwrap();
        assert!(store.messages().is_empty());

        let message = store.store_msg(b"hello", FlagSet::EMPTY, false, None).unwrap();
        assert_eq!(message.uid, 1);
        assert_eq!(store.messages().len(), 1);
    }

    #[test]
    fn fetch_after_append_returns_body() {
        let dir = tempdir().unwrap();
        let inbox = dir.path().join("Inbox");
        let mut store = Store::alloc(config(&inbox));
        store.select_box("INBOX").unwrap();
        store.create_box().unwrap();
        store.open_box().unwrap();
        store.load_box(0, u32::MAX, u32::MAX, HashSet::new()).unwrap();

        let message = store.store_msg(b"body text", FlagSet::EMPTY, false, None).unwrap();
        let body = store.fetch_msg(message.uid).unwrap();
        assert_eq!(body, b"body text");
    }

    #[test]
    fn fetch_of_a_concurrently_removed_message_rescans_and_reports_msg_bad() {
        let dir = tempdir().unwrap();
        let inbox = dir.path().join("Inbox");
        let mut store = Store::alloc(config(&inbox));
        store.select_box("INBOX").unwrap();
        store.create_box().unwrap();
        store.open_box().unwrap();
        store.load_box(0, u32::MAX, u32::MAX, HashSet::new()).unwrap();

        let message = store.store_msg(b"vanishing", FlagSet::EMPTY, false, None).unwrap();
        std::fs::remove_file(ops::message_path(&inbox, &message)).unwrap();

        let err = store.fetch_msg(message.uid).unwrap_err();
        assert_eq!(err.status(), crate::error::Status::MsgBad);
        assert!(store.messages().iter().all(|m| m.uid != message.uid));
    }

    #[test]
    fn set_flags_on_a_concurrently_removed_message_rescans_and_reports_msg_bad() {
        let dir = tempdir().unwrap();
        let inbox = dir.path().join("Inbox");
        let mut store = Store::alloc(config(&inbox));
        store.select_box("INBOX").unwrap();
        store.create_box().unwrap();
        store.open_box().unwrap();
        store.load_box(0, u32::MAX, u32::MAX, HashSet::new()).unwrap();

        let message = store.store_msg(b"vanishing", FlagSet::EMPTY, false, None).unwrap();
        std::fs::remove_file(ops::message_path(&inbox, &message)).unwrap();

        let seen: FlagSet = [Flag::Seen].into_iter().collect();
        let err = store.set_msg_flags(message.uid, seen, FlagSet::EMPTY).unwrap_err();
        assert_eq!(err.status(), crate::error::Status::MsgBad);
        assert!(store.messages().iter().all(|m| m.uid != message.uid));
    }

    #[test]
    fn close_box_expunges_deleted_messages() {
        let dir = tempdir().unwrap();
        let inbox = dir.path().join("Inbox");
        let mut store = Store::alloc(config(&inbox));
        store.select_box("INBOX").unwrap();
        store.create_box().unwrap();
        store.open_box().unwrap();
        store.load_box(0, u32::MAX, u32::MAX, HashSet::new()).unwrap();

        let deleted: FlagSet = [Flag::Deleted].into_iter().collect();
        let message = store.store_msg(b"gone", deleted, false, None).unwrap();
        store.close_box().unwrap();
        assert!(store.messages().iter().all(|m| m.uid != message.uid));
    }

    #[test]
    fn prepare_load_widens_setflags_to_include_old() {
        let dir = tempdir().unwrap();
        let inbox = dir.path().join("Inbox");
        let mut store = Store::alloc(config(&inbox));
        store.select_box("INBOX").unwrap();
        store.create_box().unwrap();
        store.open_box().unwrap();
        store.prepare_load(OpenFlags::SETFLAGS).unwrap();
        assert!(store.opts.contains(OpenFlags::OLD));
    }

    #[test]
    fn cancel_makes_further_calls_report_canceled() {
        let dir = tempdir().unwrap();
        let inbox = dir.path().join("Inbox");
        let mut store = Store::alloc(config(&inbox));
        store.cancel();
        assert!(matches!(store.select_box("INBOX"), Err(Error::CanceledError)));
    }
}
