use crate::flag::FlagSet;

/// A 12-byte sync-tag written into message headers by the sync engine to
/// match messages across stores before UIDs are known.
pub type Tuid = [u8; 12];

/// Status bits tracked alongside a message's flags (spec.md §3). Kept as
/// a plain struct rather than a bitset: it is process-local bookkeeping,
/// never persisted to disk or compared across processes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MessageStatus {
    /// Lives in `new/`, not `cur/`.
    pub recent: bool,
    /// No longer present on disk; retained in the list only until the
    /// caller observes it.
    pub dead: bool,
    /// Flags have been loaded from the filename/DB for this message.
    pub flags_loaded: bool,
}

/// One live message in the currently selected folder (spec.md §3
/// "Message"). UIDs are unique within `(store, uidvalidity)` and
/// non-zero; zero is the "unassigned" sentinel used only during a scan.
#[derive(Clone, Debug)]
pub struct Message {
    pub uid: u32,
    pub filename: String,
    pub size: u64,
    pub flags: FlagSet,
    pub status: MessageStatus,
    pub tuid: Option<Tuid>,
    pub date: Option<i64>,
}

impl Message {
    pub const UNASSIGNED: u32 = 0;

    pub fn new(filename: String, recent: bool) -> Self {
        Message {
            uid: Self::UNASSIGNED,
            filename,
            size: 0,
            flags: FlagSet::EMPTY,
            status: MessageStatus {
                recent,
                dead: false,
                flags_loaded: false,
            },
            tuid: None,
            date: None,
        }
    }

    pub fn is_unassigned(&self) -> bool {
        self.uid == Self::UNASSIGNED
    }
}
