use std::path::PathBuf;

use thiserror::Error;

/// Crate-local error type.
///
/// Every variant carries enough context (a path, an id, an underlying
/// error) to be logged usefully by a caller; [`Error::status`] maps each
/// one onto the five-way outcome contract a store driver must report.
#[derive(Debug, Error)]
pub enum Error {
    #[error("folder {0} has no cur/new/tmp and cannot be created (subfolders unset)")]
    SubfoldersUnsetError(String),
    #[error("folder {0} does not exist")]
    FolderMissingError(String),
    #[error("cannot create folder {1}")]
    CreateFolderError(#[source] std::io::Error, PathBuf),
    #[error("invalid folder name {0}: dot is reserved in Maildir++ mode")]
    InvalidFolderNameError(String),
    #[error("subfolders are unset for this store")]
    SubfoldersUnsetGlobalError,

    #[error("cannot read uidvalidity file {1}")]
    ReadUidValidityError(#[source] std::io::Error, PathBuf),
    #[error("cannot write uidvalidity file {1}")]
    WriteUidValidityError(#[source] std::io::Error, PathBuf),
    #[error("uidvalidity file {0} is corrupt")]
    CorruptUidValidityError(PathBuf),
    #[error("cannot lock uidvalidity file {1}")]
    LockError(#[source] std::io::Error, PathBuf),
    #[error("cannot open uid map database {1}")]
    OpenDbError(#[source] rusqlite::Error, PathBuf),
    #[error("uid map database query failed")]
    DbError(#[source] rusqlite::Error),

    #[error("cannot read directory {1}")]
    ReadDirError(#[source] std::io::Error, PathBuf),
    #[error("cannot stat {1}")]
    StatError(#[source] std::io::Error, PathBuf),
    #[error("two messages in one folder share uid {0}")]
    DuplicateUidError(u32),
    #[error("system clock error")]
    ClockError(#[source] std::time::SystemTimeError),

    #[error("cannot open message file {1}")]
    OpenMessageError(#[source] std::io::Error, PathBuf),
    #[error("cannot read message file {1}")]
    ReadMessageError(#[source] std::io::Error, PathBuf),
    #[error("short read on message file {0}")]
    ShortReadError(PathBuf),
    #[error("cannot write message file {1}")]
    WriteMessageError(#[source] std::io::Error, PathBuf),
    #[error("cannot rename {0} to {1}")]
    RenameError(PathBuf, PathBuf, #[source] std::io::Error),
    #[error("cannot delete message file {1}")]
    RemoveMessageError(#[source] std::io::Error, PathBuf),
    #[error("message {0} is gone")]
    MessageGoneError(String),
    #[error("store has no trash folder configured")]
    NoTrashError,

    #[error("store root {0} is not usable")]
    BadRootError(PathBuf),
    #[error("no folder is currently selected")]
    NoBoxSelectedError,
    #[error("find_new_msgs is not reachable on this driver: uids are committed in store_msg")]
    ContractViolationError,
    #[error("operation canceled")]
    CanceledError,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The five-way outcome contract the sync engine expects from every
/// store-driver operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    Ok,
    MsgBad,
    BoxBad,
    StoreBad,
    Canceled,
}

/// `fail_state(conf)` outcome: whether a bad configuration is worth
/// retrying.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailState {
    Temp,
    Wait,
    Final,
}

impl Error {
    /// Maps this error onto the driver contract's status code, per
    /// spec.md §7.
    pub fn status(&self) -> Status {
        use Error::*;
        match self {
            MessageGoneError(_) | ShortReadError(_) => Status::MsgBad,
            CanceledError => Status::Canceled,
            BadRootError(_) | ContractViolationError => Status::StoreBad,
            _ => Status::BoxBad,
        }
    }
}
