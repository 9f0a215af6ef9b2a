//! A Maildir storage driver: directory layout validation, stable
//! per-folder UID assignment, folder listing across three subfolder
//! naming conventions, and the message operations (fetch, append, flag,
//! trash, expunge) a bidirectional mailbox synchronizer needs from its
//! local-disk side.
//!
//! [`store::Store`] is the entry point; everything else is exposed for
//! callers that want finer-grained control (a custom event loop driving
//! [`store::Store::poll_timers`], direct use of the scanner, etc).

pub mod config;
pub mod error;
pub mod filename;
pub mod flag;
pub mod ids;
pub mod list;
pub mod message;
pub mod ops;
pub mod path;
pub mod scan;
pub mod store;
pub mod uidstore;
pub mod validate;

pub use config::{StoreConfig, SubfolderStyle, UidBackend};
pub use error::{Error, FailState, Result, Status};
pub use flag::{Flag, FlagSet};
pub use list::ListScope;
pub use message::Message;
pub use store::{OpenFlags, Store};
