//! Rust library for stateful, bidirectional synchronization between
//! two mail stores (IMAP and/or Maildir).
//!
//! Every folder keeps a persistent UID map (the syncstatus) recording
//! the last successfully synchronized state, so each pass only has to
//! diff the current listings against it to find additions, deletions
//! and flag changes on either side.

pub mod config;
pub mod error;
pub mod flag;
pub mod folder;
pub mod pattern;
pub mod store;
pub mod sync;

#[doc(inline)]
pub use config::{Config, DeleteMode, StoreConfig, StoreType, SyncgroupConfig, UidMapping};
#[doc(inline)]
pub use error::{Error, Prefix, Result};
#[doc(inline)]
pub use flag::{Flag, Flags};
#[doc(inline)]
pub use folder::{merge_folders, Mailfolder, INBOX};
#[doc(inline)]
pub use store::{FolderManager, MessageInfo, Store};
#[doc(inline)]
pub use sync::{
    status::{StoreSide, SyncStatus},
    Syncgroup,
};
