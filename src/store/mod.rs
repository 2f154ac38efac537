//! Module dedicated to mail stores.
//!
//! A store is one side of a synchronization group: an IMAP account or
//! a local Maildir tree. Stores hand out transient per-folder managers
//! that expose the message-level operations the sync engine drives.

pub mod imap;
pub mod maildir;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::{config::StoreConfig, error::Result, flag::Flags, folder::Mailfolder};

/// Message metadata shared by every store kind.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageInfo {
    pub uid: u32,
    pub flags: Flags,
    pub ignored: bool,
}

/// One side of a syncgroup, alive for the process lifetime.
#[async_trait]
pub trait Store: Send + Sync {
    fn name(&self) -> &str;

    fn config(&self) -> &StoreConfig;

    /// The hierarchy separator the store renders folder names with.
    fn separator(&self) -> char;

    fn folders(&self) -> Vec<Mailfolder>;

    fn has_folder(&self, folder: &Mailfolder) -> bool;

    fn set_folder_excluded(&self, folder: &Mailfolder, excluded: bool);

    /// Re-discovers the folder list from the backing storage.
    async fn update_folder_list(&self) -> Result<()>;

    async fn create_folder(&self, folder: &Mailfolder) -> Result<()>;

    /// Opens a transient manager for one folder, creating the folder
    /// first when it does not exist yet.
    async fn folder_manager(&self, folder: &Mailfolder) -> Result<Box<dyn FolderManager + Send>>;
}

/// Message-level operations on one folder, for the duration of one
/// sync pass.
#[async_trait]
pub trait FolderManager {
    /// Rebuilds the in-memory message index from the backing storage.
    async fn update_message_list(&mut self) -> Result<()>;

    fn has_uid(&self, uid: u32) -> bool;

    fn is_ignored(&self, uid: u32) -> bool;

    fn flags(&self, uid: u32) -> Result<Flags>;

    async fn set_flags(&mut self, uid: u32, flags: &Flags) -> Result<()>;

    async fn read_message(&mut self, uid: u32) -> Result<Vec<u8>>;

    /// Stores a new message and returns the UID the folder assigned to
    /// it. `uid_hint` is the source-side UID, for stores that can make
    /// use of it.
    async fn add_message(&mut self, uid_hint: u32, flags: &Flags, body: &[u8]) -> Result<u32>;

    async fn delete_message(&mut self, uid: u32) -> Result<()>;

    /// Rebinding point called right before the syncstatus records a
    /// pair involving `srcuid`: folders that synthesized a temporary
    /// UID replace it with a permanent one here and return it; others
    /// return `srcuid` unchanged.
    async fn update(&mut self, srcuid: u32) -> Result<u32>;

    fn messages(&self) -> Vec<MessageInfo>;

    fn ignored_messages(&self) -> Vec<u32>;

    /// The current UID → flags listing, ignored entries included.
    fn listing(&self) -> BTreeMap<u32, Flags> {
        self.messages()
            .into_iter()
            .map(|m| (m.uid, m.flags))
            .collect()
    }

    async fn close(&mut self) -> Result<()>;
}
