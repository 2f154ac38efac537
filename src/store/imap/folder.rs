//! Module dedicated to IMAP folder managers.
//!
//! UIDs are authoritative from the server. Deletions only set the
//! `\Deleted` flag; physical removal happens when the session closes
//! with expunge enabled.

use std::collections::HashMap;

use async_trait::async_trait;
use imap_proto::UidSetMember;
use log::{debug, warn};

use crate::{
    error::{Error, Prefix, Result, ResultExt},
    flag::{Flag, Flags},
    folder::Mailfolder,
    store::{FolderManager, MessageInfo},
};

use super::ImapSession;

pub struct ImapFolder {
    imappath: String,
    session: ImapSession,
    expunge: bool,
    messages: HashMap<u32, MessageInfo>,
    folder_exists: bool,
    dryrun: bool,
    closed: bool,
    prefix: Prefix,
}

impl ImapFolder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        folder: &Mailfolder,
        imappath: String,
        session: ImapSession,
        expunge: bool,
        store_name: &str,
        folder_exists: bool,
        dryrun: bool,
    ) -> Self {
        let prefix = Prefix::new(format!("store: {store_name}, imapfolder: {folder}"));

        Self {
            imappath,
            session,
            expunge,
            messages: HashMap::new(),
            folder_exists,
            dryrun,
            closed: false,
            prefix,
        }
    }
}

#[async_trait]
impl FolderManager for ImapFolder {
    async fn update_message_list(&mut self) -> Result<()> {
        self.messages.clear();

        if self.dryrun && !self.folder_exists {
            return Ok(());
        }

        let fetches = self
            .session
            .uid_fetch("1:*", "(UID FLAGS)")
            .prefix(&self.prefix)?;

        for fetch in fetches.iter() {
            let uid = fetch.uid.ok_or_else(|| {
                self.prefix
                    .wrap(Error::Protocol("missing UID in FETCH response".into()))
            })?;
            let flags = Flags::from(fetch.flags());
            self.messages.insert(
                uid,
                MessageInfo {
                    uid,
                    flags,
                    ignored: false,
                },
            );
        }

        Ok(())
    }

    fn has_uid(&self, uid: u32) -> bool {
        self.messages.contains_key(&uid)
    }

    fn is_ignored(&self, uid: u32) -> bool {
        self.messages
            .get(&uid)
            .map(|m| m.ignored)
            .unwrap_or_default()
    }

    fn flags(&self, uid: u32) -> Result<Flags> {
        self.messages
            .get(&uid)
            .map(|m| m.flags.clone())
            .ok_or_else(|| self.prefix.wrap(Error::MessageNotFound(uid)))
    }

    async fn set_flags(&mut self, uid: u32, flags: &Flags) -> Result<()> {
        if !self.messages.contains_key(&uid) {
            return Err(self.prefix.wrap(Error::MessageNotFound(uid)));
        }

        let query = format!("FLAGS ({})", flags.to_imap_query());
        self.session
            .uid_store(uid.to_string(), query)
            .prefix(&self.prefix)?;

        if let Some(entry) = self.messages.get_mut(&uid) {
            entry.flags = flags.clone();
        }

        Ok(())
    }

    async fn read_message(&mut self, uid: u32) -> Result<Vec<u8>> {
        let fetches = self
            .session
            .uid_fetch(uid.to_string(), "BODY[]")
            .prefix(&self.prefix)?;

        let fetch = fetches
            .iter()
            .next()
            .ok_or_else(|| self.prefix.wrap(Error::MessageNotFound(uid)))?;
        let body = fetch.body().ok_or_else(|| {
            self.prefix
                .wrap(Error::Protocol("missing BODY[] in FETCH response".into()))
        })?;

        Ok(body.to_vec())
    }

    async fn add_message(&mut self, _uid_hint: u32, flags: &Flags, body: &[u8]) -> Result<u32> {
        let appended = self
            .session
            .append(&self.imappath, body)
            .flags(flags.to_imap_vec())
            .finish()
            .prefix(&self.prefix)?;

        let uid = match appended.uids {
            Some(mut uids) if uids.len() == 1 => match uids.remove(0) {
                UidSetMember::Uid(uid) => uid,
                UidSetMember::UidRange(mut range) => range.next().ok_or_else(|| {
                    self.prefix
                        .wrap(Error::Protocol("empty uid range in APPENDUID response".into()))
                })?,
            },
            _ => {
                return Err(self.prefix.wrap(Error::Protocol(
                    "not enough fields in APPENDUID response".into(),
                )))
            }
        };
        debug!("appended message uid: {uid}");

        self.messages.insert(
            uid,
            MessageInfo {
                uid,
                flags: flags.clone(),
                ignored: false,
            },
        );

        Ok(uid)
    }

    async fn delete_message(&mut self, uid: u32) -> Result<()> {
        if !self.has_uid(uid) {
            return Err(self.prefix.wrap(Error::MessageNotFound(uid)));
        }

        // The message is expunged on folder close when the session
        // closes with expunge enabled.
        self.set_flags(uid, &Flags::from_iter([Flag::Deleted]))
            .await?;
        self.messages.remove(&uid);

        Ok(())
    }

    async fn update(&mut self, srcuid: u32) -> Result<u32> {
        Ok(srcuid)
    }

    fn messages(&self) -> Vec<MessageInfo> {
        let mut messages: Vec<MessageInfo> = self.messages.values().cloned().collect();
        messages.sort_by_key(|m| m.uid);
        messages
    }

    fn ignored_messages(&self) -> Vec<u32> {
        self.messages
            .values()
            .filter(|m| m.ignored)
            .map(|m| m.uid)
            .collect()
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if !(self.dryrun && !self.folder_exists) {
            let result = if self.expunge {
                self.session.close()
            } else {
                self.session.run_command_and_check_ok("UNSELECT")
            };
            if let Err(err) = result {
                warn!("cannot close imap folder {}: {err}", self.imappath);
            }
        }

        if let Err(err) = self.session.logout() {
            debug!("cannot logout from imap session: {err}");
        }

        Ok(())
    }
}

impl Drop for ImapFolder {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.session.logout();
        }
    }
}
