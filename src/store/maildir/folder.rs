//! Module dedicated to Maildir folder managers.
//!
//! Message UIDs are embedded in the filenames themselves: a stem of
//! the form `<timestamp>_<seq>.<pid>.<host>,u=<uid>,f=<folderUID>`
//! followed by the usual `:2,<flags>` info suffix. The `f=` part ties
//! a filename to the folder it was assigned in, so restored or renamed
//! folders do not leak foreign UIDs.

use std::{
    collections::HashMap,
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::PathBuf,
    process,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use gethostname::gethostname;
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    error::{Error, Prefix, Result, ResultExt},
    flag::Flags,
    folder::Mailfolder,
    store::{FolderManager, MessageInfo},
};

/// Separator between the filename stem and the `2,<flags>` suffix.
const INFO_SEPARATOR: char = ':';

static UID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r",u=(\d+),f=([A-Za-z0-9]+)").unwrap());

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Subdir {
    Cur,
    New,
}

impl Subdir {
    fn as_str(&self) -> &'static str {
        match self {
            Subdir::Cur => "cur",
            Subdir::New => "new",
        }
    }
}

/// Maildir-specific message metadata.
#[derive(Clone, Debug)]
pub struct MaildirMessageInfo {
    pub info: MessageInfo,

    /// Filename without the info suffix. Cleared when the entry gets
    /// ignored due to a duplicate UID.
    pub stem: String,

    pub subdir: Option<Subdir>,

    /// Whether the UID was synthesized for a file that did not carry
    /// one. Temporary UIDs never enter the syncstatus.
    pub temporary: bool,
}

pub struct MaildirFolder {
    maildir: PathBuf,
    folder_uid: String,
    messages: HashMap<u32, MaildirMessageInfo>,
    next_temp_uid: u32,
    last_time: u64,
    last_time_seq: u32,
    folder_exists: bool,
    dryrun: bool,
    prefix: Prefix,
}

/// Splits a full filename into its stem and canonical flags.
fn split_filename(fullname: &str) -> Result<(String, Flags)> {
    let fields: Vec<&str> = fullname
        .split(INFO_SEPARATOR)
        .filter(|f| !f.is_empty())
        .collect();
    if fields.len() != 2 {
        return Err(Error::Protocol(format!(
            "wrong filename format: {fullname}"
        )));
    }

    match fields[1].strip_prefix("2,") {
        Some(flags) => Ok((fields[0].to_string(), Flags::from(flags))),
        None => Err(Error::Protocol(format!(
            "wrong filename format: {fullname}"
        ))),
    }
}

impl MaildirFolder {
    pub fn new(
        folder: &Mailfolder,
        maildir: PathBuf,
        folder_uid: String,
        store_name: &str,
        folder_exists: bool,
        dryrun: bool,
    ) -> Self {
        let prefix = Prefix::new(format!("store: {store_name}, maildirfolder: {folder}"));

        Self {
            maildir,
            folder_uid,
            messages: HashMap::new(),
            next_temp_uid: u32::MAX,
            last_time: 0,
            last_time_seq: 0,
            folder_exists,
            dryrun,
            prefix,
        }
    }

    fn take_temp_uid(&mut self) -> u32 {
        let uid = self.next_temp_uid;
        self.next_temp_uid -= 1;
        uid
    }

    fn next_free_uid(&self) -> Result<u32> {
        (0..u32::MAX)
            .find(|uid| !self.messages.contains_key(uid))
            .ok_or_else(|| self.prefix.wrap(Error::Protocol("cannot find a free uid".into())))
    }

    fn time_seq(&mut self) -> (u64, u32) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        if now == self.last_time {
            self.last_time_seq += 1;
        } else {
            self.last_time = now;
            self.last_time_seq = 0;
        }

        (now, self.last_time_seq)
    }

    fn build_stem(&mut self, uid: u32) -> String {
        let (time, seq) = self.time_seq();
        let pid = process::id();
        let hostname = gethostname()
            .into_string()
            .unwrap_or_else(|_| "localhost".into());
        format!("{time}_{seq}.{pid}.{hostname},u={uid},f={}", self.folder_uid)
    }

    fn full_filename(stem: &str, flags: &Flags) -> String {
        format!("{stem}{INFO_SEPARATOR}2,{flags}")
    }

    fn register(
        &mut self,
        uid: u32,
        flags: Flags,
        stem: String,
        subdir: Subdir,
        temporary: bool,
    ) {
        debug!("registering message uid {uid}, stem {stem:?}, temporary: {temporary}");
        self.messages.insert(
            uid,
            MaildirMessageInfo {
                info: MessageInfo {
                    uid,
                    flags,
                    ignored: false,
                },
                stem,
                subdir: Some(subdir),
                temporary,
            },
        );
    }

    /// Locates the file backing the given entry by scanning `cur/` and
    /// `new/`. More than one file with the entry's stem is an error.
    fn find_filepath(&self, entry: &MaildirMessageInfo) -> Result<Option<PathBuf>> {
        let mut found: Option<PathBuf> = None;
        let mut duplicates: Vec<String> = Vec::new();

        for subdir in [Subdir::Cur, Subdir::New] {
            let dir = self.maildir.join(subdir.as_str());
            for dirent in fs::read_dir(&dir).prefix(&self.prefix)? {
                let name = dirent
                    .prefix(&self.prefix)?
                    .file_name()
                    .to_string_lossy()
                    .into_owned();

                match split_filename(&name) {
                    Ok((stem, _)) if stem == entry.stem => {
                        if found.is_some() {
                            duplicates.push(name);
                        } else {
                            found = Some(dir.join(&name));
                        }
                    }
                    // Flag-less file sitting in new/.
                    Err(_) if subdir == Subdir::New && entry.stem == name => {
                        if found.is_none() {
                            found = Some(dir.join(&name));
                        }
                    }
                    _ => {}
                }
            }
        }

        if !duplicates.is_empty() {
            return Err(self
                .prefix
                .wrap(Error::DuplicateFilename(entry.stem.clone(), duplicates)));
        }

        Ok(found)
    }
}

#[async_trait]
impl FolderManager for MaildirFolder {
    async fn update_message_list(&mut self) -> Result<()> {
        self.messages.clear();

        if self.dryrun && !self.folder_exists {
            return Ok(());
        }

        for subdir in [Subdir::Cur, Subdir::New] {
            let dir = self.maildir.join(subdir.as_str());
            for dirent in fs::read_dir(&dir).prefix(&self.prefix)? {
                let name = dirent
                    .prefix(&self.prefix)?
                    .file_name()
                    .to_string_lossy()
                    .into_owned();

                let (stem, flags) = match split_filename(&name) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        if subdir == Subdir::New && !name.contains(INFO_SEPARATOR) {
                            // new/ legally holds flag-less filenames.
                            (name.clone(), Flags::new())
                        } else {
                            debug!(
                                "split error: {err}, ignoring message filename {}/{name}",
                                subdir.as_str()
                            );
                            continue;
                        }
                    }
                };

                let captures = UID_PATTERN.captures(&stem);
                let uid = captures.as_ref().and_then(|caps| {
                    if &caps[2] == self.folder_uid.as_str() {
                        caps[1].parse::<u32>().ok()
                    } else {
                        debug!(
                            "message folderuid {} differs from folderuid {}, assuming {stem} as new message",
                            &caps[2], self.folder_uid
                        );
                        None
                    }
                });

                match uid {
                    Some(uid) => {
                        if let Some(existing) = self.messages.get_mut(&uid) {
                            warn!(
                                "message with filename {stem:?} holds already existent uid {uid}, \
                                 setting this uid to be ignored by the sync algorithm"
                            );
                            existing.info.ignored = true;
                            existing.stem.clear();
                            existing.subdir = None;
                            continue;
                        }
                        self.register(uid, flags, stem, subdir, false);
                    }
                    None => {
                        debug!("assuming as new message: {stem}");
                        let uid = self.take_temp_uid();
                        self.register(uid, flags, stem, subdir, true);
                    }
                }
            }
        }

        Ok(())
    }

    fn has_uid(&self, uid: u32) -> bool {
        self.messages.contains_key(&uid)
    }

    fn is_ignored(&self, uid: u32) -> bool {
        self.messages
            .get(&uid)
            .map(|m| m.info.ignored)
            .unwrap_or_default()
    }

    fn flags(&self, uid: u32) -> Result<Flags> {
        self.messages
            .get(&uid)
            .map(|m| m.info.flags.clone())
            .ok_or_else(|| self.prefix.wrap(Error::MessageNotFound(uid)))
    }

    async fn set_flags(&mut self, uid: u32, flags: &Flags) -> Result<()> {
        let (path, stem, subdir) = {
            let entry = self
                .messages
                .get(&uid)
                .ok_or_else(|| self.prefix.wrap(Error::MessageNotFound(uid)))?;
            let subdir = entry
                .subdir
                .ok_or_else(|| self.prefix.wrap(Error::MessageNotFound(uid)))?;
            let path = self
                .find_filepath(entry)?
                .ok_or_else(|| self.prefix.wrap(Error::MessageNotFound(uid)))?;
            (path, entry.stem.clone(), subdir)
        };

        let dst = self
            .maildir
            .join(subdir.as_str())
            .join(Self::full_filename(&stem, flags));
        fs::rename(&path, &dst).prefix(&self.prefix)?;

        if let Some(entry) = self.messages.get_mut(&uid) {
            entry.info.flags = flags.clone();
        }

        Ok(())
    }

    async fn read_message(&mut self, uid: u32) -> Result<Vec<u8>> {
        let entry = self
            .messages
            .get(&uid)
            .ok_or_else(|| self.prefix.wrap(Error::MessageNotFound(uid)))?;
        let path = self
            .find_filepath(entry)?
            .ok_or_else(|| self.prefix.wrap(Error::MessageNotFound(uid)))?;

        fs::read(&path).prefix(&self.prefix)
    }

    async fn add_message(&mut self, _uid_hint: u32, flags: &Flags, body: &[u8]) -> Result<u32> {
        let uid = self.next_free_uid()?;
        let stem = self.build_stem(uid);
        let fullname = Self::full_filename(&stem, flags);

        let tmppath = self.maildir.join("tmp").join(&fullname);
        let curpath = self.maildir.join("cur").join(&fullname);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmppath)
            .prefix(&self.prefix)?;
        file.write_all(body).prefix(&self.prefix)?;
        file.sync_all().prefix(&self.prefix)?;
        fs::rename(&tmppath, &curpath).prefix(&self.prefix)?;

        self.register(uid, flags.clone(), stem, Subdir::Cur, false);

        Ok(uid)
    }

    async fn delete_message(&mut self, uid: u32) -> Result<()> {
        let path = {
            let entry = self
                .messages
                .get(&uid)
                .ok_or_else(|| self.prefix.wrap(Error::MessageNotFound(uid)))?;
            self.find_filepath(entry)?
        };

        if let Some(path) = path {
            if let Err(err) = fs::remove_file(&path) {
                if err.kind() != ErrorKind::NotFound {
                    return Err(self.prefix.wrap(err.into()));
                }
                debug!("remove failed: {err}, ignoring");
            }
        }

        self.messages.remove(&uid);

        Ok(())
    }

    async fn update(&mut self, srcuid: u32) -> Result<u32> {
        let (path, flags) = {
            let entry = self
                .messages
                .get(&srcuid)
                .ok_or_else(|| self.prefix.wrap(Error::MessageNotFound(srcuid)))?;
            if !entry.temporary {
                return Ok(srcuid);
            }
            let path = self
                .find_filepath(entry)?
                .ok_or_else(|| self.prefix.wrap(Error::MessageNotFound(srcuid)))?;
            (path, entry.info.flags.clone())
        };

        let uid = self.next_free_uid()?;
        let stem = self.build_stem(uid);
        let fullname = Self::full_filename(&stem, &flags);

        // Files carrying flags live in cur/, wherever they came from.
        let dst = self.maildir.join("cur").join(&fullname);
        fs::rename(&path, &dst).prefix(&self.prefix)?;

        self.messages.remove(&srcuid);
        self.register(uid, flags, stem, Subdir::Cur, false);

        Ok(uid)
    }

    fn messages(&self) -> Vec<MessageInfo> {
        let mut messages: Vec<MessageInfo> =
            self.messages.values().map(|m| m.info.clone()).collect();
        messages.sort_by_key(|m| m.uid);
        messages
    }

    fn ignored_messages(&self) -> Vec<u32> {
        self.messages
            .values()
            .filter(|m| m.info.ignored)
            .map(|m| m.info.uid)
            .collect()
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
