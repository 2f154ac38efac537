//! Module dedicated to Maildir stores.
//!
//! A Maildir store is a directory tree in which every folder is a
//! directory holding the `cur`/`new`/`tmp` triad. Each folder owns a
//! random 128-bit folderUID persisted both under the metadata
//! directory and inside the Maildir itself; the two copies must match,
//! which catches folders that were re-created or restored from
//! elsewhere.

pub mod folder;

use std::{
    fs::{self, File},
    io::Write,
    path::{Component, Path, PathBuf},
    sync::RwLock,
};

use async_trait::async_trait;
use log::debug;
use rand::RngCore;

use crate::{
    config::StoreConfig,
    error::{Error, Prefix, Result, ResultExt},
    folder::Mailfolder,
    pattern::Patterns,
    store::{FolderManager, Store},
};

use self::folder::MaildirFolder;

/// Name of the folderUID copy living inside the Maildir folder.
const FOLDER_UID_FILE: &str = ".gomailsync-folderuid";

/// Name of the folderUID copy living under the metadata directory.
const FOLDER_UID_METADATA_FILE: &str = "folderuid";

const SUBDIRS: [&str; 3] = ["cur", "new", "tmp"];

pub struct MaildirStore {
    config: StoreConfig,
    maildir: PathBuf,
    metadatadir: PathBuf,
    separator: char,
    folders: RwLock<Vec<Mailfolder>>,
    patterns: Patterns,
    dryrun: bool,
    prefix: Prefix,
}

/// Removes `.` components the way path cleaning does, so configured
/// inbox paths like `./INBOX` compare equal to discovered ones.
fn clean(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn generate_folder_uid() -> String {
    let mut bytes = [0u8; 10];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{:x}", md5::compute(bytes))
}

impl MaildirStore {
    pub async fn new(
        config: &StoreConfig,
        basemetadatadir: &Path,
        dryrun: bool,
    ) -> Result<Self> {
        let prefix = Prefix::new(format!("maildirstore: {}", config.name));

        let metadatadir = basemetadatadir.join(&config.name);
        fs::create_dir_all(&metadatadir).prefix(&prefix)?;
        fs::create_dir_all(&config.maildir).prefix(&prefix)?;

        let store = Self {
            maildir: config.maildir.clone(),
            metadatadir,
            separator: config.separator,
            folders: RwLock::new(Vec::new()),
            patterns: config.patterns()?,
            config: config.clone(),
            dryrun,
            prefix,
        };

        store.update_folder_list().await?;

        Ok(store)
    }

    fn is_inbox(&self, relpath: &Path) -> bool {
        clean(relpath) == clean(&self.config.inboxpath)
    }

    /// The path of the folder inside the Maildir tree.
    fn maildir_path(&self, folder: &Mailfolder) -> PathBuf {
        if folder.is_inbox() {
            clean(&self.config.inboxpath)
        } else {
            PathBuf::from(folder.to_store_path(self.separator))
        }
    }

    fn folder_metadatadir(&self, folder: &Mailfolder) -> PathBuf {
        self.metadatadir.join(folder.to_metadata_path())
    }

    fn read_folder_uid(&self, path: &Path) -> Result<String> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Ok(String::new()),
        };

        let folder_uid = content.lines().next().unwrap_or_default().to_owned();
        if folder_uid.len() != 32 {
            return Err(self.prefix.wrap(Error::Protocol(format!(
                "wrong folderuid {folder_uid:?} in {}",
                path.display()
            ))));
        }

        Ok(folder_uid)
    }

    fn write_folder_uid(&self, path: &Path, folder_uid: &str) -> Result<()> {
        let mut file = File::create(path).prefix(&self.prefix)?;
        file.write_all(folder_uid.as_bytes()).prefix(&self.prefix)?;
        file.sync_all().prefix(&self.prefix)?;
        Ok(())
    }

    /// Reads both folderUID copies and requires bitwise equality.
    /// Returns an empty string when neither copy exists yet.
    fn folder_uid(&self, folder: &Mailfolder) -> Result<String> {
        let metadata_path = self
            .folder_metadatadir(folder)
            .join(FOLDER_UID_METADATA_FILE);
        let maildir_path = self
            .maildir
            .join(self.maildir_path(folder))
            .join(FOLDER_UID_FILE);

        let metadata_uid = self.read_folder_uid(&metadata_path)?;
        let maildir_uid = self.read_folder_uid(&maildir_path)?;

        if metadata_uid != maildir_uid {
            return Err(self.prefix.wrap(Error::FolderUidMismatch {
                metadata: metadata_uid,
                maildir: maildir_uid,
            }));
        }

        Ok(metadata_uid)
    }

    fn discover_folders(&self) -> Result<Vec<Mailfolder>> {
        let mut folders = Vec::new();
        self.visit(&self.maildir, &mut folders)?;
        Ok(folders)
    }

    fn visit(&self, dir: &Path, folders: &mut Vec<Mailfolder>) -> Result<()> {
        for dirent in fs::read_dir(dir).prefix(&self.prefix)? {
            let dirent = dirent.prefix(&self.prefix)?;
            let path = dirent.path();
            if !path.is_dir() {
                continue;
            }

            let base = dirent.file_name().to_string_lossy().into_owned();
            if SUBDIRS.contains(&base.as_str()) {
                continue;
            }

            let is_triad = SUBDIRS.iter().all(|sub| path.join(sub).is_dir());
            if is_triad {
                let relpath = path
                    .strip_prefix(&self.maildir)
                    .map_err(|err| Error::Protocol(err.to_string()))
                    .prefix(&self.prefix)?;

                // A directory spelling inbox must be the configured
                // inbox path, otherwise two folders would alias.
                let cleaned = clean(relpath);
                if cleaned.to_string_lossy().eq_ignore_ascii_case("inbox")
                    && !self.is_inbox(relpath)
                {
                    return Err(self.prefix.wrap(Error::StoreInitFailed(format!(
                        "directory with name {:?} doesn't match configured inbox path {:?}",
                        cleaned, self.config.inboxpath
                    ))));
                }

                let mut folder = if self.is_inbox(relpath) {
                    Mailfolder::inbox()
                } else {
                    Mailfolder::new(
                        relpath
                            .to_string_lossy()
                            .split(self.separator)
                            .map(ToOwned::to_owned),
                    )
                };
                folder.excluded = self.patterns.excludes(&folder.to_string());
                debug!("maildir folder: {folder}");
                folders.push(folder);
            }

            self.visit(&path, folders)?;
        }

        Ok(())
    }
}

#[async_trait]
impl Store for MaildirStore {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn separator(&self) -> char {
        self.separator
    }

    fn folders(&self) -> Vec<Mailfolder> {
        self.folders.read().unwrap().clone()
    }

    fn has_folder(&self, folder: &Mailfolder) -> bool {
        self.folders
            .read()
            .unwrap()
            .iter()
            .any(|f| f.to_store_path(self.separator) == folder.to_store_path(self.separator))
    }

    fn set_folder_excluded(&self, folder: &Mailfolder, excluded: bool) {
        let mut folders = self.folders.write().unwrap();
        for f in folders.iter_mut() {
            if f == folder {
                f.excluded = excluded;
            }
        }
    }

    async fn update_folder_list(&self) -> Result<()> {
        let folders = self.discover_folders()?;
        *self.folders.write().unwrap() = folders;
        Ok(())
    }

    async fn create_folder(&self, folder: &Mailfolder) -> Result<()> {
        let foldermaildir = self.maildir.join(self.maildir_path(folder));
        for subdir in SUBDIRS {
            fs::create_dir_all(foldermaildir.join(subdir)).prefix(&self.prefix)?;
        }

        let foldermetadatadir = self.folder_metadatadir(folder);
        fs::create_dir_all(&foldermetadatadir).prefix(&self.prefix)?;

        let folder_uid = self.folder_uid(folder)?;
        if !folder_uid.is_empty() {
            debug!("folderuid: {folder_uid}");
            return Ok(());
        }

        let folder_uid = generate_folder_uid();
        let metadata_path = foldermetadatadir.join(FOLDER_UID_METADATA_FILE);
        let maildir_path = foldermaildir.join(FOLDER_UID_FILE);

        self.write_folder_uid(&metadata_path, &folder_uid)?;
        if let Err(err) = self.write_folder_uid(&maildir_path, &folder_uid) {
            // Keep the two copies consistent: without the in-maildir
            // copy the metadata one must not survive either.
            let _ = fs::remove_file(&metadata_path);
            return Err(err);
        }
        debug!("folderuid: {folder_uid}");

        Ok(())
    }

    async fn folder_manager(&self, folder: &Mailfolder) -> Result<Box<dyn FolderManager + Send>> {
        let maildir = self.maildir.join(self.maildir_path(folder));

        if !self.has_folder(folder) && !self.dryrun {
            self.create_folder(folder).await?;
        }

        let folder_uid = self.folder_uid(folder)?;

        Ok(Box::new(MaildirFolder::new(
            folder,
            maildir,
            folder_uid,
            self.name(),
            self.has_folder(folder),
            self.dryrun,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_config(maildir: &Path) -> StoreConfig {
        StoreConfig {
            name: "store1".into(),
            maildir: maildir.to_owned(),
            ..Default::default()
        }
    }

    async fn test_store(root: &Path) -> MaildirStore {
        MaildirStore::new(&store_config(&root.join("mail")), &root.join("meta"), false)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn discovery_requires_the_full_triad() {
        let root = tempfile::tempdir().unwrap();
        let store = test_store(root.path()).await;

        let folder = Mailfolder::new(["dir01", "child01"]);
        store.create_folder(&folder).await.unwrap();
        fs::create_dir_all(root.path().join("mail/partial/cur")).unwrap();

        store.update_folder_list().await.unwrap();
        let folders = store.folders();
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0], folder);
        assert!(store.has_folder(&folder));
        assert!(!store.has_folder(&Mailfolder::new(["partial"])));
    }

    #[tokio::test]
    async fn configured_inbox_path_is_reported_as_inbox() {
        let root = tempfile::tempdir().unwrap();
        let store = test_store(root.path()).await;

        store.create_folder(&Mailfolder::inbox()).await.unwrap();
        store.update_folder_list().await.unwrap();

        let folders = store.folders();
        assert_eq!(folders.len(), 1);
        assert!(folders[0].is_inbox());
    }

    #[tokio::test]
    async fn foreign_inbox_spelling_fails_discovery() {
        let root = tempfile::tempdir().unwrap();

        let mut config = store_config(&root.path().join("mail"));
        config.inboxpath = PathBuf::from("elsewhere");
        for subdir in SUBDIRS {
            fs::create_dir_all(root.path().join("mail/inbox").join(subdir)).unwrap();
        }

        let store = MaildirStore::new(&config, &root.path().join("meta"), false).await;
        assert!(store.is_err());
    }

    #[tokio::test]
    async fn folder_uid_copies_must_match() {
        let root = tempfile::tempdir().unwrap();
        let store = test_store(root.path()).await;

        let folder = Mailfolder::new(["dir01"]);
        store.create_folder(&folder).await.unwrap();

        let uid = store.folder_uid(&folder).unwrap();
        assert_eq!(uid.len(), 32);

        // Corrupting the in-maildir copy breaks the cross-check.
        fs::write(
            root.path().join("mail/dir01").join(FOLDER_UID_FILE),
            generate_folder_uid(),
        )
        .unwrap();
        let err = store.folder_uid(&folder).unwrap_err();
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn create_folder_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let store = test_store(root.path()).await;

        let folder = Mailfolder::new(["dir01"]);
        store.create_folder(&folder).await.unwrap();
        let uid = store.folder_uid(&folder).unwrap();

        store.create_folder(&folder).await.unwrap();
        assert_eq!(store.folder_uid(&folder).unwrap(), uid);
    }

    #[tokio::test]
    async fn dotted_separator_renders_one_level() {
        let root = tempfile::tempdir().unwrap();
        let mut config = store_config(&root.path().join("mail"));
        config.separator = '.';
        let store = MaildirStore::new(&config, &root.path().join("meta"), false)
            .await
            .unwrap();

        let folder = Mailfolder::new(["dir01", "child01"]);
        store.create_folder(&folder).await.unwrap();
        assert!(root.path().join("mail/dir01.child01/cur").is_dir());

        store.update_folder_list().await.unwrap();
        assert_eq!(store.folders(), [folder]);
    }

    #[tokio::test]
    async fn excluded_folders_are_flagged_at_discovery() {
        let root = tempfile::tempdir().unwrap();
        let mut config = store_config(&root.path().join("mail"));
        config.regexppatterns = vec!["!/^spam/".into()];
        let store = MaildirStore::new(&config, &root.path().join("meta"), false)
            .await
            .unwrap();

        store.create_folder(&Mailfolder::new(["spam"])).await.unwrap();
        store.create_folder(&Mailfolder::new(["work"])).await.unwrap();
        store.update_folder_list().await.unwrap();

        let folders = store.folders();
        let spam = folders.iter().find(|f| f.to_string() == "spam").unwrap();
        let work = folders.iter().find(|f| f.to_string() == "work").unwrap();
        assert!(spam.excluded);
        assert!(!work.excluded);
    }
}
