//! Module dedicated to IMAP stores.
//!
//! The store keeps one session for folder discovery, creation and the
//! `UIDVALIDITY` cross-check, guarded by a mutex; every folder manager
//! gets a dedicated session of its own so folder passes can run
//! concurrently.

pub mod folder;

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    sync::RwLock,
};

use async_trait::async_trait;
use imap::{ConnectionMode, ImapConnection, Session, TlsKind};
use imap_proto::NameAttribute;
use log::{debug, log_enabled, Level};

use crate::{
    config::StoreConfig,
    error::{Error, Prefix, Result, ResultExt},
    folder::Mailfolder,
    pattern::Patterns,
    store::{FolderManager, Store},
};

use self::folder::ImapFolder;

pub type ImapSession = Session<Box<dyn ImapConnection>>;

const UID_VALIDITY_FILE: &str = "uidvalidity";

pub struct ImapStore {
    config: StoreConfig,
    metadatadir: PathBuf,
    session: tokio::sync::Mutex<ImapSession>,
    separator: RwLock<char>,
    folders: RwLock<Vec<Mailfolder>>,
    patterns: Patterns,
    dryrun: bool,
    prefix: Prefix,
}

/// Creates a logged-in session from the store configuration.
fn build_session(config: &StoreConfig) -> Result<ImapSession> {
    let mode = if config.tls {
        ConnectionMode::Tls
    } else if config.starttls {
        ConnectionMode::StartTls
    } else {
        ConnectionMode::Plaintext
    };

    let mut builder = imap::ClientBuilder::new(&config.host, config.imap_port())
        .mode(mode)
        .tls_kind(TlsKind::Rust);
    if !config.validateservercert {
        builder = builder.danger_skip_tls_verify(true);
    }

    let client = builder.connect()?;
    let mut session = client
        .login(&config.username, &config.password)
        .map_err(|res| Error::Imap(res.0))?;
    session.debug = log_enabled!(Level::Trace);

    Ok(session)
}

impl ImapStore {
    pub async fn new(
        config: &StoreConfig,
        basemetadatadir: &Path,
        dryrun: bool,
    ) -> Result<Self> {
        let prefix = Prefix::new(format!("imapstore: {}", config.name));

        let metadatadir = basemetadatadir.join(&config.name);
        fs::create_dir_all(&metadatadir).prefix(&prefix)?;

        let session = build_session(config)
            .map_err(|err| prefix.wrap(Error::StoreInitFailed(err.to_string())))?;

        let store = Self {
            metadatadir,
            session: tokio::sync::Mutex::new(session),
            separator: RwLock::new('/'),
            folders: RwLock::new(Vec::new()),
            patterns: config.patterns()?,
            config: config.clone(),
            dryrun,
            prefix,
        };

        {
            let mut session = store.session.lock().await;
            let capabilities = session.capabilities().prefix(&store.prefix)?;
            if !capabilities.has_str("UIDPLUS") {
                return Err(store.prefix.wrap(Error::CapabilityMissing("UIDPLUS".into())));
            }
        }

        store.update_folder_list().await?;

        Ok(store)
    }

    fn folder_metadatadir(&self, folder: &Mailfolder) -> PathBuf {
        self.metadatadir.join(folder.to_metadata_path())
    }

    /// Compares the server `UIDVALIDITY` with the pinned one, pinning
    /// it on the first visit of the folder. A mismatch means every UID
    /// mapping for the folder is void, which only an operator can
    /// resolve.
    fn check_uid_validity(
        &self,
        session: &mut ImapSession,
        folder: &Mailfolder,
    ) -> Result<u32> {
        let imappath = folder.to_store_path(self.separator());

        let mailbox = session.examine(&imappath).map_err(|err| {
            self.prefix
                .wrap(Error::FolderSelectFailed(format!("{imappath}: {err}")))
        })?;
        let server = mailbox.uid_validity.ok_or_else(|| {
            self.prefix
                .wrap(Error::Protocol(format!("no uidvalidity for {imappath}")))
        })?;

        let path = self.folder_metadatadir(folder).join(UID_VALIDITY_FILE);
        let saved = match fs::read_to_string(&path) {
            Err(_) => {
                let mut file = File::create(&path).prefix(&self.prefix)?;
                file.write_all(server.to_string().as_bytes())
                    .prefix(&self.prefix)?;
                file.sync_all().prefix(&self.prefix)?;
                server
            }
            Ok(content) => {
                let line = content.lines().next().unwrap_or_default();
                line.parse::<u32>().map_err(|err| {
                    self.prefix.wrap(Error::Protocol(format!(
                        "wrong uidvalidity {line:?} in {}: {err}",
                        path.display()
                    )))
                })?
            }
        };

        debug!("server uidvalidity: {server}, saved uidvalidity: {saved}");

        if server != saved {
            return Err(self
                .prefix
                .wrap(Error::UidValidityMismatch { server, saved }));
        }

        if let Err(err) = session.run_command_and_check_ok("UNSELECT") {
            debug!("cannot unselect folder {imappath}: {err}");
        }

        Ok(server)
    }
}

#[async_trait]
impl Store for ImapStore {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn separator(&self) -> char {
        *self.separator.read().unwrap()
    }

    fn folders(&self) -> Vec<Mailfolder> {
        self.folders.read().unwrap().clone()
    }

    fn has_folder(&self, folder: &Mailfolder) -> bool {
        let separator = self.separator();
        self.folders
            .read()
            .unwrap()
            .iter()
            .any(|f| f.to_store_path(separator) == folder.to_store_path(separator))
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
        let mut session = self.session.lock().await;
        let names = session.list(Some(""), Some("*")).prefix(&self.prefix)?;

        let mut separator = self.separator();
        let mut folders = Vec::new();

        for (i, name) in names.iter().enumerate() {
            if let (0, Some(delimiter)) = (i, name.delimiter()) {
                if let Some(c) = delimiter.chars().next() {
                    separator = c;
                }
            }

            // \Noselect folders cannot hold messages.
            if name.attributes().contains(&NameAttribute::NoSelect) {
                debug!("skipping not selectable imap folder: {}", name.name());
                continue;
            }

            let mut folder = Mailfolder::new(
                name.name()
                    .split(separator)
                    .map(ToOwned::to_owned),
            );
            folder.excluded = self.patterns.excludes(&folder.to_string());
            debug!("imap folder: {folder}");
            folders.push(folder);
        }

        *self.separator.write().unwrap() = separator;
        *self.folders.write().unwrap() = folders;

        Ok(())
    }

    async fn create_folder(&self, folder: &Mailfolder) -> Result<()> {
        let mut session = self.session.lock().await;
        session
            .create(folder.to_store_path(self.separator()))
            .prefix(&self.prefix)?;
        Ok(())
    }

    async fn folder_manager(&self, folder: &Mailfolder) -> Result<Box<dyn FolderManager + Send>> {
        let mut session = self.session.lock().await;

        let folder_exists = self.has_folder(folder);
        if !folder_exists && !self.dryrun {
            session
                .create(folder.to_store_path(self.separator()))
                .prefix(&self.prefix)?;
        }

        fs::create_dir_all(self.folder_metadatadir(folder)).prefix(&self.prefix)?;

        let select = !(self.dryrun && !folder_exists);
        if select {
            let uidvalidity = self.check_uid_validity(&mut session, folder)?;
            debug!("folder {folder} uidvalidity: {uidvalidity}");
        }
        drop(session);

        let mut folder_session = build_session(&self.config).prefix(&self.prefix)?;
        let imappath = folder.to_store_path(self.separator());
        if select {
            folder_session.select(&imappath).map_err(|err| {
                self.prefix
                    .wrap(Error::FolderSelectFailed(format!("{imappath}: {err}")))
            })?;
        }

        Ok(Box::new(ImapFolder::new(
            folder,
            imappath,
            folder_session,
            self.config.expunge,
            self.name(),
            folder_exists,
            self.dryrun,
        )))
    }
}
