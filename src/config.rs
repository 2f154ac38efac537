//! Module dedicated to the configuration surface.
//!
//! The configuration is a TOML file with top-level options plus
//! `[[store]]` and `[[syncgroup]]` tables. Parsing is lenient (serde
//! defaults); [`Config::validate`] then enforces every constraint the
//! synchronization machinery relies on and reports violations as
//! [`Error::ConfigInvalid`].

use std::{fs, path::PathBuf};

use serde::Deserialize;

use crate::{
    error::{Error, Result},
    pattern::Patterns,
};

/// The top-level configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Root directory for all persistent synchronization state.
    #[serde(default = "default_metadatadir")]
    pub metadatadir: PathBuf,

    /// One of `error`, `info`, `debug`.
    #[serde(default = "default_loglevel")]
    pub loglevel: String,

    #[serde(default, rename = "syncgroup")]
    pub syncgroups: Vec<SyncgroupConfig>,

    #[serde(default, rename = "store")]
    pub stores: Vec<StoreConfig>,
}

/// The configuration of one synchronization group: a pair of stores
/// plus scheduling and deletion policy.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncgroupConfig {
    pub name: String,

    /// Names of the two stores to synchronize.
    #[serde(default)]
    pub stores: Vec<String>,

    /// Upper bound on concurrently synced folders.
    #[serde(default = "default_concurrentsyncs")]
    pub concurrentsyncs: u8,

    /// Cooldown in seconds between two passes of the same folder.
    #[serde(default = "default_syncinterval")]
    pub syncinterval: u64,

    #[serde(default)]
    pub deletemode: DeleteMode,
}

/// What happens on the destination when a message disappeared from the
/// source.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode {
    /// Physically remove the destination message.
    #[default]
    Expunge,
    /// Set the `T` flag on the destination message and leave it.
    Flag,
    /// Reserved; rejected by validation.
    Trash,
    /// Skip deletions entirely.
    None,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
pub enum StoreType {
    #[serde(rename = "IMAP")]
    Imap,
    Maildir,
}

/// How Maildir folders persist the message UID mapping.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum UidMapping {
    /// UIDs embedded in message filenames.
    #[default]
    Files,
    /// Reserved; rejected by validation.
    Db,
}

/// The configuration of one mail store.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    pub name: String,
    pub storetype: StoreType,

    /// Ordered folder filters, `/re/` to require a match, `!/re/` to
    /// exclude on match.
    #[serde(default)]
    pub regexppatterns: Vec<String>,

    // IMAP options.
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub starttls: bool,
    #[serde(default)]
    pub tls: bool,
    #[serde(default = "default_true")]
    pub validateservercert: bool,
    #[serde(default)]
    pub expunge: bool,

    // Maildir options.
    #[serde(default)]
    pub maildir: PathBuf,
    #[serde(default = "default_inboxpath")]
    pub inboxpath: PathBuf,
    #[serde(default)]
    pub uidmapping: UidMapping,
    #[serde(default = "default_separator")]
    pub separator: char,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metadatadir: default_metadatadir(),
            loglevel: default_loglevel(),
            syncgroups: Vec::new(),
            stores: Vec::new(),
        }
    }
}

impl Default for SyncgroupConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            stores: Vec::new(),
            concurrentsyncs: default_concurrentsyncs(),
            syncinterval: default_syncinterval(),
            deletemode: DeleteMode::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            storetype: StoreType::Maildir,
            regexppatterns: Vec::new(),
            host: String::new(),
            port: 0,
            username: String::new(),
            password: String::new(),
            starttls: false,
            tls: false,
            validateservercert: true,
            expunge: false,
            maildir: PathBuf::new(),
            inboxpath: default_inboxpath(),
            uidmapping: UidMapping::default(),
            separator: default_separator(),
        }
    }
}

fn default_metadatadir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mailsync")
}

fn default_loglevel() -> String {
    "info".into()
}

fn default_concurrentsyncs() -> u8 {
    1
}

fn default_syncinterval() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_inboxpath() -> PathBuf {
    PathBuf::from("./INBOX")
}

fn default_separator() -> char {
    '/'
}

impl Config {
    /// Reads and parses the configuration file.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = fs::read_to_string(&path).map_err(|err| {
            Error::ConfigInvalid(format!("cannot read config file {}: {err}", path.display()))
        })?;
        toml::from_str(&content).map_err(|err| {
            Error::ConfigInvalid(format!(
                "cannot parse config file {}: {err}",
                path.display()
            ))
        })
    }

    pub fn store(&self, name: &str) -> Option<&StoreConfig> {
        self.stores.iter().find(|s| s.name == name)
    }

    /// Enforces every configuration constraint.
    pub fn validate(&self) -> Result<()> {
        const VALID_LOGLEVELS: [&str; 3] = ["error", "info", "debug"];
        if !VALID_LOGLEVELS.contains(&self.loglevel.as_str()) {
            return Err(Error::ConfigInvalid(format!(
                "wrong loglevel {:?}, valid levels are {VALID_LOGLEVELS:?}",
                self.loglevel
            )));
        }

        for store in &self.stores {
            store.validate()?;
        }
        for syncgroup in &self.syncgroups {
            syncgroup.validate(self)?;
        }

        Ok(())
    }
}

impl StoreConfig {
    /// The TCP port to dial, defaulting on the standard IMAP ports
    /// when unset.
    pub fn imap_port(&self) -> u16 {
        match self.port {
            0 if self.tls => 993,
            0 => 143,
            port => port,
        }
    }

    pub fn patterns(&self) -> Result<Patterns> {
        Patterns::parse(&self.regexppatterns)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::ConfigInvalid("store name is empty".into()));
        }
        let ctx = format!("[store: {}]", self.name);

        self.patterns()
            .map_err(|err| Error::ConfigInvalid(format!("{ctx} {err}")))?;

        match self.storetype {
            StoreType::Imap => {
                if self.host.is_empty() {
                    return Err(Error::ConfigInvalid(format!("{ctx} host option is empty")));
                }
                if self.username.is_empty() {
                    return Err(Error::ConfigInvalid(format!(
                        "{ctx} username option is empty"
                    )));
                }
                if self.password.is_empty() {
                    return Err(Error::ConfigInvalid(format!(
                        "{ctx} password option is empty"
                    )));
                }
                if self.tls && self.starttls {
                    return Err(Error::ConfigInvalid(format!(
                        "{ctx} both tls and starttls enabled, only one of them is permitted"
                    )));
                }
            }
            StoreType::Maildir => {
                if self.maildir.as_os_str().is_empty() {
                    return Err(Error::ConfigInvalid(format!(
                        "{ctx} maildir option is empty"
                    )));
                }
                if self.uidmapping == UidMapping::Db {
                    return Err(Error::ConfigInvalid(format!(
                        "{ctx} uidmapping of type \"db\" is not implemented"
                    )));
                }
                if !['.', '/'].contains(&self.separator) {
                    return Err(Error::ConfigInvalid(format!(
                        "{ctx} wrong separator {:?}, valid separators are '.' and '/'",
                        self.separator
                    )));
                }
            }
        }

        Ok(())
    }
}

impl SyncgroupConfig {
    fn validate(&self, config: &Config) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::ConfigInvalid("syncgroup name is empty".into()));
        }
        let ctx = format!("[syncgroup: {}]", self.name);

        if self.stores.len() != 2 {
            return Err(Error::ConfigInvalid(format!(
                "{ctx} wrong number of stores, exactly 2 expected"
            )));
        }
        for name in &self.stores {
            if config.store(name).is_none() {
                return Err(Error::ConfigInvalid(format!(
                    "{ctx} missing store definition for {name:?}"
                )));
            }
        }
        if self.deletemode == DeleteMode::Trash {
            return Err(Error::ConfigInvalid(format!(
                "{ctx} deletemode of type \"trash\" is not implemented"
            )));
        }
        if self.concurrentsyncs < 1 {
            return Err(Error::ConfigInvalid(format!(
                "{ctx} concurrentsyncs must be at least 1"
            )));
        }

        Ok(())
    }
}
