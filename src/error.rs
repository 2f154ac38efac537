//! Module dedicated to error management.
//!
//! Every component wraps its errors with a prefix naming the
//! component instance (`store: <name>`, `imapfolder: <store>/<folder>`
//! and so on). Each [`Prefix`] carries a unique tag: re-wrapping an
//! error that already carries the same tag replaces the prefix instead
//! of stacking it, so messages do not accrete duplicate prefixes while
//! bubbling up.

use std::{io, result};

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = result::Result<T, Error>;

/// Errors that can occur across the whole synchronization machinery.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error("cannot initialize store: {0}")]
    StoreInitFailed(String),
    #[error("cannot select folder {0}")]
    FolderSelectFailed(String),
    #[error("IMAP server uidvalidity {server} doesn't match saved uidvalidity {saved}")]
    UidValidityMismatch { server: u32, saved: u32 },
    #[error("folderuid in metadata dir \"{metadata}\" and in maildir \"{maildir}\" are different")]
    FolderUidMismatch { metadata: String, maildir: String },
    #[error("server doesn't provide {0} capability")]
    CapabilityMissing(String),
    #[error("duplicate files with same stem {0}: {1:?}")]
    DuplicateFilename(String, Vec<String>),
    #[error("cannot find message with uid {0}")]
    MessageNotFound(u32),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("transaction failed")]
    Transaction(#[from] rusqlite::Error),
    #[error(transparent)]
    Imap(#[from] imap::Error),
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("[{prefix}] {source}")]
    Prefixed {
        prefix: String,
        tag: Uuid,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Returns the innermost, prefix-free error.
    pub fn root(&self) -> &Error {
        match self {
            Error::Prefixed { source, .. } => source.root(),
            err => err,
        }
    }

    /// Whether the error is terminal for its folder.
    ///
    /// Terminal errors require operator action (the folder was
    /// re-created on one side, or the metadata was swapped) and are not
    /// worth retrying on the next pass.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.root(),
            Error::UidValidityMismatch { .. } | Error::FolderUidMismatch { .. }
        )
    }
}

/// A component prefix for error wrapping.
#[derive(Clone, Debug)]
pub struct Prefix {
    label: String,
    tag: Uuid,
}

impl Prefix {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            tag: Uuid::new_v4(),
        }
    }

    /// Wraps the given error with this prefix.
    ///
    /// An error already carrying this prefix's tag gets its prefix
    /// replaced rather than wrapped a second time. Identity is the tag,
    /// not the label text.
    pub fn wrap(&self, err: Error) -> Error {
        match err {
            Error::Prefixed { tag, source, .. } if tag == self.tag => Error::Prefixed {
                prefix: self.label.clone(),
                tag,
                source,
            },
            err => Error::Prefixed {
                prefix: self.label.clone(),
                tag: self.tag,
                source: Box::new(err),
            },
        }
    }
}

/// Shortcut to wrap the error side of a result with a [`Prefix`].
pub trait ResultExt<T> {
    fn prefix(self, prefix: &Prefix) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for result::Result<T, E> {
    fn prefix(self, prefix: &Prefix) -> Result<T> {
        self.map_err(|err| prefix.wrap(err.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_same_tag_does_not_stack() {
        let prefix = Prefix::new("store: local");
        let err = prefix.wrap(Error::MessageNotFound(42));
        let err = prefix.wrap(err);
        assert_eq!(
            err.to_string(),
            "[store: local] cannot find message with uid 42"
        );
    }

    #[test]
    fn wrap_other_tag_stacks() {
        let inner = Prefix::new("maildirfolder: INBOX");
        let outer = Prefix::new("syncgroup: sg1");
        let err = outer.wrap(inner.wrap(Error::MessageNotFound(7)));
        assert_eq!(
            err.to_string(),
            "[syncgroup: sg1] [maildirfolder: INBOX] cannot find message with uid 7"
        );
    }

    #[test]
    fn uidvalidity_mismatch_message() {
        let err = Error::UidValidityMismatch {
            server: 3,
            saved: 2,
        };
        assert!(err.to_string().contains("doesn't match saved uidvalidity"));
    }

    #[test]
    fn terminal_classification_reaches_through_prefixes() {
        let prefix = Prefix::new("imapstore: remote");
        let err = prefix.wrap(Error::UidValidityMismatch {
            server: 3,
            saved: 2,
        });
        assert!(err.is_terminal());
        assert!(!prefix.wrap(Error::MessageNotFound(1)).is_terminal());
    }
}
