//! Module dedicated to the per-folder synchronization status.
//!
//! The syncstatus is a small SQLite table recording the last
//! successfully synchronized state: one row per message pair, with the
//! canonical flags both sides had at commit time. Diffing the current
//! folder listing against it yields the new, deleted and changed
//! message sets for one direction.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::Path,
    sync::Mutex,
};

use rusqlite::Connection;

use crate::{
    error::{Prefix, Result, ResultExt},
    flag::Flags,
    folder::Mailfolder,
};

const CREATE_SYNCSTATUS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS syncstatus (
        uidstore1 INTEGER NOT NULL,
        uidstore2 INTEGER NOT NULL,
        flags     TEXT,
        PRIMARY KEY (uidstore1, uidstore2)
    )
";

/// Selects which UID column plays the source role in the queries.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreSide {
    Store1,
    Store2,
}

impl StoreSide {
    pub fn other(&self) -> StoreSide {
        match self {
            StoreSide::Store1 => StoreSide::Store2,
            StoreSide::Store2 => StoreSide::Store1,
        }
    }

    fn column(&self) -> &'static str {
        match self {
            StoreSide::Store1 => "uidstore1",
            StoreSide::Store2 => "uidstore2",
        }
    }
}

/// The persistent UID map of one folder, open for the duration of one
/// sync pass.
pub struct SyncStatus {
    conn: Mutex<Connection>,
    srcstore: StoreSide,
    prefix: Prefix,
}

impl SyncStatus {
    /// Opens (creating on demand) the syncstatus database of the given
    /// folder under the syncgroup metadata directory.
    pub fn open(
        syncgroup_name: &str,
        syncgroup_metadatadir: &Path,
        folder: &Mailfolder,
    ) -> Result<Self> {
        let prefix = Prefix::new(format!("uidmapsyncstatus: {syncgroup_name} {folder}"));

        let dir = syncgroup_metadatadir
            .join("uidmapsyncstatus")
            .join(folder.to_metadata_path());
        fs::create_dir_all(&dir).prefix(&prefix)?;

        let conn = Connection::open(dir.join("syncstatus.db")).prefix(&prefix)?;
        conn.execute(CREATE_SYNCSTATUS_TABLE, ()).prefix(&prefix)?;

        Ok(Self {
            conn: Mutex::new(conn),
            srcstore: StoreSide::Store1,
            prefix,
        })
    }

    pub fn set_src_store(&mut self, side: StoreSide) {
        self.srcstore = side;
    }

    fn src_col(&self) -> &'static str {
        self.srcstore.column()
    }

    fn dst_col(&self) -> &'static str {
        self.srcstore.other().column()
    }

    pub fn begin(&self) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch("BEGIN IMMEDIATE")
            .prefix(&self.prefix)
    }

    pub fn commit(&self) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch("COMMIT")
            .prefix(&self.prefix)
    }

    pub fn rollback(&self) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch("ROLLBACK")
            .prefix(&self.prefix)
    }

    /// Records (or refreshes) the pair `(srcuid, dstuid)` with the
    /// given canonical flags.
    pub fn update(&self, srcuid: u32, dstuid: u32, flags: &Flags) -> Result<()> {
        let query = format!(
            "INSERT OR REPLACE INTO syncstatus ({}, {}, flags) VALUES (?, ?, ?)",
            self.src_col(),
            self.dst_col()
        );
        self.conn
            .lock()
            .unwrap()
            .execute(&query, (srcuid, dstuid, flags.to_string()))
            .prefix(&self.prefix)?;
        Ok(())
    }

    /// Removes every row with the given UID in the source column.
    pub fn delete(&self, srcuid: u32) -> Result<()> {
        let query = format!("DELETE FROM syncstatus WHERE {} = ?", self.src_col());
        self.conn
            .lock()
            .unwrap()
            .execute(&query, [srcuid])
            .prefix(&self.prefix)?;
        Ok(())
    }

    /// The destination UID paired with the given source UID, if any.
    pub fn dst_uid(&self, srcuid: u32) -> Result<Option<u32>> {
        let query = format!(
            "SELECT {} FROM syncstatus WHERE {} = ?",
            self.dst_col(),
            self.src_col()
        );
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&query).prefix(&self.prefix)?;
        let mut rows = stmt.query([srcuid]).prefix(&self.prefix)?;

        match rows.next().prefix(&self.prefix)? {
            Some(row) => Ok(Some(row.get(0).prefix(&self.prefix)?)),
            None => Ok(None),
        }
    }

    pub fn has_uid(&self, uid: u32) -> Result<bool> {
        Ok(self.dst_uid(uid)?.is_some())
    }

    fn rows(&self) -> Result<Vec<(u32, Flags)>> {
        let query = format!("SELECT {}, flags FROM syncstatus", self.src_col());
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&query).prefix(&self.prefix)?;
        let rows = stmt
            .query_map([], |row| {
                let uid: u32 = row.get(0)?;
                let flags: Option<String> = row.get(1)?;
                Ok((uid, Flags::from(flags.unwrap_or_default().as_str())))
            })
            .prefix(&self.prefix)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .prefix(&self.prefix)?;
        Ok(rows)
    }

    /// Folder-listed UIDs that do not appear in the source column yet,
    /// ascending.
    pub fn new_messages(&self, listing: &BTreeMap<u32, Flags>) -> Result<Vec<u32>> {
        let mut new: BTreeSet<u32> = listing.keys().copied().collect();
        for (uid, _) in self.rows()? {
            new.remove(&uid);
        }
        Ok(new.into_iter().collect())
    }

    /// Source-column UIDs the folder no longer lists, ascending.
    pub fn deleted_messages(&self, listing: &BTreeMap<u32, Flags>) -> Result<Vec<u32>> {
        let mut deleted: Vec<u32> = self
            .rows()?
            .into_iter()
            .filter(|(uid, _)| !listing.contains_key(uid))
            .map(|(uid, _)| uid)
            .collect();
        deleted.sort_unstable();
        deleted.dedup();
        Ok(deleted)
    }

    /// Source-column UIDs the folder lists with flags differing from
    /// the recorded ones, ascending.
    pub fn changed_messages(&self, listing: &BTreeMap<u32, Flags>) -> Result<Vec<u32>> {
        let mut changed: Vec<u32> = self
            .rows()?
            .into_iter()
            .filter(|(uid, flags)| {
                listing
                    .get(uid)
                    .map(|current| current != flags)
                    .unwrap_or_default()
            })
            .map(|(uid, _)| uid)
            .collect();
        changed.sort_unstable();
        changed.dedup();
        Ok(changed)
    }
}
