//! Module dedicated to synchronization groups.
//!
//! A syncgroup binds two stores. Folders discovered on both sides are
//! merged (minus the excluded ones) and each folder is synchronized by
//! a two-direction differential pass against its persistent
//! syncstatus: first store1 → store2, then store2 → store1, with the
//! forward direction's updates visible to the reverse one.

pub mod scheduler;
pub mod status;

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info};

use crate::{
    config::{Config, DeleteMode, StoreType, SyncgroupConfig},
    error::{Error, Prefix, Result, ResultExt},
    flag::{Flag, Flags},
    folder::{merge_folders, Mailfolder},
    store::{imap::ImapStore, maildir::MaildirStore, FolderManager, Store},
};

use self::status::{StoreSide, SyncStatus};

pub struct Syncgroup {
    config: SyncgroupConfig,
    metadatadir: PathBuf,
    stores: Vec<Arc<dyn Store>>,
    dryrun: bool,
}

impl Syncgroup {
    pub async fn new(
        globalconfig: &Config,
        config: &SyncgroupConfig,
        dryrun: bool,
    ) -> Result<Self> {
        let prefix = Prefix::new(format!("syncgroup: {}", config.name));

        let metadatadir = globalconfig
            .metadatadir
            .join("syncgroups")
            .join(&config.name);
        fs::create_dir_all(&metadatadir).prefix(&prefix)?;

        let basemetadatadir = globalconfig.metadatadir.join("stores");

        let mut stores: Vec<Arc<dyn Store>> = Vec::new();
        for storename in &config.stores {
            let storeconfig = globalconfig.store(storename).ok_or_else(|| {
                prefix.wrap(Error::ConfigInvalid(format!(
                    "missing store definition for {storename:?}"
                )))
            })?;

            let mut storeconfig = storeconfig.clone();
            // The flag delete mode relies on `T`-flagged messages
            // surviving the folder close.
            if config.deletemode == DeleteMode::Flag {
                storeconfig.expunge = false;
            }

            let store: Arc<dyn Store> = match storeconfig.storetype {
                StoreType::Maildir => Arc::new(
                    MaildirStore::new(&storeconfig, &basemetadatadir, dryrun)
                        .await
                        .map_err(|err| prefix.wrap(err))?,
                ),
                StoreType::Imap => Arc::new(
                    ImapStore::new(&storeconfig, &basemetadatadir, dryrun)
                        .await
                        .map_err(|err| prefix.wrap(err))?,
                ),
            };
            stores.push(store);
        }

        Ok(Self {
            config: config.clone(),
            metadatadir,
            stores,
            dryrun,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn metadatadir(&self) -> &Path {
        &self.metadatadir
    }

    pub fn stores(&self) -> &[Arc<dyn Store>] {
        &self.stores
    }

    /// The folders to synchronize: the union of both sides' listings,
    /// minus the excluded ones.
    pub fn sync_folders(&self) -> Vec<Mailfolder> {
        merge_folders(&self.stores[0].folders(), &self.stores[1].folders(), true)
    }

    /// Cycles the folders through [`Syncgroup::sync_folder`] under the
    /// configured concurrency cap and cooldown, forever — or, when
    /// `interactions` is set, until every folder completed at least
    /// that many passes.
    pub async fn sync(self: Arc<Self>, interactions: Option<u32>) -> Result<()> {
        scheduler::run(self, interactions).await
    }

    /// Prints the stores, their folders and the resulting sync set.
    pub fn list(&self) {
        println!("Syncgroup: {}", self.name());
        for store in &self.stores {
            println!("\tStore: {}", store.name());
            for folder in store.folders() {
                if folder.excluded {
                    println!("\t\t{folder} (excluded)");
                } else {
                    println!("\t\t{folder}");
                }
            }
        }

        println!("\tWill sync these folders:");
        for folder in self.sync_folders() {
            println!("\t\t{folder}");
        }
    }

    /// Runs one full two-direction synchronization pass on a folder.
    pub async fn sync_folder(&self, folder: &Mailfolder) -> Result<()> {
        let e = Prefix::new(format!("syncgroup: {} {}", self.config.name, folder));
        debug!("syncing folder {folder}");

        let mut syncstatus = SyncStatus::open(&self.config.name, &self.metadatadir, folder)
            .map_err(|err| e.wrap(err))?;

        let mut folder1 = self.stores[0]
            .folder_manager(folder)
            .await
            .map_err(|err| e.wrap(err))?;
        let mut folder2 = self.stores[1]
            .folder_manager(folder)
            .await
            .map_err(|err| e.wrap(err))?;

        folder1
            .update_message_list()
            .await
            .map_err(|err| e.wrap(err))?;
        folder2
            .update_message_list()
            .await
            .map_err(|err| e.wrap(err))?;

        for side in [StoreSide::Store1, StoreSide::Store2] {
            let (srcstore, dststore) = match side {
                StoreSide::Store1 => (&self.stores[0], &self.stores[1]),
                StoreSide::Store2 => (&self.stores[1], &self.stores[0]),
            };
            let (src, dst) = match side {
                StoreSide::Store1 => (&mut folder1, &mut folder2),
                StoreSide::Store2 => (&mut folder2, &mut folder1),
            };

            let e = Prefix::new(format!(
                "syncgroup: {} {} -> {} {}",
                self.config.name,
                srcstore.name(),
                dststore.name(),
                folder
            ));
            syncstatus.set_src_store(side);

            let listing = src.listing();

            let new = filter_ignored(syncstatus.new_messages(&listing).prefix(&e)?, src.as_ref());
            info!("there are {} new messages", new.len());

            let deleted = filter_ignored(
                syncstatus.deleted_messages(&listing).prefix(&e)?,
                src.as_ref(),
            );
            info!("there are {} deleted messages", deleted.len());

            let changed = filter_ignored(
                syncstatus.changed_messages(&listing).prefix(&e)?,
                src.as_ref(),
            );
            info!("there are {} changed messages", changed.len());

            if self.dryrun {
                continue;
            }

            for srcuid in new {
                info!(
                    "adding message with srcuid {srcuid} to destination store {}",
                    dststore.name()
                );
                syncstatus.begin().prefix(&e)?;
                match copy_message(src.as_mut(), dst.as_mut(), &syncstatus, srcuid).await {
                    Ok(()) => syncstatus.commit().prefix(&e)?,
                    Err(err) => {
                        let _ = syncstatus.rollback();
                        return Err(e.wrap(err));
                    }
                }
            }

            if self.config.deletemode == DeleteMode::None {
                info!("deletemode is none, skipping message deletion");
            } else {
                for srcuid in deleted {
                    syncstatus.begin().prefix(&e)?;
                    match delete_message(
                        dst.as_mut(),
                        &syncstatus,
                        srcuid,
                        self.config.deletemode,
                    )
                    .await
                    {
                        Ok(()) => syncstatus.commit().prefix(&e)?,
                        Err(err) => {
                            let _ = syncstatus.rollback();
                            return Err(e.wrap(err));
                        }
                    }
                }
            }

            for srcuid in changed {
                syncstatus.begin().prefix(&e)?;
                match update_flags(src.as_mut(), dst.as_mut(), &syncstatus, srcuid).await {
                    Ok(()) => syncstatus.commit().prefix(&e)?,
                    Err(err) => {
                        let _ = syncstatus.rollback();
                        return Err(e.wrap(err));
                    }
                }
            }
        }

        folder1.close().await.map_err(|err| e.wrap(err))?;
        folder2.close().await.map_err(|err| e.wrap(err))?;

        Ok(())
    }
}

fn filter_ignored(uids: Vec<u32>, folder: &(dyn FolderManager + Send)) -> Vec<u32> {
    uids.into_iter()
        .filter(|uid| !folder.is_ignored(*uid))
        .collect()
}

/// Copies one new message from the source to the destination folder
/// and records the resulting pair.
async fn copy_message(
    src: &mut (dyn FolderManager + Send),
    dst: &mut (dyn FolderManager + Send),
    syncstatus: &SyncStatus,
    srcuid: u32,
) -> Result<()> {
    let body = src.read_message(srcuid).await?;
    let flags = src.flags(srcuid)?;

    let dstuid = dst.add_message(srcuid, &flags, &body).await?;
    debug!("received dstuid: {dstuid}");

    // The source folder may rebind a temporary uid to a permanent one
    // right before the pair is recorded.
    let srcuid = src.update(srcuid).await?;
    syncstatus.update(srcuid, dstuid, &flags)
}

/// Propagates one deletion to the destination folder, honoring the
/// delete mode, and drops the pair.
async fn delete_message(
    dst: &mut (dyn FolderManager + Send),
    syncstatus: &SyncStatus,
    srcuid: u32,
    deletemode: DeleteMode,
) -> Result<()> {
    let Some(dstuid) = syncstatus.dst_uid(srcuid)? else {
        // The pair vanished already, only the row is left to drop.
        return syncstatus.delete(srcuid);
    };

    debug!("deleting message with dstuid {dstuid} from destination store");

    match deletemode {
        DeleteMode::Expunge => dst.delete_message(dstuid).await?,
        DeleteMode::Flag => {
            let flags = dst.flags(dstuid)?;
            let flags = flags.union(&Flags::from_iter([Flag::Deleted]));
            dst.set_flags(dstuid, &flags).await?;
        }
        DeleteMode::Trash | DeleteMode::None => {
            return Err(Error::ConfigInvalid(format!(
                "bad deletemode {deletemode:?}"
            )));
        }
    }

    syncstatus.delete(srcuid)
}

/// Propagates one flag change to the destination folder. A destination
/// that no longer holds the UID is left alone: the reverse direction
/// will pick the message up as deleted.
async fn update_flags(
    src: &mut (dyn FolderManager + Send),
    dst: &mut (dyn FolderManager + Send),
    syncstatus: &SyncStatus,
    srcuid: u32,
) -> Result<()> {
    let Some(dstuid) = syncstatus.dst_uid(srcuid)? else {
        return Ok(());
    };
    let flags = src.flags(srcuid)?;

    if dst.has_uid(dstuid) {
        debug!("updating message with dstuid {dstuid} to flags {flags:?}");
        dst.set_flags(dstuid, &flags).await?;
        syncstatus.update(srcuid, dstuid, &flags)?;
    }

    Ok(())
}
