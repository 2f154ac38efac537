//! Module dedicated to the per-syncgroup folder scheduler.
//!
//! Folders cycle through sync tasks under two constraints: at most
//! `concurrentsyncs` tasks run at once, and a folder whose task just
//! completed stays in cooldown for `syncinterval` before becoming
//! schedulable again. A folder is never worked on by two tasks
//! concurrently.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use log::{debug, error};
use tokio::sync::mpsc;

use crate::{
    error::{Error, Result},
    folder::Mailfolder,
};

use super::Syncgroup;

struct SyncResult {
    folderindex: usize,
    folder: Mailfolder,
    error: Option<Error>,
}

/// Runs the scheduling loop until the `interactions` bound is reached
/// (forever when unbounded).
pub(super) async fn run(syncgroup: Arc<Syncgroup>, interactions: Option<u32>) -> Result<()> {
    let folders = syncgroup.sync_folders();
    debug!("folders: {folders:?}");

    if folders.is_empty() {
        return Ok(());
    }

    let maxconcurrent = (syncgroup.config.concurrentsyncs.max(1) as usize).min(folders.len());
    let syncinterval = Duration::from_secs(syncgroup.config.syncinterval);

    // Completions flow through `done`; `sched` has a single slot and
    // edge-triggers the scheduling scan.
    let (done_tx, mut done_rx) = mpsc::channel::<SyncResult>(folders.len());
    let (sched_tx, mut sched_rx) = mpsc::channel::<()>(1);

    let used = Arc::new(Mutex::new(vec![false; folders.len()]));
    let mut running = 0usize;
    let mut counts = vec![0u32; folders.len()];
    let mut folderindex = 0usize;

    let _ = sched_tx.try_send(());

    loop {
        tokio::select! {
            Some(result) = done_rx.recv() => {
                debug!(
                    "sync task for folder {} exited, error: {:?}",
                    result.folder, result.error
                );
                if let Some(err) = result.error {
                    if err.is_terminal() {
                        error!(
                            "sync of folder {} failed and needs operator action: {err}",
                            result.folder
                        );
                    } else {
                        error!("sync of folder {} failed with error: {err}", result.folder);
                    }
                }

                running -= 1;
                counts[result.folderindex] += 1;
                let _ = sched_tx.try_send(());

                // Re-arm the folder once the cooldown elapsed.
                let used = used.clone();
                let sched_tx = sched_tx.clone();
                let folderindex = result.folderindex;
                tokio::spawn(async move {
                    tokio::time::sleep(syncinterval).await;
                    used.lock().unwrap()[folderindex] = false;
                    let _ = sched_tx.try_send(());
                });
            }

            Some(()) = sched_rx.recv() => {
                while running < maxconcurrent {
                    let next = {
                        let mut used = used.lock().unwrap();

                        let mut found = None;
                        for _ in 0..folders.len() {
                            if !used[folderindex] {
                                found = Some(folderindex);
                                break;
                            }
                            folderindex = (folderindex + 1) % folders.len();
                        }

                        if let Some(i) = found {
                            used[i] = true;
                        }
                        found
                    };

                    let Some(i) = next else { break };

                    debug!("starting sync task for folder {}", folders[i]);
                    running += 1;

                    let syncgroup = syncgroup.clone();
                    let folder = folders[i].clone();
                    let done_tx = done_tx.clone();
                    tokio::spawn(async move {
                        let error = syncgroup.sync_folder(&folder).await.err();
                        let _ = done_tx
                            .send(SyncResult {
                                folderindex: i,
                                folder,
                                error,
                            })
                            .await;
                    });
                }
            }
        }

        if let Some(bound) = interactions {
            if counts.iter().all(|count| *count >= bound) {
                break;
            }
        }
    }

    Ok(())
}
