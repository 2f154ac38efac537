use std::{fs, path::Path, sync::Arc};

use mailsync::{
    store::maildir::MaildirStore, Config, DeleteMode, Flags, Mailfolder, Store, StoreConfig,
    StoreSide, StoreType, SyncStatus, Syncgroup, SyncgroupConfig,
};
use tempfile::TempDir;

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn test_config(root: &Path, deletemode: DeleteMode) -> Config {
    Config {
        metadatadir: root.join("metadatadir"),
        stores: vec![
            StoreConfig {
                name: "store1".into(),
                storetype: StoreType::Maildir,
                maildir: root.join("maildirstore1"),
                ..Default::default()
            },
            StoreConfig {
                name: "store2".into(),
                storetype: StoreType::Maildir,
                maildir: root.join("maildirstore2"),
                separator: '.',
                ..Default::default()
            },
        ],
        syncgroups: vec![SyncgroupConfig {
            name: "syncgroup1".into(),
            stores: vec!["store1".into(), "store2".into()],
            concurrentsyncs: 4,
            syncinterval: 0,
            deletemode,
        }],
        ..Default::default()
    }
}

fn test_folder() -> Mailfolder {
    Mailfolder::new(["dir01", "child01"])
}

/// Creates the test folder on store1 and fills it with 10 flag-less
/// messages and 10 messages flagged `S`, before the syncgroup itself
/// discovers the stores.
async fn seed_store1(config: &Config) {
    let store = MaildirStore::new(
        &config.stores[0],
        &config.metadatadir.join("stores"),
        false,
    )
    .await
    .unwrap();

    let folder = test_folder();
    store.create_folder(&folder).await.unwrap();

    let mut fm = store.folder_manager(&folder).await.unwrap();
    for _ in 0..10 {
        fm.add_message(0, &Flags::new(), b"").await.unwrap();
    }
    for _ in 0..10 {
        fm.add_message(0, &Flags::from("S"), b"").await.unwrap();
    }
}

async fn setup(root: &Path, deletemode: DeleteMode) -> Syncgroup {
    init_logs();
    let config = test_config(root, deletemode);
    config.validate().unwrap();
    seed_store1(&config).await;
    Syncgroup::new(&config, &config.syncgroups[0], false)
        .await
        .unwrap()
}

async fn count_messages(store: &Arc<dyn Store>, folder: &Mailfolder) -> usize {
    let mut fm = store.folder_manager(folder).await.unwrap();
    fm.update_message_list().await.unwrap();
    fm.messages().len()
}

async fn existing_uid(store: &Arc<dyn Store>, folder: &Mailfolder, flags: &str) -> u32 {
    let mut fm = store.folder_manager(folder).await.unwrap();
    fm.update_message_list().await.unwrap();
    fm.messages()
        .into_iter()
        .find(|m| !m.ignored && m.flags == Flags::from(flags))
        .unwrap_or_else(|| panic!("no messages in folder with flags {flags:?}"))
        .uid
}

async fn remove_message(store: &Arc<dyn Store>, folder: &Mailfolder, uid: u32) {
    let mut fm = store.folder_manager(folder).await.unwrap();
    fm.update_message_list().await.unwrap();
    fm.delete_message(uid).await.unwrap();
}

async fn set_message_flags(store: &Arc<dyn Store>, folder: &Mailfolder, uid: u32, flags: &str) {
    let mut fm = store.folder_manager(folder).await.unwrap();
    fm.update_message_list().await.unwrap();
    fm.set_flags(uid, &Flags::from(flags)).await.unwrap();
}

/// Checks that both sides hold `expected` messages, that every store1
/// message is paired through the syncstatus with a store2 message
/// carrying identical flags, and that no temporary UID leaked into
/// either side.
async fn verify_sync(syncgroup: &Syncgroup, folder: &Mailfolder, expected: usize) {
    let store1 = &syncgroup.stores()[0];
    let store2 = &syncgroup.stores()[1];

    let mut fm1 = store1.folder_manager(folder).await.unwrap();
    let mut fm2 = store2.folder_manager(folder).await.unwrap();
    fm1.update_message_list().await.unwrap();
    fm2.update_message_list().await.unwrap();

    assert_eq!(fm1.messages().len(), expected);
    assert_eq!(fm2.messages().len(), expected);

    let mut status = SyncStatus::open(syncgroup.name(), syncgroup.metadatadir(), folder).unwrap();
    status.set_src_store(StoreSide::Store1);

    for message in fm1.messages() {
        assert!(
            message.uid < u32::MAX / 2,
            "temporary uid leaked on store1: {}",
            message.uid
        );

        let dstuid = status
            .dst_uid(message.uid)
            .unwrap()
            .unwrap_or_else(|| panic!("no syncstatus row for store1 uid {}", message.uid));
        assert!(
            dstuid < u32::MAX / 2,
            "temporary uid leaked on store2: {dstuid}"
        );

        let flags2 = fm2.flags(dstuid).unwrap();
        assert_eq!(
            message.flags, flags2,
            "wrong flags for pair ({}, {dstuid})",
            message.uid
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_two_maildir_stores() {
    let root = TempDir::new().unwrap();
    let syncgroup = setup(root.path(), DeleteMode::Expunge).await;
    let folder = test_folder();
    let store1 = syncgroup.stores()[0].clone();
    let store2 = syncgroup.stores()[1].clone();

    syncgroup.sync_folder(&folder).await.unwrap();
    let mut expected = 20;
    verify_sync(&syncgroup, &folder, expected).await;

    // Deletions propagate in both directions, for both flag shapes.
    let uid = existing_uid(&store1, &folder, "").await;
    remove_message(&store1, &folder, uid).await;
    expected -= 1;
    syncgroup.sync_folder(&folder).await.unwrap();
    verify_sync(&syncgroup, &folder, expected).await;

    let uid = existing_uid(&store2, &folder, "").await;
    remove_message(&store2, &folder, uid).await;
    expected -= 1;
    syncgroup.sync_folder(&folder).await.unwrap();
    verify_sync(&syncgroup, &folder, expected).await;

    let uid = existing_uid(&store1, &folder, "S").await;
    remove_message(&store1, &folder, uid).await;
    expected -= 1;
    syncgroup.sync_folder(&folder).await.unwrap();
    verify_sync(&syncgroup, &folder, expected).await;

    let uid = existing_uid(&store2, &folder, "S").await;
    remove_message(&store2, &folder, uid).await;
    expected -= 1;
    syncgroup.sync_folder(&folder).await.unwrap();
    verify_sync(&syncgroup, &folder, expected).await;

    // Flag changes propagate in both directions.
    let uid = existing_uid(&store2, &folder, "S").await;
    set_message_flags(&store2, &folder, uid, "T").await;
    syncgroup.sync_folder(&folder).await.unwrap();
    verify_sync(&syncgroup, &folder, expected).await;

    let uid = existing_uid(&store1, &folder, "").await;
    set_message_flags(&store1, &folder, uid, "D").await;
    syncgroup.sync_folder(&folder).await.unwrap();
    verify_sync(&syncgroup, &folder, expected).await;

    // Files dropped raw into the Maildir get a temporary uid, then a
    // permanent one during their first sync pass.
    fs::write(
        root.path().join("maildirstore1/dir01/child01/new/file01"),
        b"fresh",
    )
    .unwrap();
    expected += 1;
    syncgroup.sync_folder(&folder).await.unwrap();
    verify_sync(&syncgroup, &folder, expected).await;

    fs::write(
        root.path().join("maildirstore2/dir01.child01/cur/file02:2,S"),
        b"fresh",
    )
    .unwrap();
    expected += 1;
    syncgroup.sync_folder(&folder).await.unwrap();
    verify_sync(&syncgroup, &folder, expected).await;

    // A pass over a synced folder changes nothing.
    syncgroup.sync_folder(&folder).await.unwrap();
    verify_sync(&syncgroup, &folder, expected).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn flag_deletemode_leaves_and_redownloads_messages() {
    let root = TempDir::new().unwrap();
    let syncgroup = setup(root.path(), DeleteMode::Flag).await;
    let folder = test_folder();
    let store1 = syncgroup.stores()[0].clone();
    let store2 = syncgroup.stores()[1].clone();

    syncgroup.sync_folder(&folder).await.unwrap();
    let expected = 20;
    verify_sync(&syncgroup, &folder, expected).await;

    // Deleting on store1 only flags the store2 copy; the reverse
    // direction of the same pass downloads it back, `T` included.
    let uid = existing_uid(&store1, &folder, "S").await;
    remove_message(&store1, &folder, uid).await;
    syncgroup.sync_folder(&folder).await.unwrap();
    verify_sync(&syncgroup, &folder, expected).await;

    // Deleting on store2: the store1 copy gets flagged during this
    // pass, and the next pass re-uploads it to store2.
    let uid = existing_uid(&store2, &folder, "S").await;
    remove_message(&store2, &folder, uid).await;
    syncgroup.sync_folder(&folder).await.unwrap();

    assert_eq!(count_messages(&store1, &folder).await, expected);
    assert_eq!(count_messages(&store2, &folder).await, expected - 1);

    syncgroup.sync_folder(&folder).await.unwrap();
    verify_sync(&syncgroup, &folder, expected).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_uid_files_are_kept_out_of_the_sync() {
    init_logs();
    let root = TempDir::new().unwrap();
    let config = test_config(root.path(), DeleteMode::Expunge);

    // One regular message plus two files carrying the same embedded
    // uid.
    {
        let store = MaildirStore::new(
            &config.stores[0],
            &config.metadatadir.join("stores"),
            false,
        )
        .await
        .unwrap();
        let folder = test_folder();
        store.create_folder(&folder).await.unwrap();
        let mut fm = store.folder_manager(&folder).await.unwrap();
        fm.add_message(0, &Flags::new(), b"regular").await.unwrap();
    }

    let maildir = root.path().join("maildirstore1/dir01/child01");
    let folderuid = fs::read_to_string(maildir.join(".gomailsync-folderuid")).unwrap();
    for stem in ["1397565555_19.22053.host", "1397565556_20.22053.host"] {
        fs::write(
            maildir.join("cur").join(format!("{stem},u=19,f={folderuid}:2,S")),
            b"dup",
        )
        .unwrap();
    }

    let syncgroup = Syncgroup::new(&config, &config.syncgroups[0], false)
        .await
        .unwrap();
    let folder = test_folder();
    syncgroup.sync_folder(&folder).await.unwrap();

    let store1 = &syncgroup.stores()[0];
    let store2 = &syncgroup.stores()[1];

    let mut fm1 = store1.folder_manager(&folder).await.unwrap();
    fm1.update_message_list().await.unwrap();
    assert!(fm1.is_ignored(19));
    assert_eq!(fm1.ignored_messages(), [19]);

    // Only the regular message made it to the other side, and uid 19
    // never entered the syncstatus.
    assert_eq!(count_messages(store2, &folder).await, 1);
    let mut status = SyncStatus::open(syncgroup.name(), syncgroup.metadatadir(), &folder).unwrap();
    status.set_src_store(StoreSide::Store1);
    assert_eq!(status.dst_uid(19).unwrap(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn scheduler_stops_after_the_interactions_bound() {
    let root = TempDir::new().unwrap();
    let syncgroup = Arc::new(setup(root.path(), DeleteMode::Expunge).await);
    let folder = test_folder();

    assert_eq!(syncgroup.sync_folders(), [folder.clone()]);

    syncgroup.clone().sync(Some(2)).await.unwrap();
    verify_sync(&syncgroup, &folder, 20).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn dryrun_changes_nothing() {
    init_logs();
    let root = TempDir::new().unwrap();
    let config = test_config(root.path(), DeleteMode::Expunge);
    seed_store1(&config).await;

    let syncgroup = Syncgroup::new(&config, &config.syncgroups[0], true)
        .await
        .unwrap();
    let folder = test_folder();
    syncgroup.sync_folder(&folder).await.unwrap();

    // store2 still has no folder on disk, nothing was copied.
    assert!(!root.path().join("maildirstore2/dir01.child01").exists());
    let mut status = SyncStatus::open(syncgroup.name(), syncgroup.metadatadir(), &folder).unwrap();
    status.set_src_store(StoreSide::Store1);
    assert_eq!(status.dst_uid(0).unwrap(), None);
}
