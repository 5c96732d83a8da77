use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::*;
use crate::embedding::encode_embedding;

fn test_paths(prefix: &str) -> (PathBuf, PathBuf, PathBuf) {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock must be monotonic")
        .as_nanos();

    let root = std::env::temp_dir().join(format!("facematch_{prefix}_{timestamp}"));
    let snapshot_path = root.join("snapshot.json");
    let wal_path = root.join("wal.jsonl");
    (root, snapshot_path, wal_path)
}

fn cleanup(root: &Path) {
    if root.exists() {
        fs::remove_dir_all(root).expect("temp directory should be removable");
    }
}

fn persistent_options(snapshot_path: &Path, wal_path: &Path, interval: usize) -> StoreOptions {
    StoreOptions {
        paths: Some(StorePaths {
            snapshot_path: snapshot_path.to_path_buf(),
            wal_path: wal_path.to_path_buf(),
        }),
        sync_on_write: true,
        checkpoint_interval: interval,
    }
}

#[test]
fn insert_lookup_and_delete_in_memory() {
    let store = RecordStore::in_memory();
    assert!(!store.is_persistent());
    assert_eq!(store.count_records().expect("count"), 0);

    let alice = store
        .insert_record("alice", &encode_embedding(&[1.0, 0.0]))
        .expect("insert must succeed");
    assert_eq!(alice, 1);
    assert_eq!(store.count_records().expect("count"), 1);
    assert_eq!(
        store.lookup_label(alice).expect("lookup"),
        Some("alice".to_string())
    );
    assert_eq!(store.find_identity("alice").expect("find"), Some(alice));

    assert!(store.delete_record(alice).expect("delete"));
    assert!(!store.delete_record(alice).expect("second delete"));
    assert_eq!(store.lookup_label(alice).expect("lookup"), None);
    assert_eq!(store.find_identity("alice").expect("find"), None);
}

#[test]
fn rejects_duplicate_and_empty_labels() {
    let store = RecordStore::in_memory();
    store
        .insert_record("alice", &encode_embedding(&[1.0]))
        .expect("insert");

    let error = store
        .insert_record("alice", &encode_embedding(&[0.5]))
        .expect_err("must fail");
    assert!(matches!(error, StoreError::DuplicateLabel(label) if label == "alice"));

    let error = store
        .insert_record("   ", &encode_embedding(&[0.5]))
        .expect_err("must fail");
    assert!(matches!(error, StoreError::InvalidLabel));
    assert_eq!(store.count_records().expect("count"), 1);
}

#[test]
fn identities_increase_and_are_never_reused() {
    let store = RecordStore::in_memory();
    let first = store.insert_record("a", &[0u8; 4]).expect("insert");
    let second = store.insert_record("b", &[0u8; 4]).expect("insert");
    assert!(store.delete_record(second).expect("delete"));

    let third = store.insert_record("c", &[0u8; 4]).expect("insert");
    assert_eq!((first, second, third), (1, 2, 3));

    // The label of a deleted record may be enrolled again under a new identity.
    let again = store.insert_record("b", &[0u8; 4]).expect("insert");
    assert_eq!(again, 4);
}

#[test]
fn fetch_batch_pages_in_creation_order() {
    let store = RecordStore::in_memory();
    for index in 0..7u8 {
        store
            .insert_record(&format!("user-{index}"), &[index; 4])
            .expect("insert");
    }
    assert!(store.delete_record(3).expect("delete"));

    let first = store.fetch_batch(4, 0).expect("fetch");
    let ids: Vec<Identity> = first.iter().map(|(identity, _)| *identity).collect();
    assert_eq!(ids, vec![1, 2, 4, 5]);
    assert_eq!(first[2].1, vec![3u8; 4]);

    let second = store.fetch_batch(4, 4).expect("fetch");
    let ids: Vec<Identity> = second.iter().map(|(identity, _)| *identity).collect();
    assert_eq!(ids, vec![6, 7]);

    assert!(store.fetch_batch(4, 8).expect("fetch").is_empty());
}

#[test]
fn reopen_replays_wal_and_keeps_identity_counter() {
    let (root, snapshot_path, wal_path) = test_paths("store_reopen");

    {
        let store = RecordStore::open(persistent_options(&snapshot_path, &wal_path, 1_000))
            .expect("open must succeed");
        store
            .insert_record("alice", &encode_embedding(&[1.0, 0.0]))
            .expect("insert");
        let bob = store
            .insert_record("bob", &encode_embedding(&[0.0, 1.0]))
            .expect("insert");
        assert!(store.delete_record(bob).expect("delete"));
    }
    assert!(!snapshot_path.exists());

    let store = RecordStore::open(persistent_options(&snapshot_path, &wal_path, 1_000))
        .expect("reopen must succeed");
    assert_eq!(store.count_records().expect("count"), 1);
    assert_eq!(
        store.lookup_label(1).expect("lookup"),
        Some("alice".to_string())
    );
    assert_eq!(store.lookup_label(2).expect("lookup"), None);
    let carol = store
        .insert_record("carol", &encode_embedding(&[0.5, 0.5]))
        .expect("insert");
    assert_eq!(carol, 3);

    cleanup(&root);
}

#[test]
fn checkpoint_writes_snapshot_and_truncates_wal() {
    let (root, snapshot_path, wal_path) = test_paths("store_checkpoint");

    {
        let store = RecordStore::open(persistent_options(&snapshot_path, &wal_path, 2))
            .expect("open must succeed");
        store.insert_record("a", &[1u8; 4]).expect("insert");
        store.insert_record("b", &[2u8; 4]).expect("insert");
        assert!(snapshot_path.exists());
        assert_eq!(fs::read(&wal_path).expect("wal readable").len(), 0);

        assert!(store.delete_record(2).expect("delete"));
        assert!(!fs::read(&wal_path).expect("wal readable").is_empty());
    }

    let store = RecordStore::open(persistent_options(&snapshot_path, &wal_path, 2))
        .expect("reopen must succeed");
    assert_eq!(store.count_records().expect("count"), 1);
    assert_eq!(store.fetch_batch(10, 0).expect("fetch"), vec![(1, vec![1u8; 4])]);
    assert_eq!(store.insert_record("c", &[3u8; 4]).expect("insert"), 3);

    cleanup(&root);
}

#[test]
fn snapshot_keeps_counter_past_deleted_tail() {
    let (root, snapshot_path, wal_path) = test_paths("store_counter");

    {
        let store = RecordStore::open(persistent_options(&snapshot_path, &wal_path, 1_000))
            .expect("open must succeed");
        store.insert_record("a", &[1u8; 4]).expect("insert");
        store.insert_record("b", &[2u8; 4]).expect("insert");
        assert!(store.delete_record(2).expect("delete"));
        store.checkpoint().expect("checkpoint must succeed");
    }

    let store = RecordStore::open(persistent_options(&snapshot_path, &wal_path, 1_000))
        .expect("reopen must succeed");
    assert_eq!(store.insert_record("c", &[3u8; 4]).expect("insert"), 3);

    cleanup(&root);
}

#[test]
fn replay_ignores_torn_final_line() {
    let (root, snapshot_path, wal_path) = test_paths("store_torn_tail");

    {
        let store = RecordStore::open(persistent_options(&snapshot_path, &wal_path, 1_000))
            .expect("open must succeed");
        store.insert_record("a", &[1u8; 4]).expect("insert");
    }
    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(&wal_path)
        .expect("wal must open");
    file.write_all(br#"{"type":"insert_record","identity":2,"lab"#)
        .expect("write must succeed");
    drop(file);

    let store = RecordStore::open(persistent_options(&snapshot_path, &wal_path, 1_000))
        .expect("torn tail must be tolerated");
    assert_eq!(store.count_records().expect("count"), 1);

    cleanup(&root);
}

#[test]
fn appends_after_a_torn_tail_stay_replayable() {
    let (root, snapshot_path, wal_path) = test_paths("store_torn_then_append");

    {
        let store = RecordStore::open(persistent_options(&snapshot_path, &wal_path, 1_000))
            .expect("open must succeed");
        store.insert_record("a", &[1u8; 4]).expect("insert");
    }
    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(&wal_path)
        .expect("wal must open");
    file.write_all(br#"{"type":"insert_record","identity":2,"lab"#)
        .expect("write must succeed");
    drop(file);

    {
        let store = RecordStore::open(persistent_options(&snapshot_path, &wal_path, 1_000))
            .expect("torn tail must be tolerated");
        assert_eq!(store.insert_record("b", &[2u8; 4]).expect("insert"), 2);
    }

    let store = RecordStore::open(persistent_options(&snapshot_path, &wal_path, 1_000))
        .expect("log must stay replayable after appending past a torn tail");
    assert_eq!(store.count_records().expect("count"), 2);
    assert_eq!(store.lookup_label(1).expect("lookup").as_deref(), Some("a"));
    assert_eq!(store.lookup_label(2).expect("lookup").as_deref(), Some("b"));
    let wal = fs::read_to_string(&wal_path).expect("wal must be readable");
    assert!(wal.lines().all(|line| line.ends_with('}')));

    cleanup(&root);
}

#[test]
fn unterminated_final_record_is_not_applied() {
    let (root, snapshot_path, wal_path) = test_paths("store_unterminated");
    fs::create_dir_all(&root).expect("root must be creatable");
    fs::write(
        &wal_path,
        concat!(
            "{\"type\":\"insert_record\",\"identity\":1,\"label\":\"a\",\"embedding\":[1,2,3,4]}\n",
            "{\"type\":\"delete_record\",\"identity\":1}",
        ),
    )
    .expect("wal must be writable");

    let store = RecordStore::open(persistent_options(&snapshot_path, &wal_path, 1_000))
        .expect("open must succeed");
    assert_eq!(store.lookup_label(1).expect("lookup").as_deref(), Some("a"));
    assert!(fs::read_to_string(&wal_path)
        .expect("wal must be readable")
        .ends_with("}\n"));

    cleanup(&root);
}

#[test]
fn replay_rejects_corrupt_middle_line() {
    let (root, snapshot_path, wal_path) = test_paths("store_corrupt");
    fs::create_dir_all(&root).expect("root must be creatable");
    fs::write(
        &wal_path,
        "not json\n{\"type\":\"delete_record\",\"identity\":1}\n",
    )
    .expect("wal must be writable");

    let error = RecordStore::open(persistent_options(&snapshot_path, &wal_path, 1_000))
        .expect_err("must fail");
    assert!(matches!(error, StoreError::InvalidData(message) if message.contains("line 1")));

    cleanup(&root);
}

#[test]
fn replaying_records_twice_is_idempotent() {
    let mut records = Records::new();
    let insert = WalRecord::InsertRecord {
        identity: 5,
        label: "eve".to_string(),
        embedding: vec![9u8; 4],
    };
    records.apply(&insert).expect("first apply");
    records.apply(&insert).expect("second apply");
    assert_eq!(records.iter().count(), 1);
    assert_eq!(records.next_identity(), 6);

    let conflicting = WalRecord::InsertRecord {
        identity: 5,
        label: "mallory".to_string(),
        embedding: vec![1u8; 4],
    };
    assert!(records.apply(&conflicting).is_err());

    let delete = WalRecord::DeleteRecord { identity: 5 };
    records.apply(&delete).expect("delete");
    records.apply(&delete).expect("delete again");
    assert_eq!(records.iter().count(), 0);
}

#[test]
fn rejects_zero_checkpoint_interval() {
    let options = StoreOptions {
        checkpoint_interval: 0,
        ..StoreOptions::in_memory()
    };
    assert!(matches!(
        RecordStore::open(options),
        Err(StoreError::InvalidData(_))
    ));
}
