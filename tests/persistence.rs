//! Persistence tests: file backend, template migration and session locks.

use profile_replication::{
    FileBackend, ProfileBackend, ProfileError, ProfileStore, ProfileStoreConfig, SessionId, Value,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn config(owner: &str) -> ProfileStoreConfig {
    ProfileStoreConfig {
        owner_id: owner.into(),
        load_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

fn open_store(path: &Path, owner: &str, template: serde_json::Value) -> ProfileStore {
    let store = ProfileStore::open(config(owner), path).unwrap();
    store
        .initialize("PlayerData", Value::from_json(template).unwrap())
        .unwrap();
    store
}

// --- Reopen Tests ---

#[test]
fn test_profile_survives_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let store = open_store(dir.path(), "server-a", json!({"gold": 0, "items": []}));
        store.load(SessionId(1)).unwrap();
        store.increment(SessionId(1), "gold", 99).unwrap();
        store
            .add_table(SessionId(1), "items", Value::from_json(json!({"id": 1})).unwrap(), None)
            .unwrap();
        store.release(SessionId(1)).unwrap();
    }

    let store = open_store(dir.path(), "server-a", json!({"gold": 0, "items": []}));
    let profile = store.load(SessionId(1)).unwrap();
    assert_eq!(
        profile.data().unwrap(),
        Value::from_json(json!({"gold": 99, "items": [{"id": 1}]})).unwrap()
    );
    let meta = profile.meta().unwrap();
    assert_eq!(meta.load_count, 2);
    assert!(meta.last_saved.is_some());
}

#[test]
fn test_template_additions_fill_old_profiles() {
    let dir = TempDir::new().unwrap();

    {
        let store = open_store(dir.path(), "server-a", json!({"gold": 0}));
        store.load(SessionId(1)).unwrap();
        store.set(SessionId(1), "gold", 5).unwrap();
        store.release(SessionId(1)).unwrap();
    }

    let store = open_store(
        dir.path(),
        "server-a",
        json!({"gold": 0, "gems": 0, "settings": {"music": true}}),
    );
    let data = store.load(SessionId(1)).unwrap().data().unwrap();
    assert_eq!(
        data,
        Value::from_json(json!({"gold": 5, "gems": 0, "settings": {"music": true}})).unwrap()
    );
}

#[test]
fn test_save_writes_through_without_release() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path(), "server-a", json!({"gold": 0}));
    store.load(SessionId(1)).unwrap();
    store.set(SessionId(1), "gold", 12).unwrap();

    let report = store.save_all();
    assert_eq!(report.succeeded, vec![SessionId(1)]);

    // A second backend over the same directory sees the write
    let backend = FileBackend::new(dir.path(), 10).unwrap();
    let stored = backend.read("Player_1").unwrap().unwrap();
    assert_eq!(stored.data.get("gold"), Some(&Value::from(12)));
    assert_eq!(stored.owner.as_deref(), Some("server-a"));
    assert_eq!(backend.keys().unwrap(), vec!["Player_1".to_string()]);
}

// --- Session Locks ---

#[test]
fn test_profile_locked_by_other_server() {
    let dir = TempDir::new().unwrap();
    let a = open_store(dir.path(), "server-a", json!({"gold": 0}));
    let b = open_store(dir.path(), "server-b", json!({"gold": 0}));

    a.load(SessionId(1)).unwrap();
    let result = b.load(SessionId(1));
    assert!(matches!(
        result,
        Err(ProfileError::ProfileLocked { ref owner, .. }) if owner == "server-a"
    ));
    // The failed load is forgotten and can be retried
    assert_eq!(b.session_state(SessionId(1)), None);

    a.release(SessionId(1)).unwrap();
    b.load(SessionId(1)).unwrap();
}

#[test]
fn test_force_load_takes_over() {
    let dir = TempDir::new().unwrap();
    let a = open_store(dir.path(), "server-a", json!({"gold": 0}));
    let b = ProfileStore::open(
        ProfileStoreConfig {
            force_load: true,
            ..config("server-b")
        },
        dir.path(),
    )
    .unwrap();
    b.initialize("PlayerData", Value::from_json(json!({"gold": 0})).unwrap())
        .unwrap();

    a.load(SessionId(1)).unwrap();
    a.set(SessionId(1), "gold", 1).unwrap();
    a.save(SessionId(1)).unwrap();

    b.load(SessionId(1)).unwrap();
    b.set(SessionId(1), "gold", 2).unwrap();

    // The old owner can no longer write the record
    assert!(matches!(a.save(SessionId(1)), Err(ProfileError::ProfileLocked { .. })));
    assert!(matches!(a.release(SessionId(1)), Err(ProfileError::ProfileLocked { .. })));
    assert!(matches!(a.data(SessionId(1)), Err(ProfileError::SessionNotActive(_))));

    b.release(SessionId(1)).unwrap();
    let stored = FileBackend::new(dir.path(), 10)
        .unwrap()
        .read("Player_1")
        .unwrap()
        .unwrap();
    assert_eq!(stored.data.get("gold"), Some(&Value::from(2)));
    assert_eq!(stored.owner, None);
}

#[test]
fn test_corrupt_record_fails_load() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path(), "server-a", json!({"gold": 0}));
    store.load(SessionId(1)).unwrap();
    store.release(SessionId(1)).unwrap();

    // Flip a byte in the body of every stored profile
    for shard in std::fs::read_dir(dir.path()).unwrap() {
        for file in std::fs::read_dir(shard.unwrap().path()).unwrap() {
            let path = file.unwrap().path();
            if path.extension().and_then(|e| e.to_str()) == Some("prof") {
                let mut bytes = std::fs::read(&path).unwrap();
                let last = bytes.len() - 6;
                bytes[last] ^= 0xff;
                std::fs::write(&path, bytes).unwrap();
            }
        }
    }

    let reopened = open_store(dir.path(), "server-a", json!({"gold": 0}));
    let result = reopened.load(SessionId(1));
    assert!(matches!(result, Err(ProfileError::ChecksumMismatch { .. })));
}

#[test]
fn test_custom_backend_and_key_prefix() {
    let backend = Arc::new(profile_replication::MemoryBackend::new());
    let store = ProfileStore::new(
        ProfileStoreConfig {
            key_prefix: "Guild_".into(),
            ..config("server-a")
        },
        backend.clone(),
    );
    store.initialize("GuildData", Value::map()).unwrap();

    store.load(SessionId(8)).unwrap();
    store.set(SessionId(8), "motto", "onward").unwrap();
    store.release(SessionId(8)).unwrap();

    assert_eq!(backend.len(), 1);
    let stored = backend.read("Guild_8").unwrap().unwrap();
    assert_eq!(stored.data.get("motto"), Some(&Value::from("onward")));
}
