//! Concurrency tests: per-session serialization and load/release races.

use profile_replication::backend::UpdateFn;
use profile_replication::{
    MemoryBackend, ProfileBackend, ProfileError, ProfileEvent, ProfileReplication, ProfileStore,
    ProfileStoreConfig, SessionEvent, SessionId, SessionState, StoredProfile, SubscriptionConfig,
    SubscriptionFilter, Value,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const THREADS: usize = 8;
const OPS_PER_THREAD: usize = 250;

/// Memory backend that stalls a number of upcoming writes.
struct StallingBackend {
    inner: MemoryBackend,
    delay: Duration,
    stalls: AtomicUsize,
}

impl StallingBackend {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryBackend::new(),
            delay,
            stalls: AtomicUsize::new(0),
        })
    }

    /// Stall the next `count` updates before they touch the record.
    fn stall_next(&self, count: usize) {
        self.stalls.store(count, Ordering::SeqCst);
    }
}

impl ProfileBackend for StallingBackend {
    fn read(&self, key: &str) -> profile_replication::Result<Option<StoredProfile>> {
        self.inner.read(key)
    }

    fn update(&self, key: &str, transform: &mut UpdateFn<'_>) -> profile_replication::Result<StoredProfile> {
        let stall = self
            .stalls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stall {
            thread::sleep(self.delay);
        }
        self.inner.update(key, transform)
    }

    fn remove(&self, key: &str) -> profile_replication::Result<bool> {
        self.inner.remove(key)
    }
}

fn stalling_store(backend: &Arc<StallingBackend>) -> ProfileStore {
    let store = ProfileStore::new(
        ProfileStoreConfig {
            owner_id: "server-a".into(),
            load_timeout: Duration::from_secs(5),
            ..Default::default()
        },
        backend.clone(),
    );
    store
        .initialize("PlayerData", Value::from_json(json!({"gold": 0})).unwrap())
        .unwrap();
    store
}

fn test_store() -> Arc<ProfileStore> {
    let store = ProfileStore::in_memory(ProfileStoreConfig {
        owner_id: "server-a".into(),
        load_timeout: Duration::from_secs(5),
        ..Default::default()
    });
    store
        .initialize("PlayerData", Value::from_json(json!({"gold": 0, "log": []})).unwrap())
        .unwrap();
    Arc::new(store)
}

#[test]
fn test_concurrent_increments_are_not_lost() {
    let store = test_store();
    store.load(SessionId(1)).unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));

    let start = Instant::now();
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..OPS_PER_THREAD {
                    store.increment(SessionId(1), "gold", 1).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    println!(
        "  {} increments took {:.2}ms",
        THREADS * OPS_PER_THREAD,
        start.elapsed().as_secs_f64() * 1000.0
    );

    assert_eq!(
        store.get_value(SessionId(1), "gold").unwrap(),
        Some(Value::from((THREADS * OPS_PER_THREAD) as i64))
    );
}

#[test]
fn test_sessions_do_not_share_state() {
    let store = test_store();
    let handles: Vec<_> = (1..=THREADS as u64)
        .map(|id| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let session = SessionId(id);
                store.load(session).unwrap();
                for i in 0..50 {
                    store.increment(session, "gold", id as i64).unwrap();
                    store.add_table(session, "log", Value::map(), None).unwrap();
                    store.set(session, format!("log.{}.n", i), i as i64).unwrap();
                }
                store.release(session).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for id in 1..=THREADS as u64 {
        let stored = store.backend().read(&format!("Player_{}", id)).unwrap().unwrap();
        assert_eq!(stored.data.get("gold"), Some(&Value::from(id as i64 * 50)));
        assert_eq!(stored.data.get("log").and_then(Value::as_list).map(Vec::len), Some(50));
    }
    assert!(store.active_sessions().is_empty());
}

#[test]
fn test_concurrent_loads_share_one_profile() {
    let store = test_store();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.load(SessionId(1)).unwrap()
            })
        })
        .collect();
    let profiles: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for profile in &profiles[1..] {
        assert!(profile_replication::ProfileRef::ptr_eq(&profiles[0], profile));
    }
    let stored = store.backend().read("Player_1").unwrap().unwrap();
    assert_eq!(stored.meta.load_count, 1);
}

#[test]
fn test_release_racing_background_load() {
    let dir = TempDir::new().unwrap();
    let store = ProfileStore::open(
        ProfileStoreConfig {
            owner_id: "server-a".into(),
            ..Default::default()
        },
        dir.path(),
    )
    .unwrap();
    store.initialize("PlayerData", Value::map()).unwrap();
    let store = Arc::new(store);
    let lifecycle = store.signals().subscribe(SubscriptionConfig {
        filter: SubscriptionFilter::lifecycle(),
        ..Default::default()
    });

    for id in 1..=20u64 {
        let session = SessionId(id);
        let handle = store.load_in_background(session).unwrap().unwrap();
        store.release(session).unwrap();

        match handle.join().unwrap() {
            Ok(_) | Err(ProfileError::LoadCancelled(_)) => {}
            Err(e) => panic!("unexpected load error: {}", e),
        }
    }

    let released = lifecycle
        .drain()
        .into_iter()
        .filter(|e| matches!(e, ProfileEvent::Released { .. }))
        .count();
    assert_eq!(released, 20);

    // Every profile ended up unlocked, whichever side won the race
    for id in 1..=20u64 {
        let stored = store.backend().read(&format!("Player_{}", id)).unwrap().unwrap();
        assert_eq!(stored.owner, None);
    }
    assert!(store.active_sessions().is_empty());
}

#[test]
fn test_waiters_see_cancellation() {
    let store = test_store();
    let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

    let handle = store.load_in_background(SessionId(4)).unwrap().unwrap();
    let pending = store.get_profile_async(SessionId(4)).unwrap();
    let waiter = thread::spawn(move || {
        ready_tx.send(()).unwrap();
        pending.wait()
    });
    ready_rx.recv().unwrap();
    store.release(SessionId(4)).unwrap();

    match waiter.join().unwrap() {
        Ok(profile) => assert!(!profile.is_active()),
        Err(ProfileError::LoadCancelled(_)) | Err(ProfileError::SessionNotActive(_)) => {}
        Err(e) => panic!("unexpected wait error: {}", e),
    }
    let _ = handle.join().unwrap();
}

// --- Rejoin Races ---

#[test]
fn test_reload_waits_for_release_write() {
    let backend = StallingBackend::new(Duration::from_millis(300));
    let store = Arc::new(stalling_store(&backend));

    store.load(SessionId(1)).unwrap();
    store.set(SessionId(1), "gold", 99).unwrap();

    backend.stall_next(1);
    let releaser = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.release(SessionId(1)))
    };
    thread::sleep(Duration::from_millis(100));

    // The release write is still stalled; the reload must see it anyway
    let profile = store.load(SessionId(1)).unwrap();
    releaser.join().unwrap().unwrap();

    assert_eq!(profile.data().unwrap().get("gold"), Some(&Value::from(99)));
    assert_eq!(profile.meta().unwrap().load_count, 2);
    assert_eq!(store.session_state(SessionId(1)), Some(SessionState::Active));

    let stored = backend.read("Player_1").unwrap().unwrap();
    assert_eq!(stored.owner.as_deref(), Some("server-a"));
}

#[test]
fn test_reload_after_cancelled_load() {
    let backend = StallingBackend::new(Duration::from_millis(200));
    let store = Arc::new(stalling_store(&backend));

    backend.stall_next(1);
    let first = store.load_in_background(SessionId(1)).unwrap().unwrap();
    store.release(SessionId(1)).unwrap();

    let profile = store.load(SessionId(1)).unwrap();
    assert!(matches!(first.join().unwrap(), Err(ProfileError::LoadCancelled(_))));

    assert!(profile.is_active());
    assert_eq!(store.data(SessionId(1)).unwrap().get("gold"), Some(&Value::from(0)));
    assert_eq!(store.active_sessions(), vec![SessionId(1)]);

    let stored = backend.read("Player_1").unwrap().unwrap();
    assert_eq!(stored.owner.as_deref(), Some("server-a"));
}

#[test]
fn test_worker_rejoin_during_slow_load() {
    let backend = StallingBackend::new(Duration::from_millis(200));
    let replication = ProfileReplication::new(stalling_store(&backend));
    let lifecycle = replication.subscribe(SubscriptionConfig {
        filter: SubscriptionFilter::lifecycle(),
        ..Default::default()
    });

    backend.stall_next(1);
    let (tx, rx) = crossbeam_channel::unbounded();
    let worker = replication.start(rx, Vec::new()).unwrap();
    tx.send(SessionEvent::Connected(SessionId(1))).unwrap();
    tx.send(SessionEvent::Disconnecting(SessionId(1))).unwrap();
    tx.send(SessionEvent::Connected(SessionId(1))).unwrap();
    drop(tx);
    worker.join().unwrap();

    loop {
        let event = lifecycle.recv_timeout(Duration::from_secs(5)).unwrap();
        if matches!(event, ProfileEvent::Loaded { session } if session == SessionId(1)) {
            break;
        }
    }

    assert_eq!(replication.store().session_state(SessionId(1)), Some(SessionState::Active));
    let data = replication.get_player_data(SessionId(1)).unwrap();
    assert_eq!(data.get("gold"), Some(&Value::from(0)));
    assert!(replication.shutdown().is_clean());
}
