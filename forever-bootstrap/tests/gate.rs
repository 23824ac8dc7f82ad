//! Gate behaviour against a real on-disk marker store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use forever_bootstrap::store::MARKER_DB;
use forever_bootstrap::{MarkerStore, OneTimeGate, Scope, SqliteMarkerStore};

#[test]
fn racing_threads_run_init_once() {
    const THREADS: usize = 8;
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(OneTimeGate::new(
        SqliteMarkerStore::open(&dir.path().join(MARKER_DB)).unwrap(),
    ));
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let gate = Arc::clone(&gate);
            let calls = Arc::clone(&calls);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                gate.ensure_run_once("init", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    Ok::<_, String>(())
                })
                .unwrap()
                .ran
            })
        })
        .collect();

    let ran: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(ran.iter().filter(|r| **r).count(), 1);
    assert_eq!(ran.iter().filter(|r| !**r).count(), THREADS - 1);
}

#[test]
fn failed_first_caller_lets_the_next_one_retry() {
    let gate = Arc::new(OneTimeGate::new(SqliteMarkerStore::in_memory().unwrap()));
    let calls = AtomicUsize::new(0);

    let first = gate.ensure_run_once("init", || {
        calls.fetch_add(1, Ordering::SeqCst);
        Err("first attempt fails".to_string())
    });
    assert!(first.is_err());

    let second = gate
        .ensure_run_once("init", || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(())
        })
        .unwrap();
    assert!(second.ran);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn marker_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(MARKER_DB);

    {
        let gate = OneTimeGate::new(SqliteMarkerStore::open(&path).unwrap());
        assert!(gate.ensure_run_once("init", || Ok::<_, String>(())).unwrap().ran);
    }

    let gate = OneTimeGate::new(SqliteMarkerStore::open(&path).unwrap());
    let outcome = gate
        .ensure_run_once("init", || -> Result<(), String> { panic!("already initialized") })
        .unwrap();
    assert!(!outcome.ran);
    let marker = gate.store().read("init").unwrap().unwrap();
    assert!(marker.satisfied);
    assert!(marker.persisted_at.is_some());
}

#[test]
fn upgrade_reruns_version_scoped_init() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(MARKER_DB);
    let open = |version: &str| {
        OneTimeGate::new(SqliteMarkerStore::open(&path).unwrap())
            .with_scope(Scope::AppVersion(version.to_string()))
    };

    assert!(open("1.0.0").ensure_run_once("init", || Ok::<_, String>(())).unwrap().ran);
    assert!(!open("1.0.0").ensure_run_once("init", || Ok::<_, String>(())).unwrap().ran);
    assert!(open("1.1.0").ensure_run_once("init", || Ok::<_, String>(())).unwrap().ran);
}

#[test]
fn corrupted_store_fails_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(MARKER_DB);
    {
        let gate = OneTimeGate::new(SqliteMarkerStore::open(&path).unwrap());
        gate.ensure_run_once("init", || Ok::<_, String>(())).unwrap();
    }
    for suffix in ["-wal", "-shm"] {
        let _ = std::fs::remove_file(dir.path().join(format!("{MARKER_DB}{suffix}")));
    }
    std::fs::write(&path, vec![0xffu8; 8192]).unwrap();

    let gate = OneTimeGate::new(SqliteMarkerStore::open(&path).unwrap());
    assert!(!gate.is_satisfied("init"));
    assert!(gate.ensure_run_once("init", || Ok::<_, String>(())).unwrap().ran);
}
