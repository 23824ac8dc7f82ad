//! Bootstrap sequencing with the real restart signal and a spying gate.

use std::sync::atomic::{AtomicUsize, Ordering};

use forever_bootstrap::store::MARKER_DB;
use forever_bootstrap::{
    BootstrapConfig, BootstrapState, GateError, InitError, InitGate, OneTimeGate,
    ProcessClassifier, ProcessIdentity, RestartSignal, RunOutcome, Sequencer, SqliteMarkerStore,
};

/// Counts gate invocations, delegating to a real gate.
struct SpyGate {
    inner: OneTimeGate<SqliteMarkerStore>,
    calls: AtomicUsize,
}

impl SpyGate {
    fn new() -> Self {
        Self {
            inner: OneTimeGate::new(SqliteMarkerStore::in_memory().unwrap()),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl InitGate for SpyGate {
    fn run_once(
        &self,
        key: &str,
        init: &mut dyn FnMut() -> Result<(), InitError>,
    ) -> Result<RunOutcome, GateError<InitError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.run_once(key, init)
    }
}

/// The restart signal with the environment value supplied by the test.
struct Launched {
    signal: RestartSignal,
    env_token: Option<String>,
}

impl ProcessClassifier for Launched {
    fn classify(&self) -> ProcessIdentity {
        self.signal.classify_token(self.env_token.as_deref())
    }

    fn consume(&self) {
        self.signal.consume();
    }
}

#[test]
fn restart_of_self_reaches_ready_without_touching_the_gate() {
    let dir = tempfile::tempdir().unwrap();
    let signal = RestartSignal::new(dir.path());
    let token = signal.issue().unwrap();

    let seq = Sequencer::new(
        Launched {
            signal: signal.clone(),
            env_token: Some(token),
        },
        SpyGate::new(),
    );
    let report = seq.run(|| panic!("init must not run on restart")).unwrap();

    assert!(report.identity.is_restart_of_self);
    assert_eq!(
        report.states,
        vec![
            BootstrapState::Start,
            BootstrapState::IdentityClassified,
            BootstrapState::Skipped,
            BootstrapState::Ready
        ]
    );
    assert_eq!(seq.gate().calls(), 0);
    assert!(!signal.token_path().exists());
}

#[test]
fn restart_token_is_honoured_once() {
    let dir = tempfile::tempdir().unwrap();
    let signal = RestartSignal::new(dir.path());
    let token = signal.issue().unwrap();
    let launched = || Launched {
        signal: signal.clone(),
        env_token: Some(token.clone()),
    };
    let gate = SpyGate::new();

    // restart, then a child that inherited the environment
    let first = Sequencer::new(launched(), &gate).run(|| Ok(())).unwrap();
    let second = Sequencer::new(launched(), &gate).run(|| Ok(())).unwrap();

    assert!(first.identity.is_restart_of_self);
    assert!(!second.identity.is_restart_of_self);
    assert!(second.ran());
    assert_eq!(gate.calls(), 1);
}

#[test]
fn cold_start_runs_init_then_skips_on_next_launch() {
    let dir = tempfile::tempdir().unwrap();
    let config = BootstrapConfig {
        data_dir: Some(dir.path().to_path_buf()),
        ..BootstrapConfig::default()
    };
    let runs = AtomicUsize::new(0);
    let init = || {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    };

    let first = forever_bootstrap::bootstrap(&config, init).unwrap();
    let second = forever_bootstrap::bootstrap(&config, init).unwrap();

    assert!(first.ran());
    assert!(!second.ran());
    assert_eq!(second.state(), BootstrapState::Ready);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(dir.path().join(MARKER_DB).exists());
}

fn broken_store_config(dir: &std::path::Path) -> BootstrapConfig {
    // A directory where the database file should be cannot be opened.
    std::fs::create_dir(dir.join(MARKER_DB)).unwrap();
    BootstrapConfig {
        data_dir: Some(dir.to_path_buf()),
        ..BootstrapConfig::default()
    }
}

#[test]
fn restart_of_self_does_not_need_the_marker_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = broken_store_config(dir.path());
    let signal = config.restart_signal().unwrap();
    let token = signal.issue().unwrap();

    let seq = Sequencer::new(
        Launched {
            signal: signal.clone(),
            env_token: Some(token),
        },
        config.gate().unwrap(),
    );
    let report = seq.run(|| panic!("init must not run on restart")).unwrap();

    assert_eq!(report.state(), BootstrapState::Ready);
    assert!(report.states.contains(&BootstrapState::Skipped));
    assert!(!seq.gate().is_open());
    assert!(!signal.token_path().exists());
    assert!(!dir.path().join(format!("{MARKER_DB}.corrupt")).exists());
}

#[test]
fn ordinary_launch_reports_an_unusable_marker_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = broken_store_config(dir.path());

    let err = forever_bootstrap::bootstrap(&config, || panic!("init must not run")).unwrap_err();
    assert!(matches!(err, forever_bootstrap::BootstrapError::Store(_)));
}
