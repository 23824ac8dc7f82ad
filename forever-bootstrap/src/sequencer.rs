//! Application Bootstrap Sequencer.
//!
//! ```text
//! Start ─► IdentityClassified ─┬─ restart of self ─► Skipped ─────┬─► Ready
//!                              └─ ordinary launch ─► GateChecked ─┘
//! ```
//!
//! A restart of self never touches the gate, and the production gate does not
//! open the marker database until it is asked to run. Every state passed
//! through is recorded in the [`BootstrapReport`].

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::{BootstrapError, GateError, InitError, StoreError};
use crate::gate::{OneTimeGate, RunOutcome, Scope};
use crate::identity::{ProcessClassifier, ProcessIdentity, RestartSignal};
use crate::store::{MARKER_DB, MarkerStore, SqliteMarkerStore};

pub const DEFAULT_INIT_KEY: &str = "forever.init";

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BootstrapState {
    Start = 0,
    IdentityClassified = 1,
    Skipped = 2,
    GateChecked = 3,
    Ready = 4,
}

/// The seam between the sequencer and the gate.
pub trait InitGate {
    fn run_once(
        &self,
        key: &str,
        init: &mut dyn FnMut() -> Result<(), InitError>,
    ) -> Result<RunOutcome, GateError<InitError>>;
}

impl<S: MarkerStore> InitGate for OneTimeGate<S> {
    fn run_once(
        &self,
        key: &str,
        init: &mut dyn FnMut() -> Result<(), InitError>,
    ) -> Result<RunOutcome, GateError<InitError>> {
        self.ensure_run_once(key, init)
    }
}

impl<G: InitGate + ?Sized> InitGate for &G {
    fn run_once(
        &self,
        key: &str,
        init: &mut dyn FnMut() -> Result<(), InitError>,
    ) -> Result<RunOutcome, GateError<InitError>> {
        (**self).run_once(key, init)
    }
}

/// A [`OneTimeGate`] over the SQLite marker database at `path`, opened on
/// first use.
pub struct SqliteGate {
    path: PathBuf,
    scope: Scope,
    gate: OnceCell<OneTimeGate<SqliteMarkerStore>>,
}

impl SqliteGate {
    pub fn new(path: PathBuf, scope: Scope) -> Self {
        Self {
            path,
            scope,
            gate: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.gate.get().is_some()
    }

    fn open(&self) -> Result<&OneTimeGate<SqliteMarkerStore>, StoreError> {
        self.gate.get_or_try_init(|| {
            let store = SqliteMarkerStore::open(&self.path)?;
            Ok(OneTimeGate::new(store).with_scope(self.scope.clone()))
        })
    }
}

impl InitGate for SqliteGate {
    fn run_once(
        &self,
        key: &str,
        init: &mut dyn FnMut() -> Result<(), InitError>,
    ) -> Result<RunOutcome, GateError<InitError>> {
        self.open()
            .map_err(GateError::Unavailable)?
            .run_once(key, init)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapReport {
    pub identity: ProcessIdentity,
    /// `None` when the gate was skipped.
    pub outcome: Option<RunOutcome>,
    pub states: Vec<BootstrapState>,
}

impl BootstrapReport {
    pub fn state(&self) -> BootstrapState {
        self.states.last().copied().unwrap_or(BootstrapState::Start)
    }

    /// Whether the one-time initialization ran in this process.
    pub fn ran(&self) -> bool {
        self.outcome.is_some_and(|o| o.ran)
    }
}

pub struct Sequencer<C, G> {
    classifier: C,
    gate: G,
    init_key: String,
}

impl<C: ProcessClassifier, G: InitGate> Sequencer<C, G> {
    pub fn new(classifier: C, gate: G) -> Self {
        Self {
            classifier,
            gate,
            init_key: DEFAULT_INIT_KEY.to_string(),
        }
    }

    pub fn with_init_key(mut self, key: &str) -> Self {
        self.init_key = key.to_string();
        self
    }

    pub fn gate(&self) -> &G {
        &self.gate
    }

    pub fn run<F>(&self, init: F) -> Result<BootstrapReport, BootstrapError>
    where
        F: FnOnce() -> Result<(), InitError>,
    {
        let mut states = vec![BootstrapState::Start];

        let identity = self.classifier.classify();
        self.classifier.consume();
        states.push(BootstrapState::IdentityClassified);
        tracing::debug!(restart = identity.is_restart_of_self, "Process identity classified");

        let outcome = if identity.is_restart_of_self {
            states.push(BootstrapState::Skipped);
            tracing::info!("Restart of self, skipping one-time initialization");
            None
        } else {
            let mut init = Some(init);
            let mut call = || init.take().map_or(Ok(()), |f| f());
            let outcome = self.gate.run_once(&self.init_key, &mut call)?;
            states.push(BootstrapState::GateChecked);
            Some(outcome)
        };

        states.push(BootstrapState::Ready);
        Ok(BootstrapReport {
            identity,
            outcome,
            states,
        })
    }
}

/// Runtime configuration handed over by the host application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Defaults to `<platform data dir>/forever`.
    pub data_dir: Option<PathBuf>,
    pub init_key: Option<String>,
    pub scope: Scope,
    /// Shorthand for `scope = app-version`.
    pub app_version: Option<String>,
}

impl BootstrapConfig {
    pub fn from_json(json: &str) -> Result<Self, BootstrapError> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(json).map_err(|e| BootstrapError::Config(e.to_string()))
    }

    pub fn data_dir(&self) -> Result<PathBuf, BootstrapError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|d| d.join("forever"))
                .ok_or(BootstrapError::NoDataDir),
        }
    }

    pub fn init_key(&self) -> &str {
        self.init_key.as_deref().unwrap_or(DEFAULT_INIT_KEY)
    }

    pub fn effective_scope(&self) -> Scope {
        match &self.app_version {
            Some(version) => Scope::AppVersion(version.clone()),
            None => self.scope.clone(),
        }
    }

    pub fn restart_signal(&self) -> Result<RestartSignal, BootstrapError> {
        Ok(RestartSignal::new(&self.data_dir()?))
    }

    /// The marker gate for this config. Nothing is opened yet.
    pub fn gate(&self) -> Result<SqliteGate, BootstrapError> {
        Ok(SqliteGate::new(
            self.data_dir()?.join(MARKER_DB),
            self.effective_scope(),
        ))
    }

    /// The production wiring: restart token classifier plus SQLite gate.
    pub fn sequencer(&self) -> Result<Sequencer<RestartSignal, SqliteGate>, BootstrapError> {
        Ok(Sequencer::new(self.restart_signal()?, self.gate()?).with_init_key(self.init_key()))
    }
}

/// Bootstrap the current process with `config`.
pub fn bootstrap<F>(config: &BootstrapConfig, init: F) -> Result<BootstrapReport, BootstrapError>
where
    F: FnOnce() -> Result<(), InitError>,
{
    let report = config.sequencer()?.run(init)?;
    tracing::info!(
        restart = report.identity.is_restart_of_self,
        ran = report.ran(),
        "Bootstrap complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(bool);

    impl ProcessClassifier for Fixed {
        fn classify(&self) -> ProcessIdentity {
            ProcessIdentity {
                is_restart_of_self: self.0,
            }
        }
    }

    #[test]
    fn ordinary_launch_goes_through_the_gate() {
        let gate = OneTimeGate::new(SqliteMarkerStore::in_memory().unwrap());
        let seq = Sequencer::new(Fixed(false), gate);
        let report = seq.run(|| Ok(())).unwrap();
        assert_eq!(
            report.states,
            vec![
                BootstrapState::Start,
                BootstrapState::IdentityClassified,
                BootstrapState::GateChecked,
                BootstrapState::Ready
            ]
        );
        assert!(report.ran());
        assert!(!seq.run(|| Ok(())).unwrap().ran());
    }

    #[test]
    fn restart_of_self_skips() {
        let gate = OneTimeGate::new(SqliteMarkerStore::in_memory().unwrap());
        let seq = Sequencer::new(Fixed(true), gate);
        let report = seq.run(|| panic!("must not run")).unwrap();
        assert_eq!(report.state(), BootstrapState::Ready);
        assert!(report.states.contains(&BootstrapState::Skipped));
        assert_eq!(report.outcome, None);
        assert!(!seq.gate().is_satisfied(DEFAULT_INIT_KEY));
    }

    #[test]
    fn init_failure_surfaces() {
        let gate = OneTimeGate::new(SqliteMarkerStore::in_memory().unwrap());
        let seq = Sequencer::new(Fixed(false), gate);
        let err = seq.run(|| Err("no space left".into())).unwrap_err();
        assert!(matches!(err, BootstrapError::Init(_)));
        assert!(seq.run(|| Ok(())).unwrap().ran());
    }

    #[test]
    fn config_from_json() {
        let config = BootstrapConfig::from_json(
            r#"{"data_dir":"/data/forever","app_version":"2.0.1"}"#,
        )
        .unwrap();
        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/data/forever"));
        assert_eq!(config.init_key(), DEFAULT_INIT_KEY);
        assert_eq!(config.effective_scope(), Scope::AppVersion("2.0.1".into()));

        assert_eq!(BootstrapConfig::from_json("").unwrap(), BootstrapConfig::default());
        assert!(matches!(
            BootstrapConfig::from_json("{not json"),
            Err(BootstrapError::Config(_))
        ));
    }

    #[test]
    fn sqlite_gate_opens_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let gate = SqliteGate::new(dir.path().join(MARKER_DB), Scope::Install);
        assert!(!gate.is_open());
        assert!(!gate.path().exists());

        let mut init = || -> Result<(), InitError> { Ok(()) };
        assert!(gate.run_once("init", &mut init).unwrap().ran);
        assert!(gate.is_open());
        assert!(gate.path().exists());
        assert!(!gate.run_once("init", &mut init).unwrap().ran);
    }

    #[test]
    fn unopenable_store_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MARKER_DB);
        std::fs::create_dir(&path).unwrap();
        let gate = SqliteGate::new(path, Scope::Install);
        let mut init = || -> Result<(), InitError> { panic!("must not run") };
        let err = gate.run_once("init", &mut init).unwrap_err();
        assert!(matches!(err, GateError::Unavailable(_)));
        assert!(!gate.is_open());
    }
}
