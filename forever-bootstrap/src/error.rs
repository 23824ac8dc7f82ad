//! Errors for the bootstrap side.

use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("marker database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of [`crate::gate::OneTimeGate::ensure_run_once`].
///
/// In every case the marker is left unset, so the next launch runs the
/// initialization again.
#[derive(Debug)]
pub enum GateError<E> {
    /// The marker store could not be opened. Nothing ran.
    Unavailable(StoreError),
    /// The initialization function itself failed.
    Init(E),
    /// Initialization succeeded but the marker could not be written.
    Persist(StoreError),
}

impl<E: fmt::Display> fmt::Display for GateError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateError::Unavailable(e) => write!(f, "marker store unavailable: {e}"),
            GateError::Init(e) => write!(f, "one-time initialization failed: {e}"),
            GateError::Persist(e) => write!(f, "initialization ran but was not recorded: {e}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for GateError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GateError::Init(_) => None,
            GateError::Unavailable(e) | GateError::Persist(e) => Some(e),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RestartError {
    #[error("could not write restart token {path}: {source}")]
    Token {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not locate the current executable: {0}")]
    CurrentExe(#[source] std::io::Error),
    #[error("could not relaunch: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Boxed error from a caller-supplied initialization function.
pub type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("invalid bootstrap config: {0}")]
    Config(String),
    #[error("no application data directory available")]
    NoDataDir,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("one-time initialization failed: {0}")]
    Init(InitError),
    #[error("initialization ran but was not recorded: {0}")]
    Persist(StoreError),
}

impl From<GateError<InitError>> for BootstrapError {
    fn from(e: GateError<InitError>) -> Self {
        match e {
            GateError::Unavailable(e) => BootstrapError::Store(e),
            GateError::Init(e) => BootstrapError::Init(e),
            GateError::Persist(e) => BootstrapError::Persist(e),
        }
    }
}
