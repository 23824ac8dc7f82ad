//! # forever-bootstrap
//!
//! Decides, once per process, whether the application's one-time native setup
//! has to run:
//!
//! - [`identity`]: is this process a deliberate restart of itself?
//! - [`restart`]: relaunch the current process so that it is.
//! - [`store`]: persisted one-time markers (SQLite in the data directory).
//! - [`gate`]: run an initialization at most once per key and scope.
//! - [`sequencer`]: the bootstrap state machine tying the above together.

pub mod error;
pub mod gate;
pub mod identity;
pub mod restart;
pub mod sequencer;
pub mod store;

pub use error::{BootstrapError, GateError, InitError, StoreError};
pub use gate::{OneTimeGate, RunOutcome, Scope};
pub use identity::{ProcessClassifier, ProcessIdentity, RestartSignal};
pub use sequencer::{BootstrapConfig, BootstrapReport, BootstrapState, InitGate, Sequencer, SqliteGate, bootstrap};
pub use store::{MarkerStore, OneTimeMarker, SqliteMarkerStore};
