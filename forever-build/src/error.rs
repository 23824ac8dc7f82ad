//! Error taxonomy for the build pipeline.
//!
//! - [`ConfigError`]: the descriptor set or manifest is wrong. Fatal, raised
//!   before any native build is started.
//! - [`BuildFailure`]: a constituent library (or the final link) failed for
//!   one architecture. Fatal for that architecture only.
//! - [`BuildError`]: what a whole orchestrator run can return.

use std::fmt;

use crate::arch::TargetArch;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("duplicate library {name:?}")]
    DuplicateLibrary { name: String },
    #[error("library {library:?} depends on unknown library {dependency:?}")]
    UnknownDependency { library: String, dependency: String },
    #[error("library {library:?} is missing required option {option:?}")]
    MissingOption { library: String, option: String },
    #[error("library {library:?} has unknown option {option:?}")]
    UnknownOption { library: String, option: String },
    #[error("library {library:?} option {option:?} = {value:?} is not one of {allowed:?}")]
    InvalidOptionValue {
        library: String,
        option: String,
        value: String,
        allowed: Vec<String>,
    },
    #[error("library {library:?} does not support architecture {arch}")]
    UnsupportedArchitecture { library: String, arch: TargetArch },
    #[error("dependency cycle between libraries: {}", cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },
    #[error("library {library:?} source is not pinned: {reason}")]
    UnpinnedSource { library: String, reason: String },
    #[error("entry point {symbol:?} is declared by both {first:?} and {second:?}")]
    DuplicateExport {
        symbol: String,
        first: String,
        second: String,
    },
    #[error("entry-point table changed incompatibly ({detail}) without a major version bump past {baseline_major}")]
    AbiBreak { baseline_major: u32, detail: String },
    #[error("unknown preset {preset:?} for library {library:?}")]
    UnknownPreset { library: String, preset: String },
    #[error("unknown architecture {0:?}")]
    UnknownArchitecture(String),
    #[error("library {library:?}: {reason}")]
    InvalidDescriptor { library: String, reason: String },
    #[error("no target architectures requested")]
    NoArchitectures,
    #[error("manifest {path}: {reason}")]
    Manifest { path: String, reason: String },
    #[error("NDK at {path} is version {found}, manifest pins {expected}")]
    NdkMismatch {
        path: String,
        expected: String,
        found: String,
    },
}

impl ConfigError {
    /// Name of the offending descriptor, when the error is about one.
    pub fn library(&self) -> Option<&str> {
        match self {
            ConfigError::DuplicateLibrary { name } => Some(name),
            ConfigError::UnknownDependency { library, .. }
            | ConfigError::MissingOption { library, .. }
            | ConfigError::UnknownOption { library, .. }
            | ConfigError::InvalidOptionValue { library, .. }
            | ConfigError::UnsupportedArchitecture { library, .. }
            | ConfigError::UnpinnedSource { library, .. }
            | ConfigError::UnknownPreset { library, .. }
            | ConfigError::InvalidDescriptor { library, .. } => Some(library),
            ConfigError::DuplicateExport { second, .. } => Some(second),
            ConfigError::DependencyCycle { cycle } => cycle.first().map(String::as_str),
            _ => None,
        }
    }
}

/// Which step of an architecture's build failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Setting up the architecture's staging directory and export map.
    Prepare,
    Library(String),
    Link,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Prepare => write!(f, "module staging"),
            Stage::Library(name) => write!(f, "library {name:?}"),
            Stage::Link => write!(f, "module link"),
            Stage::Publish => write!(f, "module publish"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error("`{command}` exited with status {status}: {stderr_tail}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr_tail: String,
    },
    #[error("`{command}` timed out after {secs}s")]
    TimedOut { command: String, secs: u64 },
    #[error("could not spawn `{command}`: {message}")]
    Spawn { command: String, message: String },
    #[error("expected artifact {0} was not installed")]
    MissingArtifact(String),
    #[error("source digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("i/o error: {0}")]
    Io(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for FailureReason {
    fn from(e: std::io::Error) -> Self {
        FailureReason::Io(e.to_string())
    }
}

/// One architecture's build went wrong.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{stage} failed for {arch}: {reason}")]
pub struct BuildFailure {
    pub stage: Stage,
    pub arch: TargetArch,
    pub reason: FailureReason,
}

impl BuildFailure {
    /// Name of the constituent library that failed, if the failure was in one.
    pub fn library(&self) -> Option<&str> {
        match &self.stage {
            Stage::Library(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Failure(#[from] BuildFailure),
    /// Sources are shared by every architecture, so a fetch failure aborts the run.
    #[error("fetching source for {library:?} failed: {reason}")]
    Fetch {
        library: String,
        reason: FailureReason,
    },
    #[error("atomic delivery aborted: {failed} of {total} architectures failed; first: {first}")]
    AtomicAborted {
        failed: usize,
        total: usize,
        first: BuildFailure,
    },
}
