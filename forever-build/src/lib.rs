//! # forever-build
//!
//! Assembles independently versioned native libraries (zstd, OpenSSL, fmt,
//! libuv, c-ares, or anything else described the same way) into one Android
//! native module per ABI, exposing exactly one versioned entry-point table.
//!
//! The pipeline is:
//!
//! ```text
//! forever.toml ──► Manifest ──► DescriptorSet ──► BuildPlan::resolve
//!                                                   │  validate, topo sort,
//!                                                   │  options, entry points
//!                                                   ▼
//!                                   Orchestrator::run (per ABI, concurrent)
//!                                                   │  BuildBackend jobs
//!                                                   ▼
//!                                         NativeModule + module.json
//! ```

pub mod abi;
pub mod arch;
pub mod backend;
pub mod canonical;
pub mod catalog;
pub mod descriptor;
pub mod error;
pub mod fetch;
pub mod flags;
pub mod graph;
pub mod manifest;
pub mod module;
pub mod orchestrator;
pub mod plan;

pub use arch::TargetArch;
pub use error::{BuildError, BuildFailure, ConfigError};
pub use module::NativeModule;
pub use orchestrator::{BuildReport, Orchestrator};
pub use plan::{BuildPlan, BuildSettings, Delivery};
