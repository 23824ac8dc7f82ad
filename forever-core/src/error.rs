//! FFI result codes returned by the `forever_*` functions that return `i32`.

use forever_bootstrap::BootstrapError;

/// Result codes for the C ABI surface. `Ok` is 0; everything else is a failure.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiResult {
    Ok = 0,
    /// A required argument was null or not valid UTF-8.
    InvalidArgument = 1,
    /// The config JSON did not parse, or named no usable data directory.
    InvalidConfig = 2,
    /// The marker store could not be opened.
    StoreUnavailable = 3,
    /// The host's initialization callback failed; it runs again next launch.
    InitFailed = 4,
    /// Initialization succeeded but could not be recorded; it runs again next launch.
    NotRecorded = 5,
    /// An internal error occurred (logged via tracing).
    Internal = 6,
    /// `forever_bootstrap` was called from inside its own init callback.
    InProgress = 7,
}

impl From<&BootstrapError> for FfiResult {
    fn from(e: &BootstrapError) -> Self {
        match e {
            BootstrapError::Config(_) | BootstrapError::NoDataDir => FfiResult::InvalidConfig,
            BootstrapError::Store(_) => FfiResult::StoreUnavailable,
            BootstrapError::Init(_) => FfiResult::InitFailed,
            BootstrapError::Persist(_) => FfiResult::NotRecorded,
        }
    }
}
