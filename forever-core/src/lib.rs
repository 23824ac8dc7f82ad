//! The forever native module's Rust side.
//!
//! Exposes the module's entry-point table as a C ABI (`extern "C"`) surface:
//! version capabilities of the constituent libraries, the table itself as
//! JSON, and the host bootstrap sequence backed by `forever-bootstrap`.
//! Built as a `staticlib` it is the glue archive whole-archived into the
//! module by `forever-build`; built as a `cdylib` it stands alone.

pub mod bridge;
pub mod capabilities;
pub mod error;
pub mod table;

pub use error::FfiResult;
