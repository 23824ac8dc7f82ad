//! The entry-point table as compiled into this module.

use serde::Serialize;

/// What `forever_module_version()` returns. Bumped only on a breaking change
/// to the table below.
pub const MODULE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntryPointInfo {
    pub symbol: &'static str,
    pub signature: &'static str,
    pub since: u32,
    /// Constituent library behind the entry point, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<&'static str>,
}

const fn entry(
    symbol: &'static str,
    signature: &'static str,
    library: Option<&'static str>,
) -> EntryPointInfo {
    EntryPointInfo {
        symbol,
        signature,
        since: 1,
        library,
    }
}

/// Sorted by symbol.
pub const ENTRY_POINTS: &[EntryPointInfo] = &[
    entry("forever_aio_version", "fn() -> u32", Some("aio")),
    entry("forever_bootstrap", "fn(*const c_char, InitCallback, *mut c_void) -> i32", None),
    entry("forever_bootstrap_report_json", "fn() -> *mut c_char", None),
    entry("forever_bootstrap_state", "fn() -> i32", None),
    entry("forever_codec_version", "fn() -> u32", Some("codec")),
    entry("forever_dns_version", "fn() -> u32", Some("dns")),
    entry("forever_entry_points_json", "fn() -> *mut c_char", None),
    entry("forever_fmt_version", "fn() -> u32", Some("fmt")),
    entry("forever_free_string", "fn(*mut c_char)", None),
    entry("forever_module_version", "fn() -> u32", None),
    entry("forever_request_restart", "fn(*const c_char) -> i32", None),
    entry("forever_tls_version", "fn() -> u32", Some("tls")),
];

#[derive(Serialize)]
struct TableJson {
    module_version: u32,
    entry_points: &'static [EntryPointInfo],
    linked: Linked,
}

#[derive(Serialize)]
struct Linked {
    codec: u32,
    tls: u32,
    fmt: u32,
    aio: u32,
    dns: u32,
}

pub fn to_json() -> Result<String, serde_json::Error> {
    use crate::capabilities as caps;
    serde_json::to_string(&TableJson {
        module_version: MODULE_VERSION,
        entry_points: ENTRY_POINTS,
        linked: Linked {
            codec: caps::codec(),
            tls: caps::tls(),
            fmt: caps::fmt(),
            aio: caps::aio(),
            dns: caps::dns(),
        },
    })
}
