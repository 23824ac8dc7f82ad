//! Entry-point table of a native module and its evolution rules.
//!
//! The managed layer links against exactly one module, and only against the
//! symbols listed here. Adding entries is compatible; removing one or changing
//! its signature needs a major version bump. [`ExportMap`] turns the table
//! into a linker version script that hides everything else.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::descriptor::LibraryDescriptor;
use crate::error::ConfigError;

pub const MODULE_VERSION_SYMBOL: &str = "forever_module_version";
pub const MODULE_VERSION_SIGNATURE: &str = "fn() -> u32";

/// Entry points the module itself provides, independent of its libraries.
pub const MODULE_ENTRY_POINTS: &[(&str, &str)] = &[
    (MODULE_VERSION_SYMBOL, MODULE_VERSION_SIGNATURE),
    ("forever_entry_points_json", "fn() -> *mut c_char"),
    ("forever_free_string", "fn(*mut c_char)"),
    (
        "forever_bootstrap",
        "fn(*const c_char, InitCallback, *mut c_void) -> i32",
    ),
    ("forever_bootstrap_state", "fn() -> i32"),
    ("forever_bootstrap_report_json", "fn() -> *mut c_char"),
    ("forever_request_restart", "fn(*const c_char) -> i32"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AbiVersion {
    pub major: u32,
    pub minor: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub symbol: String,
    pub signature: String,
    /// Major version the entry point first appeared in.
    pub since: u32,
    /// Constituent library behind it; `None` for module-level entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPointTable {
    version: AbiVersion,
    entries: BTreeMap<String, EntryPoint>,
}

impl EntryPointTable {
    /// [`MODULE_ENTRY_POINTS`] plus every export the libraries declare.
    pub fn for_descriptors<'a>(
        major: u32,
        libraries: impl IntoIterator<Item = &'a LibraryDescriptor>,
    ) -> Result<Self, ConfigError> {
        let mut entries: BTreeMap<String, EntryPoint> = MODULE_ENTRY_POINTS
            .iter()
            .map(|(symbol, signature)| {
                (
                    symbol.to_string(),
                    EntryPoint {
                        symbol: symbol.to_string(),
                        signature: signature.to_string(),
                        since: 1,
                        library: None,
                    },
                )
            })
            .collect();

        for lib in libraries {
            for export in &lib.exports {
                if let Some(existing) = entries.get(&export.symbol) {
                    return Err(ConfigError::DuplicateExport {
                        symbol: export.symbol.clone(),
                        first: existing
                            .library
                            .clone()
                            .unwrap_or_else(|| "module".to_string()),
                        second: lib.name.clone(),
                    });
                }
                entries.insert(
                    export.symbol.clone(),
                    EntryPoint {
                        symbol: export.symbol.clone(),
                        signature: export.signature.clone(),
                        since: export.since,
                        library: Some(lib.name.clone()),
                    },
                );
            }
        }

        Ok(Self {
            version: AbiVersion { major, minor: 0 },
            entries,
        })
    }

    pub fn version(&self) -> AbiVersion {
        self.version
    }

    /// What `forever_module_version()` returns for this table.
    pub fn module_version(&self) -> u32 {
        self.version.major
    }

    pub fn get(&self, symbol: &str) -> Option<&EntryPoint> {
        self.entries.get(symbol)
    }

    pub fn entries(&self) -> impl Iterator<Item = &EntryPoint> {
        self.entries.values()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry points contributed by `library`.
    pub fn for_library<'a>(&'a self, library: &'a str) -> impl Iterator<Item = &'a EntryPoint> {
        self.entries
            .values()
            .filter(move |e| e.library.as_deref() == Some(library))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compatibility {
    Identical,
    Additive { added: Vec<String> },
    Breaking { removed: Vec<String>, changed: Vec<String> },
}

/// Classify the change from `baseline` to `next`, ignoring version numbers.
pub fn compare(baseline: &EntryPointTable, next: &EntryPointTable) -> Compatibility {
    let mut removed = Vec::new();
    let mut changed = Vec::new();
    for (symbol, old) in &baseline.entries {
        match next.entries.get(symbol) {
            None => removed.push(symbol.clone()),
            Some(new) if new.signature != old.signature => changed.push(symbol.clone()),
            Some(_) => {}
        }
    }
    if !removed.is_empty() || !changed.is_empty() {
        return Compatibility::Breaking { removed, changed };
    }
    let added: Vec<String> = next
        .entries
        .keys()
        .filter(|s| !baseline.entries.contains_key(*s))
        .cloned()
        .collect();
    if added.is_empty() {
        Compatibility::Identical
    } else {
        Compatibility::Additive { added }
    }
}

/// Version `next` against a previously shipped table.
///
/// Breaking changes need `next.major > baseline.major`. Within one major the
/// minor number carries over and grows by one for additive changes.
pub fn check_evolution(
    baseline: &EntryPointTable,
    mut next: EntryPointTable,
) -> Result<EntryPointTable, ConfigError> {
    if next.version.major < baseline.version.major {
        return Err(ConfigError::AbiBreak {
            baseline_major: baseline.version.major,
            detail: format!("major version went down to {}", next.version.major),
        });
    }
    let bumped = next.version.major > baseline.version.major;
    match compare(baseline, &next) {
        Compatibility::Breaking { removed, changed } if !bumped => {
            let mut detail = Vec::new();
            if !removed.is_empty() {
                detail.push(format!("removed {}", removed.join(", ")));
            }
            if !changed.is_empty() {
                detail.push(format!("changed {}", changed.join(", ")));
            }
            return Err(ConfigError::AbiBreak {
                baseline_major: baseline.version.major,
                detail: detail.join("; "),
            });
        }
        _ if bumped => next.version.minor = 0,
        Compatibility::Additive { .. } => next.version.minor = baseline.version.minor + 1,
        _ => next.version.minor = baseline.version.minor,
    }
    Ok(next)
}

/// GNU ld version script exporting exactly the entry-point table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportMap {
    node: String,
    symbols: Vec<String>,
}

impl ExportMap {
    pub fn from_table(module: &str, table: &EntryPointTable) -> Self {
        Self {
            node: format!("{}_{}", module.to_ascii_uppercase(), table.version.major),
            symbols: table.symbols().map(String::from).collect(),
        }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn render(&self) -> String {
        let mut out = format!("{} {{\n  global:\n", self.node);
        for symbol in &self.symbols {
            out.push_str(&format!("    {symbol};\n"));
        }
        out.push_str("  local:\n    *;\n};\n");
        out
    }
}
