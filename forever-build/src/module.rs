//! The one aggregated artifact produced per ABI.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::abi::EntryPointTable;
use crate::arch::TargetArch;
use crate::descriptor::OutputKind;

/// Written next to every published module artifact.
pub const MANIFEST_FILE: &str = "module.json";

/// A constituent library as built for one ABI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltLibrary {
    pub name: String,
    pub version: String,
    pub output: OutputKind,
    pub install_dir: PathBuf,
    /// Archives that went into the link. Empty for header-only libraries.
    pub artifacts: Vec<PathBuf>,
}

/// Immutable once produced; a changed input means a new module, never a patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeModule {
    name: String,
    arch: TargetArch,
    entry_points: EntryPointTable,
    libraries: Vec<BuiltLibrary>,
    artifact: PathBuf,
    export_map: PathBuf,
    fingerprint: String,
}

impl NativeModule {
    pub(crate) fn new(
        name: String,
        arch: TargetArch,
        entry_points: EntryPointTable,
        libraries: Vec<BuiltLibrary>,
        artifact: PathBuf,
        export_map: PathBuf,
        fingerprint: String,
    ) -> Self {
        Self {
            name,
            arch,
            entry_points,
            libraries,
            artifact,
            export_map,
            fingerprint,
        }
    }

    /// Read a published module's `module.json`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let module = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid module manifest {}", path.display()))?;
        Ok(module)
    }

    pub(crate) fn write_manifest(&self, dir: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.join(MANIFEST_FILE), json)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arch(&self) -> TargetArch {
        self.arch
    }

    pub fn module_version(&self) -> u32 {
        self.entry_points.module_version()
    }

    pub fn entry_points(&self) -> &EntryPointTable {
        &self.entry_points
    }

    pub fn libraries(&self) -> &[BuiltLibrary] {
        &self.libraries
    }

    /// Libraries whose archives were linked in.
    pub fn linked_libraries(&self) -> impl Iterator<Item = &BuiltLibrary> {
        self.libraries
            .iter()
            .filter(|l| l.output != OutputKind::HeaderOnly)
    }

    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    pub fn export_map(&self) -> &Path {
        &self.export_map
    }

    /// SHA-256 over the resolved build inputs for this ABI.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}
