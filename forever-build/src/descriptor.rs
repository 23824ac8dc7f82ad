//! Library descriptors: what each native dependency is and how it is built.
//!
//! A [`DescriptorSet`] is the validated input of an orchestrator run. Every
//! descriptor carries a closed option schema: options the schema does not
//! declare are rejected, never passed through silently.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::arch::TargetArch;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputKind {
    Static,
    Shared,
    /// Installs headers only; never linked into the module.
    HeaderOnly,
}

/// Where a library's source tree comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Source {
    Path { path: PathBuf },
    Git { url: String, rev: String },
    Archive { url: String, sha256: String },
}

impl Source {
    /// Remote sources must be pinned to content, not to a moving name.
    pub fn check_pinned(&self, library: &str) -> Result<(), ConfigError> {
        let reason = match self {
            Source::Path { .. } => return Ok(()),
            Source::Git { rev, .. } if is_hex(rev, 40) => return Ok(()),
            Source::Archive { sha256, .. } if is_hex(sha256, 64) => return Ok(()),
            Source::Git { rev, .. } => {
                format!("git rev {rev:?} is not a full 40-character commit id")
            }
            Source::Archive { sha256, .. } => {
                format!("archive sha256 {sha256:?} is not 64 hex characters")
            }
        };
        Err(ConfigError::UnpinnedSource {
            library: library.to_string(),
            reason,
        })
    }
}

fn is_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// How an option value reaches the native build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptionTarget {
    /// `-D<VAR>=<value>` on the CMake command line.
    Cache(String),
    /// `-D<MACRO>=<value>` appended to the C and C++ compiler flags.
    Define(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSpec {
    pub target: OptionTarget,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
}

impl OptionSpec {
    pub fn cache(var: &str) -> Self {
        Self {
            target: OptionTarget::Cache(var.to_string()),
            required: false,
            default: None,
            allowed: Vec::new(),
        }
    }

    pub fn define(name: &str) -> Self {
        Self {
            target: OptionTarget::Define(name.to_string()),
            ..Self::cache("")
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: &str) -> Self {
        self.default = Some(value.to_string());
        self
    }

    pub fn allowed(mut self, values: &[&str]) -> Self {
        self.allowed = values.iter().map(|v| v.to_string()).collect();
        self
    }
}

/// Option name → spec. Closed: anything not listed is an error.
pub type OptionSchema = BTreeMap<String, OptionSpec>;

/// An entry point a library contributes to the module's table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDecl {
    pub symbol: String,
    pub signature: String,
    #[serde(default = "default_since")]
    pub since: u32,
}

fn default_since() -> u32 {
    1
}

/// An option after defaults and validation have been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedOption {
    pub name: String,
    pub target: OptionTarget,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryDescriptor {
    pub name: String,
    pub version: String,
    pub source: Source,
    pub output: OutputKind,
    pub depends_on: Vec<String>,
    pub architectures: BTreeSet<TargetArch>,
    pub options: BTreeMap<String, String>,
    /// Per-library CMake cache overrides; win over global and ABI defaults.
    pub flags: BTreeMap<String, String>,
    pub schema: OptionSchema,
    pub exports: Vec<ExportDecl>,
    /// Archive file names the install step must produce, under `lib/`.
    pub artifacts: Vec<String>,
}

impl LibraryDescriptor {
    /// A static library supporting every ABI, with an empty schema.
    pub fn new(name: &str, version: &str, source: Source) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            source,
            output: OutputKind::Static,
            depends_on: Vec::new(),
            architectures: TargetArch::ALL.into_iter().collect(),
            options: BTreeMap::new(),
            flags: BTreeMap::new(),
            schema: OptionSchema::new(),
            exports: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn output(mut self, output: OutputKind) -> Self {
        self.output = output;
        self
    }

    pub fn depends_on(mut self, library: &str) -> Self {
        self.depends_on.push(library.to_string());
        self
    }

    pub fn option(mut self, name: &str, value: &str) -> Self {
        self.options.insert(name.to_string(), value.to_string());
        self
    }

    pub fn flag(mut self, name: &str, value: &str) -> Self {
        self.flags.insert(name.to_string(), value.to_string());
        self
    }

    pub fn schema_entry(mut self, name: &str, spec: OptionSpec) -> Self {
        self.schema.insert(name.to_string(), spec);
        self
    }

    pub fn export(mut self, symbol: &str, signature: &str) -> Self {
        self.exports.push(ExportDecl {
            symbol: symbol.to_string(),
            signature: signature.to_string(),
            since: 1,
        });
        self
    }

    pub fn architectures(mut self, archs: impl IntoIterator<Item = TargetArch>) -> Self {
        self.architectures = archs.into_iter().collect();
        self
    }

    pub fn artifact(mut self, file_name: &str) -> Self {
        self.artifacts.push(file_name.to_string());
        self
    }

    /// Whether the library's output goes into the module link.
    pub fn links(&self) -> bool {
        self.output != OutputKind::HeaderOnly
    }

    pub fn supports(&self, arch: TargetArch) -> bool {
        self.architectures.contains(&arch)
    }

    /// Archive names the install step must produce.
    pub fn expected_artifacts(&self) -> Vec<String> {
        if !self.artifacts.is_empty() {
            return self.artifacts.clone();
        }
        match self.output {
            OutputKind::Static => vec![format!("lib{}.a", self.name)],
            OutputKind::Shared => vec![format!("lib{}.so", self.name)],
            OutputKind::HeaderOnly => Vec::new(),
        }
    }

    /// Check options against the schema and fill in defaults.
    ///
    /// Returned in schema order so the resulting command line is stable.
    pub fn resolve_options(&self) -> Result<Vec<ResolvedOption>, ConfigError> {
        if let Some(unknown) = self.options.keys().find(|k| !self.schema.contains_key(*k)) {
            return Err(ConfigError::UnknownOption {
                library: self.name.clone(),
                option: unknown.clone(),
            });
        }

        let mut resolved = Vec::with_capacity(self.schema.len());
        for (name, spec) in &self.schema {
            let value = match self.options.get(name).or(spec.default.as_ref()) {
                Some(v) => v.clone(),
                None if spec.required => {
                    return Err(ConfigError::MissingOption {
                        library: self.name.clone(),
                        option: name.clone(),
                    });
                }
                None => continue,
            };
            if !spec.allowed.is_empty() && !spec.allowed.contains(&value) {
                return Err(ConfigError::InvalidOptionValue {
                    library: self.name.clone(),
                    option: name.clone(),
                    value,
                    allowed: spec.allowed.clone(),
                });
            }
            resolved.push(ResolvedOption {
                name: name.clone(),
                target: spec.target.clone(),
                value,
            });
        }
        Ok(resolved)
    }

    /// Everything about one descriptor that can be checked in isolation.
    pub fn validate(&self, archs: &[TargetArch]) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidDescriptor {
            library: self.name.clone(),
            reason,
        };
        if self.name.is_empty() {
            return Err(invalid("name is empty".to_string()));
        }
        if self.version.is_empty() {
            return Err(invalid("version is empty".to_string()));
        }
        if let Some(bad) = self.exports.iter().find(|e| !is_c_identifier(&e.symbol)) {
            return Err(invalid(format!("export {:?} is not a C identifier", bad.symbol)));
        }
        self.source.check_pinned(&self.name)?;
        self.resolve_options()?;
        if let Some(arch) = archs.iter().find(|a| !self.supports(**a)) {
            return Err(ConfigError::UnsupportedArchitecture {
                library: self.name.clone(),
                arch: *arch,
            });
        }
        Ok(())
    }
}

fn is_c_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Descriptors keyed by unique name.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSet {
    libraries: BTreeMap<String, LibraryDescriptor>,
}

impl DescriptorSet {
    pub fn new(libraries: Vec<LibraryDescriptor>) -> Result<Self, ConfigError> {
        let mut set = BTreeMap::new();
        for lib in libraries {
            if set.contains_key(&lib.name) {
                return Err(ConfigError::DuplicateLibrary { name: lib.name });
            }
            set.insert(lib.name.clone(), lib);
        }
        Ok(Self { libraries: set })
    }

    pub fn get(&self, name: &str) -> Option<&LibraryDescriptor> {
        self.libraries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LibraryDescriptor> {
        self.libraries.values()
    }

    pub fn len(&self) -> usize {
        self.libraries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }

    /// Validate every descriptor and every dependency edge for `archs`.
    ///
    /// Cycles are detected separately by [`crate::graph::build_order`].
    pub fn validate(&self, archs: &[TargetArch]) -> Result<(), ConfigError> {
        if archs.is_empty() {
            return Err(ConfigError::NoArchitectures);
        }
        for lib in self.iter() {
            lib.validate(archs)?;
            if let Some(dep) = lib.depends_on.iter().find(|d| !self.libraries.contains_key(*d)) {
                return Err(ConfigError::UnknownDependency {
                    library: lib.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        Ok(())
    }
}
