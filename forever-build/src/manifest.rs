//! `forever.toml`, the build configuration surface.
//!
//! ```toml
//! [module]
//! name = "forever"
//! abi-major = 1
//! ndk-version = "29.0.14206865"
//! architectures = ["arm64-v8a"]
//!
//! [defaults.flags]
//! CMAKE_BUILD_TYPE = "RelWithDebInfo"
//!
//! [[library]]
//! preset = "zstd"
//! version = "1.5.7"
//! archive = "https://github.com/facebook/zstd/releases/download/v1.5.7/zstd-1.5.7.tar.gz"
//! sha256 = "…"
//! options = { level = "19" }
//! ```
//!
//! Relative paths are resolved against the manifest's directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::arch::TargetArch;
use crate::catalog;
use crate::descriptor::{DescriptorSet, ExportDecl, LibraryDescriptor, OptionSchema, OutputKind, Source};
use crate::error::ConfigError;
use crate::flags;
use crate::plan::{BuildSettings, Delivery};

pub const DEFAULT_MANIFEST: &str = "forever.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub module: ModuleSection,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default, rename = "library")]
    pub libraries: Vec<LibraryEntry>,
    /// Directory relative paths are resolved against.
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ModuleSection {
    pub name: String,
    #[serde(default = "default_abi_major")]
    pub abi_major: u32,
    #[serde(default)]
    pub ndk_version: Option<String>,
    #[serde(default = "default_architectures")]
    pub architectures: Vec<TargetArch>,
    #[serde(default)]
    pub delivery: Delivery,
    #[serde(default)]
    pub glue_archive: Option<String>,
}

fn default_abi_major() -> u32 {
    1
}

fn default_architectures() -> Vec<TargetArch> {
    vec![TargetArch::REQUIRED]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    /// Layered over the built-in Android defaults.
    #[serde(default)]
    pub flags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct LibraryEntry {
    pub preset: Option<String>,
    pub name: Option<String>,
    pub version: String,
    pub path: Option<PathBuf>,
    pub git: Option<String>,
    pub rev: Option<String>,
    pub archive: Option<String>,
    pub sha256: Option<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub flags: BTreeMap<String, String>,
    pub output: Option<OutputKind>,
    pub depends_on: Option<Vec<String>>,
    pub architectures: Option<Vec<TargetArch>>,
    pub schema: Option<OptionSchema>,
    pub exports: Option<Vec<ExportDecl>>,
    pub artifacts: Option<Vec<String>>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Manifest {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::parse(&raw, &base_dir).map_err(|e| match e {
            ConfigError::Manifest { reason, .. } => ConfigError::Manifest {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    pub fn parse(raw: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let mut manifest: Manifest = toml::from_str(raw).map_err(|e| ConfigError::Manifest {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })?;
        manifest.base_dir = base_dir.to_path_buf();
        Ok(manifest)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Turn every `[[library]]` entry into a descriptor, presets applied.
    pub fn descriptors(&self) -> Result<DescriptorSet, ConfigError> {
        let libraries = self
            .libraries
            .iter()
            .map(|entry| entry.to_descriptor(&self.base_dir))
            .collect::<Result<Vec<_>, _>>()?;
        DescriptorSet::new(libraries)
    }

    pub fn settings(&self, work_dir: PathBuf, out_dir: PathBuf) -> BuildSettings {
        let mut settings = BuildSettings::new(&self.module.name, work_dir, out_dir);
        settings.abi_major = self.module.abi_major;
        settings.delivery = self.module.delivery;
        let mut global = flags::android_defaults();
        global.extend(self.defaults.flags.clone());
        settings.global_flags = global;
        settings.glue_archive = self.module.glue_archive.as_ref().map(|template| {
            if Path::new(template).is_absolute() {
                template.clone()
            } else {
                self.base_dir.join(template).display().to_string()
            }
        });
        settings
    }
}

impl LibraryEntry {
    fn label(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.preset.clone())
            .unwrap_or_else(|| "<unnamed>".to_string())
    }

    fn source(&self, base_dir: &Path) -> Result<Source, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidDescriptor {
            library: self.label(),
            reason: reason.to_string(),
        };
        match (&self.path, &self.git, &self.archive) {
            (Some(path), None, None) => Ok(Source::Path {
                path: if path.is_absolute() { path.clone() } else { base_dir.join(path) },
            }),
            (None, Some(url), None) => {
                let rev = self.rev.clone().ok_or_else(|| invalid("git source needs `rev`"))?;
                Ok(Source::Git { url: url.clone(), rev })
            }
            (None, None, Some(url)) => {
                let sha256 = self
                    .sha256
                    .clone()
                    .ok_or_else(|| invalid("archive source needs `sha256`"))?;
                Ok(Source::Archive { url: url.clone(), sha256 })
            }
            (None, None, None) => Err(invalid("needs one of `path`, `git` or `archive`")),
            _ => Err(invalid("`path`, `git` and `archive` are mutually exclusive")),
        }
    }

    pub fn to_descriptor(&self, base_dir: &Path) -> Result<LibraryDescriptor, ConfigError> {
        let source = self.source(base_dir)?;
        let mut lib = match &self.preset {
            Some(preset) => catalog::preset(preset, &self.version, source).ok_or_else(|| {
                ConfigError::UnknownPreset {
                    library: self.label(),
                    preset: preset.clone(),
                }
            })?,
            None => {
                let name = self.name.as_deref().ok_or_else(|| ConfigError::InvalidDescriptor {
                    library: self.label(),
                    reason: "needs `name` or `preset`".to_string(),
                })?;
                LibraryDescriptor::new(name, &self.version, source)
            }
        };

        if let Some(name) = &self.name {
            lib.name = name.clone();
        }
        if let Some(output) = self.output {
            lib.output = output;
        }
        if let Some(deps) = &self.depends_on {
            lib.depends_on = deps.clone();
        }
        if let Some(archs) = &self.architectures {
            lib.architectures = archs.iter().copied().collect();
        }
        if let Some(schema) = &self.schema {
            lib.schema.extend(schema.clone());
        }
        if let Some(exports) = &self.exports {
            lib.exports = exports.clone();
        }
        if let Some(artifacts) = &self.artifacts {
            lib.artifacts = artifacts.clone();
        }
        lib.options.extend(self.options.clone());
        lib.flags.extend(self.flags.clone());
        Ok(lib)
    }
}
