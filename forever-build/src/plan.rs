//! A validated, fully resolved build plan.
//!
//! [`BuildPlan::resolve`] is the only way to get a plan, and it runs every
//! configuration check (descriptors, options, ABIs, cycles, entry-point
//! table evolution) up front. Nothing downstream can hit a `ConfigError`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::abi::{self, AbiVersion, EntryPointTable};
use crate::arch::TargetArch;
use crate::backend::{LibraryJob, LinkJob};
use crate::canonical;
use crate::descriptor::{DescriptorSet, LibraryDescriptor, OutputKind, ResolvedOption, Source};
use crate::error::ConfigError;
use crate::flags::{self, MergedFlags};
use crate::graph;

const DEFAULT_API_LEVEL: u32 = 24;

/// Whether one failed ABI sinks the whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Delivery {
    /// Publish every ABI that built; report the rest.
    #[default]
    BestEffort,
    /// Publish nothing unless every ABI built.
    Atomic,
}

#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub module_name: String,
    pub abi_major: u32,
    /// Lowest-precedence CMake cache values.
    pub global_flags: BTreeMap<String, String>,
    pub ndk: Option<PathBuf>,
    pub work_dir: PathBuf,
    pub out_dir: PathBuf,
    /// Path template of the compiled entry-point glue archive;
    /// `{rust-triple}` and `{abi}` are substituted per ABI.
    pub glue_archive: Option<String>,
    pub step_timeout: Duration,
    pub delivery: Delivery,
}

impl BuildSettings {
    pub fn new(module_name: &str, work_dir: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            module_name: module_name.to_string(),
            abi_major: 1,
            global_flags: flags::android_defaults(),
            ndk: None,
            work_dir: work_dir.into(),
            out_dir: out_dir.into(),
            glue_archive: None,
            step_timeout: Duration::from_secs(30 * 60),
            delivery: Delivery::BestEffort,
        }
    }

    /// `ANDROID_PLATFORM=android-NN` → NN.
    pub fn api_level(&self) -> u32 {
        self.global_flags
            .get("ANDROID_PLATFORM")
            .and_then(|p| p.strip_prefix("android-"))
            .and_then(|n| n.parse().ok())
            .unwrap_or(DEFAULT_API_LEVEL)
    }
}

#[derive(Debug, Clone)]
pub struct BuildPlan {
    settings: BuildSettings,
    set: DescriptorSet,
    order: Vec<String>,
    archs: Vec<TargetArch>,
    entry_points: EntryPointTable,
    options: BTreeMap<String, Vec<ResolvedOption>>,
}

impl BuildPlan {
    pub fn resolve(
        set: DescriptorSet,
        archs: &[TargetArch],
        settings: BuildSettings,
        baseline: Option<&EntryPointTable>,
    ) -> Result<Self, ConfigError> {
        let archs: Vec<TargetArch> = archs.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        set.validate(&archs)?;
        let order = graph::build_order(&set)?;

        let mut options = BTreeMap::new();
        for lib in set.iter() {
            options.insert(lib.name.clone(), lib.resolve_options()?);
        }

        let libraries = order.iter().filter_map(|name| set.get(name));
        let mut entry_points = EntryPointTable::for_descriptors(settings.abi_major, libraries)?;
        if let Some(baseline) = baseline {
            entry_points = abi::check_evolution(baseline, entry_points)?;
        }

        tracing::debug!(
            order = ?order,
            archs = ?archs,
            entry_points = entry_points.len(),
            "build plan resolved"
        );
        Ok(Self {
            settings,
            set,
            order,
            archs,
            entry_points,
            options,
        })
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    pub fn descriptors(&self) -> &DescriptorSet {
        &self.set
    }

    /// Library names, dependencies first.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn architectures(&self) -> &[TargetArch] {
        &self.archs
    }

    pub fn entry_points(&self) -> &EntryPointTable {
        &self.entry_points
    }

    pub fn descriptor(&self, name: &str) -> Option<&LibraryDescriptor> {
        self.set.get(name)
    }

    /// Merged CMake flags for `library` on `arch`, without path-dependent extras.
    pub fn merged_flags(&self, arch: TargetArch, library: &str) -> MergedFlags {
        let mut abi_flags = arch.cmake_defaults();
        if let Some(ndk) = &self.settings.ndk {
            abi_flags.insert(
                "CMAKE_TOOLCHAIN_FILE".to_string(),
                ndk.join("build/cmake/android.toolchain.cmake").display().to_string(),
            );
        }
        let empty = BTreeMap::new();
        let lib_flags = self.set.get(library).map(|l| &l.flags).unwrap_or(&empty);
        let options = self.options.get(library).map(Vec::as_slice).unwrap_or(&[]);
        MergedFlags::merge(&self.settings.global_flags, &abi_flags, lib_flags, options)
    }

    pub fn library_build_dir(&self, arch: TargetArch, library: &str) -> PathBuf {
        self.settings.work_dir.join(arch.abi_name()).join(library).join("build")
    }

    pub fn library_install_dir(&self, arch: TargetArch, library: &str) -> PathBuf {
        self.settings.work_dir.join(arch.abi_name()).join(library).join("install")
    }

    pub fn staging_dir(&self, arch: TargetArch) -> PathBuf {
        self.settings.out_dir.join(".staging").join(arch.abi_name())
    }

    pub fn publish_dir(&self, arch: TargetArch) -> PathBuf {
        self.settings.out_dir.join(arch.abi_name())
    }

    pub fn artifact_name(&self) -> String {
        format!("lib{}.so", self.settings.module_name)
    }

    pub fn export_map_name(&self) -> String {
        format!("{}.map", self.settings.module_name)
    }

    pub fn glue_archive(&self, arch: TargetArch) -> Option<PathBuf> {
        self.settings.glue_archive.as_ref().map(|template| {
            PathBuf::from(
                template
                    .replace("{rust-triple}", arch.rust_triple())
                    .replace("{abi}", arch.abi_name()),
            )
        })
    }

    /// Environment shared by every native build step.
    pub fn build_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("SOURCE_DATE_EPOCH".to_string(), "0".to_string());
        if let Some(ndk) = &self.settings.ndk {
            env.insert("ANDROID_NDK_HOME".to_string(), ndk.display().to_string());
        }
        env
    }

    pub fn library_job(
        &self,
        arch: TargetArch,
        library: &LibraryDescriptor,
        source_dir: &Path,
        dependency_prefixes: &[PathBuf],
    ) -> LibraryJob {
        let mut flags = self
            .merged_flags(arch, &library.name)
            .with_compile_flag(format!("-ffile-prefix-map={}=.", self.settings.work_dir.display()))
            .with_compile_flag(format!(
                "-ffile-prefix-map={}={}",
                source_dir.display(),
                library.name
            ));
        if !dependency_prefixes.is_empty() {
            let joined = dependency_prefixes
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(";");
            flags.cache.insert("CMAKE_PREFIX_PATH".to_string(), joined.clone());
            flags.cache.insert("CMAKE_FIND_ROOT_PATH".to_string(), joined);
        }

        LibraryJob {
            library: library.name.clone(),
            version: library.version.clone(),
            arch,
            output: library.output,
            source_dir: source_dir.to_path_buf(),
            build_dir: self.library_build_dir(arch, &library.name),
            install_dir: self.library_install_dir(arch, &library.name),
            cmake_args: flags.to_cmake_args(),
            expected_artifacts: library.expected_artifacts(),
            env: self.build_env(),
            timeout: self.settings.step_timeout,
        }
    }

    /// Link job for `arch`. `archives` holds each linked library's archives,
    /// libraries in build order; the link reverses the libraries so dependants
    /// precede their dependencies, keeping each library's own archive order.
    pub fn link_job(&self, arch: TargetArch, archives: &[Vec<PathBuf>]) -> LinkJob {
        let staging = self.staging_dir(arch);
        let linker = match &self.settings.ndk {
            Some(ndk) => ndk
                .join("toolchains/llvm/prebuilt")
                .join(ndk_host_tag())
                .join("bin/clang++"),
            None => PathBuf::from("clang++"),
        };
        let ordered: Vec<PathBuf> = archives.iter().rev().flatten().cloned().collect();
        let (whole_archives, archives) = match self.glue_archive(arch) {
            Some(glue) => (vec![glue], ordered),
            None => (ordered, Vec::new()),
        };

        LinkJob {
            module: self.settings.module_name.clone(),
            arch,
            linker,
            target: format!("{}{}", arch.clang_triple(), self.settings.api_level()),
            whole_archives,
            archives,
            system_libs: vec![
                "c++_shared".to_string(),
                "log".to_string(),
                "dl".to_string(),
                "m".to_string(),
            ],
            export_map: staging.join(self.export_map_name()),
            output: staging.join(self.artifact_name()),
            env: self.build_env(),
            timeout: self.settings.step_timeout,
        }
    }

    /// SHA-256 over everything that determines the module for `arch`.
    pub fn fingerprint(&self, arch: TargetArch) -> Result<String, serde_json::Error> {
        #[derive(Serialize)]
        struct LibraryInput<'a> {
            name: &'a str,
            version: &'a str,
            source: &'a Source,
            output: OutputKind,
            depends_on: &'a [String],
            artifacts: Vec<String>,
            flags: MergedFlags,
        }

        #[derive(Serialize)]
        struct Input<'a> {
            module: &'a str,
            arch: TargetArch,
            abi: AbiVersion,
            entry_points: &'a EntryPointTable,
            api_level: u32,
            libraries: Vec<LibraryInput<'a>>,
        }

        let libraries = self
            .order
            .iter()
            .filter_map(|name| self.set.get(name))
            .map(|lib| LibraryInput {
                name: &lib.name,
                version: &lib.version,
                source: &lib.source,
                output: lib.output,
                depends_on: &lib.depends_on,
                artifacts: lib.expected_artifacts(),
                flags: self.merged_flags(arch, &lib.name),
            })
            .collect();

        canonical::hash_canonical(&Input {
            module: &self.settings.module_name,
            arch,
            abi: self.entry_points.version(),
            entry_points: &self.entry_points,
            api_level: self.settings.api_level(),
            libraries,
        })
    }
}

fn ndk_host_tag() -> &'static str {
    if cfg!(target_os = "macos") {
        "darwin-x86_64"
    } else if cfg!(target_os = "windows") {
        "windows-x86_64"
    } else {
        "linux-x86_64"
    }
}

/// Check the NDK's `source.properties` against the version the manifest pins.
pub fn check_ndk_version(ndk: &Path, expected: &str) -> Result<(), ConfigError> {
    let props = ndk.join("source.properties");
    let mismatch = |found: String| ConfigError::NdkMismatch {
        path: ndk.display().to_string(),
        expected: expected.to_string(),
        found,
    };
    let raw = std::fs::read_to_string(&props).map_err(|e| mismatch(format!("unreadable ({e})")))?;
    let found = raw
        .lines()
        .filter_map(|line| line.split_once('='))
        .find(|(k, _)| k.trim() == "Pkg.Revision")
        .map(|(_, v)| v.trim().to_string())
        .ok_or_else(|| mismatch("unknown (no Pkg.Revision)".to_string()))?;
    if found == expected {
        Ok(())
    } else {
        Err(mismatch(found))
    }
}
