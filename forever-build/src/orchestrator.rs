//! Native Build Orchestrator.
//!
//! One run takes a resolved [`BuildPlan`] and produces one [`NativeModule`]
//! per requested architecture:
//!
//! 1. fetch every source once (shared by all architectures),
//! 2. build each architecture concurrently on its own task, libraries in
//!    dependency order, into a fresh staging directory,
//! 3. link the non-header-only outputs into one shared object whose export
//!    map is the entry-point table,
//! 4. publish finished modules by renaming staging into place, moving any
//!    previous module aside first.
//!
//! A library failure ends its architecture only. With [`Delivery::Atomic`]
//! any failure discards every staged module instead, and a failed publish
//! puts back the previous modules of the architectures already published.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::abi::{EntryPointTable, ExportMap};
use crate::arch::TargetArch;
use crate::backend::BuildBackend;
use crate::descriptor::DescriptorSet;
use crate::error::{BuildError, BuildFailure, FailureReason, Stage};
use crate::fetch::SourceFetcher;
use crate::module::{BuiltLibrary, NativeModule};
use crate::plan::{BuildPlan, BuildSettings, Delivery};

const STAGING_DIR: &str = ".staging";

/// Outcome of a run that got past configuration and fetching.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Published modules, in architecture order.
    pub modules: Vec<NativeModule>,
    pub failures: Vec<BuildFailure>,
}

impl BuildReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn module(&self, arch: TargetArch) -> Option<&NativeModule> {
        self.modules.iter().find(|m| m.arch() == arch)
    }
}

pub struct Orchestrator<B: BuildBackend> {
    backend: Arc<B>,
    fetch_timeout: Duration,
}

impl<B: BuildBackend> Orchestrator<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            fetch_timeout: Duration::from_secs(10 * 60),
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Resolve and run in one step. Configuration errors surface before the
    /// backend sees a single job.
    pub async fn build(
        &self,
        set: DescriptorSet,
        archs: &[TargetArch],
        settings: BuildSettings,
        baseline: Option<&EntryPointTable>,
    ) -> Result<BuildReport, BuildError> {
        let plan = BuildPlan::resolve(set, archs, settings, baseline)?;
        self.run(plan).await
    }

    pub async fn run(&self, plan: BuildPlan) -> Result<BuildReport, BuildError> {
        let sources = self.fetch_sources(&plan).await?;

        let staging_root = plan.settings().out_dir.join(STAGING_DIR);
        remove_if_exists(&staging_root).await.map_err(|e| BuildError::Failure(BuildFailure {
            stage: Stage::Prepare,
            arch: TargetArch::REQUIRED,
            reason: e.into(),
        }))?;

        let plan = Arc::new(plan);
        let sources = Arc::new(sources);
        let mut tasks = Vec::with_capacity(plan.architectures().len());
        for &arch in plan.architectures() {
            let backend = Arc::clone(&self.backend);
            let plan = Arc::clone(&plan);
            let sources = Arc::clone(&sources);
            tasks.push((
                arch,
                tokio::spawn(async move { build_arch(&*backend, &plan, &sources, arch).await }),
            ));
        }

        let mut staged = Vec::new();
        let mut failures = Vec::new();
        for (arch, task) in tasks {
            match task.await {
                Ok(Ok(module)) => staged.push(module),
                Ok(Err(failure)) => failures.push(failure),
                Err(e) => failures.push(BuildFailure {
                    stage: Stage::Prepare,
                    arch,
                    reason: FailureReason::Internal(format!("build task failed: {e}")),
                }),
            }
        }
        for failure in &failures {
            tracing::error!(arch = %failure.arch, library = ?failure.library(), "{failure}");
        }

        if plan.settings().delivery == Delivery::Atomic && !failures.is_empty() {
            if let Err(e) = remove_if_exists(&staging_root).await {
                tracing::warn!("Failed to discard staging directory: {e}");
            }
            let total = plan.architectures().len();
            let failed = failures.len();
            let first = failures.swap_remove(0);
            return Err(BuildError::AtomicAborted { failed, total, first });
        }

        let atomic = plan.settings().delivery == Delivery::Atomic;
        let mut modules = Vec::with_capacity(staged.len());
        let mut published = Vec::with_capacity(staged.len());
        for module in staged {
            let arch = module.arch();
            match publish(&plan, arch, &staging_root).await {
                Ok(previous) => {
                    tracing::info!(
                        arch = %arch,
                        artifact = %module.artifact().display(),
                        fingerprint = %module.fingerprint(),
                        "module published"
                    );
                    published.push((arch, previous));
                    modules.push(module);
                }
                Err(e) => {
                    let failure = BuildFailure {
                        stage: Stage::Publish,
                        arch,
                        reason: e.into(),
                    };
                    tracing::error!(arch = %arch, "{failure}");
                    if !atomic {
                        failures.push(failure);
                        continue;
                    }
                    for (arch, previous) in published.into_iter().rev() {
                        if let Err(e) = roll_back(&plan, arch, previous).await {
                            tracing::warn!(arch = %arch, "Failed to restore previous module: {e}");
                        }
                    }
                    if let Err(e) = remove_if_exists(&staging_root).await {
                        tracing::warn!("Failed to discard staging directory: {e}");
                    }
                    return Err(BuildError::AtomicAborted {
                        failed: 1,
                        total: plan.architectures().len(),
                        first: failure,
                    });
                }
            }
        }
        if let Err(e) = remove_if_exists(&staging_root).await {
            tracing::warn!("Failed to clean staging directory: {e}");
        }

        Ok(BuildReport { modules, failures })
    }

    async fn fetch_sources(&self, plan: &BuildPlan) -> Result<BTreeMap<String, PathBuf>, BuildError> {
        let fetcher = SourceFetcher::new(plan.settings().work_dir.join("sources"))
            .with_timeout(self.fetch_timeout);
        let mut sources = BTreeMap::new();
        for name in plan.order() {
            let Some(lib) = plan.descriptor(name) else { continue };
            let dir = fetcher.fetch(lib).await.map_err(|reason| BuildError::Fetch {
                library: name.clone(),
                reason,
            })?;
            sources.insert(name.clone(), dir);
        }
        Ok(sources)
    }
}

/// Build every library for `arch` and link the module into staging.
async fn build_arch<B: BuildBackend>(
    backend: &B,
    plan: &BuildPlan,
    sources: &BTreeMap<String, PathBuf>,
    arch: TargetArch,
) -> Result<NativeModule, BuildFailure> {
    let fail = |stage: Stage, reason: FailureReason| BuildFailure { stage, arch, reason };
    let settings = plan.settings();

    let staging = plan.staging_dir(arch);
    tokio::fs::create_dir_all(&staging)
        .await
        .map_err(|e| fail(Stage::Prepare, e.into()))?;

    let mut libraries = Vec::with_capacity(plan.order().len());
    let mut archives = Vec::new();
    for name in plan.order() {
        let Some(lib) = plan.descriptor(name) else { continue };
        let stage = || Stage::Library(name.clone());
        let source = sources
            .get(name)
            .ok_or_else(|| fail(stage(), FailureReason::Internal("source was not fetched".into())))?;
        let prefixes: Vec<PathBuf> = dependency_closure(plan, name)
            .into_iter()
            .map(|dep| plan.library_install_dir(arch, dep))
            .collect();
        let job = plan.library_job(arch, lib, source, &prefixes);

        tracing::info!(library = %name, version = %lib.version, arch = %arch, "building library");
        let artifacts = backend
            .build_library(&job)
            .await
            .map_err(|reason| fail(stage(), reason))?;

        let artifacts = if lib.links() { artifacts } else { Vec::new() };
        if !artifacts.is_empty() {
            archives.push(artifacts.clone());
        }
        libraries.push(BuiltLibrary {
            name: lib.name.clone(),
            version: lib.version.clone(),
            output: lib.output,
            install_dir: job.install_dir,
            artifacts,
        });
    }

    let export_map = ExportMap::from_table(&settings.module_name, plan.entry_points());
    let link = plan.link_job(arch, &archives);
    tokio::fs::write(&link.export_map, export_map.render())
        .await
        .map_err(|e| fail(Stage::Prepare, e.into()))?;

    tracing::info!(arch = %arch, archives = archives.len(), "linking module");
    backend
        .link_module(&link)
        .await
        .map_err(|reason| fail(Stage::Link, reason))?;
    if !link.output.is_file() {
        return Err(fail(
            Stage::Link,
            FailureReason::MissingArtifact(link.output.display().to_string()),
        ));
    }

    let fingerprint = plan
        .fingerprint(arch)
        .map_err(|e| fail(Stage::Prepare, FailureReason::Internal(e.to_string())))?;
    let publish_dir = plan.publish_dir(arch);
    let module = NativeModule::new(
        settings.module_name.clone(),
        arch,
        plan.entry_points().clone(),
        libraries,
        publish_dir.join(plan.artifact_name()),
        publish_dir.join(plan.export_map_name()),
        fingerprint,
    );
    module
        .write_manifest(&staging)
        .map_err(|e| fail(Stage::Prepare, e.into()))?;
    Ok(module)
}

/// Every library `name` depends on, directly or not, in build order.
fn dependency_closure<'a>(plan: &'a BuildPlan, name: &str) -> Vec<&'a str> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<&str> = plan
        .descriptor(name)
        .map(|l| l.depends_on.iter().map(String::as_str).collect())
        .unwrap_or_default();
    while let Some(dep) = stack.pop() {
        if seen.insert(dep.to_string()) {
            if let Some(lib) = plan.descriptor(dep) {
                stack.extend(lib.depends_on.iter().map(String::as_str));
            }
        }
    }
    plan.order()
        .iter()
        .filter(|n| seen.contains(n.as_str()))
        .map(String::as_str)
        .collect()
}

/// Rename staging into place. A module already published for `arch` is
/// moved under `staging_root` and its new location returned.
async fn publish(
    plan: &BuildPlan,
    arch: TargetArch,
    staging_root: &Path,
) -> std::io::Result<Option<PathBuf>> {
    let target = plan.publish_dir(arch);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let previous = if tokio::fs::try_exists(&target).await? {
        let aside = staging_root.join(format!("{}.previous", arch.abi_name()));
        tokio::fs::rename(&target, &aside).await?;
        Some(aside)
    } else {
        None
    };
    if let Err(e) = tokio::fs::rename(plan.staging_dir(arch), &target).await {
        if let Some(aside) = &previous {
            tokio::fs::rename(aside, &target).await?;
        }
        return Err(e);
    }
    Ok(previous)
}

/// Undo [`publish`] for `arch`.
async fn roll_back(
    plan: &BuildPlan,
    arch: TargetArch,
    previous: Option<PathBuf>,
) -> std::io::Result<()> {
    let target = plan.publish_dir(arch);
    remove_if_exists(&target).await?;
    if let Some(aside) = previous {
        tokio::fs::rename(aside, &target).await?;
    }
    Ok(())
}

async fn remove_if_exists(dir: &Path) -> std::io::Result<()> {
    if tokio::fs::try_exists(dir).await? {
        tokio::fs::remove_dir_all(dir).await?;
    }
    Ok(())
}
