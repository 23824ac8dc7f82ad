//! Native build backends.
//!
//! The orchestrator decides *what* to build and in which order; a
//! [`BuildBackend`] runs the actual toolchain. [`CmakeBackend`] drives CMake
//! and the NDK clang driver through `tokio::process`.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;

use crate::arch::TargetArch;
use crate::descriptor::OutputKind;
use crate::error::FailureReason;

/// Everything needed to configure, build and install one library for one ABI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryJob {
    pub library: String,
    pub version: String,
    pub arch: TargetArch,
    pub output: OutputKind,
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
    pub install_dir: PathBuf,
    pub cmake_args: Vec<String>,
    /// Archive names expected under `<install_dir>/lib`.
    pub expected_artifacts: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

/// Link step for one ABI's module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkJob {
    pub module: String,
    pub arch: TargetArch,
    pub linker: PathBuf,
    /// Clang `--target`, API level included.
    pub target: String,
    /// Linked whole so every entry point survives.
    pub whole_archives: Vec<PathBuf>,
    /// Pulled in only as far as the entry points need them, dependants first.
    pub archives: Vec<PathBuf>,
    pub system_libs: Vec<String>,
    pub export_map: PathBuf,
    pub output: PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

pub trait BuildBackend: Send + Sync + 'static {
    /// Build and install one library, returning the installed archives.
    fn build_library(
        &self,
        job: &LibraryJob,
    ) -> impl Future<Output = Result<Vec<PathBuf>, FailureReason>> + Send;

    /// Link the module shared object.
    fn link_module(&self, job: &LinkJob) -> impl Future<Output = Result<(), FailureReason>> + Send;
}

/// CMake configure / build / install, then NDK clang for the final link.
#[derive(Debug, Clone)]
pub struct CmakeBackend {
    cmake: PathBuf,
    generator: Option<String>,
}

impl Default for CmakeBackend {
    fn default() -> Self {
        Self {
            cmake: PathBuf::from("cmake"),
            generator: Some("Ninja".to_string()),
        }
    }
}

impl CmakeBackend {
    pub fn new(cmake: impl Into<PathBuf>) -> Self {
        Self {
            cmake: cmake.into(),
            ..Self::default()
        }
    }

    pub fn with_generator(mut self, generator: Option<String>) -> Self {
        self.generator = generator;
        self
    }
}

impl BuildBackend for CmakeBackend {
    async fn build_library(&self, job: &LibraryJob) -> Result<Vec<PathBuf>, FailureReason> {
        // Wholesale rebuild: no cache or install tree survives from a previous run.
        for dir in [&job.build_dir, &job.install_dir] {
            if tokio::fs::try_exists(dir).await? {
                tokio::fs::remove_dir_all(dir).await?;
            }
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut configure = Command::new(&self.cmake);
        configure
            .arg("-S")
            .arg(&job.source_dir)
            .arg("-B")
            .arg(&job.build_dir)
            .arg(format!("-DCMAKE_INSTALL_PREFIX={}", job.install_dir.display()));
        if let Some(generator) = &self.generator {
            configure.arg("-G").arg(generator);
        }
        configure.args(&job.cmake_args);
        run(configure, &job.env, job.timeout).await?;

        if job.output != OutputKind::HeaderOnly {
            let mut build = Command::new(&self.cmake);
            build.arg("--build").arg(&job.build_dir).arg("--parallel");
            run(build, &job.env, job.timeout).await?;
        }

        let mut install = Command::new(&self.cmake);
        install.arg("--install").arg(&job.build_dir);
        run(install, &job.env, job.timeout).await?;

        collect_artifacts(&job.install_dir, &job.expected_artifacts)
    }

    async fn link_module(&self, job: &LinkJob) -> Result<(), FailureReason> {
        let soname = job
            .output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("lib{}.so", job.module));

        let mut link = Command::new(&job.linker);
        link.arg(format!("--target={}", job.target))
            .arg("-shared")
            .arg("-o")
            .arg(&job.output)
            .arg(format!("-Wl,-soname,{soname}"))
            .arg(format!("-Wl,--version-script={}", job.export_map.display()))
            .arg("-Wl,--exclude-libs,ALL")
            .arg("-Wl,--no-undefined")
            .arg("-Wl,--build-id=sha1");
        if !job.whole_archives.is_empty() {
            link.arg("-Wl,--whole-archive")
                .args(&job.whole_archives)
                .arg("-Wl,--no-whole-archive");
        }
        link.args(&job.archives);
        for lib in &job.system_libs {
            link.arg(format!("-l{lib}"));
        }
        run(link, &job.env, job.timeout).await
    }
}

fn collect_artifacts(install_dir: &Path, expected: &[String]) -> Result<Vec<PathBuf>, FailureReason> {
    expected
        .iter()
        .map(|name| {
            let path = install_dir.join("lib").join(name);
            if path.is_file() {
                Ok(path)
            } else {
                Err(FailureReason::MissingArtifact(path.display().to_string()))
            }
        })
        .collect()
}

/// Run a command to completion with a timeout, keeping the tail of stderr on failure.
pub(crate) async fn run(
    mut cmd: Command,
    env: &BTreeMap<String, String>,
    timeout: Duration,
) -> Result<(), FailureReason> {
    let command = describe(&cmd);
    cmd.envs(env).kill_on_drop(true);
    tracing::debug!(%command, "running");

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Err(_) => {
            return Err(FailureReason::TimedOut {
                command,
                secs: timeout.as_secs(),
            });
        }
        Ok(Err(e)) => {
            return Err(FailureReason::Spawn {
                command,
                message: e.to_string(),
            });
        }
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut tail: Vec<&str> = stderr.lines().rev().take(20).collect();
        tail.reverse();
        return Err(FailureReason::CommandFailed {
            command,
            status: output.status.code().unwrap_or(-1),
            stderr_tail: tail.join("\n"),
        });
    }
    Ok(())
}

fn describe(cmd: &Command) -> String {
    let std = cmd.as_std();
    let mut parts = vec![std.get_program().to_string_lossy().into_owned()];
    parts.extend(std.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_artifact_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib/libzstd.a"), b"!<arch>\n").unwrap();

        let found = collect_artifacts(dir.path(), &["libzstd.a".to_string()]).unwrap();
        assert_eq!(found, vec![dir.path().join("lib/libzstd.a")]);

        let err = collect_artifacts(dir.path(), &["libssl.a".to_string()]).unwrap_err();
        assert!(matches!(err, FailureReason::MissingArtifact(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_keeps_stderr_tail() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo boom >&2; exit 3");
        let err = run(cmd, &BTreeMap::new(), Duration::from_secs(10)).await.unwrap_err();
        match err {
            FailureReason::CommandFailed { status, stderr_tail, .. } => {
                assert_eq!(status, 3);
                assert_eq!(stderr_tail, "boom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let err = run(cmd, &BTreeMap::new(), Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, FailureReason::TimedOut { .. }));
    }

    #[test]
    fn describe_renders_program_and_args() {
        let mut cmd = Command::new("cmake");
        cmd.arg("--build").arg("out");
        assert_eq!(describe(&cmd), "cmake --build out");
    }
}
