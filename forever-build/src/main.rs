//! forever-build: build the native module for every requested Android ABI.
//!
//!   forever-build build    fetch, build, link and publish
//!   forever-build plan     print build order, entry points and flags
//!   forever-build check    validate the manifest only

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use forever_build::abi::ExportMap;
use forever_build::backend::CmakeBackend;
use forever_build::manifest::{DEFAULT_MANIFEST, Manifest};
use forever_build::plan::check_ndk_version;
use forever_build::{BuildPlan, Delivery, NativeModule, Orchestrator, TargetArch};

#[derive(Parser)]
#[command(name = "forever-build", about = "Build the forever native module")]
struct Args {
    /// Path to the build manifest
    #[arg(long, default_value = DEFAULT_MANIFEST, env = "FOREVER_MANIFEST")]
    manifest: PathBuf,

    /// Target ABI (repeatable); overrides the manifest's list
    #[arg(long = "arch")]
    archs: Vec<TargetArch>,

    /// Where published modules go (one directory per ABI)
    #[arg(long, default_value = "target/forever/modules")]
    out_dir: PathBuf,

    /// Scratch space for sources and per-library builds
    #[arg(long, default_value = "target/forever/work")]
    work_dir: PathBuf,

    /// Android NDK root
    #[arg(long, env = "ANDROID_NDK_HOME")]
    ndk: Option<PathBuf>,

    /// Publish nothing unless every ABI builds
    #[arg(long)]
    atomic: bool,

    /// Previously published module.json to check entry-point evolution against
    #[arg(long)]
    baseline: Option<PathBuf>,

    /// Timeout for each configure/build/link step
    #[arg(long, default_value_t = 1800)]
    timeout_secs: u64,

    /// CMake executable
    #[arg(long, default_value = "cmake", env = "FOREVER_CMAKE")]
    cmake: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy, Default)]
enum Command {
    /// Fetch, build, link and publish (default)
    #[default]
    Build,
    /// Print the resolved plan without building
    Plan,
    /// Validate the manifest and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs for CI (FOREVER_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("FOREVER_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("forever_build=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let args = Args::parse();
    let manifest = Manifest::load(&args.manifest)?;
    let archs = if args.archs.is_empty() {
        manifest.module.architectures.clone()
    } else {
        args.archs.clone()
    };

    let mut settings = manifest.settings(args.work_dir.clone(), args.out_dir.clone());
    settings.ndk = args.ndk.clone();
    settings.step_timeout = Duration::from_secs(args.timeout_secs);
    if args.atomic {
        settings.delivery = Delivery::Atomic;
    }
    if let (Some(ndk), Some(expected)) = (&settings.ndk, &manifest.module.ndk_version) {
        check_ndk_version(ndk, expected)?;
    }

    let baseline = match &args.baseline {
        Some(path) => Some(
            NativeModule::load(path)
                .with_context(|| format!("Failed to load baseline {}", path.display()))?,
        ),
        None => None,
    };

    let set = manifest.descriptors()?;
    let plan = BuildPlan::resolve(set, &archs, settings, baseline.as_ref().map(|m| m.entry_points()))?;
    let version = plan.entry_points().version();
    tracing::info!(
        module = %plan.settings().module_name,
        libraries = plan.order().len(),
        abi = %format!("{}.{}", version.major, version.minor),
        "Manifest is valid"
    );

    match args.command.unwrap_or_default() {
        Command::Check => Ok(()),
        Command::Plan => {
            print_plan(&plan);
            Ok(())
        }
        Command::Build => {
            let orchestrator = Orchestrator::new(CmakeBackend::new(&args.cmake));
            let report = orchestrator.run(plan).await?;
            for module in &report.modules {
                println!("{}\t{}", module.arch(), module.artifact().display());
            }
            if !report.is_complete() {
                for failure in &report.failures {
                    eprintln!("{failure}");
                }
                bail!(
                    "{} of {} architectures failed",
                    report.failures.len(),
                    report.failures.len() + report.modules.len()
                );
            }
            Ok(())
        }
    }
}

fn print_plan(plan: &BuildPlan) {
    println!("build order: {}", plan.order().join(" -> "));
    println!();
    print!(
        "{}",
        ExportMap::from_table(&plan.settings().module_name, plan.entry_points()).render()
    );
    for &arch in plan.architectures() {
        println!();
        println!("[{arch}]");
        for name in plan.order() {
            println!("  {name}:");
            for arg in plan.merged_flags(arch, name).to_cmake_args() {
                println!("    {arg}");
            }
        }
    }
}
