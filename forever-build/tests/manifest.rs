//! Manifest → descriptor set → plan, the way the CLI drives it.

use std::path::PathBuf;

use forever_build::abi::MODULE_ENTRY_POINTS;
use forever_build::manifest::Manifest;
use forever_build::{BuildPlan, ConfigError, TargetArch};

fn write_manifest(dir: &std::path::Path, body: &str) -> PathBuf {
    for lib in ["zstd", "openssl", "fmt", "libuv", "c-ares"] {
        std::fs::create_dir_all(dir.join("third_party").join(lib)).unwrap();
    }
    let path = dir.join("forever.toml");
    std::fs::write(&path, body).unwrap();
    path
}

const ALL_FIVE: &str = r#"
[module]
name = "forever"
architectures = ["arm64-v8a", "armeabi-v7a"]

[[library]]
preset = "zstd"
version = "1.5.7"
path = "third_party/zstd"
options = { level = "19", legacy = "ON" }

[[library]]
preset = "openssl"
version = "3.5.0"
path = "third_party/openssl"
depends-on = ["codec"]

[[library]]
preset = "fmt"
version = "11.1.4"
path = "third_party/fmt"

[[library]]
preset = "libuv"
version = "1.51.0"
path = "third_party/libuv"

[[library]]
preset = "c-ares"
version = "1.34.5"
path = "third_party/c-ares"
"#;

#[test]
fn five_library_manifest_resolves() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_manifest(dir.path(), ALL_FIVE);
    let manifest = Manifest::load(&path).unwrap();
    let settings = manifest.settings(dir.path().join("work"), dir.path().join("out"));
    let plan = BuildPlan::resolve(
        manifest.descriptors().unwrap(),
        &manifest.module.architectures,
        settings,
        None,
    )
    .unwrap();

    assert_eq!(plan.order(), &["aio", "codec", "dns", "fmt", "tls"]);
    // module-level entries plus one capability per library
    assert_eq!(plan.entry_points().len(), MODULE_ENTRY_POINTS.len() + 5);

    let v7 = plan.merged_flags(TargetArch::ArmeabiV7a, "codec").to_cmake_args();
    assert!(v7.contains(&"-DANDROID_ABI=armeabi-v7a".to_string()));
    assert!(v7.contains(&"-DANDROID_ARM_NEON=ON".to_string()));
    assert!(v7.contains(&"-DZSTD_LEGACY_SUPPORT=ON".to_string()));
    assert!(v7.contains(&"-DCMAKE_CXX_STANDARD=20".to_string()));
}

#[test]
fn missing_required_option_names_the_library() {
    let dir = tempfile::tempdir().unwrap();
    let body = ALL_FIVE.replace(r#"options = { level = "19", legacy = "ON" }"#, "");
    let path = write_manifest(dir.path(), &body);
    let manifest = Manifest::load(&path).unwrap();
    let err = BuildPlan::resolve(
        manifest.descriptors().unwrap(),
        &manifest.module.architectures,
        manifest.settings(dir.path().join("work"), dir.path().join("out")),
        None,
    )
    .unwrap_err();
    assert_eq!(
        err,
        ConfigError::MissingOption {
            library: "codec".into(),
            option: "level".into()
        }
    );
}

#[test]
fn library_restricted_to_one_abi_fails_for_others() {
    let dir = tempfile::tempdir().unwrap();
    let body = ALL_FIVE.replace(
        "path = \"third_party/c-ares\"",
        "path = \"third_party/c-ares\"\narchitectures = [\"arm64-v8a\"]",
    );
    let path = write_manifest(dir.path(), &body);
    let manifest = Manifest::load(&path).unwrap();
    let err = BuildPlan::resolve(
        manifest.descriptors().unwrap(),
        &manifest.module.architectures,
        manifest.settings(dir.path().join("work"), dir.path().join("out")),
        None,
    )
    .unwrap_err();
    assert_eq!(
        err,
        ConfigError::UnsupportedArchitecture {
            library: "dns".into(),
            arch: TargetArch::ArmeabiV7a
        }
    );
}

#[test]
fn unreadable_manifest_reports_its_path() {
    let err = Manifest::load(std::path::Path::new("/nonexistent/forever.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Manifest { ref path, .. } if path.contains("nonexistent")));
}
