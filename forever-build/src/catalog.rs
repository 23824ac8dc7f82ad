//! Built-in presets for the libraries the module ships with.
//!
//! A preset fills in the schema, exports, output kind and artifact names so a
//! manifest only has to say which version to build and from where.

use crate::descriptor::{LibraryDescriptor, OptionSpec, OutputKind, Source};

const ON_OFF: &[&str] = &["ON", "OFF"];

pub const PRESETS: &[&str] = &["zstd", "openssl", "fmt", "libuv", "c-ares"];

/// Descriptor template for `preset`, or `None` if there is no such preset.
///
/// The template uses the preset's default library name; the manifest may
/// rename it.
pub fn preset(preset: &str, version: &str, source: Source) -> Option<LibraryDescriptor> {
    let lib = match preset {
        "zstd" => {
            let levels: Vec<String> = (1..=22).map(|l| l.to_string()).collect();
            let levels: Vec<&str> = levels.iter().map(String::as_str).collect();
            LibraryDescriptor::new("codec", version, source)
                .schema_entry(
                    "level",
                    OptionSpec::define("ZSTD_CLEVEL_DEFAULT")
                        .required()
                        .allowed(&levels),
                )
                .schema_entry(
                    "legacy",
                    OptionSpec::cache("ZSTD_LEGACY_SUPPORT")
                        .default_value("OFF")
                        .allowed(ON_OFF),
                )
                .schema_entry(
                    "multithread",
                    OptionSpec::cache("ZSTD_MULTITHREAD_SUPPORT")
                        .default_value("ON")
                        .allowed(ON_OFF),
                )
                .flag("ZSTD_BUILD_PROGRAMS", "OFF")
                .flag("ZSTD_BUILD_SHARED", "OFF")
                .export("forever_codec_version", "fn() -> u32")
                .artifact("libzstd.a")
        }
        // Expects a CMake-enabled OpenSSL tree (openssl-cmake layout).
        "openssl" => LibraryDescriptor::new("tls", version, source)
            .schema_entry(
                "no-asm",
                OptionSpec::cache("OPENSSL_NO_ASM")
                    .default_value("OFF")
                    .allowed(ON_OFF),
            )
            .export("forever_tls_version", "fn() -> u32")
            .artifact("libssl.a")
            .artifact("libcrypto.a"),
        "fmt" => LibraryDescriptor::new("fmt", version, source)
            .output(OutputKind::HeaderOnly)
            .schema_entry(
                "header-only",
                OptionSpec::cache("FMT_HEADER_ONLY")
                    .default_value("ON")
                    .allowed(ON_OFF),
            )
            .flag("FMT_TEST", "OFF")
            .flag("FMT_DOC", "OFF")
            .export("forever_fmt_version", "fn() -> u32"),
        "libuv" => LibraryDescriptor::new("aio", version, source)
            .schema_entry(
                "build-tests",
                OptionSpec::cache("LIBUV_BUILD_TESTS")
                    .default_value("OFF")
                    .allowed(ON_OFF),
            )
            .flag("LIBUV_BUILD_SHARED", "OFF")
            .export("forever_aio_version", "fn() -> u32")
            .artifact("libuv.a"),
        "c-ares" => LibraryDescriptor::new("dns", version, source)
            .schema_entry(
                "threads",
                OptionSpec::cache("CARES_THREADS")
                    .default_value("ON")
                    .allowed(ON_OFF),
            )
            .flag("CARES_STATIC", "ON")
            .flag("CARES_SHARED", "OFF")
            .flag("CARES_BUILD_TOOLS", "OFF")
            .export("forever_dns_version", "fn() -> u32")
            .artifact("libcares.a"),
        _ => return None,
    };
    Some(lib)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;

    fn src() -> Source {
        Source::Path { path: "src".into() }
    }

    #[test]
    fn every_listed_preset_exists() {
        for name in PRESETS {
            let lib = preset(name, "1.0.0", src()).unwrap();
            assert_eq!(lib.exports.len(), 1, "{name} exports one capability");
        }
        assert!(preset("boost", "1.0.0", src()).is_none());
    }

    #[test]
    fn zstd_level_is_required_and_bounded() {
        let lib = preset("zstd", "1.5.7", src()).unwrap();
        assert!(matches!(
            lib.resolve_options(),
            Err(ConfigError::MissingOption { ref library, .. }) if library == "codec"
        ));
        let lib = lib.option("level", "23");
        assert!(matches!(
            lib.resolve_options(),
            Err(ConfigError::InvalidOptionValue { .. })
        ));
    }

    #[test]
    fn fmt_is_header_only() {
        let lib = preset("fmt", "11.1.4", src()).unwrap();
        assert!(!lib.links());
        assert!(lib.resolve_options().is_ok());
    }
}
