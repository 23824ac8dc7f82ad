//! Android ABIs a module can be built for.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TargetArch {
    #[serde(rename = "arm64-v8a")]
    Arm64V8a,
    #[serde(rename = "armeabi-v7a")]
    ArmeabiV7a,
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "x86")]
    X86,
}

impl TargetArch {
    /// The one ABI every module must be buildable for.
    pub const REQUIRED: TargetArch = TargetArch::Arm64V8a;

    pub const ALL: [TargetArch; 4] = [
        TargetArch::Arm64V8a,
        TargetArch::ArmeabiV7a,
        TargetArch::X86_64,
        TargetArch::X86,
    ];

    /// NDK `ANDROID_ABI` name.
    pub fn abi_name(self) -> &'static str {
        match self {
            TargetArch::Arm64V8a => "arm64-v8a",
            TargetArch::ArmeabiV7a => "armeabi-v7a",
            TargetArch::X86_64 => "x86_64",
            TargetArch::X86 => "x86",
        }
    }

    /// Clang target triple, without the API level suffix.
    pub fn clang_triple(self) -> &'static str {
        match self {
            TargetArch::Arm64V8a => "aarch64-linux-android",
            TargetArch::ArmeabiV7a => "armv7a-linux-androideabi",
            TargetArch::X86_64 => "x86_64-linux-android",
            TargetArch::X86 => "i686-linux-android",
        }
    }

    /// Rust target triple the `forever-core` glue archive is compiled for.
    pub fn rust_triple(self) -> &'static str {
        match self {
            TargetArch::Arm64V8a => "aarch64-linux-android",
            TargetArch::ArmeabiV7a => "armv7-linux-androideabi",
            TargetArch::X86_64 => "x86_64-linux-android",
            TargetArch::X86 => "i686-linux-android",
        }
    }

    /// CMake cache variables every library gets for this ABI.
    pub fn cmake_defaults(self) -> BTreeMap<String, String> {
        let mut flags = BTreeMap::new();
        flags.insert("ANDROID_ABI".to_string(), self.abi_name().to_string());
        if self == TargetArch::ArmeabiV7a {
            flags.insert("ANDROID_ARM_NEON".to_string(), "ON".to_string());
        }
        flags
    }
}

impl fmt::Display for TargetArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abi_name())
    }
}

impl FromStr for TargetArch {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TargetArch::ALL
            .into_iter()
            .find(|a| a.abi_name() == s)
            .ok_or_else(|| ConfigError::UnknownArchitecture(s.to_string()))
    }
}
