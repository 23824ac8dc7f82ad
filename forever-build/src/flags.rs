//! Build flag layering.
//!
//! Precedence, lowest first: global defaults, per-ABI defaults, per-library
//! overrides, then the library's resolved options. Everything is kept in
//! `BTreeMap`s so the rendered command line does not depend on input order.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::descriptor::{OptionTarget, ResolvedOption};

/// Global CMake defaults for every library, matching the app's NDK setup.
pub fn android_defaults() -> BTreeMap<String, String> {
    [
        ("ANDROID_STL", "c++_shared"),
        ("ANDROID_WEAK_API_DEFS", "ON"),
        ("ANDROID_PLATFORM", "android-24"),
        ("CMAKE_CXX_STANDARD", "20"),
        ("CMAKE_CXX_EXTENSIONS", "OFF"),
        ("CMAKE_BUILD_TYPE", "RelWithDebInfo"),
        ("CMAKE_POSITION_INDEPENDENT_CODE", "ON"),
        ("BUILD_SHARED_LIBS", "OFF"),
        ("BUILD_TESTING", "OFF"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Fully merged flags for one library on one ABI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergedFlags {
    pub cache: BTreeMap<String, String>,
    pub defines: BTreeMap<String, String>,
    /// Extra compiler flags shared by C and C++ (prefix maps and the like).
    pub compile: Vec<String>,
}

impl MergedFlags {
    pub fn merge(
        global: &BTreeMap<String, String>,
        abi: &BTreeMap<String, String>,
        library: &BTreeMap<String, String>,
        options: &[ResolvedOption],
    ) -> Self {
        let mut cache = global.clone();
        cache.extend(abi.iter().map(|(k, v)| (k.clone(), v.clone())));
        cache.extend(library.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut defines = BTreeMap::new();
        for opt in options {
            match &opt.target {
                OptionTarget::Cache(var) => {
                    cache.insert(var.clone(), opt.value.clone());
                }
                OptionTarget::Define(name) => {
                    defines.insert(name.clone(), opt.value.clone());
                }
            }
        }
        Self {
            cache,
            defines,
            compile: Vec::new(),
        }
    }

    pub fn with_compile_flag(mut self, flag: String) -> Self {
        self.compile.push(flag);
        self
    }

    /// CMake `-D` arguments.
    ///
    /// Defines and compile flags are appended to whatever `CMAKE_C_FLAGS` /
    /// `CMAKE_CXX_FLAGS` the cache layers already set.
    pub fn to_cmake_args(&self) -> Vec<String> {
        let mut cache = self.cache.clone();
        let mut extra: Vec<String> = self
            .defines
            .iter()
            .map(|(k, v)| format!("-D{k}={v}"))
            .collect();
        extra.extend(self.compile.iter().cloned());
        if !extra.is_empty() {
            let extra = extra.join(" ");
            for var in ["CMAKE_C_FLAGS", "CMAKE_CXX_FLAGS"] {
                let merged = match cache.get(var) {
                    Some(existing) if !existing.is_empty() => format!("{existing} {extra}"),
                    _ => extra.clone(),
                };
                cache.insert(var.to_string(), merged);
            }
        }
        cache.iter().map(|(k, v)| format!("-D{k}={v}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn library_overrides_win() {
        let global = map(&[("CMAKE_BUILD_TYPE", "RelWithDebInfo"), ("ANDROID_STL", "c++_shared")]);
        let abi = map(&[("ANDROID_ABI", "arm64-v8a")]);
        let lib = map(&[("CMAKE_BUILD_TYPE", "Release")]);
        let flags = MergedFlags::merge(&global, &abi, &lib, &[]);
        assert_eq!(flags.cache["CMAKE_BUILD_TYPE"], "Release");
        assert_eq!(flags.cache["ANDROID_STL"], "c++_shared");
        assert_eq!(flags.cache["ANDROID_ABI"], "arm64-v8a");
    }

    #[test]
    fn options_land_in_cache_or_defines() {
        let options = vec![
            ResolvedOption {
                name: "legacy".into(),
                target: OptionTarget::Cache("ZSTD_LEGACY_SUPPORT".into()),
                value: "OFF".into(),
            },
            ResolvedOption {
                name: "level".into(),
                target: OptionTarget::Define("ZSTD_CLEVEL_DEFAULT".into()),
                value: "19".into(),
            },
        ];
        let flags = MergedFlags::merge(&BTreeMap::new(), &BTreeMap::new(), &BTreeMap::new(), &options);
        let args = flags.to_cmake_args();
        assert!(args.contains(&"-DZSTD_LEGACY_SUPPORT=OFF".to_string()));
        assert!(args.contains(&"-DCMAKE_C_FLAGS=-DZSTD_CLEVEL_DEFAULT=19".to_string()));
        assert!(args.contains(&"-DCMAKE_CXX_FLAGS=-DZSTD_CLEVEL_DEFAULT=19".to_string()));
    }

    #[test]
    fn args_are_sorted_and_stable() {
        let a = MergedFlags::merge(&map(&[("B", "2"), ("A", "1")]), &BTreeMap::new(), &BTreeMap::new(), &[]);
        let b = MergedFlags::merge(&map(&[("A", "1"), ("B", "2")]), &BTreeMap::new(), &BTreeMap::new(), &[]);
        assert_eq!(a.to_cmake_args(), vec!["-DA=1", "-DB=2"]);
        assert_eq!(a.to_cmake_args(), b.to_cmake_args());
    }

    #[test]
    fn compile_flags_append_to_existing() {
        let flags = MergedFlags::merge(&map(&[("CMAKE_C_FLAGS", "-O2")]), &BTreeMap::new(), &BTreeMap::new(), &[])
            .with_compile_flag("-ffile-prefix-map=/work=.".into());
        let args = flags.to_cmake_args();
        assert!(args.contains(&"-DCMAKE_C_FLAGS=-O2 -ffile-prefix-map=/work=.".to_string()));
    }
}
