//! Versions of the constituent libraries, packed as `major*10000 + minor*100 + patch`.
//!
//! A library that is not linked into this build reports 0, as does a version
//! too large to pack.

pub fn pack(major: u32, minor: u32, patch: u32) -> u32 {
    major
        .checked_mul(10_000)
        .and_then(|v| v.checked_add(minor.checked_mul(100)?))
        .and_then(|v| v.checked_add(patch))
        .unwrap_or(0)
}

/// `OpenSSL_version_num()`: `0xMNN00PP0` from 3.0 on, `0xMNNFFPPS` before.
pub fn unpack_openssl(raw: u64) -> u32 {
    let major = ((raw >> 28) & 0xf) as u32;
    let minor = ((raw >> 20) & 0xff) as u32;
    let patch = if major >= 3 {
        ((raw >> 4) & 0xff) as u32
    } else {
        ((raw >> 12) & 0xff) as u32
    };
    pack(major, minor, patch)
}

/// libuv and c-ares both encode `major << 16 | minor << 8 | patch`.
pub fn unpack_hex_triplet(raw: u32) -> u32 {
    pack((raw >> 16) & 0xff, (raw >> 8) & 0xff, raw & 0xff)
}

/// `"11.1.4"` → 110104. Anything unparsable is 0.
pub fn parse_dotted(version: &str) -> u32 {
    let mut parts = version.trim().split('.').map(|p| p.parse::<u32>());
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(major)), Some(Ok(minor)), patch) => {
            let patch = match patch {
                Some(Ok(p)) => p,
                None => 0,
                Some(Err(_)) => return 0,
            };
            if minor > 99 || patch > 99 {
                return 0;
            }
            pack(major, minor, patch)
        }
        _ => 0,
    }
}

#[cfg(feature = "codec")]
unsafe extern "C" {
    fn ZSTD_versionNumber() -> std::ffi::c_uint;
}

#[cfg(feature = "tls")]
unsafe extern "C" {
    fn OpenSSL_version_num() -> std::ffi::c_ulong;
}

#[cfg(feature = "aio")]
unsafe extern "C" {
    fn uv_version() -> std::ffi::c_uint;
}

#[cfg(feature = "dns")]
unsafe extern "C" {
    fn ares_version(version: *mut std::ffi::c_int) -> *const std::ffi::c_char;
}

pub fn codec() -> u32 {
    #[cfg(feature = "codec")]
    {
        // zstd already uses the packed layout.
        unsafe { ZSTD_versionNumber() as u32 }
    }
    #[cfg(not(feature = "codec"))]
    {
        0
    }
}

pub fn tls() -> u32 {
    #[cfg(feature = "tls")]
    {
        unpack_openssl(unsafe { OpenSSL_version_num() } as u64)
    }
    #[cfg(not(feature = "tls"))]
    {
        0
    }
}

pub fn aio() -> u32 {
    #[cfg(feature = "aio")]
    {
        unpack_hex_triplet(unsafe { uv_version() } as u32)
    }
    #[cfg(not(feature = "aio"))]
    {
        0
    }
}

pub fn dns() -> u32 {
    #[cfg(feature = "dns")]
    {
        let mut raw: std::ffi::c_int = 0;
        unsafe { ares_version(&mut raw) };
        unpack_hex_triplet(raw as u32)
    }
    #[cfg(not(feature = "dns"))]
    {
        0
    }
}

/// fmt is header-only; its version is fixed when this crate is compiled.
pub fn fmt() -> u32 {
    option_env!("FOREVER_FMT_VERSION").map_or(0, parse_dotted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openssl_layouts() {
        // 3.5.0
        assert_eq!(unpack_openssl(0x3050_0000), 30500);
        // 3.0.13
        assert_eq!(unpack_openssl(0x3000_00d0), 30013);
        // 1.1.1w
        assert_eq!(unpack_openssl(0x1010_117f), 10101);
    }

    #[test]
    fn hex_triplets() {
        // libuv 1.51.0, c-ares 1.34.5
        assert_eq!(unpack_hex_triplet(0x01_33_00), 15100);
        assert_eq!(unpack_hex_triplet(0x01_22_05), 13405);
    }

    #[test]
    fn oversized_versions_pack_to_zero() {
        assert_eq!(pack(429_496, 72, 95), 4_294_967_295);
        assert_eq!(pack(429_497, 0, 0), 0);
        assert_eq!(pack(1, u32::MAX, 0), 0);
        assert_eq!(parse_dotted("500000.1.0"), 0);
    }

    #[test]
    fn dotted_versions() {
        assert_eq!(parse_dotted("11.1.4"), 110104);
        assert_eq!(parse_dotted("10.2"), 100200);
        assert_eq!(parse_dotted("1.x.0"), 0);
        assert_eq!(parse_dotted("1.100.0"), 0);
        assert_eq!(parse_dotted(""), 0);
    }

    #[cfg(not(feature = "linked"))]
    #[test]
    fn unlinked_libraries_report_zero() {
        assert_eq!(codec(), 0);
        assert_eq!(tls(), 0);
        assert_eq!(aio(), 0);
        assert_eq!(dns(), 0);
    }
}
