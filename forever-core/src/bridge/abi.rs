//! C ABI exports of the native module.
//!
//! All functions are `extern "C"` and `#[no_mangle]`. Strings returned to the
//! host are owned by this module and must be released with `forever_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString, c_char, c_void};

use ::forever_bootstrap::{BootstrapConfig, BootstrapReport};
use once_cell::sync::Lazy;
use parking_lot::ReentrantMutex;

use crate::bridge::callback::{InitCallback, InitHook};
use crate::capabilities;
use crate::error::FfiResult;
use crate::table;

/// Progress of the first `forever_bootstrap` call in this process.
enum Slot {
    Idle,
    Running,
    Done(Result<BootstrapReport, FfiResult>),
}

/// Reentrant so the init callback can call back into this module. The
/// `RefCell` is never borrowed while the callback runs.
static BOOTSTRAP: Lazy<ReentrantMutex<RefCell<Slot>>> =
    Lazy::new(|| ReentrantMutex::new(RefCell::new(Slot::Idle)));

fn with_report<T>(f: impl FnOnce(&BootstrapReport) -> T) -> Option<T> {
    let guard = BOOTSTRAP.lock();
    let slot = guard.borrow();
    match &*slot {
        Slot::Done(Ok(report)) => Some(f(report)),
        _ => None,
    }
}

/// Helper: read a C string pointer into a Rust String, returning None on null or invalid UTF-8.
unsafe fn read_c_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok().map(String::from)
}

fn into_c_string(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

unsafe fn read_config(
    config_json: *const c_char,
    caller: &str,
) -> Result<BootstrapConfig, FfiResult> {
    let Some(json) = (unsafe { read_c_str(config_json) }) else {
        tracing::error!("{caller}: null or invalid config_json");
        return Err(FfiResult::InvalidArgument);
    };
    BootstrapConfig::from_json(&json).map_err(|e| {
        tracing::error!("{caller}: {e}");
        FfiResult::from(&e)
    })
}

// ─── Module ──────────────────────────────────────────────────────────

/// Major version of the entry-point table compiled into this module.
#[unsafe(no_mangle)]
pub extern "C" fn forever_module_version() -> u32 {
    table::MODULE_VERSION
}

/// The entry-point table as JSON.
///
/// Returns a newly-allocated C string (caller must free with
/// `forever_free_string`), or null on failure.
///
/// ```json
/// {
///   "module_version": 1,
///   "entry_points": [{ "symbol": "forever_aio_version", "signature": "fn() -> u32", "since": 1, "library": "aio" }],
///   "linked": { "codec": 10507, "tls": 30500, "fmt": 110104, "aio": 15100, "dns": 13405 }
/// }
/// ```
#[unsafe(no_mangle)]
pub extern "C" fn forever_entry_points_json() -> *mut c_char {
    match table::to_json() {
        Ok(json) => into_c_string(json),
        Err(e) => {
            tracing::error!("forever_entry_points_json: {e}");
            std::ptr::null_mut()
        }
    }
}

/// Free a string previously returned by this module.
///
/// # Safety
///
/// `ptr` must be null or a pointer previously returned by a `forever_*` function.
/// Must not be called more than once for the same pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn forever_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(unsafe { CString::from_raw(ptr) });
    }
}

// ─── Capabilities ────────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub extern "C" fn forever_codec_version() -> u32 {
    capabilities::codec()
}

#[unsafe(no_mangle)]
pub extern "C" fn forever_tls_version() -> u32 {
    capabilities::tls()
}

#[unsafe(no_mangle)]
pub extern "C" fn forever_fmt_version() -> u32 {
    capabilities::fmt()
}

#[unsafe(no_mangle)]
pub extern "C" fn forever_aio_version() -> u32 {
    capabilities::aio()
}

#[unsafe(no_mangle)]
pub extern "C" fn forever_dns_version() -> u32 {
    capabilities::dns()
}

// ─── Bootstrap ───────────────────────────────────────────────────────

/// Bootstrap the host process: classify it, and on an ordinary launch run
/// `init` at most once per install (or per app version, if so configured).
///
/// Only the first call in a process does any work. Later calls return the
/// first call's result code; calls from other threads wait for it to finish.
///
/// # Safety
///
/// `config_json` must be a valid, NUL-terminated UTF-8 C string (`""` or
/// `"{}"` for defaults). `init` may be null. `user_data` is passed to `init`
/// untouched and must stay valid until this call returns.
///
/// `init` may call any `forever_*` function on the same thread. While it runs,
/// `forever_bootstrap_state` returns -1, `forever_bootstrap_report_json`
/// returns null, and a nested `forever_bootstrap` returns `InProgress`.
///
/// Config JSON schema:
/// ```json
/// {
///   "data_dir": "/data/user/0/com.example/files",
///   "init_key": "forever.init",
///   "app_version": "4.2.0"
/// }
/// ```
#[unsafe(no_mangle)]
pub unsafe extern "C" fn forever_bootstrap(
    config_json: *const c_char,
    init: Option<InitCallback>,
    user_data: *mut c_void,
) -> i32 {
    let config = match unsafe { read_config(config_json, "forever_bootstrap") } {
        Ok(c) => c,
        Err(code) => return code as i32,
    };

    let guard = BOOTSTRAP.lock();
    {
        let mut slot = guard.borrow_mut();
        if let Slot::Done(previous) = &*slot {
            tracing::debug!("forever_bootstrap: already ran in this process");
            return match previous {
                Ok(_) => FfiResult::Ok as i32,
                Err(code) => *code as i32,
            };
        }
        if matches!(*slot, Slot::Running) {
            tracing::warn!("forever_bootstrap: called from its own init callback");
            return FfiResult::InProgress as i32;
        }
        *slot = Slot::Running;
    }

    let hook = InitHook::new(init, user_data);
    let result = ::forever_bootstrap::bootstrap(&config, || hook.invoke()).map_err(|e| {
        tracing::error!("forever_bootstrap: {e}");
        FfiResult::from(&e)
    });
    let code = match &result {
        Ok(_) => FfiResult::Ok,
        Err(code) => *code,
    };
    *guard.borrow_mut() = Slot::Done(result);
    code as i32
}

/// The bootstrap state reached by the first `forever_bootstrap` call, as its
/// `BootstrapState` discriminant (`4` = ready). Returns -1 if bootstrap has
/// not run or did not complete.
#[unsafe(no_mangle)]
pub extern "C" fn forever_bootstrap_state() -> i32 {
    with_report(|report| report.state() as i32).unwrap_or(-1)
}

/// The full report of the first `forever_bootstrap` call as JSON.
///
/// Returns a newly-allocated C string (caller must free with
/// `forever_free_string`), or null if bootstrap has not completed.
#[unsafe(no_mangle)]
pub extern "C" fn forever_bootstrap_report_json() -> *mut c_char {
    match with_report(serde_json::to_string) {
        Some(Ok(json)) => into_c_string(json),
        Some(Err(e)) => {
            tracing::error!("forever_bootstrap_report_json: {e}");
            std::ptr::null_mut()
        }
        None => std::ptr::null_mut(),
    }
}

// ─── Restart ─────────────────────────────────────────────────────────

/// Relaunch the current executable as a restart of self. The host should
/// exit right after this returns `0`; the new process skips one-time
/// initialization.
///
/// # Safety
///
/// `config_json` must be a valid, NUL-terminated UTF-8 C string, and name
/// the same data directory the new process will bootstrap with.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn forever_request_restart(config_json: *const c_char) -> i32 {
    let config = match unsafe { read_config(config_json, "forever_request_restart") } {
        Ok(c) => c,
        Err(code) => return code as i32,
    };
    let signal = match config.restart_signal() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("forever_request_restart: {e}");
            return FfiResult::from(&e) as i32;
        }
    };
    match ::forever_bootstrap::restart::trigger_restart(&signal) {
        Ok(child) => {
            tracing::info!(pid = child.id(), "forever_request_restart: replacement spawned");
            FfiResult::Ok as i32
        }
        Err(e) => {
            tracing::error!("forever_request_restart: {e}");
            FfiResult::Internal as i32
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    fn make_config(json: &str) -> CString {
        CString::new(json).unwrap()
    }

    #[test]
    fn test_module_version() {
        assert_eq!(forever_module_version(), table::MODULE_VERSION);
    }

    #[test]
    fn test_entry_points_json() {
        let ptr = forever_entry_points_json();
        assert!(!ptr.is_null());
        let json = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
        unsafe { forever_free_string(ptr) };

        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let symbols: Vec<&str> = parsed["entry_points"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["symbol"].as_str().unwrap())
            .collect();
        assert!(symbols.contains(&"forever_bootstrap"));
        assert!(symbols.contains(&"forever_tls_version"));
    }

    #[test]
    fn test_free_null_is_noop() {
        unsafe { forever_free_string(std::ptr::null_mut()) };
    }

    #[test]
    fn test_null_config_is_invalid_argument() {
        let code = unsafe { forever_bootstrap(std::ptr::null(), None, std::ptr::null_mut()) };
        assert_eq!(code, FfiResult::InvalidArgument as i32);
        let code = unsafe { forever_request_restart(std::ptr::null()) };
        assert_eq!(code, FfiResult::InvalidArgument as i32);
    }

    #[test]
    fn test_invalid_json_is_invalid_config() {
        let config = make_config("{not json");
        let code = unsafe { forever_bootstrap(config.as_ptr(), None, std::ptr::null_mut()) };
        assert_eq!(code, FfiResult::InvalidConfig as i32);
    }

    /// What the init callback observed when it called back into the module.
    #[derive(Default)]
    struct Reentry {
        calls: AtomicU32,
        state: AtomicI32,
        report_null: AtomicBool,
        nested: AtomicI32,
    }

    unsafe extern "C" fn reenter(user_data: *mut c_void) -> i32 {
        let seen = unsafe { &*(user_data as *const Reentry) };
        seen.calls.fetch_add(1, Ordering::SeqCst);
        seen.state.store(forever_bootstrap_state(), Ordering::SeqCst);
        let report = forever_bootstrap_report_json();
        seen.report_null.store(report.is_null(), Ordering::SeqCst);
        unsafe { forever_free_string(report) };
        let config = make_config("{}");
        let nested = unsafe { forever_bootstrap(config.as_ptr(), None, std::ptr::null_mut()) };
        seen.nested.store(nested, Ordering::SeqCst);
        0
    }

    // One test owns the process-wide bootstrap slot.
    #[test]
    fn test_bootstrap_runs_once_per_process() {
        let dir = tempfile::tempdir().unwrap();
        let json = serde_json::json!({ "data_dir": dir.path() }).to_string();
        let seen = Arc::new(Reentry::default());

        assert_eq!(forever_bootstrap_state(), -1);
        assert!(forever_bootstrap_report_json().is_null());

        // On a worker thread so a deadlock fails the test instead of hanging it.
        let (tx, rx) = mpsc::channel();
        let worker = {
            let seen = Arc::clone(&seen);
            let json = json.clone();
            std::thread::spawn(move || {
                let config = make_config(&json);
                let user_data = Arc::as_ptr(&seen) as *mut c_void;
                let code = unsafe { forever_bootstrap(config.as_ptr(), Some(reenter), user_data) };
                let _ = tx.send(code);
            })
        };
        let code = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("init callback re-entering the module deadlocked");
        worker.join().unwrap();

        assert_eq!(code, FfiResult::Ok as i32);
        assert_eq!(seen.calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen.state.load(Ordering::SeqCst), -1);
        assert!(seen.report_null.load(Ordering::SeqCst));
        assert_eq!(seen.nested.load(Ordering::SeqCst), FfiResult::InProgress as i32);
        assert_eq!(forever_bootstrap_state(), 4);

        let config = make_config(&json);
        let user_data = Arc::as_ptr(&seen) as *mut c_void;
        let code = unsafe { forever_bootstrap(config.as_ptr(), Some(reenter), user_data) };
        assert_eq!(code, FfiResult::Ok as i32);
        assert_eq!(seen.calls.load(Ordering::SeqCst), 1);

        let ptr = forever_bootstrap_report_json();
        assert!(!ptr.is_null());
        let report: serde_json::Value =
            serde_json::from_str(unsafe { CStr::from_ptr(ptr) }.to_str().unwrap()).unwrap();
        unsafe { forever_free_string(ptr) };
        assert_eq!(report["outcome"]["ran"], true);
        assert!(dir.path().join(::forever_bootstrap::store::MARKER_DB).exists());
    }
}
