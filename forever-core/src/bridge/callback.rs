//! Safe wrapper around the host's one-time initialization callback.

use std::ffi::c_void;

use forever_bootstrap::InitError;

/// C callback signature: receives the host's opaque user data, returns 0 on success.
pub type InitCallback = unsafe extern "C" fn(user_data: *mut c_void) -> i32;

/// An optional init callback paired with its user_data pointer.
///
/// The host keeps `user_data` valid for the duration of the `forever_bootstrap` call.
pub struct InitHook {
    cb: Option<InitCallback>,
    user_data: *mut c_void,
}

// The callback runs on the thread that called forever_bootstrap, which owns user_data.
unsafe impl Send for InitHook {}
unsafe impl Sync for InitHook {}

impl InitHook {
    pub fn new(cb: Option<InitCallback>, user_data: *mut c_void) -> Self {
        Self { cb, user_data }
    }

    /// Run the callback. No callback means there is nothing to initialize.
    pub fn invoke(&self) -> Result<(), InitError> {
        let Some(cb) = self.cb else {
            return Ok(());
        };
        match unsafe { cb(self.user_data) } {
            0 => Ok(()),
            code => Err(format!("host initialization callback returned {code}").into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn bump(user_data: *mut c_void) -> i32 {
        let counter = unsafe { &mut *(user_data as *mut u32) };
        *counter += 1;
        0
    }

    unsafe extern "C" fn refuse(_: *mut c_void) -> i32 {
        7
    }

    #[test]
    fn callback_sees_user_data() {
        let mut counter = 0u32;
        let hook = InitHook::new(Some(bump), &mut counter as *mut u32 as *mut c_void);
        hook.invoke().unwrap();
        hook.invoke().unwrap();
        assert_eq!(counter, 2);
    }

    #[test]
    fn non_zero_return_is_an_error() {
        let hook = InitHook::new(Some(refuse), std::ptr::null_mut());
        let err = hook.invoke().unwrap_err();
        assert!(err.to_string().contains("returned 7"));
    }

    #[test]
    fn missing_callback_is_a_no_op() {
        assert!(InitHook::new(None, std::ptr::null_mut()).invoke().is_ok());
    }
}
