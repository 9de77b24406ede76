//! Error handling FFI functions.

#![allow(unsafe_op_in_unsafe_fn)]

use super::types::BcvmVm;
use super::vm_ffi::{get_wrapper, get_wrapper_mut};
use std::ffi::c_char;

/// Get the last error message.
///
/// Returns a pointer to the error message string, or NULL if no error.
/// The returned pointer is valid until the next API call that may set an error.
///
/// # Example (C)
/// ```c
/// bcvm_result res = bcvm_vm_run(vm);
/// if (res != BCVM_RESULT_OK) {
///     printf("Error at %lld: %s\n", bcvm_error_ip(vm), bcvm_get_error(vm));
/// }
/// ```
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcvm_get_error(vm: *const BcvmVm) -> *const c_char {
    get_wrapper(vm)
        .and_then(|wrapper| wrapper.last_error.as_ref())
        .map_or(std::ptr::null(), |error| error.as_ptr())
}

/// Offset of the instruction that raised the last error, or -1 if none.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcvm_error_ip(vm: *const BcvmVm) -> i64 {
    get_wrapper(vm)
        .and_then(|wrapper| wrapper.last_error_ip)
        .and_then(|ip| i64::try_from(ip).ok())
        .unwrap_or(-1)
}

/// Clear the last error.
///
/// After calling this, `bcvm_get_error` will return NULL until
/// another error occurs.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcvm_clear_error(vm: *mut BcvmVm) {
    if let Some(wrapper) = get_wrapper_mut(vm) {
        wrapper.clear_error();
    }
}

/// Check if there is a pending error.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcvm_has_error(vm: *const BcvmVm) -> bool {
    get_wrapper(vm).is_some_and(|wrapper| wrapper.last_error.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::types::BcvmResult;
    use crate::ffi::vm_ffi::{bcvm_vm_create, bcvm_vm_destroy, bcvm_vm_run};
    use std::ffi::CStr;

    // PUSH 1, PUSH 0, DIV, HALT
    static DIV_ZERO: [u8; 12] = [
        0x02, 1, 0, 0, 0, 0x02, 0, 0, 0, 0, 0x13, 0x01,
    ];

    #[test]
    fn test_get_error() {
        unsafe {
            let vm = bcvm_vm_create(DIV_ZERO.as_ptr(), DIV_ZERO.len());

            // No error initially
            assert!(bcvm_get_error(vm).is_null());
            assert!(!bcvm_has_error(vm));
            assert_eq!(bcvm_error_ip(vm), -1);

            assert_eq!(bcvm_vm_run(vm), BcvmResult::ErrorDivisionByZero);
            assert!(bcvm_has_error(vm));
            assert_eq!(bcvm_error_ip(vm), 10);
            let error = CStr::from_ptr(bcvm_get_error(vm)).to_str().unwrap();
            assert_eq!(error, "division by zero");

            bcvm_clear_error(vm);
            assert!(!bcvm_has_error(vm));
            assert!(bcvm_get_error(vm).is_null());
            assert_eq!(bcvm_error_ip(vm), -1);

            bcvm_vm_destroy(vm);
        }
    }

    #[test]
    fn test_error_null_vm() {
        unsafe {
            assert!(bcvm_get_error(std::ptr::null()).is_null());
            assert!(!bcvm_has_error(std::ptr::null()));
            assert_eq!(bcvm_error_ip(std::ptr::null()), -1);
            // Should not crash
            bcvm_clear_error(std::ptr::null_mut());
        }
    }
}
