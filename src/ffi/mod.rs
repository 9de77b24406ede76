//! C FFI for embedding bcvm
//!
//! This module provides a C-compatible API for embedding the VM in host
//! applications. All public functions use `extern "C"` ABI.
//!
//! # Safety
//!
//! All FFI functions that take raw pointers require:
//! - Valid VM instances created by `bcvm_vm_create()` (NULL is tolerated
//!   and treated as an invalid argument)
//! - A bytecode buffer that outlives the VM created over it
//! - Exclusive access: a VM must not be used from two threads at once

mod error;
mod stack;
mod types;
mod vm_ffi;

// Re-export all FFI types and functions for public use
pub use error::*;
pub use stack::*;
pub use types::*;
pub use vm_ffi::*;

/// Version information
pub const BCVM_VERSION_MAJOR: u32 = 0;
pub const BCVM_VERSION_MINOR: u32 = 1;
pub const BCVM_VERSION_PATCH: u32 = 0;

/// Get the version string
#[unsafe(no_mangle)]
pub extern "C" fn bcvm_version() -> *const std::ffi::c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const std::ffi::c_char
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(BCVM_VERSION_MAJOR, 0);
        assert_eq!(BCVM_VERSION_MINOR, 1);

        let version = unsafe { std::ffi::CStr::from_ptr(bcvm_version()).to_str().unwrap() };
        assert_eq!(
            version,
            format!("{BCVM_VERSION_MAJOR}.{BCVM_VERSION_MINOR}.{BCVM_VERSION_PATCH}")
        );
    }
}
