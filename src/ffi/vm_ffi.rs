//! VM lifecycle FFI functions.

#![allow(unsafe_op_in_unsafe_fn)]

use tracing::warn;

use super::types::{BcvmResult, BcvmVm, VmWrapper};
use crate::config::RuntimeConfig;
use crate::vm::{ExecutionResult, Vm};

/// Create a VM over `size` bytes of bytecode with the default limits.
///
/// Returns NULL if `bytecode` is NULL or `size` is 0. The returned VM must
/// be released with `bcvm_vm_destroy()`.
///
/// # Safety
///
/// - `bytecode` must point to `size` readable bytes
/// - The bytecode buffer is borrowed, not copied: it must stay valid and
///   unmodified until the VM is destroyed
///
/// # Example (C)
/// ```c
/// bcvm_vm *vm = bcvm_vm_create(code, code_len);
/// if (vm == NULL) {
///     // Handle creation failure
/// }
/// bcvm_result res = bcvm_vm_run(vm);
/// bcvm_vm_destroy(vm);
/// ```
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcvm_vm_create(bytecode: *const u8, size: usize) -> *mut BcvmVm {
    create(bytecode, size, RuntimeConfig::default())
}

/// Create a VM with explicit resource limits.
///
/// Returns NULL on a NULL/empty buffer or when a limit is invalid (zero
/// stack or call depth).
///
/// # Safety
///
/// Same contract as `bcvm_vm_create()`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcvm_vm_create_with_limits(
    bytecode: *const u8,
    size: usize,
    max_stack_depth: usize,
    max_call_depth: usize,
    heap_budget: usize,
) -> *mut BcvmVm {
    create(
        bytecode,
        size,
        RuntimeConfig::with_limits(max_stack_depth, max_call_depth, heap_budget),
    )
}

unsafe fn create(bytecode: *const u8, size: usize, config: RuntimeConfig) -> *mut BcvmVm {
    if bytecode.is_null() {
        warn!("bcvm_vm_create called with a null bytecode pointer");
        return std::ptr::null_mut();
    }
    let code: &'static [u8] = std::slice::from_raw_parts(bytecode, size);
    match Vm::new(code, config) {
        Ok(vm) => Box::into_raw(Box::new(VmWrapper::new(vm))) as *mut BcvmVm,
        Err(error) => {
            warn!(%error, "vm creation failed");
            std::ptr::null_mut()
        }
    }
}

/// Run the VM until it halts.
///
/// Returns `BCVM_RESULT_OK` on normal completion, otherwise the code of the error
/// that halted execution. The message and instruction offset are available
/// through `bcvm_get_error()` and `bcvm_error_ip()`.
///
/// # Safety
///
/// `vm` must be NULL or a live pointer returned by a create function.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcvm_vm_run(vm: *mut BcvmVm) -> BcvmResult {
    let Some(wrapper) = get_wrapper_mut(vm) else {
        return BcvmResult::ErrorInvalidArg;
    };
    let result = wrapper.vm.run();
    match &result {
        ExecutionResult::Completed => wrapper.clear_error(),
        ExecutionResult::Error { error, ip } => wrapper.set_error(error, *ip),
    }
    BcvmResult::from(&result)
}

/// Destroy a VM instance and release all of its storage.
///
/// After this call, the VM pointer is invalid and must not be used.
/// Passing NULL is a no-op.
///
/// # Safety
///
/// - `vm` must be NULL or a pointer returned by a create function
/// - `vm` must not have been destroyed already
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcvm_vm_destroy(vm: *mut BcvmVm) {
    if vm.is_null() {
        return;
    }
    let mut wrapper = Box::from_raw(vm as *mut VmWrapper);
    wrapper.vm.destroy();
}

/// Helper to get a mutable reference to the wrapper from a raw pointer.
///
/// Returns None if the pointer is null.
pub(crate) unsafe fn get_wrapper_mut<'a>(vm: *mut BcvmVm) -> Option<&'a mut VmWrapper> {
    if vm.is_null() {
        None
    } else {
        Some(&mut *(vm as *mut VmWrapper))
    }
}

/// Helper to get an immutable reference to the wrapper from a raw pointer.
///
/// Returns None if the pointer is null.
pub(crate) unsafe fn get_wrapper<'a>(vm: *const BcvmVm) -> Option<&'a VmWrapper> {
    if vm.is_null() {
        None
    } else {
        Some(&*(vm as *const VmWrapper))
    }
}
