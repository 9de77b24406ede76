//! Operand stack inspection FFI functions.
//!
//! These let a host read the results a program left on the stack after
//! `bcvm_vm_run()`. The stack is read-only from C.

#![allow(unsafe_op_in_unsafe_fn)]

use super::types::BcvmVm;
use super::vm_ffi::get_wrapper;
use crate::vm::{OperandStack, Value};

/// Resolve a stack index to an absolute index.
///
/// Positive indices are from the bottom (0 = first element).
/// Negative indices are from the top (-1 = last element).
fn resolve_index(stack_len: usize, index: i32) -> Option<usize> {
    if index >= 0 {
        let idx = index as usize;
        (idx < stack_len).then_some(idx)
    } else {
        let offset = index.unsigned_abs() as usize;
        (offset <= stack_len).then(|| stack_len - offset)
    }
}

unsafe fn value_at(vm: *const BcvmVm, index: i32) -> Option<Value> {
    let wrapper = get_wrapper(vm)?;
    let values = wrapper.vm.stack().as_slice();
    resolve_index(values.len(), index).map(|idx| values[idx])
}

/// Get the current operand stack depth.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcvm_stack_depth(vm: *const BcvmVm) -> usize {
    get_wrapper(vm).map_or(0, |wrapper| wrapper.vm.stack().depth())
}

/// Read an integer from the stack.
///
/// Writes the value to `out` and returns true if the entry at `index` is an
/// Int. Returns false, leaving `out` untouched, otherwise.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcvm_stack_peek_int(vm: *const BcvmVm, index: i32, out: *mut i64) -> bool {
    if out.is_null() {
        return false;
    }
    match value_at(vm, index) {
        Some(Value::Int(n)) => {
            *out = n;
            true
        }
        _ => false,
    }
}

/// Read a number from the stack as a double.
///
/// Int entries are converted. Returns false for Null, references and
/// invalid indices.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcvm_stack_peek_float(vm: *const BcvmVm, index: i32, out: *mut f64) -> bool {
    if out.is_null() {
        return false;
    }
    match value_at(vm, index).and_then(|v| v.as_float()) {
        Some(f) => {
            *out = f;
            true
        }
        None => false,
    }
}

/// Check if the value at the given index is null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcvm_stack_is_null(vm: *const BcvmVm, index: i32) -> bool {
    value_at(vm, index).is_some_and(|v| v.is_null())
}

/// Check if the value at the given index is a heap reference.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcvm_stack_is_ref(vm: *const BcvmVm, index: i32) -> bool {
    value_at(vm, index).is_some_and(|v| v.is_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::vm_ffi::{bcvm_vm_create, bcvm_vm_destroy, bcvm_vm_run};
    use crate::vm::{Instruction, encode};

    #[test]
    fn test_resolve_index() {
        assert_eq!(resolve_index(5, 0), Some(0));
        assert_eq!(resolve_index(5, 4), Some(4));
        assert_eq!(resolve_index(5, 5), None);
        assert_eq!(resolve_index(5, -1), Some(4));
        assert_eq!(resolve_index(5, -5), Some(0));
        assert_eq!(resolve_index(5, -6), None);
        assert_eq!(resolve_index(0, i32::MIN), None);
    }

    #[test]
    fn test_peek_results() {
        let code = encode(&[
            Instruction::Push(42),
            Instruction::PushFloat(2.5),
            Instruction::PushNull,
            Instruction::New(1),
        ]);
        unsafe {
            let vm = bcvm_vm_create(code.as_ptr(), code.len());
            bcvm_vm_run(vm);
            assert_eq!(bcvm_stack_depth(vm), 4);

            let mut n = 0i64;
            assert!(bcvm_stack_peek_int(vm, 0, &mut n));
            assert_eq!(n, 42);
            assert!(!bcvm_stack_peek_int(vm, 1, &mut n));
            assert_eq!(n, 42);

            let mut f = 0.0f64;
            assert!(bcvm_stack_peek_float(vm, -3, &mut f));
            assert_eq!(f, 2.5);
            assert!(bcvm_stack_peek_float(vm, 0, &mut f));
            assert_eq!(f, 42.0);
            assert!(!bcvm_stack_peek_float(vm, -2, &mut f));

            assert!(bcvm_stack_is_null(vm, -2));
            assert!(bcvm_stack_is_ref(vm, -1));
            assert!(!bcvm_stack_is_ref(vm, 7));

            bcvm_vm_destroy(vm);
        }
    }

    #[test]
    fn test_null_arguments() {
        unsafe {
            let mut n = 0i64;
            assert_eq!(bcvm_stack_depth(std::ptr::null()), 0);
            assert!(!bcvm_stack_peek_int(std::ptr::null(), 0, &mut n));
            assert!(!bcvm_stack_peek_float(std::ptr::null(), 0, std::ptr::null_mut()));
        }
    }
}
